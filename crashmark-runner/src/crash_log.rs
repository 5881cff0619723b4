// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The append-only crash log shared by workers and retry attempts.
//!
//! One JSON object per line. Appends take a short-lived exclusive advisory
//! lock so concurrent sub-workers never interleave partial lines; when the
//! platform refuses the lock the append degrades to an unsynchronized write
//! (a known, accepted race). Readers never take a lock and tolerate an
//! incomplete trailing line by skipping anything that doesn't parse.

use crate::{errors::CrashLogError, helpers};
use camino::{Utf8Path, Utf8PathBuf};
use fs4::FileExt;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, io::Write};
use tracing::warn;

fn unknown() -> String {
    "unknown".to_owned()
}

fn unknown_class() -> String {
    helpers::UNKNOWN_CLASS.to_owned()
}

/// One observed crash, attributed to a test identifier.
///
/// Derived from a surviving marker plus elapsed-time computation, immutable
/// once written to the log. Optional fields carry documented fallbacks,
/// applied by [`CrashRecord::normalized`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct CrashRecord {
    /// Test name; falls back to the identifier when absent.
    #[serde(default)]
    pub test_name: String,
    /// Best-effort class derived from the identifier.
    #[serde(default = "unknown_class")]
    pub test_class: String,
    /// Full test identifier.
    #[serde(default)]
    pub nodeid: String,
    /// Human-readable reason; a fixed string for marker-detected crashes.
    #[serde(default)]
    pub reason: String,
    /// When the crash was detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crash_time: Option<String>,
    /// Alias of `crash_time` used by report patchers; filled from
    /// `crash_time` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_time: Option<String>,
    /// Elapsed seconds between the marker's start time and detection.
    #[serde(default)]
    pub duration: f64,
    /// Device identifier from the marker.
    #[serde(default = "unknown")]
    pub gpu_id: String,
    /// Worker process id from the marker, stringly per the wire format.
    #[serde(default = "unknown")]
    pub pid: String,
    /// Which component logged the crash; stamped on append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// When the record was appended; stamped on append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logged_at: Option<String>,
}

impl CrashRecord {
    /// Applies the documented fallback chains: the identifier is trimmed,
    /// `test_name` falls back to the identifier, and `abort_time` falls
    /// back to `crash_time`.
    pub fn normalized(mut self) -> Self {
        self.nodeid = self.nodeid.trim().to_owned();
        let test_name = self.test_name.trim();
        self.test_name = if test_name.is_empty() {
            if self.nodeid.is_empty() {
                "unknown_test".to_owned()
            } else {
                self.nodeid.clone()
            }
        } else {
            test_name.to_owned()
        };
        if self
            .abort_time
            .as_deref()
            .is_none_or(|time| time.trim().is_empty())
        {
            self.abort_time = self.crash_time.clone();
        }
        self
    }

    /// The timestamp shown in synthesized report entries.
    pub(crate) fn abort_time_display(&self) -> &str {
        self.abort_time
            .as_deref()
            .or(self.crash_time.as_deref())
            .unwrap_or("")
    }
}

/// Handle to the crash log at a fixed path.
///
/// The file need not exist; reads of a missing log are empty and the first
/// append creates it.
#[derive(Clone, Debug)]
pub struct CrashLog {
    path: Utf8PathBuf,
}

impl CrashLog {
    /// Creates a handle to the crash log at `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The log's path.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Appends one crash record, stamped with `source` and the current
    /// time, as a single line under a short-lived exclusive lock.
    pub fn append(&self, record: &CrashRecord, source: &str) -> Result<(), CrashLogError> {
        let mut record = record.clone();
        record.source = Some(source.to_owned());
        record.logged_at = Some(helpers::now_iso());

        let mut line =
            serde_json::to_string(&record).map_err(|error| CrashLogError::Serialize { error })?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| CrashLogError::ParentDirCreate {
                path: parent.to_owned(),
                error,
            })?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|error| CrashLogError::Open {
                path: self.path.clone(),
                error,
            })?;

        // Held only for the duration of this one write.
        let locked = match file.lock_exclusive() {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    "no exclusive lock on crash log `{}`, appending unsynchronized: {error}",
                    self.path
                );
                false
            }
        };

        let result = file
            .write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|error| CrashLogError::Write {
                path: self.path.clone(),
                error,
            });

        if locked {
            let _ = file.unlock();
        }
        result
    }

    /// Reads every crash record in file order.
    ///
    /// A missing log reads as empty; a line that doesn't parse is skipped,
    /// never fatal.
    pub fn read_all(&self) -> Vec<CrashRecord> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(error) => {
                warn!("failed to read crash log `{}`: {error}", self.path);
                return Vec::new();
            }
        };
        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| serde_json::from_str::<CrashRecord>(line).ok())
            .collect()
    }

    /// Reads the log and deduplicates by trimmed identifier, first
    /// occurrence authoritative, preserving file order. Records without an
    /// identifier are dropped.
    pub fn unique_crashes(&self) -> Vec<CrashRecord> {
        let mut seen = HashSet::new();
        let mut crashes = Vec::new();
        for record in self.read_all() {
            let record = record.normalized();
            if record.nodeid.is_empty() {
                continue;
            }
            if seen.insert(record.nodeid.clone()) {
                crashes.push(record);
            }
        }
        crashes
    }

    /// The deduplicated identifiers of every crash observed so far.
    pub fn crashed_nodeids(&self) -> Vec<String> {
        self.unique_crashes()
            .into_iter()
            .map(|record| record.nodeid)
            .collect()
    }

    /// Truncates the log, creating parent directories as needed.
    pub fn clear(&self) -> Result<(), CrashLogError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| CrashLogError::ParentDirCreate {
                path: parent.to_owned(),
                error,
            })?;
        }
        std::fs::write(&self.path, b"").map_err(|error| CrashLogError::Write {
            path: self.path.clone(),
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use pretty_assertions::assert_eq;

    fn record(nodeid: &str) -> CrashRecord {
        CrashRecord {
            test_name: nodeid.to_owned(),
            test_class: helpers::UNKNOWN_CLASS.to_owned(),
            nodeid: nodeid.to_owned(),
            reason: "test crashed: fatal signal or abort".to_owned(),
            crash_time: Some("2026-01-01T00:00:00+00:00".to_owned()),
            abort_time: None,
            duration: 1.5,
            gpu_id: "0".to_owned(),
            pid: "123".to_owned(),
            source: None,
            logged_at: None,
        }
    }

    #[test]
    fn append_stamps_source_and_logged_at() {
        let dir = tempdir().expect("created temp dir");
        let log = CrashLog::new(dir.path().join("nested/crashed_tests.jsonl"));

        log.append(&record("tests/test_mod.py::test_a"), "runner")
            .expect("append succeeds");

        let records = log.read_all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source.as_deref(), Some("runner"));
        assert!(records[0].logged_at.is_some());
    }

    #[test]
    fn read_all_skips_unparsable_lines() {
        let dir = tempdir().expect("created temp dir");
        let path = dir.path().join("crashed_tests.jsonl");
        let log = CrashLog::new(path.clone());

        log.append(&record("tests/test_mod.py::test_a"), "runner")
            .expect("append succeeds");
        // Simulate a torn write from a crashed appender.
        let mut contents = std::fs::read_to_string(&path).expect("log readable");
        contents.push_str("{\"nodeid\": \"tests/test_mod.py::te");
        std::fs::write(&path, contents).expect("log rewritten");

        let records = log.read_all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].nodeid, "tests/test_mod.py::test_a");
    }

    #[test]
    fn unique_crashes_dedups_first_seen_with_whitespace_variance() {
        let dir = tempdir().expect("created temp dir");
        let log = CrashLog::new(dir.path().join("crashed_tests.jsonl"));

        log.append(&record("tests/test_mod.py::test_a"), "runner")
            .expect("append succeeds");
        log.append(&record(" tests/test_mod.py::test_a "), "runner")
            .expect("append succeeds");
        log.append(&record("tests/test_other.py::TestCls::test_b"), "worker:gw1")
            .expect("append succeeds");

        let crashes = log.unique_crashes();
        assert_eq!(
            crashes.iter().map(|c| c.nodeid.as_str()).collect::<Vec<_>>(),
            vec![
                "tests/test_mod.py::test_a",
                "tests/test_other.py::TestCls::test_b",
            ],
        );
        // First occurrence is authoritative.
        assert_eq!(crashes[0].source.as_deref(), Some("runner"));
    }

    #[test]
    fn missing_log_reads_empty() {
        let dir = tempdir().expect("created temp dir");
        let log = CrashLog::new(dir.path().join("absent.jsonl"));
        assert_eq!(log.read_all(), Vec::new());
        assert_eq!(log.crashed_nodeids(), Vec::<String>::new());
    }

    #[test]
    fn clear_truncates() {
        let dir = tempdir().expect("created temp dir");
        let log = CrashLog::new(dir.path().join("crashed_tests.jsonl"));
        log.append(&record("tests/test_mod.py::test_a"), "runner")
            .expect("append succeeds");
        log.clear().expect("clear succeeds");
        assert_eq!(log.read_all(), Vec::new());
    }

    #[test]
    fn normalized_applies_fallback_chains() {
        let parsed: CrashRecord = serde_json::from_str(
            r#"{"nodeid": " tests/test_mod.py::test_a ", "crash_time": "2026-01-01T00:00:00", "duration": 1.0}"#,
        )
        .expect("minimal record parses");
        let normalized = parsed.normalized();
        assert_eq!(normalized.nodeid, "tests/test_mod.py::test_a");
        assert_eq!(normalized.test_name, "tests/test_mod.py::test_a");
        assert_eq!(
            normalized.abort_time.as_deref(),
            Some("2026-01-01T00:00:00")
        );
        assert_eq!(normalized.test_class, helpers::UNKNOWN_CLASS);
        assert_eq!(normalized.gpu_id, "unknown");
    }
}
