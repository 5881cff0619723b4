// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The durable per-worker marker file.
//!
//! A worker writes a marker immediately before each test begins and removes
//! it immediately after the test ends, whatever the outcome. If the worker
//! process dies hard in between, the marker survives and is the sole
//! witness the supervising process uses to attribute the crash.
//!
//! The marker is exclusively owned by the worker that writes it; the
//! supervising process only reads it, and only after the worker has exited.

use crate::{errors::MarkerWriteError, helpers};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::warn;

/// Status value a marker carries while its test is executing.
pub static STATUS_RUNNING: &str = "running";

/// Worker id used when the parallelization layer doesn't supply one.
pub static DEFAULT_WORKER_ID: &str = "main";

/// A record of the test currently executing in one worker process.
///
/// All fields default on deserialization: the detector, not the parser,
/// decides what an incomplete marker means.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct MarkerRecord {
    /// Short test name.
    #[serde(default)]
    pub test_name: String,
    /// Full test identifier.
    #[serde(default)]
    pub nodeid: String,
    /// ISO-8601 timestamp taken just before the test body ran.
    #[serde(default)]
    pub start_time: String,
    /// `"running"` while the test executes.
    #[serde(default)]
    pub status: String,
    /// Process id of the worker that wrote the marker.
    #[serde(default)]
    pub pid: Option<u32>,
    /// Device identifier the worker was pinned to, if any.
    #[serde(default)]
    pub gpu_id: Option<String>,
}

impl MarkerRecord {
    /// Creates a running marker for the given test, stamped with the
    /// current time and this process's id.
    pub fn running(
        test_name: impl Into<String>,
        nodeid: impl Into<String>,
        gpu_id: impl Into<String>,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            nodeid: nodeid.into(),
            start_time: helpers::now_iso(),
            status: STATUS_RUNNING.to_owned(),
            pid: Some(std::process::id()),
            gpu_id: Some(gpu_id.into()),
        }
    }

    /// Returns true if the marker says a test was mid-execution.
    pub fn is_running(&self) -> bool {
        self.status == STATUS_RUNNING
    }
}

/// Returns the marker path for one sub-worker within `dir`.
///
/// Uniqueness across sub-workers is the parallelization layer's contract:
/// it must hand each sub-worker a distinct worker id.
pub fn marker_path_in_dir(dir: &Utf8Path, worker_id: &str) -> Utf8PathBuf {
    dir.join(format!("last_running_{worker_id}.json"))
}

/// Atomically persists `record` at `path`.
///
/// The record is written to a temporary sibling and renamed into place, so
/// a reader never observes a partially written marker.
pub fn write_marker(path: &Utf8Path, record: &MarkerRecord) -> Result<(), MarkerWriteError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| MarkerWriteError::ParentDirCreate {
            path: parent.to_owned(),
            error,
        })?;
    }
    let json =
        serde_json::to_string_pretty(record).map_err(|error| MarkerWriteError::Serialize { error })?;
    AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
        .write(|file| file.write_all(json.as_bytes()))
        .map_err(|error| MarkerWriteError::Write {
            path: path.to_owned(),
            error,
        })?;
    Ok(())
}

/// Removes the marker at `path` if it exists.
///
/// Idempotent and best-effort: I/O failures are logged and swallowed. A
/// stray marker must never take the test run down with it.
pub fn clear_marker(path: &Utf8Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => warn!("failed to remove marker file `{path}`: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use pretty_assertions::assert_eq;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().expect("created temp dir");
        let path = dir.path().join("nested/last_running_main.json");

        let record = MarkerRecord::running("test_foo", "tests/test_mod.py::test_foo", "0");
        write_marker(&path, &record).expect("marker written");

        let contents = std::fs::read_to_string(&path).expect("marker readable");
        let parsed: MarkerRecord = serde_json::from_str(&contents).expect("marker parses");
        assert_eq!(parsed, record);
        assert!(parsed.is_running());
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempdir().expect("created temp dir");
        let path = dir.path().join("last_running_main.json");

        let record = MarkerRecord::running("test_foo", "tests/test_mod.py::test_foo", "0");
        write_marker(&path, &record).expect("marker written");

        clear_marker(&path);
        assert!(!path.exists());
        // A second clear of a missing marker is a no-op.
        clear_marker(&path);
    }

    #[test]
    fn per_worker_paths_are_distinct() {
        let dir = Utf8Path::new("/markers");
        assert_eq!(
            marker_path_in_dir(dir, "gw0"),
            Utf8PathBuf::from("/markers/last_running_gw0.json")
        );
        assert_ne!(marker_path_in_dir(dir, "gw0"), marker_path_in_dir(dir, "gw1"));
    }

    #[test]
    fn incomplete_marker_still_parses() {
        let parsed: MarkerRecord =
            serde_json::from_str(r#"{"status": "running"}"#).expect("defaults fill in");
        assert!(parsed.is_running());
        assert_eq!(parsed.pid, None);
        assert_eq!(parsed.start_time, "");
    }
}
