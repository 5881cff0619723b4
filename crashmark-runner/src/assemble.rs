// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Final report assembly for a session's log directory.
//!
//! After all workers have exited and crashes have been reconciled, the
//! per-file documents are folded into session-wide artifacts: the embedded
//! blobs are sanitized, an external merger combines the HTML documents
//! (bounded by a timeout and fully recoverable when it misbehaves), and
//! the JSON documents are combined and flattened to a summary CSV.

use crate::{
    errors::AssembleError,
    reconcile::{self, SanitizeStats, csv},
};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::Value;
use std::{
    io::{Read, Write},
    process::{Command, Stdio},
    time::{Duration, Instant},
};
use tracing::{info, warn};

/// Program invoked to merge per-file HTML documents.
pub static DEFAULT_HTML_MERGER: &str = "pytest_html_merger";

/// Default bound on the external merger's runtime.
pub const DEFAULT_MERGE_TIMEOUT: Duration = Duration::from_secs(300);

static COMPILED_JSON_NAME: &str = "final_compiled_report.json";
static COMPILED_HTML_NAME: &str = "final_compiled_report.html";
static COMPILED_CSV_NAME: &str = "final_compiled_report.csv";

/// Options for [`generate_final_report`].
#[derive(Clone, Debug)]
pub struct FinalReportOptions {
    /// The external HTML merger program.
    pub html_merger: String,
    /// Bound on the merger's runtime.
    pub merge_timeout: Duration,
}

impl Default for FinalReportOptions {
    fn default() -> Self {
        Self {
            html_merger: DEFAULT_HTML_MERGER.to_owned(),
            merge_timeout: DEFAULT_MERGE_TIMEOUT,
        }
    }
}

/// What [`generate_final_report`] produced.
#[derive(Clone, Debug)]
pub struct FinalReport {
    /// Counts from the blob sanitation pass.
    pub sanitize: SanitizeStats,
    /// Whether the external HTML merge succeeded.
    pub html_merged: bool,
    /// Path of the combined JSON report.
    pub compiled_json: Utf8PathBuf,
    /// Path of the summary CSV.
    pub compiled_csv: Utf8PathBuf,
    /// Rows written to the summary CSV.
    pub csv_rows: usize,
}

fn list_reports(log_dir: &Utf8Path, suffix: &str) -> Result<Vec<Utf8PathBuf>, AssembleError> {
    let entries = log_dir
        .read_dir_utf8()
        .map_err(|error| AssembleError::DirList {
            path: log_dir.to_owned(),
            error,
        })?;
    let mut paths: Vec<Utf8PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.into_path())
        .filter(|path| path.as_str().ends_with(suffix))
        .collect();
    paths.sort();
    Ok(paths)
}

fn write_json_pretty(path: &Utf8Path, value: &Value) -> Result<(), AssembleError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut serializer)
        .expect("JSON value serializes");
    AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
        .write(|file| file.write_all(&buf))
        .map_err(|error| AssembleError::ReportWrite {
            path: path.to_owned(),
            error,
        })
}

/// Combines every `*_log.json` document under `log_dir` into one compiled
/// report (a JSON array of the per-file documents).
///
/// Returns the output path, defaulting to `final_compiled_report.json`
/// inside `log_dir`.
pub fn combine_json_reports(
    log_dir: &Utf8Path,
    out_file: Option<&Utf8Path>,
) -> Result<Utf8PathBuf, AssembleError> {
    let out = out_file
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| log_dir.join(COMPILED_JSON_NAME));

    let mut combined = Vec::new();
    for path in list_reports(log_dir, "_log.json")? {
        let contents =
            std::fs::read_to_string(&path).map_err(|error| AssembleError::ReportRead {
                path: path.clone(),
                error,
            })?;
        let report: Value =
            serde_json::from_str(&contents).map_err(|error| AssembleError::ReportParse {
                path: path.clone(),
                error,
            })?;
        combined.push(report);
    }

    write_json_pretty(&out, &Value::Array(combined))?;
    Ok(out)
}

/// Flattens a compiled JSON report (an array of per-file documents) into a
/// summary CSV with one row per test. Returns the row count.
pub fn compiled_json_to_csv(
    json_file: &Utf8Path,
    csv_file: &Utf8Path,
) -> Result<usize, AssembleError> {
    let contents = std::fs::read_to_string(json_file).map_err(|error| AssembleError::ReportRead {
        path: json_file.to_owned(),
        error,
    })?;
    let compiled: Value =
        serde_json::from_str(&contents).map_err(|error| AssembleError::ReportParse {
            path: json_file.to_owned(),
            error,
        })?;

    let mut rows: Vec<Vec<String>> = Vec::new();
    for report in compiled.as_array().map(Vec::as_slice).unwrap_or_default() {
        let Some(tests) = report.get("tests").and_then(Value::as_array) else {
            continue;
        };
        for test in tests {
            let keywords = test
                .get("keywords")
                .and_then(Value::as_array)
                .map(|keywords| {
                    keywords
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(";")
                })
                .unwrap_or_default();
            let duration = test
                .get("call")
                .and_then(|call| call.get("duration"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            rows.push(vec![
                test.get("nodeid").and_then(Value::as_str).unwrap_or("").to_owned(),
                test.get("outcome").and_then(Value::as_str).unwrap_or("").to_owned(),
                format!("{duration}"),
                keywords,
            ]);
        }
    }

    let mut content = String::new();
    content.push_str("name,outcome,duration,keywords\n");
    for row in &rows {
        content.push_str(&csv::write_record(row));
        content.push('\n');
    }
    AtomicFile::new(csv_file, OverwriteBehavior::AllowOverwrite)
        .write(|file| file.write_all(content.as_bytes()))
        .map_err(|error| AssembleError::ReportWrite {
            path: csv_file.to_owned(),
            error,
        })?;

    Ok(rows.len())
}

/// Runs the external HTML merger over `log_dir`, bounded by `timeout`.
///
/// Non-zero exit, a spawn failure, and the timeout are all reported as
/// errors; the caller treats them as recoverable and keeps assembling the
/// remaining artifacts.
pub fn merge_html_reports(
    log_dir: &Utf8Path,
    out_file: Option<&Utf8Path>,
    program: &str,
    timeout: Duration,
) -> Result<(), AssembleError> {
    let out = out_file
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| log_dir.join(COMPILED_HTML_NAME));

    let mut child = Command::new(program)
        .arg("-i")
        .arg(log_dir.as_std_path())
        .arg("-o")
        .arg(out.as_std_path())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| AssembleError::MergerSpawn {
            program: program.to_owned(),
            error,
        })?;

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(AssembleError::MergerTimeout {
                        program: program.to_owned(),
                        timeout,
                    });
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(error) => {
                return Err(AssembleError::MergerWait {
                    program: program.to_owned(),
                    error,
                });
            }
        }
    };

    if !status.success() {
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }
        return Err(AssembleError::MergerFailed {
            program: program.to_owned(),
            status,
            stderr: stderr.trim().to_owned(),
        });
    }
    Ok(())
}

/// Assembles the final artifacts for `log_dir`: sanitize embedded blobs,
/// merge the HTML documents, combine the JSON documents, and flatten them
/// to a summary CSV.
///
/// A failing merge is recovered: the remaining steps still run with
/// whatever partial state exists.
pub fn generate_final_report(
    log_dir: &Utf8Path,
    options: &FinalReportOptions,
) -> Result<FinalReport, AssembleError> {
    let sanitize = reconcile::sanitize_report_dir(log_dir);
    if sanitize.scanned > 0 {
        info!(
            "sanitized embedded blobs: modified={}/{}, failed={}",
            sanitize.modified, sanitize.scanned, sanitize.failed,
        );
    }

    let html_merged = match merge_html_reports(
        log_dir,
        None,
        &options.html_merger,
        options.merge_timeout,
    ) {
        Ok(()) => true,
        Err(error) => {
            warn!("HTML merge failed, continuing with JSON report assembly: {error}");
            false
        }
    };

    let compiled_json = combine_json_reports(log_dir, None)?;
    let compiled_csv = log_dir.join(COMPILED_CSV_NAME);
    let csv_rows = compiled_json_to_csv(&compiled_json, &compiled_csv)?;

    Ok(FinalReport {
        sanitize,
        html_merged,
        compiled_json,
        compiled_csv,
        csv_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn seed_report(dir: &Utf8Path, name: &str, tests: Value) {
        std::fs::write(
            dir.join(name),
            json!({"summary": {"total": 1}, "tests": tests}).to_string(),
        )
        .expect("report written");
    }

    #[test]
    fn combine_and_flatten() {
        let dir = tempdir().expect("created temp dir");
        seed_report(
            dir.path(),
            "a_log.json",
            json!([{
                "nodeid": "tests/a.py::test_one",
                "outcome": "passed",
                "keywords": ["test_one", "a"],
                "call": {"duration": 1.25, "outcome": "passed"},
            }]),
        );
        seed_report(
            dir.path(),
            "b_log.json",
            json!([{
                "nodeid": "tests/b.py::test_two",
                "outcome": "failed",
            }]),
        );
        // Not matching the report pattern: ignored.
        std::fs::write(dir.path().join("notes.json"), "{}").expect("file written");

        let compiled = combine_json_reports(dir.path(), None).expect("combine succeeds");
        let value: Value =
            serde_json::from_str(&std::fs::read_to_string(&compiled).expect("readable"))
                .expect("compiled parses");
        assert_eq!(value.as_array().expect("array").len(), 2);

        let csv_path = dir.path().join("summary.csv");
        let rows = compiled_json_to_csv(&compiled, &csv_path).expect("flatten succeeds");
        assert_eq!(rows, 2);

        let content = std::fs::read_to_string(&csv_path).expect("readable");
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("name,outcome,duration,keywords"));
        assert_eq!(
            lines.next(),
            Some("tests/a.py::test_one,passed,1.25,test_one;a")
        );
        assert_eq!(lines.next(), Some("tests/b.py::test_two,failed,0,"));
    }

    #[test]
    fn unparsable_report_fails_combine() {
        let dir = tempdir().expect("created temp dir");
        std::fs::write(dir.path().join("bad_log.json"), "nope").expect("report written");
        assert!(matches!(
            combine_json_reports(dir.path(), None),
            Err(AssembleError::ReportParse { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn merger_success_and_failure_paths() {
        let dir = tempdir().expect("created temp dir");
        let merger = dir.path().join("fake_merger.sh");
        std::fs::write(&merger, "#!/bin/sh\nexit 0\n").expect("script written");
        make_executable(&merger);

        merge_html_reports(dir.path(), None, merger.as_str(), Duration::from_secs(5))
            .expect("merge succeeds");

        std::fs::write(&merger, "#!/bin/sh\necho boom >&2\nexit 3\n").expect("script written");
        let error = merge_html_reports(dir.path(), None, merger.as_str(), Duration::from_secs(5))
            .expect_err("merge fails");
        match error {
            AssembleError::MergerFailed { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn merger_timeout_is_bounded() {
        let dir = tempdir().expect("created temp dir");
        let merger = dir.path().join("slow_merger.sh");
        std::fs::write(&merger, "#!/bin/sh\nsleep 30\n").expect("script written");
        make_executable(&merger);

        let started = Instant::now();
        let error = merge_html_reports(
            dir.path(),
            None,
            merger.as_str(),
            Duration::from_millis(200),
        )
        .expect_err("merge times out");
        assert!(matches!(error, AssembleError::MergerTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    fn make_executable(path: &Utf8Path) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path.as_std_path(), std::fs::Permissions::from_mode(0o755))
            .expect("permissions set");
    }

    #[cfg(unix)]
    #[test]
    fn final_report_recovers_from_a_missing_merger() {
        let dir = tempdir().expect("created temp dir");
        seed_report(dir.path(), "a_log.json", json!([]));

        let options = FinalReportOptions {
            html_merger: "/definitely/not/a/merger".to_owned(),
            merge_timeout: Duration::from_secs(1),
        };
        let report = generate_final_report(dir.path(), &options).expect("assembly succeeds");
        assert!(!report.html_merged);
        assert!(report.compiled_json.exists());
        assert!(report.compiled_csv.exists());
        assert_eq!(report.csv_rows, 0);
    }
}
