// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The structured (JSON) report variant.
//!
//! The document is a single JSON value with running summary counters, so
//! patching is a whole-document read-modify-write finished by an atomic
//! rename. Reconciliation runs single-threaded per report file.

use super::{crash_longrepr, display_nodeid};
use crate::{crash_log::CrashRecord, errors::ReconcileError};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::Utf8Path;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::{collections::HashSet, io::Write};

#[derive(Serialize)]
struct StageOutcome {
    duration: f64,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    longrepr: Option<String>,
}

#[derive(Serialize)]
struct FailureEntry {
    nodeid: String,
    lineno: u32,
    outcome: &'static str,
    keywords: Vec<String>,
    setup: StageOutcome,
    call: StageOutcome,
    teardown: StageOutcome,
}

fn failure_entry(testfile: &str, crash: &CrashRecord) -> FailureEntry {
    FailureEntry {
        nodeid: display_nodeid(&crash.test_name, testfile),
        lineno: 1,
        outcome: "failed",
        keywords: vec![
            crash.test_name.clone(),
            testfile.to_owned(),
            "crashed".to_owned(),
            crash.test_class.clone(),
            String::new(),
        ],
        setup: StageOutcome {
            duration: 0.0,
            outcome: "passed",
            longrepr: None,
        },
        call: StageOutcome {
            duration: crash.duration,
            outcome: "failed",
            longrepr: Some(crash_longrepr(crash)),
        },
        teardown: StageOutcome {
            duration: 0.0,
            outcome: "skipped",
            longrepr: None,
        },
    }
}

/// The set of identifiers already recorded in the document at `path`.
///
/// Unreadable or unparsable documents yield an empty set; `append_crash`
/// surfaces the real error.
pub(crate) fn existing_nodeids(path: &Utf8Path) -> HashSet<String> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return HashSet::new();
    };
    let Ok(document) = serde_json::from_str::<Value>(&contents) else {
        return HashSet::new();
    };
    let mut nodeids = HashSet::new();
    if let Some(tests) = document.get("tests").and_then(Value::as_array) {
        for test in tests {
            if let Some(nodeid) = test.get("nodeid").and_then(Value::as_str) {
                let nodeid = nodeid.trim();
                if !nodeid.is_empty() {
                    nodeids.insert(nodeid.to_owned());
                }
            }
        }
    }
    nodeids
}

fn bump_counter(summary: &mut Map<String, Value>, key: &str) {
    let count = summary.get(key).and_then(Value::as_i64).unwrap_or(0);
    summary.insert(key.to_owned(), Value::from(count + 1));
}

/// Appends one synthetic failure entry for `crash`, creating the document
/// from an empty skeleton when absent, and rewrites it atomically.
pub(crate) fn append_crash(
    path: &Utf8Path,
    testfile: &str,
    crash: &CrashRecord,
) -> Result<(), ReconcileError> {
    let entry = serde_json::to_value(failure_entry(testfile, crash))
        .map_err(|error| ReconcileError::EntrySerialize { error })?;

    let document = match std::fs::read_to_string(path) {
        Ok(contents) => {
            let mut document: Value = serde_json::from_str(&contents).map_err(|error| {
                ReconcileError::DocumentParse {
                    path: path.to_owned(),
                    error,
                }
            })?;
            patch_document(&mut document, entry);
            document
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => skeleton(crash, entry),
        Err(error) => {
            return Err(ReconcileError::DocumentRead {
                path: path.to_owned(),
                error,
            });
        }
    };

    write_document(path, &document)
}

fn patch_document(document: &mut Value, entry: Value) {
    if !document.is_object() {
        *document = json!({});
    }
    let root = document.as_object_mut().expect("document is an object");

    if !root.get("tests").is_some_and(Value::is_array) {
        root.insert("tests".to_owned(), Value::Array(Vec::new()));
    }
    root.get_mut("tests")
        .and_then(Value::as_array_mut)
        .expect("tests is an array")
        .push(entry);

    if !root.get("summary").is_some_and(Value::is_object) {
        root.insert("summary".to_owned(), json!({}));
    }
    let summary = root
        .get_mut("summary")
        .and_then(Value::as_object_mut)
        .expect("summary is an object");
    bump_counter(summary, "failed");
    bump_counter(summary, "total");
    bump_counter(summary, "collected");
    // Only tracked by some producers; bump it only where it exists.
    if summary.contains_key("unskipped_total") {
        bump_counter(summary, "unskipped_total");
    }

    root.insert("exitcode".to_owned(), Value::from(1));
}

fn skeleton(crash: &CrashRecord, entry: Value) -> Value {
    let root = std::env::current_dir()
        .map(|dir| dir.to_string_lossy().into_owned())
        .unwrap_or_else(|_| ".".to_owned());
    json!({
        "created": Utc::now().timestamp_millis() as f64 / 1000.0,
        "duration": crash.duration,
        "exitcode": 1,
        "root": root,
        "environment": {},
        "summary": {
            "passed": 0,
            "failed": 1,
            "total": 1,
            "collected": 1,
            "unskipped_total": 1,
        },
        "tests": [entry],
    })
}

fn write_document(path: &Utf8Path, document: &Value) -> Result<(), ReconcileError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| ReconcileError::ParentDirCreate {
            path: parent.to_owned(),
            error,
        })?;
    }
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    document
        .serialize(&mut serializer)
        .map_err(|error| ReconcileError::EntrySerialize { error })?;

    AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
        .write(|file| file.write_all(&buf))
        .map_err(|error| ReconcileError::DocumentWrite {
            path: path.to_owned(),
            error,
        })?;
    Ok(())
}
