// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The tabular (CSV) report variant.
//!
//! Tolerant of pre-existing documents: the header may use `id` or the
//! legacy `nodeid` column, unknown columns are preserved, and a missing or
//! empty file gets a fresh header. The codec here is a minimal RFC-4180
//! style reader/writer; nothing in the corpus this crate serves needs more.

use crate::{crash_log::CrashRecord, errors::ReconcileError, helpers};
use camino::Utf8Path;
use std::{collections::HashSet, io::Write};

/// Header written when creating a new tabular document.
static DEFAULT_FIELDS: &[&str] = &[
    "id", "module", "name", "file", "doc", "markers", "status", "message", "duration",
];

/// Splits CSV content into records, honoring quoted fields (including
/// embedded separators, quotes, and newlines).
pub(crate) fn parse_table(content: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            c => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}

fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        let mut quoted = String::with_capacity(field.len() + 2);
        quoted.push('"');
        for c in field.chars() {
            if c == '"' {
                quoted.push('"');
            }
            quoted.push(c);
        }
        quoted.push('"');
        quoted
    } else {
        field.to_owned()
    }
}

/// Renders one record as a CSV line, without the trailing newline.
pub(crate) fn write_record(fields: &[String]) -> String {
    let mut line = String::new();
    for (index, field) in fields.iter().enumerate() {
        if index > 0 {
            line.push(',');
        }
        line.push_str(&quote_field(field));
    }
    line
}

fn id_column(header: &[String]) -> Option<usize> {
    header
        .iter()
        .position(|name| name == "id")
        .or_else(|| header.iter().position(|name| name == "nodeid"))
}

fn read_header_and_ids(path: &Utf8Path) -> (Vec<String>, HashSet<String>) {
    let default_header = || DEFAULT_FIELDS.iter().map(|&f| f.to_owned()).collect();
    let Ok(content) = std::fs::read_to_string(path) else {
        return (default_header(), HashSet::new());
    };
    let mut records = parse_table(&content).into_iter();
    let Some(header) = records.next() else {
        return (default_header(), HashSet::new());
    };
    let mut ids = HashSet::new();
    if let Some(column) = id_column(&header) {
        for record in records {
            if let Some(id) = record.get(column) {
                let id = id.trim();
                if !id.is_empty() {
                    ids.insert(id.to_owned());
                }
            }
        }
    }
    (header, ids)
}

/// The set of identifiers already recorded in the document at `path`.
pub(crate) fn existing_ids(path: &Utf8Path) -> HashSet<String> {
    read_header_and_ids(path).1
}

/// Appends one synthetic failed row for `crash`, creating the document
/// (with a header) when absent or empty. A row whose identifier is already
/// present is not appended again.
pub(crate) fn append_crash(path: &Utf8Path, crash: &CrashRecord) -> Result<(), ReconcileError> {
    let nodeid = crash.nodeid.trim();
    if nodeid.is_empty() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| ReconcileError::ParentDirCreate {
            path: parent.to_owned(),
            error,
        })?;
    }

    let (header, ids) = read_header_and_ids(path);
    if ids.contains(nodeid) {
        return Ok(());
    }

    let file_part = helpers::file_part(nodeid).unwrap_or("");
    let row: Vec<String> = header
        .iter()
        .map(|column| match column.as_str() {
            "id" | "nodeid" => nodeid.to_owned(),
            "module" => helpers::module_part(file_part),
            "name" => helpers::leaf_name(nodeid).to_owned(),
            "file" => file_part.to_owned(),
            "status" | "outcome" => "failed".to_owned(),
            "message" => crash.reason.clone(),
            "duration" => format!("{}", crash.duration),
            _ => String::new(),
        })
        .collect();

    let needs_header = std::fs::metadata(path).map(|meta| meta.len() == 0).unwrap_or(true);

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|error| ReconcileError::DocumentAppend {
            path: path.to_owned(),
            error,
        })?;
    let mut chunk = String::new();
    if needs_header {
        chunk.push_str(&write_record(&header));
        chunk.push('\n');
    }
    chunk.push_str(&write_record(&row));
    chunk.push('\n');
    file.write_all(chunk.as_bytes())
        .map_err(|error| ReconcileError::DocumentAppend {
            path: path.to_owned(),
            error,
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use pretty_assertions::assert_eq;

    fn crash(nodeid: &str) -> CrashRecord {
        CrashRecord {
            test_name: nodeid.to_owned(),
            test_class: "UnknownClass".to_owned(),
            nodeid: nodeid.to_owned(),
            reason: "test crashed: fatal signal or abort".to_owned(),
            crash_time: Some("2026-01-01T00:00:00".to_owned()),
            abort_time: Some("2026-01-01T00:00:00".to_owned()),
            duration: 2.5,
            gpu_id: "0".to_owned(),
            pid: "123".to_owned(),
            source: None,
            logged_at: None,
        }
    }

    #[test]
    fn creates_document_with_header() {
        let dir = tempdir().expect("created temp dir");
        let path = dir.path().join("report.csv");

        append_crash(&path, &crash("tests/test_mod.py::TestCls::test_a"))
            .expect("append succeeds");

        let content = std::fs::read_to_string(&path).expect("document readable");
        let records = parse_table(&content);
        assert_eq!(records[0][0], "id");
        assert_eq!(records[1][0], "tests/test_mod.py::TestCls::test_a");
        assert_eq!(records[1][1], "tests.test_mod");
        assert_eq!(records[1][2], "test_a");
        assert_eq!(records[1][3], "tests/test_mod.py");
        assert_eq!(records[1][6], "failed");
        assert_eq!(records[1][8], "2.5");
    }

    #[test]
    fn append_is_deduplicated_by_id() {
        let dir = tempdir().expect("created temp dir");
        let path = dir.path().join("report.csv");

        append_crash(&path, &crash("tests/test_mod.py::test_a")).expect("append succeeds");
        append_crash(&path, &crash("tests/test_mod.py::test_a")).expect("append succeeds");

        let content = std::fs::read_to_string(&path).expect("document readable");
        assert_eq!(content.matches("tests/test_mod.py::test_a").count(), 1);
    }

    #[test]
    fn tolerates_legacy_nodeid_header() {
        let dir = tempdir().expect("created temp dir");
        let path = dir.path().join("report.csv");
        std::fs::write(&path, "nodeid,status\ntests/test_mod.py::test_old,passed\n")
            .expect("seeded document");

        append_crash(&path, &crash("tests/test_mod.py::test_a")).expect("append succeeds");

        let content = std::fs::read_to_string(&path).expect("document readable");
        let records = parse_table(&content);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2], vec!["tests/test_mod.py::test_a", "failed"]);
        assert_eq!(existing_ids(&path).len(), 2);
    }

    #[test]
    fn quoted_fields_round_trip() {
        let fields = vec![
            "plain".to_owned(),
            "with,comma".to_owned(),
            "say \"hi\"".to_owned(),
            "two\nlines".to_owned(),
        ];
        let line = write_record(&fields);
        let mut parsed = parse_table(&line);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.remove(0), fields);
    }
}
