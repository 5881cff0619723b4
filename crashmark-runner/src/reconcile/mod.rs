// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Merging synthesized crash failures into report documents.
//!
//! Each unique crash (by trimmed identifier, first log occurrence wins)
//! becomes exactly one synthetic failed entry in every supplied report
//! variant. Deduplication checks the target document itself, not the crash
//! log, which makes the whole operation a convergent merge: re-running it
//! against already-reconciled documents is a no-op.

pub(crate) mod csv;
mod html;
mod json;
mod repair;
mod sanitize;

pub use repair::escape_control_chars_in_json_strings;
pub use sanitize::{SanitizeStats, sanitize_report_dir, sanitize_report_file};

use crate::{crash_log::CrashLog, helpers};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

/// Paths of the report documents a reconciliation pass may patch.
///
/// Absent paths are skipped; present-but-missing documents are created.
#[derive(Clone, Debug, Default)]
pub struct ReportPaths {
    /// Structured JSON result document.
    pub json_report: Option<Utf8PathBuf>,
    /// Human-readable HTML document.
    pub html_report: Option<Utf8PathBuf>,
    /// Tabular CSV export.
    pub csv_report: Option<Utf8PathBuf>,
}

/// Counts from one reconciliation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Unique crashes read from the log.
    pub crashes: usize,
    /// Entries appended to the JSON document.
    pub json_added: usize,
    /// Entries appended to the HTML document.
    pub html_added: usize,
    /// Rows appended to the CSV document.
    pub csv_added: usize,
}

/// Strips control characters that would corrupt embedded JSON, keeping the
/// whitespace escapes a conformant encoder handles.
pub(crate) fn sanitize_for_json(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_control() && !matches!(c, '\n' | '\r' | '\t') {
                ' '
            } else {
                c
            }
        })
        .collect()
}

/// Best-effort anchoring of an identifier that isn't file-qualified.
///
/// An identifier whose file part ends in `.py` is used as-is; anything
/// else is anchored to the file currently being processed. This is a
/// heuristic, not a correctness guarantee: an unusual naming scheme can
/// yield a different identifier than the framework itself would assign.
pub(crate) fn display_nodeid(identifier: &str, testfile: &str) -> String {
    if let Some((file_part, _)) = identifier.split_once("::") {
        if file_part.ends_with(".py") {
            return identifier.to_owned();
        }
    }
    format!("{testfile}.py::{identifier}")
}

fn crash_longrepr(crash: &crate::crash_log::CrashRecord) -> String {
    let reason: String = crash
        .reason
        .chars()
        .map(|c| if c.is_control() && c != '\n' { ' ' } else { c })
        .collect();
    format!(
        "Test crashed: {reason}\nTest class: {}\nCrash detected at: {}\nGPU ID: {}",
        crash.test_class,
        crash.abort_time_display(),
        crash.gpu_id,
    )
}

fn read_to_string_or_empty(path: &Utf8Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

/// Ensures every unique crash in `crash_log` is represented exactly once
/// in each supplied report document.
///
/// Idempotent: documents are the source of truth for what has already been
/// recorded. Per-document failures are logged and the pass continues with
/// the remaining crashes and documents.
pub fn reconcile_reports(crash_log: &CrashLog, paths: &ReportPaths) -> ReconcileStats {
    let crashes = crash_log.unique_crashes();
    let mut stats = ReconcileStats {
        crashes: crashes.len(),
        ..ReconcileStats::default()
    };
    if crashes.is_empty() {
        debug!("crash log `{}` has no crashes to reconcile", crash_log.path());
        return stats;
    }

    let mut existing_json = paths
        .json_report
        .as_deref()
        .map(json::existing_nodeids)
        .unwrap_or_default();
    let mut existing_csv = paths
        .csv_report
        .as_deref()
        .map(csv::existing_ids)
        .unwrap_or_default();
    let mut html_content = paths
        .html_report
        .as_deref()
        .map(read_to_string_or_empty)
        .unwrap_or_default();

    for crash in &crashes {
        let testfile = helpers::file_stem(&crash.nodeid);
        // The anchored form may differ from the logged identifier; dedup
        // must consider both or repeated passes would re-append.
        let anchored = display_nodeid(&crash.test_name, &testfile);

        if let Some(path) = paths.json_report.as_deref() {
            if !existing_json.contains(&crash.nodeid) && !existing_json.contains(&anchored) {
                match json::append_crash(path, &testfile, crash) {
                    Ok(()) => {
                        existing_json.insert(crash.nodeid.clone());
                        existing_json.insert(anchored.clone());
                        stats.json_added += 1;
                    }
                    Err(error) => {
                        warn!("skipping JSON entry for `{}`: {error}", crash.nodeid);
                    }
                }
            }
        }

        if let Some(path) = paths.csv_report.as_deref() {
            if !existing_csv.contains(&crash.nodeid) {
                match csv::append_crash(path, crash) {
                    Ok(()) => {
                        existing_csv.insert(crash.nodeid.clone());
                        stats.csv_added += 1;
                    }
                    Err(error) => {
                        warn!("skipping CSV row for `{}`: {error}", crash.nodeid);
                    }
                }
            }
        }

        if let Some(path) = paths.html_report.as_deref() {
            // The document text is the dedup authority: an identifier
            // appears both in its visible row and the embedded blob, so a
            // plain substring check is sufficient and cheap.
            let already_present = !html_content.is_empty() && html_content.contains(&crash.nodeid);
            if !already_present {
                match html::append_crash(path, &testfile, crash) {
                    Ok(()) => {
                        stats.html_added += 1;
                        html_content = read_to_string_or_empty(path);
                    }
                    Err(error) => {
                        warn!("skipping HTML entry for `{}`: {error}", crash.nodeid);
                    }
                }
            }
        }
    }

    stats
}
