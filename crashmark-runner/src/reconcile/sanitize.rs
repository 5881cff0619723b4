// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Directory-wide sanitation of embedded result blobs.
//!
//! Run before handing a directory of per-file documents to a multi-file
//! merger: every string leaf of every blob is normalized so the merged
//! document renders as inline text and parses cleanly. A document whose
//! blob can't be parsed even after repair is counted as failed and the
//! pass moves on.

use super::{
    html::{JSONBLOB_DQ_RE, JSONBLOB_SQ_RE, escape_html, unescape_html, write_document},
    repair::parse_or_repair,
};
use crate::errors::ReconcileError;
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use tracing::warn;

/// Suffix of the per-file documents the bulk pass looks at.
static REPORT_SUFFIX: &str = "_log.html";

/// Counts from one bulk sanitation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SanitizeStats {
    /// Documents rewritten.
    pub modified: usize,
    /// Documents examined.
    pub scanned: usize,
    /// Documents whose blob failed to parse even after repair.
    pub failed: usize,
}

/// Sanitizes every `*_log.html` document under `dir`.
///
/// A parse failure is recorded but never aborts the pass over the
/// remaining documents.
pub fn sanitize_report_dir(dir: &Utf8Path) -> SanitizeStats {
    let mut stats = SanitizeStats::default();

    let entries = match dir.read_dir_utf8() {
        Ok(entries) => entries,
        Err(error) => {
            warn!("failed to list report directory `{dir}`: {error}");
            return stats;
        }
    };
    let mut paths: Vec<Utf8PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.into_path())
        .filter(|path| path.as_str().ends_with(REPORT_SUFFIX))
        .collect();
    paths.sort();

    for path in paths {
        stats.scanned += 1;
        match sanitize_report_file(&path) {
            Ok(true) => stats.modified += 1,
            Ok(false) => {}
            Err(error) => {
                warn!("sanitation failed for `{path}`: {error}");
                stats.failed += 1;
            }
        }
    }
    stats
}

/// Normalizes every string leaf of a blob value.
fn sanitize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, sanitize_value(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::String(text) => Value::String(sanitize_string(&text)),
        other => other,
    }
}

/// Line terminators to one convention, newlines to an inert visual break,
/// tabs to fixed-width spaces, and any remaining control character
/// stripped.
fn sanitize_string(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = text.replace('\n', "<br/>").replace('\t', "  ");
    text.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// Sanitizes the embedded blob of a single document in place.
///
/// Returns whether the document was modified. The unparsable-blob case is
/// the distinguishable [`ReconcileError::JsonBlobUnparsable`].
pub fn sanitize_report_file(path: &Utf8Path) -> Result<bool, ReconcileError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) => {
            warn!("failed to read report document `{path}`: {error}");
            return Ok(false);
        }
    };

    // Fast skip for documents without a blob.
    if !content.contains("data-jsonblob=\"") && !content.contains("data-jsonblob='") {
        return Ok(false);
    }

    // Double-quoted attributes are the common case; tolerate single quotes.
    let captures = JSONBLOB_DQ_RE
        .captures(&content)
        .or_else(|| JSONBLOB_SQ_RE.captures(&content));
    let Some(captures) = captures else {
        return Ok(false);
    };
    let attr = captures.get(1).expect("capture group 1 exists");
    let json_text = unescape_html(attr.as_str());

    // If the blob contains nothing we'd transform, skip the parse and the
    // deep walk. Malformed blobs always contain raw control characters, so
    // they can't be skipped by this test.
    let maybe_needs_sanitize = ["\n", "\r", "\t", "\\n", "\\r", "\\t", "\\u000", "\\u001"]
        .iter()
        .any(|needle| json_text.contains(needle));
    if !maybe_needs_sanitize {
        return Ok(false);
    }

    let blob = parse_or_repair(&json_text).map_err(|error| ReconcileError::JsonBlobUnparsable {
        path: path.to_owned(),
        error,
    })?;

    let sanitized = sanitize_value(blob);
    let dumped = serde_json::to_string(&sanitized).map_err(|error| {
        ReconcileError::JsonBlobUnparsable {
            path: path.to_owned(),
            error,
        }
    })?;
    let new_attr = escape_html(&dumped);
    if new_attr == attr.as_str() {
        return Ok(false);
    }

    let range = attr.range();
    let mut rebuilt = String::with_capacity(content.len() + new_attr.len());
    rebuilt.push_str(&content[..range.start]);
    rebuilt.push_str(&new_attr);
    rebuilt.push_str(&content[range.end..]);

    if let Err(error) = write_document(path, &rebuilt) {
        warn!("failed to rewrite report document `{path}`: {error}");
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn document_with_blob(blob_attr: &str) -> String {
        format!(
            "<html><body><div id=\"data-container\" data-jsonblob=\"{blob_attr}\"></div></body></html>"
        )
    }

    fn blob_of(path: &Utf8Path) -> Value {
        let content = std::fs::read_to_string(path).expect("document readable");
        let caps = JSONBLOB_DQ_RE.captures(&content).expect("blob attribute present");
        serde_json::from_str(&unescape_html(&caps[1])).expect("blob parses")
    }

    #[test]
    fn newlines_become_inert_breaks() {
        let dir = tempdir().expect("created temp dir");
        let path = dir.path().join("test_mod_log.html");
        let blob = json!({"tests": {"test_0": {"log": "line one\r\nline two\tdone"}}});
        std::fs::write(
            &path,
            document_with_blob(&escape_html(&blob.to_string())),
        )
        .expect("fixture written");

        let modified = sanitize_report_file(&path).expect("sanitation succeeds");
        assert!(modified);
        assert_eq!(
            blob_of(&path)["tests"]["test_0"]["log"],
            "line one<br/>line two  done"
        );
    }

    #[test]
    fn raw_newline_inside_blob_string_is_repaired() {
        let dir = tempdir().expect("created temp dir");
        let path = dir.path().join("test_mod_log.html");
        // A raw (unescaped) newline inside a string literal: strict JSON
        // parsing rejects this until the repair pass runs.
        let attr = escape_html("{\"tests\": {\"test_0\": {\"log\": \"one\ntwo\"}}}");
        std::fs::write(&path, document_with_blob(&attr)).expect("fixture written");

        let modified = sanitize_report_file(&path).expect("sanitation succeeds");
        assert!(modified);
        assert_eq!(blob_of(&path)["tests"]["test_0"]["log"], "one<br/>two");
    }

    #[test]
    fn clean_document_is_untouched() {
        let dir = tempdir().expect("created temp dir");
        let path = dir.path().join("test_mod_log.html");
        let blob = json!({"tests": {"test_0": {"log": "single line"}}});
        let original = document_with_blob(&escape_html(&blob.to_string()));
        std::fs::write(&path, &original).expect("fixture written");

        let modified = sanitize_report_file(&path).expect("sanitation succeeds");
        assert!(!modified);
        assert_eq!(
            std::fs::read_to_string(&path).expect("document readable"),
            original
        );
    }

    #[test]
    fn directory_pass_isolates_failures() {
        let dir = tempdir().expect("created temp dir");

        let good = json!({"tests": {"test_0": {"log": "a\nb"}}});
        std::fs::write(
            dir.path().join("good_log.html"),
            document_with_blob(&escape_html(&good.to_string())),
        )
        .expect("fixture written");

        // Truncated blob: unrepairable by the control-character pass.
        std::fs::write(
            dir.path().join("bad_log.html"),
            document_with_blob("{&quot;tests&quot;: \n{"),
        )
        .expect("fixture written");

        // Not matching the *_log.html pattern: ignored.
        std::fs::write(dir.path().join("unrelated.html"), "<html></html>")
            .expect("fixture written");

        let stats = sanitize_report_dir(dir.path());
        assert_eq!(
            stats,
            SanitizeStats {
                modified: 1,
                scanned: 2,
                failed: 1,
            }
        );
    }

    #[test]
    fn document_without_blob_is_skipped() {
        let dir = tempdir().expect("created temp dir");
        let path = dir.path().join("plain_log.html");
        std::fs::write(&path, "<html><body>no blob here</body></html>")
            .expect("fixture written");
        assert!(!sanitize_report_file(&path).expect("sanitation succeeds"));
    }
}
