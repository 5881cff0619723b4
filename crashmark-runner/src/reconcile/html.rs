// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The human-readable (HTML) report variant.
//!
//! Downstream tooling parses two structural markers: the
//! `<table id="results-table">` with one `<tbody>` per result, and the
//! `data-jsonblob` attribute holding an entity-escaped JSON blob of test
//! entries. Patching splices a row into the table, bumps the running
//! counters by targeted substitution, and rewrites the blob. When no
//! document exists, a minimal standalone document is synthesized so a
//! multi-file merger can still consume it.

use super::{display_nodeid, repair::parse_or_repair, sanitize_for_json};
use crate::{crash_log::CrashRecord, errors::ReconcileError, helpers};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::Utf8Path;
use chrono::Local;
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use std::{io::Write, sync::LazyLock};
use tracing::warn;

static RESULTS_TABLE_OPEN: &str = "<table id=\"results-table\">";

pub(crate) static JSONBLOB_DQ_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-jsonblob="([^"]*)""#).expect("valid regex"));
pub(crate) static JSONBLOB_SQ_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-jsonblob='([^']*)'"#).expect("valid regex"));

static TEST_DONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+/\d+ test done\.").expect("valid regex"));
static TESTS_RAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) tests? ran in").expect("valid regex"));
static TESTS_TOOK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) tests? took").expect("valid regex"));
static FAILED_COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) Failed").expect("valid regex"));
static RELOAD_BUTTON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"class="summary__reload__button\s*""#).expect("valid regex"));

/// Escapes the characters that are unsafe inside an HTML attribute value.
pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

/// Reverses [`escape_html`], tolerating the common single-quote aliases.
///
/// Left-to-right single pass, so doubly-escaped text like `&amp;lt;`
/// correctly becomes `&lt;`.
pub(crate) fn unescape_html(text: &str) -> String {
    static ENTITIES: &[(&str, char)] = &[
        ("&amp;", '&'),
        ("&lt;", '<'),
        ("&gt;", '>'),
        ("&quot;", '"'),
        ("&#x27;", '\''),
        ("&#39;", '\''),
        ("&apos;", '\''),
    ];

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        match ENTITIES.iter().find(|(entity, _)| rest.starts_with(entity)) {
            Some((entity, c)) => {
                out.push(*c);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn row_log_content(crash: &CrashRecord) -> String {
    format!(
        "Test crashed: {}\nTest class: {}\nCrash detected at: {}\nGPU ID: {}",
        sanitize_for_json(&crash.reason),
        sanitize_for_json(&crash.test_class),
        sanitize_for_json(crash.abort_time_display()),
        sanitize_for_json(&crash.gpu_id),
    )
}

fn blob_log_content(crash: &CrashRecord) -> String {
    format!(
        "Test crashed: {}\nCrash detected at: {}\nGPU ID: {}",
        sanitize_for_json(&crash.reason),
        sanitize_for_json(crash.abort_time_display()),
        sanitize_for_json(&crash.gpu_id),
    )
}

fn crash_row(testfile: &str, crash: &CrashRecord) -> String {
    let display_name = display_nodeid(&crash.test_name, testfile);
    let duration_str = helpers::format_hms(crash.duration);
    let log_content = row_log_content(crash);

    format!(
        r#"
                <tbody class="results-table-row">
                    <tr class="collapsible">
                        <td class="col-result">Failed</td>
                        <td class="col-name">{display_name}</td>
                        <td class="col-duration">{duration_str}</td>
                        <td class="col-links"></td>
                    </tr>
                    <tr class="extras-row">
                        <td class="extra" colspan="4">
                            <div class="extraHTML"></div>
                            <div class="logwrapper">
                                <div class="logexpander"></div>
                                <div class="log">{log_content}</div>
                            </div>
                        </td>
                    </tr>
                </tbody>"#
    )
}

fn bump_count(content: &str, re: &Regex, suffix: &str) -> String {
    match re.captures(content) {
        Some(caps) => {
            let count: u64 = caps[1].parse().unwrap_or(0);
            re.replace_all(content, format!("{} {suffix}", count + 1))
                .into_owned()
        }
        None => content.to_owned(),
    }
}

/// Updates the summary's running counters for one appended failed test.
fn update_summary_counts(content: &str) -> String {
    // Repair a malformed in-progress summary left by a crashed session.
    let content = if TEST_DONE_RE.is_match(content) {
        TEST_DONE_RE
            .replace_all(content, "1 tests took 00:00:01.")
            .into_owned()
    } else {
        content.to_owned()
    };

    let content = bump_count(&content, &TESTS_RAN_RE, "tests ran in");
    let content = bump_count(&content, &TESTS_TOOK_RE, "tests took");

    match FAILED_COUNT_RE.captures(&content) {
        Some(caps) => {
            let count: u64 = caps[1].parse().unwrap_or(0);
            FAILED_COUNT_RE
                .replace_all(&content, format!("{} Failed", count + 1))
                .into_owned()
        }
        None => content
            .replace("0 Failed,", "1 Failed,")
            .replace(
                "data-test-result=\"failed\" disabled",
                "data-test-result=\"failed\"",
            ),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlobTestEntry {
    test_id: String,
    id: String,
    log: String,
    extras: Vec<Value>,
    results_table_row: Vec<String>,
    table_html: Vec<Value>,
    result: &'static str,
    collapsed: bool,
}

fn blob_test_entry(id: &str, testfile: &str, crash: &CrashRecord) -> Value {
    let display_name = display_nodeid(&crash.test_name, testfile);
    let duration_str = helpers::format_hms(crash.duration);
    serde_json::to_value(BlobTestEntry {
        test_id: display_name.clone(),
        id: id.to_owned(),
        log: blob_log_content(crash),
        extras: Vec::new(),
        results_table_row: vec![
            "<td class=\"col-result\">Failed</td>".to_owned(),
            format!("<td class=\"col-name\">{display_name}</td>"),
            format!("<td class=\"col-duration\">{duration_str}</td>"),
            "<td class=\"col-links\"></td>".to_owned(),
        ],
        table_html: Vec::new(),
        result: "failed",
        collapsed: false,
    })
    .expect("blob entry serializes")
}

/// Adds the crashed test to the embedded `data-jsonblob` attribute.
///
/// Malformed blobs get one control-character repair attempt; a blob that
/// still doesn't parse is the distinguishable unrepairable error, and the
/// whole single-document patch is skipped so the document stays untouched.
fn update_jsonblob(
    path: &Utf8Path,
    content: &str,
    testfile: &str,
    crash: &CrashRecord,
) -> Result<String, ReconcileError> {
    let Some(caps) = JSONBLOB_DQ_RE.captures(content) else {
        return Ok(content.to_owned());
    };
    let attr = caps.get(1).expect("capture group 1 exists");
    let json_text = unescape_html(attr.as_str());

    let mut blob =
        parse_or_repair(&json_text).map_err(|error| ReconcileError::JsonBlobUnparsable {
            path: path.to_owned(),
            error,
        })?;
    let Some(root) = blob.as_object_mut() else {
        warn!("embedded result data in `{path}` is not an object, leaving it alone");
        return Ok(content.to_owned());
    };

    if !root.get("tests").is_some_and(Value::is_object) {
        root.insert("tests".to_owned(), json!({}));
    }
    let tests = root
        .get_mut("tests")
        .and_then(Value::as_object_mut)
        .expect("tests is an object");
    let test_id = format!("test_{}", tests.len());
    tests.insert(test_id.clone(), blob_test_entry(&test_id, testfile, crash));

    let dumped = serde_json::to_string(&blob)
        .map_err(|error| ReconcileError::EntrySerialize { error })?;

    // A single targeted replacement of the attribute content; regex
    // replacement would mangle backslashes in the blob.
    let range = attr.range();
    let mut out = String::with_capacity(content.len() + dumped.len());
    out.push_str(&content[..range.start]);
    out.push_str(&escape_html(&dumped));
    out.push_str(&content[range.end..]);
    Ok(out)
}

/// Patches an existing document, or returns `None` when it has no results
/// table to splice into.
fn patch_existing(
    path: &Utf8Path,
    content: &str,
    testfile: &str,
    crash: &CrashRecord,
) -> Result<Option<String>, ReconcileError> {
    let Some(table_start) = content.find(RESULTS_TABLE_OPEN) else {
        return Ok(None);
    };
    let Some(table_end) = content[table_start..].find("</table>") else {
        return Ok(None);
    };
    let table_end = table_end + table_start;

    let row = crash_row(testfile, crash);
    let mut patched = String::with_capacity(content.len() + row.len() + 16);
    patched.push_str(&content[..table_end]);
    patched.push_str(&row);
    patched.push_str("\n    ");
    patched.push_str(&content[table_end..]);

    let patched = update_summary_counts(&patched);
    let patched = update_jsonblob(path, &patched, testfile, crash)?;
    // A session that died mid-run leaves the reload button visible.
    let patched = RELOAD_BUTTON_RE
        .replace_all(&patched, "class=\"summary__reload__button hidden\"")
        .into_owned();
    Ok(Some(patched))
}

pub(crate) fn write_document(path: &Utf8Path, content: &str) -> Result<(), ReconcileError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| ReconcileError::ParentDirCreate {
            path: parent.to_owned(),
            error,
        })?;
    }
    AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
        .write(|file| file.write_all(content.as_bytes()))
        .map_err(|error| ReconcileError::DocumentWrite {
            path: path.to_owned(),
            error,
        })
}

/// Appends one synthetic failed result for `crash` to the document at
/// `path`, synthesizing a standalone document when none exists or the
/// existing content has no results table.
pub(crate) fn append_crash(
    path: &Utf8Path,
    testfile: &str,
    crash: &CrashRecord,
) -> Result<(), ReconcileError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => None,
        Err(error) => {
            warn!("failed to read report document `{path}`, recreating it: {error}");
            None
        }
    };

    if let Some(content) = content {
        if let Some(patched) = patch_existing(path, &content, testfile, crash)? {
            return write_document(path, &patched);
        }
    }

    write_document(path, &standalone_document(testfile, crash))
}

fn standalone_blob(testfile: &str, crash: &CrashRecord) -> Value {
    json!({
        "environment": {},
        "tests": {
            "test_0": blob_test_entry("test_0", testfile, crash),
        },
        "renderCollapsed": ["passed"],
        "initialSort": "result",
        "title": format!("{testfile}_log.html"),
    })
}

/// Generates a minimal standalone document for a crash-only report.
///
/// Only the structural markers downstream tools parse are load-bearing:
/// the results table, the summary counters, and the `data-jsonblob`
/// attribute on the data container.
fn standalone_document(testfile: &str, crash: &CrashRecord) -> String {
    let display_name = display_nodeid(&crash.test_name, testfile);
    let duration_str = helpers::format_hms(crash.duration);
    let log_content = row_log_content(crash);
    let json_blob = escape_html(
        &serde_json::to_string(&standalone_blob(testfile, crash)).expect("blob serializes"),
    );
    let generated_at = Local::now().format("%d-%b-%Y at %H:%M:%S");

    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8"/>
    <title id="head-title">{testfile}_log.html</title>
    <link href="assets/style.css" rel="stylesheet" type="text/css"/>
  </head>
  <body onLoad="init()">
    <h1 id="title">{testfile}_log.html</h1>
    <p>Report generated on {generated_at} by crashmark</p>
    <div id="environment-header">
      <h2>Environment</h2>
    </div>
    <table id="environment"></table>
    <div class="summary">
      <div class="summary__data">
        <h2>Summary</h2>
        <div class="additional-summary prefix">
        </div>
        <p class="run-count">1 tests took {duration_str}.</p>
        <p class="filter">(Un)check the boxes to filter the results.</p>
        <div class="summary__reload">
          <div class="summary__reload__button hidden" onclick="location.reload()">
            <div>There are still tests running. <br />Reload this page to get the latest results!</div>
          </div>
        </div>
        <div class="summary__spacer"></div>
        <div class="controls">
          <div class="filters">
            <input checked="true" class="filter" name="filter_checkbox" type="checkbox" data-test-result="failed" />
            <span class="failed">1 Failed,</span>
            <input checked="true" class="filter" name="filter_checkbox" type="checkbox" data-test-result="passed" disabled/>
            <span class="passed">0 Passed,</span>
            <input checked="true" class="filter" name="filter_checkbox" type="checkbox" data-test-result="skipped" disabled/>
            <span class="skipped">0 Skipped,</span>
            <input checked="true" class="filter" name="filter_checkbox" type="checkbox" data-test-result="xfailed" disabled/>
            <span class="xfailed">0 Expected failures,</span>
            <input checked="true" class="filter" name="filter_checkbox" type="checkbox" data-test-result="xpassed" disabled/>
            <span class="xpassed">0 Unexpected passes,</span>
            <input checked="true" class="filter" name="filter_checkbox" type="checkbox" data-test-result="error" disabled/>
            <span class="error">0 Errors,</span>
            <input checked="true" class="filter" name="filter_checkbox" type="checkbox" data-test-result="rerun" disabled/>
            <span class="rerun">0 Reruns</span>
          </div>
          <div class="collapse">
            <button id="show_all_details">Show all details</button>&nbsp;/&nbsp;<button id="hide_all_details">Hide all details</button>
          </div>
        </div>
      </div>
      <div class="additional-summary summary">
      </div>
      <div class="additional-summary postfix">
      </div>
    </div>
    <table id="results-table">
      <thead id="results-table-head">
        <tr>
          <th class="sortable result initial-sort" data-column-type="result">Result</th>
          <th class="sortable" data-column-type="name">Test</th>
          <th class="sortable" data-column-type="duration">Duration</th>
          <th class="sortable links" data-column-type="links">Links</th>
        </tr>
      </thead>
      <tbody class="results-table-row">
        <tr class="collapsible">
          <td class="col-result">Failed</td>
          <td class="col-name">{display_name}</td>
          <td class="col-duration">{duration_str}</td>
          <td class="col-links"></td>
        </tr>
        <tr class="extras-row">
          <td class="extra" colspan="4">
            <div class="extraHTML"></div>
            <div class="logwrapper">
              <div class="logexpander"></div>
              <div class="log">{log_content}</div>
            </div>
          </td>
        </tr>
      </tbody>
    </table>
    <div id="data-container" data-jsonblob="{json_blob}"></div>
    <script>
      function init() {{
        // Minimal init; downstream mergers consume data-jsonblob.
      }}
    </script>
  </body>
</html>"#
    )
}
