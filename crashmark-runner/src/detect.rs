// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-mortem crash detection from a surviving marker file.
//!
//! Detection is out-of-band by design: a process that took a fatal signal
//! cannot run its own cleanup, so the supervising process inspects the
//! marker only after observing that the worker has exited. A marker that
//! still says `"running"` at that point is attributed as a crash.

use crate::{
    crash_log::CrashRecord,
    helpers,
    marker::{self, MarkerRecord},
};
use camino::Utf8Path;
use chrono::Local;
use tracing::{debug, warn};

/// Default minimum elapsed time, in seconds, before a surviving marker is
/// believed to be a crash.
///
/// Guards against the race where the worker is still in the act of writing
/// or clearing the marker. A plain tunable with no adaptive basis; pass 0.0
/// for deterministic tests.
pub const DEFAULT_MIN_CRASH_DURATION: f64 = 0.1;

/// Fixed reason string attached to marker-detected crashes.
pub static CRASH_REASON: &str = "test crashed: fatal signal or abort";

/// Inspects the marker at `path` and synthesizes a crash record if it
/// indicates an unfinished test.
///
/// Returns `None` when there is nothing to attribute: no marker, a marker
/// whose status isn't `"running"`, or an elapsed time below `min_duration`.
/// An unreadable marker is removed so it can't block future runs, then
/// treated as no crash.
pub fn detect_crash(path: &Utf8Path, min_duration: f64) -> Option<CrashRecord> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
        Err(error) => {
            warn!("failed to read marker file `{path}`: {error}");
            return None;
        }
    };

    let record: MarkerRecord = match serde_json::from_str(&contents) {
        Ok(record) => record,
        Err(error) => {
            // An unreadable marker can never be attributed; self-heal.
            debug!("removing unparsable marker file `{path}`: {error}");
            marker::clear_marker(path);
            return None;
        }
    };

    if !record.is_running() {
        return None;
    }

    let Some(start_time) = helpers::parse_timestamp(&record.start_time) else {
        debug!("removing marker file `{path}` with unreadable start time");
        marker::clear_marker(path);
        return None;
    };

    let now = Local::now();
    let duration = (now - start_time).num_milliseconds() as f64 / 1000.0;
    if duration < min_duration {
        debug!(
            "ignoring marker file `{path}`: elapsed {duration:.3}s is below the \
             {min_duration:.3}s threshold"
        );
        return None;
    }

    let identifier = if !record.nodeid.trim().is_empty() {
        record.nodeid.trim().to_owned()
    } else if !record.test_name.trim().is_empty() {
        record.test_name.trim().to_owned()
    } else {
        "unknown_test".to_owned()
    };

    Some(CrashRecord {
        test_name: identifier.clone(),
        test_class: helpers::test_class(&identifier).to_owned(),
        nodeid: identifier,
        reason: CRASH_REASON.to_owned(),
        crash_time: Some(now.to_rfc3339()),
        abort_time: None,
        duration,
        gpu_id: record.gpu_id.unwrap_or_else(|| "unknown".to_owned()),
        pid: record
            .pid
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "unknown".to_owned()),
        source: None,
        logged_at: None,
    })
}

/// Detects, consumes, and records a crash in one step.
///
/// The supervising process calls this once per marker path after a worker
/// exits: the marker is inspected, removed either way (it has served its
/// purpose as a witness), and an attributed crash is appended to
/// `crash_log` tagged with `source`. A failed append is logged and the
/// record is still returned, so the caller can react even when the ledger
/// is unavailable.
pub fn detect_and_log(
    path: &Utf8Path,
    min_duration: f64,
    crash_log: &crate::crash_log::CrashLog,
    source: &str,
) -> Option<CrashRecord> {
    let detected = detect_crash(path, min_duration);
    marker::clear_marker(path);

    let record = detected?;
    if let Err(error) = crash_log.append(&record, source) {
        warn!("failed to record crash for `{}`: {error}", record.nodeid);
    }
    Some(record)
}
