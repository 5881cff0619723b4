// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by crashmark.

use camino::Utf8PathBuf;
use std::{io, time::Duration};
use thiserror::Error;

/// An error that occurred while persisting a marker file.
///
/// Marker writes are best-effort: the lifecycle hook logs these and keeps
/// going, because a failure to write the marker must never fail the test.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MarkerWriteError {
    /// The marker's parent directory could not be created.
    #[error("failed to create marker directory `{path}`")]
    ParentDirCreate {
        /// The directory that could not be created.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The marker record could not be serialized.
    #[error("failed to serialize marker record")]
    Serialize {
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The marker file could not be written atomically.
    #[error("failed to write marker file `{path}`")]
    Write {
        /// The marker path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: atomicwrites::Error<io::Error>,
    },
}

/// An error that occurred while appending to or truncating the crash log.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CrashLogError {
    /// The crash log's parent directory could not be created.
    #[error("failed to create crash log directory `{path}`")]
    ParentDirCreate {
        /// The directory that could not be created.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The crash log could not be opened.
    #[error("failed to open crash log `{path}`")]
    Open {
        /// The crash log path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A crash record could not be serialized to a log line.
    #[error("failed to serialize crash record")]
    Serialize {
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// An appended line could not be written to the crash log.
    #[error("failed to append to crash log `{path}`")]
    Write {
        /// The crash log path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// An error that occurred while reconciling crash records into a report
/// document.
///
/// Reconciliation is non-fatal per document: callers log these and continue
/// with the remaining crashes and documents.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReconcileError {
    /// A report document's parent directory could not be created.
    #[error("failed to create report directory `{path}`")]
    ParentDirCreate {
        /// The directory that could not be created.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A report document could not be read.
    #[error("failed to read report document `{path}`")]
    DocumentRead {
        /// The document path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A report document exists but is not valid JSON.
    #[error("failed to parse report document `{path}`")]
    DocumentParse {
        /// The document path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// A row could not be appended to a tabular document.
    #[error("failed to append to report document `{path}`")]
    DocumentAppend {
        /// The document path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A synthesized failure entry could not be serialized.
    #[error("failed to serialize synthesized failure entry")]
    EntrySerialize {
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// A report document could not be rewritten.
    #[error("failed to write report document `{path}`")]
    DocumentWrite {
        /// The document path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: atomicwrites::Error<io::Error>,
    },

    /// The embedded result data in an HTML document could not be parsed,
    /// even after the control-character repair pass.
    ///
    /// This is the distinguishable "unrepairable" case: the bulk sanitation
    /// pass counts the document as failed, single-document reconciliation
    /// leaves the document untouched.
    #[error("embedded result data in `{path}` is unparsable even after repair")]
    JsonBlobUnparsable {
        /// The document path.
        path: Utf8PathBuf,
        /// The parse error from the post-repair attempt.
        #[source]
        error: serde_json::Error,
    },
}

/// An error that occurred while assembling final reports for a log
/// directory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AssembleError {
    /// A per-file report could not be read.
    #[error("failed to read report `{path}`")]
    ReportRead {
        /// The report path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A per-file report is not valid JSON.
    #[error("failed to parse report `{path}`")]
    ReportParse {
        /// The report path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// A combined report could not be written.
    #[error("failed to write combined report `{path}`")]
    ReportWrite {
        /// The output path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: atomicwrites::Error<io::Error>,
    },

    /// The log directory could not be listed.
    #[error("failed to list report directory `{path}`")]
    DirList {
        /// The directory path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The external HTML merger could not be started.
    #[error("failed to start HTML merger `{program}`")]
    MergerSpawn {
        /// The merger program name.
        program: String,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// Waiting on the external HTML merger failed.
    #[error("failed to wait on HTML merger `{program}`")]
    MergerWait {
        /// The merger program name.
        program: String,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The external HTML merger did not finish within the timeout.
    #[error("HTML merger `{program}` timed out after {timeout:?}")]
    MergerTimeout {
        /// The merger program name.
        program: String,
        /// The configured timeout.
        timeout: Duration,
    },

    /// The external HTML merger exited with a failure status.
    #[error("HTML merger `{program}` failed with {status}: {stderr}")]
    MergerFailed {
        /// The merger program name.
        program: String,
        /// The merger's exit status.
        status: std::process::ExitStatus,
        /// Captured standard error, if any.
        stderr: String,
    },
}

/// An error that occurred while re-invoking the worker command.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RetryError {
    /// The worker command could not be invoked at all.
    ///
    /// This is distinct from the worker exiting non-zero, which is ordinary
    /// data for the retry loop.
    #[error("failed to invoke worker command `{command}`")]
    WorkerSpawn {
        /// The rendered worker command.
        command: String,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The crash log could not be truncated before the first run.
    #[error("failed to clear crash log")]
    ClearCrashLog {
        /// The underlying error.
        #[source]
        error: CrashLogError,
    },
}
