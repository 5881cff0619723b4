// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crashmark_runner::errors::{CrashLogError, RetryError};
use thiserror::Error;

/// Exit code for user-facing misconfiguration (as opposed to runtime
/// failure).
const CONFIG_ERROR_EXIT_CODE: i32 = 2;

/// An error with a well-defined exit code and user-facing rendering.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error(
        "crash log path not specified (pass --crash-log or set {})",
        crashmark_runner::config::ENV_CRASH_LOG
    )]
    CrashLogNotSpecified,

    #[error("no worker command given after the options")]
    WorkerCommandMissing,

    #[error("failed to prepare crash log directory")]
    CrashLogPrepare {
        #[source]
        error: std::io::Error,
    },

    #[error("failed to clear crash log")]
    CrashLogClear {
        #[source]
        error: CrashLogError,
    },

    #[error("retry session failed")]
    Retry {
        #[from]
        error: RetryError,
    },
}

impl ExpectedError {
    /// The process exit code for this error.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CrashLogNotSpecified | Self::WorkerCommandMissing => CONFIG_ERROR_EXIT_CODE,
            Self::CrashLogPrepare { .. } | Self::CrashLogClear { .. } | Self::Retry { .. } => 1,
        }
    }

    /// Displays this error and its cause chain to stderr.
    pub fn display_to_stderr(&self) {
        let mut current: &dyn std::error::Error = self;
        eprintln!("error: {current}");
        while let Some(source) = current.source() {
            eprintln!("  caused by: {source}");
            current = source;
        }
    }
}
