// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::ExpectedError;
use camino::Utf8PathBuf;
use clap::Parser;
use crashmark_runner::{
    config,
    crash_log::CrashLog,
    reconcile::{ReportPaths, reconcile_reports},
    retry::{DEFAULT_MAX_RUNS, RetryController},
};
use tracing::info;

/// Patch test report artifacts with crashes recorded in a crash log.
///
/// Each unique crashed identifier becomes exactly one synthetic failed
/// entry in every supplied report; running the tool again is a no-op for
/// crashes that are already recorded.
#[derive(Debug, Parser)]
#[clap(name = "crashmark-patch", version)]
pub struct PatchApp {
    /// Path to the crash log (JSON Lines).
    #[clap(long, env = config::ENV_CRASH_LOG, value_name = "PATH")]
    crash_log: Option<Utf8PathBuf>,

    /// Structured JSON report to patch.
    #[clap(long, value_name = "PATH")]
    json_report: Option<Utf8PathBuf>,

    /// HTML report to patch.
    #[clap(long, value_name = "PATH")]
    html_report: Option<Utf8PathBuf>,

    /// CSV report to patch.
    #[clap(long, value_name = "PATH")]
    csv_report: Option<Utf8PathBuf>,
}

impl PatchApp {
    /// Executes the app, returning the process exit code.
    pub fn exec(self) -> Result<i32, ExpectedError> {
        let crash_log_path = self.crash_log.ok_or(ExpectedError::CrashLogNotSpecified)?;

        let crash_log = CrashLog::new(crash_log_path);
        let paths = ReportPaths {
            json_report: self.json_report,
            html_report: self.html_report,
            csv_report: self.csv_report,
        };
        let stats = reconcile_reports(&crash_log, &paths);
        info!(
            "reconciled {} crashes: json +{}, html +{}, csv +{}",
            stats.crashes, stats.json_added, stats.html_added, stats.csv_added,
        );
        Ok(0)
    }
}

/// Re-run a worker command, deselecting tests recorded as crashed, until
/// no new crashes appear or the run budget is spent.
///
/// Exits with the last worker invocation's exit code.
#[derive(Debug, Parser)]
#[clap(name = "crashmark-retry", version)]
pub struct RetryApp {
    /// Path to the crash log (JSON Lines).
    #[clap(long, env = config::ENV_CRASH_LOG, value_name = "PATH")]
    crash_log: Option<Utf8PathBuf>,

    /// Maximum number of worker invocations.
    #[clap(long, default_value_t = DEFAULT_MAX_RUNS, value_name = "N")]
    max_runs: usize,

    /// Truncate the crash log before the first run.
    #[clap(long)]
    clear_crash_log: bool,

    /// Worker command to run (the program and all of its arguments).
    #[clap(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<String>,
}

impl RetryApp {
    /// Executes the app, returning the process exit code.
    pub fn exec(self) -> Result<i32, ExpectedError> {
        let crash_log_path = self.crash_log.ok_or(ExpectedError::CrashLogNotSpecified)?;

        // Shells commonly pass `crashmark-retry ... -- worker ...`; clap
        // keeps the separator in the trailing arguments.
        let mut command = self.command;
        if command.first().is_some_and(|arg| arg == "--") {
            command.remove(0);
        }
        if command.is_empty() {
            return Err(ExpectedError::WorkerCommandMissing);
        }

        if let Some(parent) = crash_log_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|error| ExpectedError::CrashLogPrepare { error })?;
        }
        let crash_log = CrashLog::new(crash_log_path);
        if self.clear_crash_log {
            crash_log
                .clear()
                .map_err(|error| ExpectedError::CrashLogClear { error })?;
        }

        let controller = RetryController::new(crash_log, command, self.max_runs);
        let outcome = controller.run()?;
        info!(
            "retry session finished after {} runs with {} crashed tests",
            outcome.runs,
            outcome.crashed.len(),
        );
        Ok(outcome.exit_code)
    }
}
