// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The retry-with-deselection control loop.
//!
//! A closed-loop controller over "which identifiers have appeared in the
//! crash log so far": invoke the worker, read the log, exclude every known
//! crashed test, and go again until a run adds nothing new or the run
//! budget is spent. The controller never inspects why a test crashed, and
//! it always reports the most recent worker's real exit code.

use crate::{crash_log::CrashLog, errors::RetryError};
use std::collections::HashSet;
use tracing::{debug, info};

/// Default maximum number of worker invocations.
pub const DEFAULT_MAX_RUNS: usize = 5;

/// Flag prefix used to exclude a crashed identifier from the next run.
static DESELECT_PREFIX: &str = "--deselect=";

/// Re-invokes a worker command, deselecting crashed tests, until the run
/// converges.
#[derive(Clone, Debug)]
pub struct RetryController {
    crash_log: CrashLog,
    command: Vec<String>,
    max_runs: usize,
}

/// What one retry session did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryOutcome {
    /// The final worker invocation's exit code, never manufactured.
    pub exit_code: i32,
    /// How many times the worker was invoked.
    pub runs: usize,
    /// Every identifier known to have crashed by the end of the session.
    pub crashed: Vec<String>,
}

impl RetryController {
    /// Creates a controller over `command`, which must name the worker
    /// program followed by its arguments.
    pub fn new(crash_log: CrashLog, command: Vec<String>, max_runs: usize) -> Self {
        Self {
            crash_log,
            command,
            max_runs: max_runs.max(1),
        }
    }

    /// The exclusion arguments for a set of crashed identifiers.
    fn deselect_args(crashed: &[String]) -> Vec<String> {
        crashed
            .iter()
            .map(|nodeid| format!("{DESELECT_PREFIX}{nodeid}"))
            .collect()
    }

    fn invoke_worker(&self, exclusions: &[String]) -> Result<i32, RetryError> {
        let mut command = self.command.clone();
        command.extend(Self::deselect_args(exclusions));
        let rendered = shell_words::join(&command);

        // A crashing or failing worker is data for the loop, not an error;
        // only a spawn failure is.
        let output = duct::cmd(command[0].as_str(), &command[1..])
            .unchecked()
            .run()
            .map_err(|error| RetryError::WorkerSpawn {
                command: rendered,
                error,
            })?;
        Ok(exit_code(&output.status))
    }

    /// Runs the session to its fixed point or run budget.
    ///
    /// Termination:
    /// - a first run with zero recorded crashes stops immediately;
    /// - a later run whose crashed-identifier set matches the previous
    ///   run's stops (further retries would not change the outcome);
    /// - the run budget stops the session regardless.
    pub fn run(&self) -> Result<RetryOutcome, RetryError> {
        assert!(!self.command.is_empty(), "worker command must not be empty");

        // Exclusions accumulate monotonically: a crashed test is never
        // un-excluded within one session.
        let mut known: Vec<String> = Vec::new();
        let mut exit_code = 0;

        for run_index in 1..=self.max_runs {
            info!(
                "run {run_index}/{}: {} ({} deselected)",
                self.max_runs,
                shell_words::join(&self.command),
                known.len(),
            );
            exit_code = self.invoke_worker(&known)?;

            let crashed = self.crash_log.crashed_nodeids();
            debug!(
                "run {run_index}: exit code {exit_code}, {} crashed so far",
                crashed.len()
            );

            if run_index == 1 && crashed.is_empty() {
                return Ok(RetryOutcome {
                    exit_code,
                    runs: run_index,
                    crashed,
                });
            }
            if run_index > 1 {
                let previous: HashSet<&str> = known.iter().map(String::as_str).collect();
                let current: HashSet<&str> = crashed.iter().map(String::as_str).collect();
                if previous == current {
                    return Ok(RetryOutcome {
                        exit_code,
                        runs: run_index,
                        crashed,
                    });
                }
            }

            for nodeid in crashed {
                if !known.contains(&nodeid) {
                    known.push(nodeid);
                }
            }
        }

        Ok(RetryOutcome {
            exit_code,
            runs: self.max_runs,
            crashed: known,
        })
    }
}

#[cfg(unix)]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
