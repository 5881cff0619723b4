// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration shared by crashmark components.
//!
//! Every component takes an explicit [`CrashmarkConfig`] rather than
//! consulting the process environment itself; [`CrashmarkConfig::from_env`]
//! is the single place the recognized environment keys are read.

use crate::marker;
use camino::{Utf8Path, Utf8PathBuf};

/// Environment key naming the crash log path.
///
/// Consumed by both CLI tools and the lifecycle hook.
pub static ENV_CRASH_LOG: &str = "CRASHMARK_CRASH_LOG";

/// Environment key naming an exact marker file path.
pub static ENV_MARKER_FILE: &str = "CRASHMARK_MARKER_FILE";

/// Environment key naming a directory for per-worker marker files.
///
/// Used when the worker is parallelized: each sub-worker derives its own
/// marker path inside this directory from [`ENV_WORKER_ID`].
pub static ENV_MARKER_DIR: &str = "CRASHMARK_MARKER_DIR";

/// Environment key naming the sub-worker identifier, supplied by the
/// parallelization layer.
pub static ENV_WORKER_ID: &str = "CRASHMARK_WORKER_ID";

/// Configuration for crashmark components.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CrashmarkConfig {
    /// Path to the shared crash log, if configured.
    pub crash_log_path: Option<Utf8PathBuf>,
    /// Exact marker file path, if configured. Takes precedence over
    /// `marker_dir`.
    pub marker_file: Option<Utf8PathBuf>,
    /// Directory for per-worker marker files, if configured.
    pub marker_dir: Option<Utf8PathBuf>,
    /// Sub-worker identifier used to derive unique marker paths under
    /// `marker_dir`.
    pub worker_id: Option<String>,
}

impl CrashmarkConfig {
    /// Snapshots the recognized environment keys into a config.
    ///
    /// Empty values are treated as unset.
    pub fn from_env() -> Self {
        Self {
            crash_log_path: env_path(ENV_CRASH_LOG),
            marker_file: env_path(ENV_MARKER_FILE),
            marker_dir: env_path(ENV_MARKER_DIR),
            worker_id: env_string(ENV_WORKER_ID),
        }
    }

    /// The worker id, defaulting to [`marker::DEFAULT_WORKER_ID`].
    pub fn worker_id(&self) -> &str {
        self.worker_id.as_deref().unwrap_or(marker::DEFAULT_WORKER_ID)
    }

    /// Resolves the marker path for this worker.
    ///
    /// An exact file path wins over the directory form; with neither
    /// configured the lifecycle hook is inert.
    pub fn marker_path(&self) -> Option<Utf8PathBuf> {
        if let Some(file) = &self.marker_file {
            return Some(file.clone());
        }
        self.marker_dir
            .as_deref()
            .map(|dir| marker::marker_path_in_dir(dir, self.worker_id()))
    }

    /// The crash log path, if configured.
    pub fn crash_log_path(&self) -> Option<&Utf8Path> {
        self.crash_log_path.as_deref()
    }
}

fn env_string(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn env_path(key: &str) -> Option<Utf8PathBuf> {
    env_string(key).map(Utf8PathBuf::from)
}
