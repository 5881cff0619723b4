// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The lifecycle hook bracketing each test execution.
//!
//! The "around" contract: write the marker, run the test callback, clear
//! the marker in a guard that runs on every exit path, including an unwind
//! out of the callback. Only a hard process death skips the clear, which is
//! exactly what makes the surviving marker a crash witness.

use crate::{
    config::CrashmarkConfig,
    marker::{self, MarkerRecord},
};
use camino::Utf8Path;
use tracing::warn;

/// Clears the marker when dropped.
struct MarkerGuard<'a> {
    path: &'a Utf8Path,
}

impl Drop for MarkerGuard<'_> {
    fn drop(&mut self) {
        marker::clear_marker(self.path);
    }
}

/// Runs `test` bracketed by a marker write and clear at `path`.
///
/// Marker I/O is best-effort in both directions: a failed write is logged
/// and the test still runs, and the clear swallows I/O errors. The
/// callback's return value passes through untouched.
pub fn run_with_marker<T>(path: &Utf8Path, record: &MarkerRecord, test: impl FnOnce() -> T) -> T {
    if let Err(error) = marker::write_marker(path, record) {
        warn!("continuing without crash marker: {error}");
    }
    let _guard = MarkerGuard { path };
    test()
}

/// Convenience form of [`run_with_marker`] driven by a [`CrashmarkConfig`].
///
/// Inert when the configuration resolves no marker path: the callback runs
/// unbracketed.
pub fn run_with_config<T>(
    config: &CrashmarkConfig,
    test_name: &str,
    nodeid: &str,
    gpu_id: Option<&str>,
    test: impl FnOnce() -> T,
) -> T {
    match config.marker_path() {
        Some(path) => {
            let record = MarkerRecord::running(test_name, nodeid, gpu_id.unwrap_or("unknown"));
            run_with_marker(&path, &record, test)
        }
        None => test(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use camino_tempfile::tempdir;
    use pretty_assertions::assert_eq;

    #[test]
    fn marker_present_during_test_and_cleared_after() {
        let dir = tempdir().expect("created temp dir");
        let path = dir.path().join("last_running_main.json");
        let record = MarkerRecord::running("test_foo", "tests/test_mod.py::test_foo", "0");

        let observed = run_with_marker(&path, &record, || {
            let contents = std::fs::read_to_string(&path).expect("marker readable mid-test");
            let parsed: MarkerRecord = serde_json::from_str(&contents).expect("marker parses");
            parsed
        });

        assert!(observed.is_running());
        assert_eq!(observed.nodeid, "tests/test_mod.py::test_foo");
        assert!(!path.exists(), "marker cleared after normal completion");
    }

    #[test]
    fn marker_cleared_when_test_panics() {
        let dir = tempdir().expect("created temp dir");
        let path = dir.path().join("last_running_main.json");
        let record = MarkerRecord::running("test_boom", "tests/test_mod.py::test_boom", "0");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            run_with_marker(&path, &record, || panic!("in-process failure"));
        }));

        assert!(result.is_err());
        // An in-process failure is not a hard crash: the guard still ran.
        assert!(!path.exists());
    }

    #[test]
    fn inert_without_marker_path() {
        let config = CrashmarkConfig::default();
        let value = run_with_config(&config, "test_foo", "tests/test_mod.py::test_foo", None, || 7);
        assert_eq!(value, 7);
    }

    #[test]
    fn config_form_derives_per_worker_path() {
        let dir = tempdir().expect("created temp dir");
        let config = CrashmarkConfig {
            marker_dir: Some(dir.path().to_owned()),
            worker_id: Some("gw2".to_owned()),
            ..CrashmarkConfig::default()
        };
        let expected: Utf8PathBuf = dir.path().join("last_running_gw2.json");

        run_with_config(&config, "test_foo", "tests/test_mod.py::test_foo", Some("1"), || {
            assert!(expected.exists(), "marker written at the derived path");
        });
        assert!(!expected.exists());
    }
}
