// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the `crashmark-retry` binary.

#![cfg(unix)]

use camino::{Utf8Path, Utf8PathBuf};
use std::process::Command;

fn retry_command() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_crashmark-retry"));
    command.env_remove("CRASHMARK_CRASH_LOG");
    command
}

/// A worker that crashes on its first run (logging the crashed nodeid the
/// way the lifecycle-hook side would) and exits cleanly once the crashed
/// test is deselected.
fn write_fake_worker(dir: &Utf8Path, crash_log: &Utf8Path, args_file: &Utf8Path) -> Utf8PathBuf {
    let script = dir.join("worker.sh");
    let body = format!(
        "#!/bin/sh\n\
         printf '%s\\n' \"$*\" >> {args_file}\n\
         for arg in \"$@\"; do\n\
             case \"$arg\" in\n\
                 --deselect=*) exit 0 ;;\n\
             esac\n\
         done\n\
         printf '%s\\n' '{{\"nodeid\": \"tests/test_mod.py::test_crash\", \"duration\": 1.5}}' >> {crash_log}\n\
         exit 139\n"
    );
    std::fs::write(&script, body).expect("script written");
    script
}

#[test]
fn missing_crash_log_path_exits_with_config_error() {
    let status = retry_command()
        .args(["--", "true"])
        .status()
        .expect("binary runs");
    assert_eq!(status.code(), Some(2));
}

#[test]
fn missing_worker_command_exits_with_config_error() {
    let dir = camino_tempfile::tempdir().expect("created temp dir");
    let status = retry_command()
        .arg("--crash-log")
        .arg(dir.path().join("crashed_tests.jsonl").as_str())
        .status()
        .expect("binary runs");
    assert_eq!(status.code(), Some(2));
}

#[test]
fn crashed_test_is_deselected_on_the_second_run() {
    let dir = camino_tempfile::tempdir().expect("created temp dir");
    let crash_log = dir.path().join("crashed_tests.jsonl");
    let args_file = dir.path().join("args.txt");
    let script = write_fake_worker(dir.path(), &crash_log, &args_file);

    let status = retry_command()
        .arg("--crash-log")
        .arg(crash_log.as_str())
        .arg("--max-runs")
        .arg("3")
        .arg("--")
        .arg("sh")
        .arg(script.as_str())
        .status()
        .expect("binary runs");

    // The second run succeeded once the crashed test was excluded.
    assert_eq!(status.code(), Some(0));

    let args = std::fs::read_to_string(&args_file).expect("args recorded");
    let invocations: Vec<&str> = args.lines().collect();
    assert_eq!(invocations.len(), 2);
    assert_eq!(invocations[0], "");
    assert_eq!(invocations[1], "--deselect=tests/test_mod.py::test_crash");
}

#[test]
fn worker_exit_code_is_propagated() {
    let dir = camino_tempfile::tempdir().expect("created temp dir");
    let script = dir.path().join("worker.sh");
    std::fs::write(&script, "#!/bin/sh\nexit 5\n").expect("script written");

    let status = retry_command()
        .arg("--crash-log")
        .arg(dir.path().join("crashed_tests.jsonl").as_str())
        .arg("--")
        .arg("sh")
        .arg(script.as_str())
        .status()
        .expect("binary runs");
    assert_eq!(status.code(), Some(5));
}

#[test]
fn clear_crash_log_truncates_stale_entries() {
    let dir = camino_tempfile::tempdir().expect("created temp dir");
    let crash_log = dir.path().join("crashed_tests.jsonl");
    std::fs::write(
        &crash_log,
        "{\"nodeid\": \"tests/test_mod.py::test_stale\", \"duration\": 1.0}\n",
    )
    .expect("crash log seeded");

    let args_file = dir.path().join("args.txt");
    let script = dir.path().join("worker.sh");
    std::fs::write(
        &script,
        format!("#!/bin/sh\nprintf '%s\\n' \"$*\" >> {args_file}\nexit 0\n"),
    )
    .expect("script written");

    let status = retry_command()
        .arg("--crash-log")
        .arg(crash_log.as_str())
        .arg("--clear-crash-log")
        .arg("--")
        .arg("sh")
        .arg(script.as_str())
        .status()
        .expect("binary runs");
    assert_eq!(status.code(), Some(0));

    // The stale entry was dropped, so the single run saw no deselections.
    let args = std::fs::read_to_string(&args_file).expect("args recorded");
    assert_eq!(args.lines().collect::<Vec<_>>(), vec![""]);
    assert_eq!(
        std::fs::read_to_string(&crash_log).expect("crash log readable"),
        ""
    );
}
