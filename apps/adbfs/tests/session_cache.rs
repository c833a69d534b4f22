// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Validate attribute and directory caching through the adb session.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use adb_shell::mock::ScriptedShell;
use adbfs::{AdbSession, FsError, ManualClock, SessionOptions, ShellOutput, ATTR_TTL, DIR_TTL};
use tempfile::TempDir;

fn stat_line(path: &str, size: u64) -> String {
    format!("{path} {size} 8 81a4 1000 1015 fd00 42 1 0 0 1700000000 1700000001 1700000002 4096\n")
}

fn session(
    shell: &Arc<ScriptedShell>,
    clock: &Arc<ManualClock>,
    dir: &TempDir,
) -> AdbSession<Arc<ScriptedShell>> {
    let options = SessionOptions {
        mirror_root: dir.path().join("mirror"),
        ..SessionOptions::default()
    };
    AdbSession::with_clock(shell.clone(), options, clock.clone())
}

#[test]
fn fresh_attributes_are_shared_without_remote_calls() {
    let dir = TempDir::new().expect("tempdir");
    let shell = Arc::new(ScriptedShell::new());
    shell.respond(
        &["stat", "-t", "/foo.txt"],
        ShellOutput::completed(stat_line("/foo.txt", 500_000)),
    );
    let clock = Arc::new(ManualClock::new());
    let session = session(&shell, &clock, &dir);

    let first = session.get_attributes("/foo.txt").expect("first lookup");
    clock.advance(ATTR_TTL - Duration::from_secs(1));
    let second = session.get_attributes("/foo.txt").expect("second lookup");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.size, 500_000);
    assert_eq!(first.uid, 1000);
    assert_eq!(shell.call_count(), 1);
}

#[test]
fn stale_attributes_trigger_exactly_one_refetch() {
    let dir = TempDir::new().expect("tempdir");
    let shell = Arc::new(ScriptedShell::new());
    shell.respond(
        &["stat", "-t", "/foo.txt"],
        ShellOutput::completed(stat_line("/foo.txt", 10)),
    );
    let clock = Arc::new(ManualClock::new());
    let session = session(&shell, &clock, &dir);

    let first = session.get_attributes("/foo.txt").expect("first lookup");
    clock.advance(ATTR_TTL);
    shell.respond(
        &["stat", "-t", "/foo.txt"],
        ShellOutput::completed(stat_line("/foo.txt", 20)),
    );
    let refreshed = session.get_attributes("/foo.txt").expect("refresh");
    let again = session.get_attributes("/foo.txt").expect("cached");

    assert_eq!(shell.call_count(), 2);
    assert!(!Arc::ptr_eq(&first, &refreshed));
    assert!(Arc::ptr_eq(&refreshed, &again));
    assert_eq!(refreshed.size, 20);
}

#[test]
fn root_is_synthetic() {
    let dir = TempDir::new().expect("tempdir");
    let shell = Arc::new(ScriptedShell::new());
    let clock = Arc::new(ManualClock::new());
    let session = session(&shell, &clock, &dir);

    let root = session.get_attributes("/").expect("root");
    assert!(root.is_dir());
    assert_eq!(root.nlink, 2);
    assert_eq!(root.size, 0);
    assert_eq!(shell.call_count(), 0);
}

#[test]
fn missing_paths_are_not_cached() {
    let dir = TempDir::new().expect("tempdir");
    let shell = Arc::new(ScriptedShell::new());
    shell.respond(
        &["stat", "-t", "/missing"],
        ShellOutput::failed(1, "stat: '/missing': No such file or directory"),
    );
    let clock = Arc::new(ManualClock::new());
    let session = session(&shell, &clock, &dir);

    for _ in 0..2 {
        assert_eq!(
            session.get_attributes("/missing"),
            Err(FsError::NotFound {
                path: "/missing".to_owned(),
            })
        );
    }
    assert_eq!(shell.call_count(), 2);
    assert!(session.cached_attributes("/missing").is_none());
}

#[test]
fn malformed_status_lines_read_as_missing() {
    let dir = TempDir::new().expect("tempdir");
    let shell = Arc::new(ScriptedShell::new());
    shell.respond(
        &["stat", "-t", "/odd"],
        ShellOutput::completed("/odd 1 2 3 4 5\n"),
    );
    let clock = Arc::new(ManualClock::new());
    let session = session(&shell, &clock, &dir);

    let err = session.get_attributes("/odd").expect_err("malformed");
    assert_eq!(err.errno(), libc::ENOENT);
}

#[test]
fn transport_failures_surface_as_io_errors() {
    let dir = TempDir::new().expect("tempdir");
    let shell = Arc::new(ScriptedShell::new());
    shell.respond(&["stat"], ShellOutput::not_run("adb: No such file or directory"));
    let clock = Arc::new(ManualClock::new());
    let session = session(&shell, &clock, &dir);

    let err = session.get_attributes("/sdcard").expect_err("transport");
    assert!(matches!(err, FsError::Transport { .. }));
    assert_eq!(err.errno(), libc::EIO);
}

#[test]
fn listings_keep_device_order_and_expire() {
    let dir = TempDir::new().expect("tempdir");
    let shell = Arc::new(ScriptedShell::new());
    shell.respond(
        &["ls", "--color=none", "-1", "/"],
        ShellOutput::completed("sdcard\nacct\nsystem\n"),
    );
    let clock = Arc::new(ManualClock::new());
    let session = session(&shell, &clock, &dir);

    let first = session.list_children("/");
    assert_eq!(first.to_vec(), vec!["sdcard", "acct", "system"]);
    clock.advance(DIR_TTL - Duration::from_secs(1));
    let cached = session.list_children("/");
    assert!(Arc::ptr_eq(&first, &cached));
    assert_eq!(shell.call_count(), 1);

    clock.advance(Duration::from_secs(1));
    shell.respond(
        &["ls", "--color=none", "-1", "/"],
        ShellOutput::completed("sdcard\n"),
    );
    assert_eq!(session.list_children("/").to_vec(), vec!["sdcard"]);
    assert_eq!(shell.call_count(), 2);
}

#[test]
fn failed_listings_are_cached_as_empty() {
    let dir = TempDir::new().expect("tempdir");
    let shell = Arc::new(ScriptedShell::new());
    let clock = Arc::new(ManualClock::new());
    let session = session(&shell, &clock, &dir);

    assert!(session.list_children("/data").is_empty());
    assert!(session.list_children("/data").is_empty());
    assert_eq!(shell.call_count(), 1);
}

#[test]
fn failed_listings_drop_their_output() {
    let dir = TempDir::new().expect("tempdir");
    let shell = Arc::new(ScriptedShell::new());
    shell.respond(
        &["ls", "--color=none", "-1", "/x"],
        ShellOutput {
            stdout: b"ls: /x: No such file or directory\n".to_vec(),
            stderr: Vec::new(),
            status: Some(1),
        },
    );
    let clock = Arc::new(ManualClock::new());
    let session = session(&shell, &clock, &dir);

    assert!(session.list_children("/x").is_empty());
    assert!(session.list_children("/x").is_empty());
    assert_eq!(shell.call_count(), 1);
}

#[test]
fn listings_that_never_ran_are_empty() {
    let dir = TempDir::new().expect("tempdir");
    let shell = Arc::new(ScriptedShell::new());
    shell.respond(&["ls"], ShellOutput::not_run("adb: device offline"));
    let clock = Arc::new(ManualClock::new());
    let session = session(&shell, &clock, &dir);

    assert!(session.list_children("/sdcard").is_empty());
}

#[test]
fn read_link_keeps_targets_inside_the_mount() {
    let dir = TempDir::new().expect("tempdir");
    let shell = Arc::new(ScriptedShell::new());
    shell.respond(
        &["readlink", "/sdcard"],
        ShellOutput::completed("/storage/self/primary\n"),
    );
    shell.respond(&["readlink", "/etc"], ShellOutput::completed("system/etc\n"));
    shell.respond(&["readlink", "/data"], ShellOutput::completed(""));
    let clock = Arc::new(ManualClock::new());
    let session = session(&shell, &clock, &dir);

    assert_eq!(
        session.read_link("/sdcard").expect("absolute"),
        "./storage/self/primary"
    );
    assert_eq!(session.read_link("/etc").expect("relative"), "system/etc");
    assert!(matches!(
        session.read_link("/data"),
        Err(FsError::NotFound { .. })
    ));
}
