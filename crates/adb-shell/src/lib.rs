// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Provide the blocking adb shell transport used by adbfs.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Blocking transport that runs single shell commands on an adb-attached device.
//!
//! The transport never fails with an error value: spawn failures, signals and
//! non-zero exits are all reported through [`ShellOutput::status`] and the
//! captured streams. Interpreting them is left to the caller.

use std::borrow::Cow;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, trace};

/// Scripted in-memory transport for tests.
#[cfg(feature = "mock")]
pub mod mock;

/// Program name used when no explicit adb path is configured.
pub const DEFAULT_ADB_PROGRAM: &str = "adb";

/// Captured result of one remote invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutput {
    /// Bytes written to standard output.
    pub stdout: Vec<u8>,
    /// Bytes written to standard error.
    pub stderr: Vec<u8>,
    /// Exit status, `None` when the process could not be spawned or was signalled.
    pub status: Option<i32>,
}

impl ShellOutput {
    /// Build a successful output carrying the supplied stdout bytes.
    #[must_use]
    pub fn completed(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: Vec::new(),
            status: Some(0),
        }
    }

    /// Build an output for a command that ran and exited non-zero.
    #[must_use]
    pub fn failed(status: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.into(),
            status: Some(status),
        }
    }

    /// Build an output for a command that never ran.
    #[must_use]
    pub fn not_run(reason: impl fmt::Display) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: reason.to_string().into_bytes(),
            status: None,
        }
    }

    /// Returns true when the command ran and exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Returns true when the command ran to completion, whatever its exit code.
    #[must_use]
    pub fn ran(&self) -> bool {
        self.status.is_some()
    }

    /// Lossy UTF-8 view of stdout.
    #[must_use]
    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Lossy UTF-8 view of stderr, trimmed.
    #[must_use]
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_owned()
    }
}

/// Remote command execution against the connected device.
pub trait RemoteShell: Send + Sync {
    /// Run `argv` through the device shell and capture its output.
    fn execute(&self, argv: &[String]) -> ShellOutput;

    /// Copy a remote file to a local path.
    fn pull(&self, remote: &str, local: &Path) -> ShellOutput;
}

impl<T: RemoteShell + ?Sized> RemoteShell for Arc<T> {
    fn execute(&self, argv: &[String]) -> ShellOutput {
        (**self).execute(argv)
    }

    fn pull(&self, remote: &str, local: &Path) -> ShellOutput {
        (**self).pull(remote, local)
    }
}

/// [`RemoteShell`] backed by the host `adb` binary.
#[derive(Debug, Clone)]
pub struct AdbShell {
    program: PathBuf,
}

impl Default for AdbShell {
    fn default() -> Self {
        Self::new(DEFAULT_ADB_PROGRAM)
    }
}

impl AdbShell {
    /// Create a transport that invokes the supplied adb program.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Return the adb program path.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run(&self, args: Vec<OsString>) -> ShellOutput {
        let started = Instant::now();
        debug!(
            "adb {}",
            args.iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );
        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();
        let output = match output {
            Ok(output) => ShellOutput {
                stdout: output.stdout,
                stderr: output.stderr,
                status: output.status.code(),
            },
            Err(err) => ShellOutput::not_run(format!(
                "failed to spawn {}: {err}",
                self.program.display()
            )),
        };
        trace!(
            "adb finished status={:?} stdout={}B stderr={}B elapsed={:?}",
            output.status,
            output.stdout.len(),
            output.stderr.len(),
            started.elapsed()
        );
        output
    }
}

impl RemoteShell for AdbShell {
    fn execute(&self, argv: &[String]) -> ShellOutput {
        let mut args = Vec::with_capacity(argv.len().saturating_add(1));
        args.push(OsString::from("shell"));
        args.extend(argv.iter().map(|arg| OsString::from(quote_arg(arg).into_owned())));
        self.run(args)
    }

    fn pull(&self, remote: &str, local: &Path) -> ShellOutput {
        let args = vec![
            OsString::from("pull"),
            OsString::from(remote),
            local.as_os_str().to_owned(),
        ];
        self.run(args)
    }
}

/// Quote an argument so the device shell sees it as a single word.
///
/// `adb shell` joins its arguments with spaces before handing them to the
/// remote `sh`, so anything outside the plain set is single-quoted.
#[must_use]
pub fn quote_arg(arg: &str) -> Cow<'_, str> {
    let plain = !arg.is_empty()
        && arg.bytes().all(|byte| {
            byte.is_ascii_alphanumeric()
                || matches!(byte, b'_' | b'-' | b'.' | b'/' | b'=' | b':' | b',' | b'+' | b'@' | b'%')
        });
    if plain {
        return Cow::Borrowed(arg);
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('\'');
    for ch in arg.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    Cow::Owned(quoted)
}
