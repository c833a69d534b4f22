// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Translate structural filesystem operations into remote commands.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use adb_shell::{RemoteShell, ShellOutput};
use chrono::DateTime;
use log::debug;

/// Structural operation forwarded to the device without touching any cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Remove a file.
    Unlink {
        /// Absolute mount path.
        path: String,
    },
    /// Remove an empty directory.
    Rmdir {
        /// Absolute mount path.
        path: String,
    },
    /// Create a symbolic link at `link` pointing at `target`.
    Symlink {
        /// Link target, passed through verbatim.
        target: String,
        /// Absolute mount path of the new link.
        link: String,
    },
    /// Move `from` to `to`.
    Rename {
        /// Source mount path.
        from: String,
        /// Destination mount path.
        to: String,
    },
    /// Create a hard link `to` referring to `from`.
    Link {
        /// Existing mount path.
        from: String,
        /// New mount path.
        to: String,
    },
    /// Change permission bits.
    Chmod {
        /// Absolute mount path.
        path: String,
        /// Permission bits.
        mode: u32,
    },
    /// Change ownership.
    Chown {
        /// Absolute mount path.
        path: String,
        /// New owner.
        uid: u32,
        /// New group.
        gid: u32,
    },
    /// Create an empty regular file.
    Mknod {
        /// Absolute mount path.
        path: String,
    },
    /// Create a directory.
    Mkdir {
        /// Absolute mount path.
        path: String,
        /// Permission bits.
        mode: u32,
    },
    /// Set the modification time.
    Utime {
        /// Absolute mount path.
        path: String,
        /// Seconds since the epoch.
        mtime: i64,
    },
}

/// Result of forwarding a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The remote command exited with status 0.
    Applied,
    /// The remote command failed or never ran.
    RemoteFailed {
        /// Exit status, `None` when the command never ran.
        status: Option<i32>,
        /// Captured stderr.
        stderr: String,
    },
}

impl MutationOutcome {
    /// Classify a transport result.
    #[must_use]
    pub fn from_output(output: &ShellOutput) -> Self {
        if output.success() {
            Self::Applied
        } else {
            Self::RemoteFailed {
                status: output.status,
                stderr: output.stderr_lossy(),
            }
        }
    }

    /// Returns true when the remote command succeeded.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    /// Errno reported to the kernel; `None` when the mutation applied.
    #[must_use]
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Applied => None,
            Self::RemoteFailed { status: None, .. } => Some(libc::EIO),
            Self::RemoteFailed { .. } => Some(libc::EPERM),
        }
    }
}

/// Rewrite an absolute mount path relative to the device shell's working directory.
#[must_use]
pub fn relative(path: &str) -> String {
    format!(".{path}")
}

/// Render a `touch -d` timestamp in UTC; out-of-range values fall back to `@SECONDS`.
#[must_use]
pub fn touch_stamp(mtime: i64) -> String {
    match DateTime::from_timestamp(mtime, 0) {
        Some(stamp) => stamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => format!("@{mtime}"),
    }
}

impl Mutation {
    /// Short operation name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unlink { .. } => "unlink",
            Self::Rmdir { .. } => "rmdir",
            Self::Symlink { .. } => "symlink",
            Self::Rename { .. } => "rename",
            Self::Link { .. } => "link",
            Self::Chmod { .. } => "chmod",
            Self::Chown { .. } => "chown",
            Self::Mknod { .. } => "mknod",
            Self::Mkdir { .. } => "mkdir",
            Self::Utime { .. } => "utime",
        }
    }

    /// Remote argv implementing the operation.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        match self {
            Self::Unlink { path } => vec!["rm".into(), "-f".into(), relative(path)],
            Self::Rmdir { path } => vec!["rmdir".into(), relative(path)],
            Self::Symlink { target, link } => {
                vec!["ln".into(), "-s".into(), target.clone(), relative(link)]
            }
            Self::Rename { from, to } => vec!["mv".into(), relative(from), relative(to)],
            Self::Link { from, to } => vec!["ln".into(), relative(from), relative(to)],
            Self::Chmod { path, mode } => {
                vec!["chmod".into(), format!("{:o}", mode & 0o7777), relative(path)]
            }
            Self::Chown { path, uid, gid } => {
                vec!["chown".into(), format!("{uid}:{gid}"), relative(path)]
            }
            Self::Mknod { path } => vec!["touch".into(), relative(path)],
            Self::Mkdir { path, mode } => vec![
                "mkdir".into(),
                "-m".into(),
                format!("{:o}", mode & 0o7777),
                relative(path),
            ],
            Self::Utime { path, mtime } => {
                vec!["touch".into(), "-d".into(), touch_stamp(*mtime), relative(path)]
            }
        }
    }

    /// Run the operation against the device.
    pub fn apply<S: RemoteShell + ?Sized>(&self, shell: &S) -> MutationOutcome {
        let outcome = MutationOutcome::from_output(&shell.execute(&self.argv()));
        debug!("{} -> {:?}", self.name(), outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| (*part).to_owned()).collect()
    }

    #[test]
    fn paths_are_rewritten_relative_to_the_shell() {
        assert_eq!(relative("/sdcard/a"), "./sdcard/a");
        assert_eq!(
            Mutation::Rename {
                from: "/a".to_owned(),
                to: "/b".to_owned(),
            }
            .argv(),
            argv(&["mv", "./a", "./b"])
        );
        assert_eq!(
            Mutation::Unlink {
                path: "/sdcard/x".to_owned(),
            }
            .argv(),
            argv(&["rm", "-f", "./sdcard/x"])
        );
    }

    #[test]
    fn symlink_targets_are_verbatim() {
        assert_eq!(
            Mutation::Symlink {
                target: "../DCIM".to_owned(),
                link: "/sdcard/photos".to_owned(),
            }
            .argv(),
            argv(&["ln", "-s", "../DCIM", "./sdcard/photos"])
        );
    }

    #[test]
    fn modes_render_in_octal() {
        assert_eq!(
            Mutation::Chmod {
                path: "/a".to_owned(),
                mode: 0o100_644,
            }
            .argv(),
            argv(&["chmod", "644", "./a"])
        );
        assert_eq!(
            Mutation::Mkdir {
                path: "/d".to_owned(),
                mode: 0o755,
            }
            .argv(),
            argv(&["mkdir", "-m", "755", "./d"])
        );
        assert_eq!(
            Mutation::Chown {
                path: "/a".to_owned(),
                uid: 1000,
                gid: 1015,
            }
            .argv(),
            argv(&["chown", "1000:1015", "./a"])
        );
    }

    #[test]
    fn touch_stamps_are_utc() {
        assert_eq!(touch_stamp(0), "1970-01-01T00:00:00Z");
        assert_eq!(touch_stamp(1_700_000_000), "2023-11-14T22:13:20Z");
        assert_eq!(touch_stamp(i64::MAX), format!("@{}", i64::MAX));
    }

    #[test]
    fn outcome_errno_mapping() {
        assert_eq!(MutationOutcome::Applied.errno(), None);
        let refused = MutationOutcome::from_output(&ShellOutput::failed(1, "chown: Operation not permitted"));
        assert_eq!(refused.errno(), Some(libc::EPERM));
        let offline = MutationOutcome::from_output(&ShellOutput::not_run("adb: device offline"));
        assert_eq!(offline.errno(), Some(libc::EIO));
    }

    #[test]
    fn outcomes_classify_exit_status() {
        assert!(MutationOutcome::from_output(&ShellOutput::completed("")).is_applied());
        assert_eq!(
            MutationOutcome::from_output(&ShellOutput::failed(1, "rmdir: Directory not empty\n")),
            MutationOutcome::RemoteFailed {
                status: Some(1),
                stderr: "rmdir: Directory not empty".to_owned(),
            }
        );
    }
}
