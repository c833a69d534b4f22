// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Define the errors adbfs surfaces at the filesystem boundary.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use thiserror::Error;

/// Failures surfaced by session operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FsError {
    /// No remote entry matched, or its status line was malformed.
    #[error("no such remote entry {path}")]
    NotFound {
        /// Remote path that was queried.
        path: String,
    },
    /// The bytes of a remote file could not be delivered.
    #[error("cannot read {path}: {reason}")]
    Unreadable {
        /// Remote path that was read.
        path: String,
        /// Why the read failed.
        reason: String,
    },
    /// The remote command could not be executed at all.
    #[error("remote command `{command}` failed: {detail}")]
    Transport {
        /// Rendered argv of the failing command.
        command: String,
        /// Transport-provided failure detail.
        detail: String,
    },
}

impl FsError {
    pub(crate) fn not_found(path: &str) -> Self {
        Self::NotFound {
            path: path.to_owned(),
        }
    }

    pub(crate) fn unreadable(path: &str, reason: impl Into<String>) -> Self {
        Self::Unreadable {
            path: path.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(argv: &[String], detail: impl Into<String>) -> Self {
        Self::Transport {
            command: argv.join(" "),
            detail: detail.into(),
        }
    }

    /// Map the error onto the platform errno reported to the kernel.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound { .. } => libc::ENOENT,
            Self::Unreadable { .. } | Self::Transport { .. } => libc::EIO,
        }
    }
}
