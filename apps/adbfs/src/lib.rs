// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Provide the caching and transfer core behind the adbfs mount.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Caching and transfer core for mounting an adb-attached device's filesystem.
//!
//! Every filesystem call turns into one or more `adb shell` commands. Answers
//! are kept for a fixed time in the attribute and directory caches, and reads
//! at arbitrary offsets are built from `dd` copies on the device.

/// Time-boxed attribute and directory caches.
pub mod cache;
/// TOML configuration loader.
pub mod config;
/// Error types surfaced at the filesystem boundary.
pub mod error;
/// FUSE adapter and mount bootstrap.
pub mod mount;
/// Pass-through structural operations.
pub mod mutate;
/// Chunked read pipeline.
pub mod read;
/// Mount-lifetime session owning the caches and transport.
pub mod session;
/// `stat -t` attribute codec.
pub mod stat;

use std::time::Duration;

pub use adb_shell::{AdbShell, RemoteShell, ShellOutput};
pub use cache::{Clock, ManualClock, SystemClock};
pub use config::AdbfsConfig;
pub use error::FsError;
pub use mutate::{Mutation, MutationOutcome};
pub use read::{ReadOutcome, ReadPipeline, TransferConfig};
pub use session::{AdbSession, SessionOptions};
pub use stat::{RemoteAttr, RemoteFileType, StatError};

/// Freshness window for cached attribute records.
pub const ATTR_TTL: Duration = Duration::from_secs(60);
/// Freshness window for cached directory listings.
pub const DIR_TTL: Duration = Duration::from_secs(180);
/// `dd` block size used for full-chunk staging copies.
pub const DD_BLOCK_SIZE: u64 = 1024;
/// Number of `dd` blocks in one staged chunk.
pub const DD_BLOCK_COUNT: u64 = 2048;
/// Remote scratch file receiving staged chunks.
pub const DEFAULT_STAGING_PATH: &str = "/mnt/asec/adbfs.swp";
/// Directory name of the local mirror store under the user's home.
pub const MIRROR_DIR_NAME: &str = ".adbfs";
