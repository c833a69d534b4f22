// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Synthesize arbitrary-offset reads from remote dd copies.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use adb_shell::RemoteShell;
use log::{debug, warn};

use crate::error::FsError;
use crate::{DD_BLOCK_COUNT, DD_BLOCK_SIZE, DEFAULT_STAGING_PATH};

/// Chunk staging parameters for the read pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// `dd` block size for full-chunk copies.
    pub block_size: u64,
    /// Number of blocks in a full chunk.
    pub block_count: u64,
    /// Remote scratch file receiving staged chunks.
    pub staging_path: String,
    /// Stage and pull a chunk before each extraction.
    pub stage_chunks: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: DD_BLOCK_SIZE,
            block_count: DD_BLOCK_COUNT,
            staging_path: DEFAULT_STAGING_PATH.to_owned(),
            stage_chunks: true,
        }
    }
}

impl TransferConfig {
    /// Bytes covered by one full staged chunk.
    #[must_use]
    pub fn chunk_bytes(&self) -> u64 {
        self.block_size.saturating_mul(self.block_count)
    }
}

/// Bytes delivered by a read plus the failure that cut it short, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes captured from the extraction, never longer than the clamped request.
    pub data: Vec<u8>,
    /// Failure observed while extracting.
    pub failure: Option<FsError>,
}

impl ReadOutcome {
    fn empty() -> Self {
        Self {
            data: Vec::new(),
            failure: None,
        }
    }

    /// Return the captured bytes, dropping any failure.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Return the bytes, or the failure if one was observed.
    pub fn into_result(self) -> Result<Vec<u8>, FsError> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self.data),
        }
    }
}

/// Clamp a request against the file size; `None` when `offset` is at or past EOF.
#[must_use]
pub fn clamp_request(file_size: u64, offset: u64, size: u64) -> Option<u64> {
    if offset >= file_size {
        return None;
    }
    Some(size.min(file_size - offset))
}

/// Stages remote chunks into the mirror store and extracts requested slices.
#[derive(Debug, Clone)]
pub struct ReadPipeline {
    config: TransferConfig,
    mirror_root: PathBuf,
}

impl ReadPipeline {
    /// Create a pipeline pulling staged chunks under `mirror_root`.
    #[must_use]
    pub fn new(config: TransferConfig, mirror_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            mirror_root: mirror_root.into(),
        }
    }

    /// Return the transfer parameters.
    #[must_use]
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Return the local mirror root.
    #[must_use]
    pub fn mirror_root(&self) -> &Path {
        &self.mirror_root
    }

    /// Local scratch path mirroring `path`.
    #[must_use]
    pub fn mirror_path(&self, path: &str) -> PathBuf {
        self.mirror_root.join(path.trim_start_matches('/'))
    }

    /// Remote copy of the chunk starting at `offset` into the staging file.
    ///
    /// A tail shorter than one chunk is copied byte by byte. A full chunk is
    /// copied in blocks when `offset` is block aligned and byte by byte otherwise.
    #[must_use]
    pub fn staging_command(&self, path: &str, file_size: u64, offset: u64) -> Vec<String> {
        let chunk = self.config.chunk_bytes();
        let block_size = self.config.block_size.max(1);
        let (skip, bs, count) = if offset.saturating_add(chunk) > file_size {
            (offset, 1, file_size.saturating_sub(offset))
        } else if offset % block_size == 0 {
            (offset / block_size, block_size, self.config.block_count)
        } else {
            (offset, 1, chunk)
        };
        vec![
            "dd".to_owned(),
            format!("if={path}"),
            format!("of={}", self.config.staging_path),
            format!("skip={skip}"),
            format!("bs={bs}"),
            format!("count={count}"),
        ]
    }

    /// Byte-exact extraction of `size` bytes at `offset`, written to stdout.
    #[must_use]
    pub fn extract_command(path: &str, offset: u64, size: u64) -> Vec<String> {
        vec![
            "dd".to_owned(),
            format!("if={path}"),
            format!("skip={offset}"),
            "bs=1".to_owned(),
            format!("count={size}"),
        ]
    }

    /// Read up to `size` bytes at `offset` from a remote file of `file_size` bytes.
    pub fn read<S: RemoteShell + ?Sized>(
        &self,
        shell: &S,
        path: &str,
        file_size: u64,
        size: u64,
        offset: u64,
    ) -> ReadOutcome {
        let Some(size) = clamp_request(file_size, offset, size) else {
            return ReadOutcome::empty();
        };
        if size == 0 {
            return ReadOutcome::empty();
        }
        if self.config.stage_chunks {
            self.stage(shell, path, file_size, offset);
        }
        let command = Self::extract_command(path, offset, size);
        let output = shell.execute(&command);
        let mut data = output.stdout;
        data.truncate(usize::try_from(size).unwrap_or(usize::MAX));
        let failure = if output.status.is_none() {
            Some(FsError::transport(&command, String::from_utf8_lossy(&output.stderr).trim()))
        } else if output.status != Some(0) {
            Some(FsError::unreadable(
                path,
                format!(
                    "extraction exited with {:?}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ))
        } else {
            None
        };
        debug!(
            "read {path} offset={offset} size={size} returned={}",
            data.len()
        );
        ReadOutcome { data, failure }
    }

    fn stage<S: RemoteShell + ?Sized>(&self, shell: &S, path: &str, file_size: u64, offset: u64) {
        let copy = shell.execute(&self.staging_command(path, file_size, offset));
        if !copy.success() {
            debug!(
                "staging copy of {path} at {offset} failed ({:?}): {}",
                copy.status,
                copy.stderr_lossy()
            );
            return;
        }
        let local = self.mirror_path(path);
        if let Some(parent) = local.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!("create mirror directory {}: {err}", parent.display());
                return;
            }
        }
        let pulled = shell.pull(&self.config.staging_path, &local);
        if !pulled.success() {
            warn!(
                "pull {} -> {} failed ({:?}): {}",
                self.config.staging_path,
                local.display(),
                pulled.status,
                pulled.stderr_lossy()
            );
        }
    }
}
