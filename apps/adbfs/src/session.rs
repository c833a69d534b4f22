// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Own the mount-lifetime caches and route filesystem calls to the device.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use adb_shell::RemoteShell;
use log::{debug, trace, warn};

use crate::cache::{AttrCache, Clock, DirCache, SystemClock};
use crate::config::default_mirror_root;
use crate::error::FsError;
use crate::mutate::{Mutation, MutationOutcome};
use crate::read::{ReadOutcome, ReadPipeline, TransferConfig};
use crate::stat::{self, RemoteAttr};
use crate::{ATTR_TTL, DIR_TTL};

/// Tunables for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Freshness window for attribute records.
    pub attr_ttl: Duration,
    /// Freshness window for directory listings.
    pub dir_ttl: Duration,
    /// Read pipeline parameters.
    pub transfer: TransferConfig,
    /// Local mirror store root.
    pub mirror_root: PathBuf,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            attr_ttl: ATTR_TTL,
            dir_ttl: DIR_TTL,
            transfer: TransferConfig::default(),
            mirror_root: default_mirror_root(),
        }
    }
}

/// Build the listing query for `path`.
#[must_use]
pub fn list_command(path: &str) -> Vec<String> {
    vec![
        "ls".to_owned(),
        "--color=none".to_owned(),
        "-1".to_owned(),
        path.to_owned(),
    ]
}

/// Split listing output into one name per line, keeping remote order.
#[must_use]
pub fn parse_listing(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Build the symlink query for `path`.
#[must_use]
pub fn readlink_command(path: &str) -> Vec<String> {
    vec!["readlink".to_owned(), path.to_owned()]
}

/// Filesystem view of one device for the lifetime of a mount.
///
/// Each cache has its own lock, and no lock is held while a remote command
/// runs. Two callers refreshing the same stale path both go to the device;
/// the later result replaces the earlier one. Mutations never touch either
/// cache, so callers may observe stale data for up to one TTL.
pub struct AdbSession<S> {
    shell: S,
    clock: Arc<dyn Clock>,
    root: Arc<RemoteAttr>,
    attrs: Mutex<AttrCache>,
    dirs: Mutex<DirCache>,
    pipeline: ReadPipeline,
}

impl<S> std::fmt::Debug for AdbSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdbSession")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl<S: RemoteShell> AdbSession<S> {
    /// Construct a session using the system clock.
    #[must_use]
    pub fn new(shell: S, options: SessionOptions) -> Self {
        Self::with_clock(shell, options, Arc::new(SystemClock))
    }

    /// Construct a session using the supplied clock (primarily for tests).
    #[must_use]
    pub fn with_clock(shell: S, options: SessionOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            shell,
            clock,
            root: Arc::new(RemoteAttr::root()),
            attrs: Mutex::new(AttrCache::new(options.attr_ttl)),
            dirs: Mutex::new(DirCache::new(options.dir_ttl)),
            pipeline: ReadPipeline::new(options.transfer, options.mirror_root),
        }
    }

    /// Borrow the transport.
    #[must_use]
    pub fn shell(&self) -> &S {
        &self.shell
    }

    /// Borrow the read pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &ReadPipeline {
        &self.pipeline
    }

    /// Freshness window for attribute records.
    #[must_use]
    pub fn attr_ttl(&self) -> Duration {
        self.attrs.lock().expect("attribute cache lock").ttl()
    }

    /// Return the attributes of `path`, fetching them when absent or stale.
    ///
    /// Misses are not cached: every lookup of a missing path asks the device.
    pub fn get_attributes(&self, path: &str) -> Result<Arc<RemoteAttr>, FsError> {
        if path == "/" {
            return Ok(self.root.clone());
        }
        let now = self.clock.now();
        if let Some(attr) = self
            .attrs
            .lock()
            .expect("attribute cache lock")
            .fresh(path, now)
        {
            trace!("attribute cache hit {path}");
            return Ok(attr);
        }
        let command = stat::stat_command(path);
        let output = self.shell.execute(&command);
        if !output.ran() {
            return Err(FsError::transport(&command, output.stderr_lossy()));
        }
        let attr = match stat::decode(&output.stdout, path) {
            Ok(attr) => Arc::new(attr),
            Err(err) => {
                debug!("stat {path}: {err}");
                return Err(FsError::not_found(path));
            }
        };
        debug!("attribute cache refresh {path}");
        self.attrs
            .lock()
            .expect("attribute cache lock")
            .insert(path, attr.clone(), self.clock.now());
        Ok(attr)
    }

    /// Return the last attributes fetched for `path`, fresh or stale, without remote calls.
    #[must_use]
    pub fn cached_attributes(&self, path: &str) -> Option<Arc<RemoteAttr>> {
        if path == "/" {
            return Some(self.root.clone());
        }
        self.attrs.lock().expect("attribute cache lock").peek(path)
    }

    /// Return the names inside `path` in the order the device listed them.
    ///
    /// A listing that fails or prints nothing yields an empty sequence, which is
    /// cached like any other result.
    pub fn list_children(&self, path: &str) -> Arc<[String]> {
        let now = self.clock.now();
        if let Some(children) = self
            .dirs
            .lock()
            .expect("directory cache lock")
            .fresh(path, now)
        {
            trace!("directory cache hit {path}");
            return children;
        }
        let output = self.shell.execute(&list_command(path));
        if !output.success() {
            warn!(
                "listing {path} failed ({:?}): {}",
                output.status,
                output.stderr_lossy()
            );
        }
        let children: Arc<[String]> = if output.success() {
            parse_listing(&output.stdout).into()
        } else {
            Arc::from(Vec::new())
        };
        debug!("directory cache refresh {path} ({} entries)", children.len());
        self.dirs
            .lock()
            .expect("directory cache lock")
            .insert(path, children.clone(), self.clock.now());
        children
    }

    /// Read up to `size` bytes at `offset`, degrading every failure to fewer bytes.
    ///
    /// The path must already have cached attributes; otherwise nothing is read.
    pub fn read(&self, path: &str, size: u64, offset: u64) -> Vec<u8> {
        match self.read_outcome(path, size, offset) {
            Ok(outcome) => {
                if let Some(err) = &outcome.failure {
                    warn!("{err}");
                }
                outcome.into_bytes()
            }
            Err(err) => {
                debug!("{err}");
                Vec::new()
            }
        }
    }

    /// Read up to `size` bytes at `offset`, surfacing failures.
    pub fn try_read(&self, path: &str, size: u64, offset: u64) -> Result<Vec<u8>, FsError> {
        self.read_outcome(path, size, offset)?.into_result()
    }

    fn read_outcome(
        &self,
        path: &str,
        size: u64,
        offset: u64,
    ) -> Result<ReadOutcome, FsError> {
        let attr = self
            .cached_attributes(path)
            .ok_or_else(|| FsError::unreadable(path, "no attributes cached before read"))?;
        Ok(self.pipeline.read(&self.shell, path, attr.size, size, offset))
    }

    /// Resolve a symbolic link; absolute targets are rewritten to stay inside the mount.
    pub fn read_link(&self, path: &str) -> Result<String, FsError> {
        let command = readlink_command(path);
        let output = self.shell.execute(&command);
        if !output.ran() {
            return Err(FsError::transport(&command, output.stderr_lossy()));
        }
        let stdout = output.stdout_lossy();
        let target = stdout
            .split_whitespace()
            .next()
            .ok_or_else(|| FsError::not_found(path))?;
        if target.starts_with('/') {
            Ok(format!(".{target}"))
        } else {
            Ok(target.to_owned())
        }
    }

    /// Forward a structural operation to the device.
    pub fn apply(&self, mutation: &Mutation) -> MutationOutcome {
        mutation.apply(&self.shell)
    }

    /// Remove a file.
    pub fn unlink(&self, path: &str) -> MutationOutcome {
        self.apply(&Mutation::Unlink {
            path: path.to_owned(),
        })
    }

    /// Remove an empty directory.
    pub fn rmdir(&self, path: &str) -> MutationOutcome {
        self.apply(&Mutation::Rmdir {
            path: path.to_owned(),
        })
    }

    /// Create a symbolic link at `link` pointing at `target`.
    pub fn symlink(&self, target: &str, link: &str) -> MutationOutcome {
        self.apply(&Mutation::Symlink {
            target: target.to_owned(),
            link: link.to_owned(),
        })
    }

    /// Move `from` to `to`.
    pub fn rename(&self, from: &str, to: &str) -> MutationOutcome {
        self.apply(&Mutation::Rename {
            from: from.to_owned(),
            to: to.to_owned(),
        })
    }

    /// Create a hard link `to` referring to `from`.
    pub fn link(&self, from: &str, to: &str) -> MutationOutcome {
        self.apply(&Mutation::Link {
            from: from.to_owned(),
            to: to.to_owned(),
        })
    }

    /// Change permission bits.
    pub fn chmod(&self, path: &str, mode: u32) -> MutationOutcome {
        self.apply(&Mutation::Chmod {
            path: path.to_owned(),
            mode,
        })
    }

    /// Change ownership.
    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> MutationOutcome {
        self.apply(&Mutation::Chown {
            path: path.to_owned(),
            uid,
            gid,
        })
    }

    /// Create an empty regular file.
    pub fn mknod(&self, path: &str) -> MutationOutcome {
        self.apply(&Mutation::Mknod {
            path: path.to_owned(),
        })
    }

    /// Create a directory.
    pub fn mkdir(&self, path: &str, mode: u32) -> MutationOutcome {
        self.apply(&Mutation::Mkdir {
            path: path.to_owned(),
            mode,
        })
    }

    /// Set the modification time.
    pub fn utime(&self, path: &str, mtime: i64) -> MutationOutcome {
        self.apply(&Mutation::Utime {
            path: path.to_owned(),
            mtime,
        })
    }
}
