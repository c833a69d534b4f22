// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Bridge kernel FUSE callbacks onto an adb session.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
#[cfg(feature = "fuse")]
use std::sync::Mutex;
#[cfg(feature = "fuse")]
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use adb_shell::RemoteShell;
#[cfg(not(feature = "fuse"))]
use anyhow::anyhow;
use anyhow::{Context, Result};
#[cfg(feature = "fuse")]
use log::{debug, info};

#[cfg(feature = "fuse")]
use crate::mutate::MutationOutcome;
use crate::session::AdbSession;
#[cfg(feature = "fuse")]
use crate::stat::{RemoteAttr, RemoteFileType};

/// Inode number reserved for the mount root.
pub const ROOT_INODE: u64 = 1;

/// Join a directory path and an entry name into an absolute mount path.
#[must_use]
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Directory holding `path`; the root is its own parent.
#[must_use]
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Reject size changes; file contents are read-only.
pub fn check_setattr_size(size: Option<u64>) -> Result<(), i32> {
    match size {
        Some(_) => Err(libc::EACCES),
        None => Ok(()),
    }
}

/// Bidirectional map between kernel inode numbers and mount paths.
///
/// Inodes are handed out on first sight of a path and never reused for the
/// lifetime of the mount.
#[derive(Debug)]
pub struct InodeTable {
    by_inode: HashMap<u64, String>,
    by_path: HashMap<String, u64>,
    next_inode: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// Create a table holding only the root.
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self {
            by_inode: HashMap::new(),
            by_path: HashMap::new(),
            next_inode: ROOT_INODE + 1,
        };
        table.by_inode.insert(ROOT_INODE, "/".to_owned());
        table.by_path.insert("/".to_owned(), ROOT_INODE);
        table
    }

    /// Return the inode for `path`, allocating one on first sight.
    pub fn insert(&mut self, path: &str) -> u64 {
        if let Some(existing) = self.by_path.get(path) {
            return *existing;
        }
        let inode = self.next_inode;
        self.next_inode = self.next_inode.saturating_add(1);
        self.by_inode.insert(inode, path.to_owned());
        self.by_path.insert(path.to_owned(), inode);
        inode
    }

    /// Return the path recorded for `inode`.
    #[must_use]
    pub fn path_for(&self, inode: u64) -> Option<&str> {
        self.by_inode.get(&inode).map(String::as_str)
    }

    /// Move the inode recorded for `from`, and every inode below it, under `to`.
    pub fn rename(&mut self, from: &str, to: &str) {
        if from == to || from == "/" {
            return;
        }
        let prefix = format!("{from}/");
        let moved: Vec<(String, u64)> = self
            .by_path
            .iter()
            .filter(|(path, _)| path.as_str() == from || path.starts_with(&prefix))
            .map(|(path, inode)| (path.clone(), *inode))
            .collect();
        for (old, _) in &moved {
            self.by_path.remove(old);
        }
        for (old, inode) in moved {
            let renamed = format!("{to}{}", &old[from.len()..]);
            if let Some(stale) = self.by_path.insert(renamed.clone(), inode) {
                self.by_inode.remove(&stale);
            }
            self.by_inode.insert(inode, renamed);
        }
    }

    /// Number of known paths, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_inode.len()
    }

    /// Always false; the root is always present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_inode.is_empty()
    }
}

/// Create the mount point directory if it does not exist.
pub fn prepare_mountpoint(at: &Path) -> Result<()> {
    fs::create_dir_all(at).with_context(|| format!("create mount directory {}", at.display()))
}

/// Create the local mirror store root if it does not exist.
pub fn prepare_mirror(root: &Path) -> Result<()> {
    fs::create_dir_all(root)
        .with_context(|| format!("create mirror directory {}", root.display()))
}

/// Mount the session at `at` and serve requests until unmounted.
pub fn mount<S: RemoteShell + 'static>(session: AdbSession<S>, at: &Path) -> Result<()> {
    prepare_mountpoint(at)?;
    prepare_mirror(session.pipeline().mirror_root())?;
    #[cfg(feature = "fuse")]
    {
        info!("mounting device filesystem at {}", at.display());
        let filesystem = AdbFuse::new(session);
        let options = [
            fuser::MountOption::FSName("adbfs".to_owned()),
            fuser::MountOption::AutoUnmount,
        ];
        fuser::mount2(filesystem, at, &options)
            .with_context(|| format!("mount {}", at.display()))?;
        Ok(())
    }
    #[cfg(not(feature = "fuse"))]
    {
        let _ = session;
        Err(anyhow!(
            "fuse support disabled; rebuild adbfs with --features fuse"
        ))
    }
}

#[cfg(feature = "fuse")]
fn epoch(seconds: i64) -> SystemTime {
    if seconds >= 0 {
        UNIX_EPOCH + Duration::from_secs(seconds.unsigned_abs())
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(seconds.unsigned_abs()))
            .unwrap_or(UNIX_EPOCH)
    }
}

#[cfg(feature = "fuse")]
fn seconds_since_epoch(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
        Err(err) => -i64::try_from(err.duration().as_secs()).unwrap_or(i64::MAX),
    }
}

#[cfg(feature = "fuse")]
fn file_kind(kind: RemoteFileType) -> fuser::FileType {
    match kind {
        RemoteFileType::Directory => fuser::FileType::Directory,
        RemoteFileType::RegularFile => fuser::FileType::RegularFile,
        RemoteFileType::Symlink => fuser::FileType::Symlink,
        RemoteFileType::CharDevice => fuser::FileType::CharDevice,
        RemoteFileType::BlockDevice => fuser::FileType::BlockDevice,
        RemoteFileType::NamedPipe => fuser::FileType::NamedPipe,
        RemoteFileType::Socket => fuser::FileType::Socket,
    }
}

#[cfg(feature = "fuse")]
fn file_attr(inode: u64, attr: &RemoteAttr) -> fuser::FileAttr {
    fuser::FileAttr {
        ino: inode,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: epoch(attr.atime),
        mtime: epoch(attr.mtime),
        ctime: epoch(attr.ctime),
        crtime: epoch(attr.ctime),
        kind: file_kind(attr.file_type()),
        perm: attr.permissions(),
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        flags: 0,
        blksize: 512,
    }
}

#[cfg(feature = "fuse")]
struct AdbFuse<S> {
    session: AdbSession<S>,
    inodes: Mutex<InodeTable>,
    ttl: Duration,
}

#[cfg(feature = "fuse")]
impl<S: RemoteShell> AdbFuse<S> {
    fn new(session: AdbSession<S>) -> Self {
        let ttl = session.attr_ttl();
        Self {
            session,
            inodes: Mutex::new(InodeTable::new()),
            ttl,
        }
    }

    fn resolve_inode_path(&self, inode: u64) -> Option<String> {
        let inodes = self.inodes.lock().expect("inode lock");
        inodes.path_for(inode).map(str::to_owned)
    }

    fn resolve_child(&self, parent: u64, name: &std::ffi::OsStr) -> Option<String> {
        let parent_path = self.resolve_inode_path(parent)?;
        Some(child_path(&parent_path, &name.to_string_lossy()))
    }

    fn inode_for(&self, path: &str) -> u64 {
        self.inodes.lock().expect("inode lock").insert(path)
    }

    fn reply_entry(&self, path: &str, reply: fuser::ReplyEntry) {
        match self.session.get_attributes(path) {
            Ok(attr) => {
                let inode = self.inode_for(path);
                reply.entry(&self.ttl, &file_attr(inode, &attr), 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn reply_created(&self, outcome: MutationOutcome, path: &str, reply: fuser::ReplyEntry) {
        if let Some(errno) = outcome.errno() {
            debug!("create {path}: {outcome:?}");
            reply.error(errno);
            return;
        }
        self.reply_entry(path, reply);
    }

    fn reply_empty(outcome: MutationOutcome, reply: fuser::ReplyEmpty) {
        match outcome.errno() {
            Some(errno) => reply.error(errno),
            None => reply.ok(),
        }
    }
}

#[cfg(feature = "fuse")]
impl<S: RemoteShell> fuser::Filesystem for AdbFuse<S> {
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let Some(path) = self.resolve_child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        self.reply_entry(&path, reply);
    }

    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        let Some(path) = self.resolve_inode_path(inode) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.session.get_attributes(&path) {
            Ok(attr) => reply.attr(&self.ttl, &file_attr(inode, &attr)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn readlink(&mut self, _req: &fuser::Request<'_>, inode: u64, reply: fuser::ReplyData) {
        let Some(path) = self.resolve_inode_path(inode) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.session.read_link(&path) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let Some(path) = self.resolve_inode_path(inode) else {
            reply.error(libc::ENOENT);
            return;
        };
        let children = self.session.list_children(&path);
        let mut listing = Vec::with_capacity(children.len().saturating_add(2));
        listing.push((inode, fuser::FileType::Directory, ".".to_owned()));
        let parent = self.inode_for(parent_path(&path));
        listing.push((parent, fuser::FileType::Directory, "..".to_owned()));
        for name in children.iter() {
            let child = child_path(&path, name);
            let kind = self
                .session
                .cached_attributes(&child)
                .map_or(fuser::FileType::RegularFile, |attr| {
                    file_kind(attr.file_type())
                });
            listing.push((self.inode_for(&child), kind, name.clone()));
        }
        let start = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
        for (idx, (inode, kind, name)) in listing.into_iter().enumerate().skip(start) {
            let next = i64::try_from(idx + 1).unwrap_or(i64::MAX);
            if reply.add(inode, next, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &fuser::Request<'_>, inode: u64, flags: i32, reply: fuser::ReplyOpen) {
        if self.resolve_inode_path(inode).is_none() {
            reply.error(libc::ENOENT);
            return;
        }
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            reply.error(libc::EACCES);
            return;
        }
        reply.opened(0, 0);
    }

    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        let Some(path) = self.resolve_inode_path(inode) else {
            reply.error(libc::ENOENT);
            return;
        };
        let offset = u64::try_from(offset).unwrap_or(0);
        let data = self.session.read(&path, u64::from(size), offset);
        reply.data(&data);
    }

    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        let Some(path) = self.resolve_child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        Self::reply_empty(self.session.unlink(&path), reply);
    }

    fn rmdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        let Some(path) = self.resolve_child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        Self::reply_empty(self.session.rmdir(&path), reply);
    }

    fn symlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        link_name: &std::ffi::OsStr,
        target: &Path,
        reply: fuser::ReplyEntry,
    ) {
        let Some(path) = self.resolve_child(parent, link_name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let outcome = self.session.symlink(&target.to_string_lossy(), &path);
        self.reply_created(outcome, &path, reply);
    }

    fn rename(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        newparent: u64,
        newname: &std::ffi::OsStr,
        _flags: u32,
        reply: fuser::ReplyEmpty,
    ) {
        let (Some(from), Some(to)) = (
            self.resolve_child(parent, name),
            self.resolve_child(newparent, newname),
        ) else {
            reply.error(libc::ENOENT);
            return;
        };
        let outcome = self.session.rename(&from, &to);
        if outcome.is_applied() {
            self.inodes.lock().expect("inode lock").rename(&from, &to);
        }
        Self::reply_empty(outcome, reply);
    }

    fn link(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        newparent: u64,
        newname: &std::ffi::OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let (Some(from), Some(to)) = (
            self.resolve_inode_path(inode),
            self.resolve_child(newparent, newname),
        ) else {
            reply.error(libc::ENOENT);
            return;
        };
        let outcome = self.session.link(&from, &to);
        self.reply_created(outcome, &to, reply);
    }

    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        let Some(path) = self.resolve_inode_path(inode) else {
            reply.error(libc::ENOENT);
            return;
        };
        if let Err(errno) = check_setattr_size(size) {
            reply.error(errno);
            return;
        }
        let mut outcomes = Vec::new();
        if let Some(mode) = mode {
            outcomes.push(self.session.chmod(&path, mode));
        }
        if uid.is_some() || gid.is_some() {
            let current = match self.session.get_attributes(&path) {
                Ok(attr) => attr,
                Err(err) => {
                    reply.error(err.errno());
                    return;
                }
            };
            outcomes.push(self.session.chown(
                &path,
                uid.unwrap_or(current.uid),
                gid.unwrap_or(current.gid),
            ));
        }
        if let Some(mtime) = mtime {
            let stamp = match mtime {
                fuser::TimeOrNow::SpecificTime(time) => time,
                fuser::TimeOrNow::Now => SystemTime::now(),
            };
            outcomes.push(self.session.utime(&path, seconds_since_epoch(stamp)));
        }
        if let Some(errno) = outcomes.iter().find_map(MutationOutcome::errno) {
            reply.error(errno);
            return;
        }
        match self.session.get_attributes(&path) {
            Ok(attr) => reply.attr(&self.ttl, &file_attr(inode, &attr)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: fuser::ReplyEntry,
    ) {
        let Some(path) = self.resolve_child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let outcome = self.session.mknod(&path);
        self.reply_created(outcome, &path, reply);
    }

    fn mkdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        mode: u32,
        umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        let Some(path) = self.resolve_child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let outcome = self.session.mkdir(&path, mode & !umask);
        self.reply_created(outcome, &path, reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_paths_join_without_double_slashes() {
        assert_eq!(child_path("/", "sdcard"), "/sdcard");
        assert_eq!(child_path("/sdcard", "DCIM"), "/sdcard/DCIM");
    }

    #[test]
    fn inodes_are_stable_per_path() {
        let mut table = InodeTable::new();
        assert_eq!(table.path_for(ROOT_INODE), Some("/"));
        assert_eq!(table.insert("/"), ROOT_INODE);
        let first = table.insert("/sdcard");
        let second = table.insert("/system");
        assert_ne!(first, second);
        assert_eq!(table.insert("/sdcard"), first);
        assert_eq!(table.path_for(second), Some("/system"));
        assert_eq!(table.path_for(999), None);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn rename_moves_the_inode() {
        let mut table = InodeTable::new();
        let inode = table.insert("/a");
        let replaced = table.insert("/b");
        table.rename("/a", "/b");
        assert_eq!(table.path_for(inode), Some("/b"));
        assert_eq!(table.path_for(replaced), None);
        assert_eq!(table.insert("/b"), inode);
        let fresh = table.insert("/a");
        assert_ne!(fresh, inode);
        table.rename("/missing", "/c");
        assert!(!table.is_empty());
    }

    #[test]
    fn directory_rename_moves_descendants() {
        let mut table = InodeTable::new();
        let dir = table.insert("/a");
        let child = table.insert("/a/x");
        let nested = table.insert("/a/x/y");
        let sibling = table.insert("/ab");
        table.rename("/a", "/b");
        assert_eq!(table.path_for(dir), Some("/b"));
        assert_eq!(table.path_for(child), Some("/b/x"));
        assert_eq!(table.path_for(nested), Some("/b/x/y"));
        assert_eq!(table.path_for(sibling), Some("/ab"));
        assert_eq!(table.insert("/b/x"), child);
        assert_ne!(table.insert("/a/x"), child);
    }

    #[test]
    fn parents_resolve_up_to_the_root() {
        assert_eq!(parent_path("/"), "/");
        assert_eq!(parent_path("/sdcard"), "/");
        assert_eq!(parent_path("/sdcard/DCIM"), "/sdcard");
        let mut table = InodeTable::new();
        let sdcard = table.insert("/sdcard");
        assert_eq!(table.insert(parent_path("/sdcard/DCIM")), sdcard);
        assert_eq!(table.insert(parent_path("/sdcard")), ROOT_INODE);
    }

    #[test]
    fn size_changes_are_refused() {
        assert_eq!(check_setattr_size(None), Ok(()));
        assert_eq!(check_setattr_size(Some(0)), Err(libc::EACCES));
    }

    #[test]
    fn prepare_creates_nested_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let at = dir.path().join("mnt").join("phone");
        prepare_mountpoint(&at).expect("mountpoint");
        prepare_mirror(&dir.path().join("mirror")).expect("mirror");
        assert!(at.is_dir());
        assert!(dir.path().join("mirror").is_dir());
    }
}
