// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Decode the device's positional `stat -t` status line.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use thiserror::Error;

/// Fields following the echoed path in a `stat -t` line.
pub const STAT_FIELD_COUNT: usize = 14;

const S_IFMT: u32 = 0o170_000;
const S_IFSOCK: u32 = 0o140_000;
const S_IFLNK: u32 = 0o120_000;
const S_IFREG: u32 = 0o100_000;
const S_IFBLK: u32 = 0o060_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFCHR: u32 = 0o020_000;
const S_IFIFO: u32 = 0o010_000;

/// Immutable snapshot of a remote path's metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteAttr {
    /// Size in bytes.
    pub size: u64,
    /// File type and permission bits.
    pub mode: u32,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Device identifier.
    pub dev: u64,
    /// Inode number on the device.
    pub ino: u64,
    /// Hard-link count.
    pub nlink: u32,
    /// Last access, seconds since the epoch.
    pub atime: i64,
    /// Last modification, seconds since the epoch.
    pub mtime: i64,
    /// Last status change, seconds since the epoch.
    pub ctime: i64,
}

/// File type encoded in the mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFileType {
    /// Directory.
    Directory,
    /// Regular file.
    RegularFile,
    /// Symbolic link.
    Symlink,
    /// Character device.
    CharDevice,
    /// Block device.
    BlockDevice,
    /// Named pipe.
    NamedPipe,
    /// Unix socket.
    Socket,
}

impl RemoteAttr {
    /// Synthetic record served for the mount root.
    #[must_use]
    pub fn root() -> Self {
        Self {
            mode: S_IFDIR | 0o755,
            nlink: 2,
            ..Self::default()
        }
    }

    /// Classify the record by its `S_IFMT` bits; unknown types read as regular files.
    #[must_use]
    pub fn file_type(&self) -> RemoteFileType {
        match self.mode & S_IFMT {
            S_IFDIR => RemoteFileType::Directory,
            S_IFLNK => RemoteFileType::Symlink,
            S_IFCHR => RemoteFileType::CharDevice,
            S_IFBLK => RemoteFileType::BlockDevice,
            S_IFIFO => RemoteFileType::NamedPipe,
            S_IFSOCK => RemoteFileType::Socket,
            S_IFREG => RemoteFileType::RegularFile,
            _ => RemoteFileType::RegularFile,
        }
    }

    /// Returns true for directories.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type() == RemoteFileType::Directory
    }

    /// Permission bits including setuid, setgid and sticky.
    #[must_use]
    pub fn permissions(&self) -> u16 {
        (self.mode & 0o7777) as u16
    }
}

/// Reasons a status line could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StatError {
    /// Output was not valid UTF-8.
    #[error("status line is not UTF-8")]
    NotUtf8,
    /// Output did not carry exactly [`STAT_FIELD_COUNT`] fields.
    #[error("expected {STAT_FIELD_COUNT} status fields, found {found}")]
    FieldCount {
        /// Number of fields present.
        found: usize,
    },
    /// A numeric field failed to parse.
    #[error("status field {index} is not numeric: {value:?}")]
    InvalidField {
        /// Zero-based field position.
        index: usize,
        /// Raw field text.
        value: String,
    },
}

/// Build the status query for `path`.
#[must_use]
pub fn stat_command(path: &str) -> Vec<String> {
    vec!["stat".to_owned(), "-t".to_owned(), path.to_owned()]
}

/// Decode `stat -t` output for `path` into an attribute record.
///
/// The echoed path and one separator are dropped by length, so paths that
/// contain whitespace decode correctly.
pub fn decode(raw: &[u8], path: &str) -> Result<RemoteAttr, StatError> {
    let rest = raw.get(path.len().saturating_add(1)..).unwrap_or_default();
    let text = std::str::from_utf8(rest).map_err(|_| StatError::NotUtf8)?;
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() != STAT_FIELD_COUNT {
        return Err(StatError::FieldCount {
            found: fields.len(),
        });
    }
    Ok(RemoteAttr {
        size: unsigned(&fields, 0, 10)?,
        mode: narrow(&fields, 2, 16)?,
        uid: narrow(&fields, 3, 10)?,
        gid: narrow(&fields, 4, 10)?,
        dev: unsigned(&fields, 5, 16)?,
        ino: unsigned(&fields, 6, 10)?,
        nlink: narrow(&fields, 7, 10)?,
        atime: signed(&fields, 10)?,
        mtime: signed(&fields, 11)?,
        ctime: signed(&fields, 12)?,
    })
}

fn invalid(fields: &[&str], index: usize) -> StatError {
    StatError::InvalidField {
        index,
        value: fields[index].to_owned(),
    }
}

fn unsigned(fields: &[&str], index: usize, radix: u32) -> Result<u64, StatError> {
    u64::from_str_radix(fields[index], radix).map_err(|_| invalid(fields, index))
}

fn narrow(fields: &[&str], index: usize, radix: u32) -> Result<u32, StatError> {
    let value = unsigned(fields, index, radix)?;
    u32::try_from(value).map_err(|_| invalid(fields, index))
}

fn signed(fields: &[&str], index: usize) -> Result<i64, StatError> {
    fields[index]
        .parse::<i64>()
        .map_err(|_| invalid(fields, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "/sdcard/foo.txt 500000 984 81b0 0 1015 fd00 1234 1 0 0 1700000000 1700000001 1700000002 4096\n";

    #[test]
    fn decodes_positional_fields() {
        let attr = decode(LINE.as_bytes(), "/sdcard/foo.txt").expect("decode");
        assert_eq!(
            attr,
            RemoteAttr {
                size: 500_000,
                mode: 0o100_660,
                uid: 0,
                gid: 1015,
                dev: 0xfd00,
                ino: 1234,
                nlink: 1,
                atime: 1_700_000_000,
                mtime: 1_700_000_001,
                ctime: 1_700_000_002,
            }
        );
        assert_eq!(attr.file_type(), RemoteFileType::RegularFile);
        assert_eq!(attr.permissions(), 0o660);
    }

    #[test]
    fn paths_with_spaces_are_stripped_by_length() {
        let line = "/sdcard/My Music 0 8 41f9 1023 1023 fd00 77 2 0 0 1 2 3 4096";
        let attr = decode(line.as_bytes(), "/sdcard/My Music").expect("decode");
        assert!(attr.is_dir());
        assert_eq!(attr.permissions(), 0o771);
        assert_eq!(attr.ino, 77);
    }

    #[test]
    fn wrong_field_counts_are_rejected() {
        let short = "/a 1 2 3";
        assert_eq!(
            decode(short.as_bytes(), "/a"),
            Err(StatError::FieldCount { found: 3 })
        );
        let long = format!("{} extra", LINE.trim_end());
        assert_eq!(
            decode(long.as_bytes(), "/sdcard/foo.txt"),
            Err(StatError::FieldCount { found: 15 })
        );
        assert_eq!(decode(b"", "/missing"), Err(StatError::FieldCount { found: 0 }));
        let error = "stat: '/missing': No such file or directory";
        assert!(matches!(
            decode(error.as_bytes(), "/missing"),
            Err(StatError::FieldCount { .. })
        ));
    }

    #[test]
    fn non_numeric_fields_are_rejected() {
        let line = "/a 12 8 zz81a4 0 0 fd00 1 1 0 0 1 2 3 4096";
        assert_eq!(
            decode(line.as_bytes(), "/a"),
            Err(StatError::InvalidField {
                index: 2,
                value: "zz81a4".to_owned(),
            })
        );
        let line = "/a 12 8 81a4 0 0 fd00 1 99999999999 0 0 1 2 3 4096";
        assert!(matches!(
            decode(line.as_bytes(), "/a"),
            Err(StatError::InvalidField { index: 7, .. })
        ));
    }

    #[test]
    fn symlinks_and_root() {
        let line = "/sdcard 21 0 a1ff 0 0 fd00 9 1 0 0 1 2 3 4096";
        assert_eq!(
            decode(line.as_bytes(), "/sdcard").expect("decode").file_type(),
            RemoteFileType::Symlink
        );
        let root = RemoteAttr::root();
        assert!(root.is_dir());
        assert_eq!(root.nlink, 2);
        assert_eq!(root.size, 0);
        assert_eq!(root.permissions(), 0o755);
    }
}
