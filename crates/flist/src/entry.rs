//! Per-file metadata records.

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

const S_IFMT: u32 = 0o170_000;
const S_IFREG: u32 = 0o100_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFLNK: u32 = 0o120_000;

/// Classification of a file-list entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileKind {
    /// A regular file; the only kind whose content can be requested.
    Regular,
    /// A directory.
    Directory,
    /// A symbolic link. The target is not carried in this protocol revision.
    Symlink,
    /// Sockets, fifos, devices.
    Other,
}

impl FileKind {
    /// Derives the kind from the `S_IFMT` bits of a stat mode.
    #[must_use]
    pub const fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFREG => Self::Regular,
            S_IFDIR => Self::Directory,
            S_IFLNK => Self::Symlink,
            _ => Self::Other,
        }
    }
}

/// The owning user of an entry.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct User {
    uid: u32,
    name: Option<String>,
}

impl User {
    /// Creates a user record from a uid and an optional account name.
    #[must_use]
    pub const fn new(uid: u32, name: Option<String>) -> Self {
        Self { uid, name }
    }

    /// The root user.
    #[must_use]
    pub const fn root() -> Self {
        Self { uid: 0, name: None }
    }

    /// Returns the numeric user id.
    #[must_use]
    pub const fn uid(&self) -> u32 {
        self.uid
    }

    /// Returns the account name, when one was resolved.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Reports whether this is the root user, which is never named on the
    /// wire.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.uid == 0
    }

    fn resolve(uid: u32) -> Self {
        let name = uzers::get_user_by_uid(uid)
            .map(|user| user.name().to_string_lossy().into_owned());
        Self { uid, name }
    }
}

/// Parsed stat attributes of an entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileAttributes {
    kind: FileKind,
    size: u64,
    mtime: i64,
    mode: u32,
    user: User,
}

impl FileAttributes {
    /// Stats `path` without following symlinks.
    ///
    /// Pre-epoch modification times are clamped to zero so that every time
    /// value stays within the non-negative range the wire encoding covers.
    /// When `resolve_user_names` is set the owning uid is resolved to an
    /// account name for later transmission.
    ///
    /// # Errors
    ///
    /// Propagates the underlying stat failure.
    pub fn stat(path: &Path, resolve_user_names: bool) -> io::Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        let mode = metadata.mode();
        let uid = metadata.uid();
        let user = if resolve_user_names {
            User::resolve(uid)
        } else {
            User::new(uid, None)
        };
        Ok(Self {
            kind: FileKind::from_mode(mode),
            size: metadata.size(),
            mtime: metadata.mtime().max(0),
            mode,
            user,
        })
    }

    /// Builds attributes from raw fields. Used by tests and by callers that
    /// already hold stat results.
    #[must_use]
    pub const fn new(kind: FileKind, size: u64, mtime: i64, mode: u32, user: User) -> Self {
        Self { kind, size, mtime, mode, user }
    }

    /// Returns the entry kind.
    #[must_use]
    pub const fn kind(&self) -> FileKind {
        self.kind
    }

    /// Returns `true` for regular files.
    #[must_use]
    pub fn is_regular_file(&self) -> bool {
        self.kind == FileKind::Regular
    }

    /// Returns `true` for directories.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Last modification time in whole seconds since the epoch.
    #[must_use]
    pub const fn last_modified(&self) -> i64 {
        self.mtime
    }

    /// The full stat mode bits, type included.
    #[must_use]
    pub const fn mode(&self) -> u32 {
        self.mode
    }

    /// The owning user.
    #[must_use]
    pub const fn user(&self) -> &User {
        &self.user
    }
}

/// One immutable file-list entry.
///
/// Couples the local absolute path with the receiver-relative pathname bytes
/// in the negotiated encoding and the attributes captured at listing time.
#[derive(Clone, Debug)]
pub struct FileInfo {
    path: PathBuf,
    pathname_bytes: Vec<u8>,
    attrs: FileAttributes,
}

impl FileInfo {
    /// Creates an entry.
    #[must_use]
    pub const fn new(path: PathBuf, pathname_bytes: Vec<u8>, attrs: FileAttributes) -> Self {
        Self { path, pathname_bytes, attrs }
    }

    /// The absolute path on local storage.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The receiver-relative pathname bytes.
    #[must_use]
    pub fn pathname_bytes(&self) -> &[u8] {
        &self.pathname_bytes
    }

    /// The parsed attributes.
    #[must_use]
    pub const fn attrs(&self) -> &FileAttributes {
        &self.attrs
    }

    /// Reports whether this entry is the dot-dir marker, the directory
    /// entry whose relative pathname is exactly `.`.
    #[must_use]
    pub fn is_dot_dir(&self) -> bool {
        self.attrs.is_directory() && self.pathname_bytes == b"."
    }
}
