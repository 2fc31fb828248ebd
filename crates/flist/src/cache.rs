//! Previous-entry memo for the file-list serialiser.

use crate::entry::User;

/// Remembers the previous entry's mode, user, mtime, and pathname bytes.
///
/// Used exclusively by the serialiser to decide which `SAME_*` delta flags
/// apply to the next entry. One instance lives per connection; the fields
/// start unset so the first entry always transmits its full metadata.
#[derive(Clone, Debug, Default)]
pub struct FileInfoCache {
    prev_mode: Option<u32>,
    prev_mtime: Option<i64>,
    prev_user: Option<User>,
    prev_name_bytes: Vec<u8>,
}

impl FileInfoCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The previous entry's mode, if any entry was cached yet.
    #[must_use]
    pub const fn prev_mode(&self) -> Option<u32> {
        self.prev_mode
    }

    /// Records the mode of the entry being serialised.
    pub fn set_prev_mode(&mut self, mode: u32) {
        self.prev_mode = Some(mode);
    }

    /// The previous entry's modification time.
    #[must_use]
    pub const fn prev_mtime(&self) -> Option<i64> {
        self.prev_mtime
    }

    /// Records the modification time of the entry being serialised.
    pub fn set_prev_mtime(&mut self, mtime: i64) {
        self.prev_mtime = Some(mtime);
    }

    /// The previous entry's owning user.
    #[must_use]
    pub const fn prev_user(&self) -> Option<&User> {
        self.prev_user.as_ref()
    }

    /// Records the owning user of the entry being serialised.
    pub fn set_prev_user(&mut self, user: User) {
        self.prev_user = Some(user);
    }

    /// The previous entry's pathname bytes; empty before the first entry.
    #[must_use]
    pub fn prev_name_bytes(&self) -> &[u8] {
        &self.prev_name_bytes
    }

    /// Records the pathname bytes of the entry being serialised.
    pub fn set_prev_name_bytes(&mut self, bytes: &[u8]) {
        self.prev_name_bytes.clear();
        self.prev_name_bytes.extend_from_slice(bytes);
    }
}
