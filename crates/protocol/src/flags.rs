//! Bit-flag constants shared with the peer.
//!
//! Three independent flag spaces: `XMIT_*` bits qualify each file-list entry
//! frame, `ITEM_*` bits arrive with every per-file request or acknowledgement,
//! and `IO_ERROR_*` bits accumulate each side's local I/O failures. Numeric
//! values mirror the reference implementation.

/// File-list entry flags (`xflags`).
pub mod xmit {
    /// Entry is a directory, or the zero-avoidance marker for the first
    /// regular entry.
    pub const TOP_DIR: u16 = 1 << 0;
    /// Mode equals the previous entry's mode.
    pub const SAME_MODE: u16 = 1 << 1;
    /// The flags field is 16 bits wide on the wire.
    pub const EXTENDED_FLAGS: u16 = 1 << 2;
    /// Owning uid equals the previous entry's uid.
    pub const SAME_UID: u16 = 1 << 3;
    /// Owning gid equals the previous entry's gid.
    pub const SAME_GID: u16 = 1 << 4;
    /// A common name prefix with the previous entry is elided.
    pub const SAME_NAME: u16 = 1 << 5;
    /// The name suffix length exceeds one byte.
    pub const LONG_NAME: u16 = 1 << 6;
    /// Modification time equals the previous entry's.
    pub const SAME_TIME: u16 = 1 << 7;
    /// A user-name definition follows the uid.
    pub const USER_NAME_FOLLOWS: u16 = 1 << 10;
    /// End-of-list marker carrying an I/O error value instead of an entry.
    pub const IO_ERROR_ENDLIST: u16 = 1 << 12;
}

/// Per-file request/acknowledgement flags (`iflags`).
pub mod item {
    /// Report access-time change.
    pub const REPORT_ATIME: u16 = 1 << 0;
    /// Report content change.
    pub const REPORT_CHANGE: u16 = 1 << 1;
    /// Report size change.
    pub const REPORT_SIZE: u16 = 1 << 2;
    /// Report time change.
    pub const REPORT_TIME: u16 = 1 << 3;
    /// Report permission change.
    pub const REPORT_PERMS: u16 = 1 << 4;
    /// Report ownership change.
    pub const REPORT_OWNER: u16 = 1 << 5;
    /// Report group change.
    pub const REPORT_GROUP: u16 = 1 << 6;
    /// Report ACL change.
    pub const REPORT_ACL: u16 = 1 << 7;
    /// Report extended-attribute change.
    pub const REPORT_XATTR: u16 = 1 << 8;
    /// A basis-type byte follows on the wire.
    pub const BASIS_TYPE_FOLLOWS: u16 = 1 << 11;
    /// An alternate name follows on the wire.
    pub const XNAME_FOLLOWS: u16 = 1 << 12;
    /// The file is being created.
    pub const IS_NEW: u16 = 1 << 13;
    /// The change is local to the receiver.
    pub const LOCAL_CHANGE: u16 = 1 << 14;
    /// The peer requests the file's content.
    pub const TRANSFER: u16 = 1 << 15;

    const VALID_MASK: u16 = REPORT_ATIME
        | REPORT_CHANGE
        | REPORT_SIZE
        | REPORT_TIME
        | REPORT_PERMS
        | REPORT_OWNER
        | REPORT_GROUP
        | REPORT_ACL
        | REPORT_XATTR
        | BASIS_TYPE_FOLLOWS
        | XNAME_FOLLOWS
        | IS_NEW
        | LOCAL_CHANGE
        | TRANSFER;

    /// Returns `true` when `flags` contains only known bits.
    #[must_use]
    pub const fn is_valid(flags: u16) -> bool {
        flags & !VALID_MASK == 0
    }
}

/// Accumulated I/O error bits exchanged via `IO_ERROR` messages.
pub mod io_error {
    /// A general I/O failure (stat, readdir, open, read).
    pub const GENERAL: i32 = 1;
    /// A listed file vanished before its content could be sent.
    pub const VANISHED: i32 = 2;
    /// The deletion limit was reached on the receiving side.
    pub const DEL_LIMIT: i32 = 4;
    /// A transfer-level error was reported by the peer.
    pub const TRANSFER: i32 = 8;
}
