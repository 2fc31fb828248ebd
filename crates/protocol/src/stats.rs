//! Session statistics.
//!
//! Running counters maintained by the sender driver and, on server sessions,
//! reported to the peer at the end of the run as five variable-length
//! integers with a three-byte floor.

/// Counters covering one sender session.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SessionStatistics {
    /// Total bytes read from the transport, frame headers included.
    pub total_bytes_read: u64,
    /// Total bytes written to the transport, frame headers included.
    pub total_bytes_written: u64,
    /// Sum of the sizes of all regular files in the file list.
    pub total_file_size: u64,
    /// Wall-clock time spent building the initial file list, in milliseconds.
    pub file_list_build_time_ms: u64,
    /// Wall-clock time spent transmitting the initial file list, in
    /// milliseconds.
    pub file_list_transfer_time_ms: u64,
    /// Number of entries in the file list.
    pub num_files: u64,
    /// Number of files whose content was actually transferred.
    pub num_transferred_files: u64,
    /// Sum of the sizes of the transferred files.
    pub total_transferred_size: u64,
    /// Bytes sent as literal data.
    pub total_literal_size: u64,
    /// Bytes covered by block-match tokens.
    pub total_matched_size: u64,
    /// Bytes spent on file-list metadata frames.
    pub total_file_list_size: u64,
}

impl SessionStatistics {
    /// Creates a zeroed statistics record.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            total_bytes_read: 0,
            total_bytes_written: 0,
            total_file_size: 0,
            file_list_build_time_ms: 0,
            file_list_transfer_time_ms: 0,
            num_files: 0,
            num_transferred_files: 0,
            total_transferred_size: 0,
            total_literal_size: 0,
            total_matched_size: 0,
            total_file_list_size: 0,
        }
    }

    /// Returns the values of the end-of-session statistics block in wire
    /// order: total read, total written, total file size, list build time,
    /// list transfer time.
    #[must_use]
    pub const fn server_block(&self) -> [i64; 5] {
        [
            self.total_bytes_read as i64,
            self.total_bytes_written as i64,
            self.total_file_size as i64,
            self.file_list_build_time_ms as i64,
            self.file_list_transfer_time_ms as i64,
        ]
    }
}
