//! Sender driver.
//!
//! The single-threaded state machine coordinating list expansion, per-file
//! requests, and teardown. The peer drives demand: it acknowledges entries
//! it already holds, requests content with `TRANSFER`-flagged indices, and
//! paces the incremental file list with `DONE` tokens. The driver keeps the
//! pipeline primed (never letting the receiver starve while the list is
//! still expandable) without exceeding the in-flight entry bound that caps
//! the receiver's memory footprint.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use flist::{FileAttributes, FileInfo, FileInfoCache, FileList, SegmentBuilder, User};
use protocol::envelope::MessageCode;
use protocol::flags::{io_error, item, xmit};
use protocol::{SessionStatistics, SumHeader, TextCodec};
use tracing::{debug, info, warn};

use crate::channel::DuplexChannel;
use crate::delta;
use crate::error::SenderError;
use crate::fileview::{FileView, FileViewOpenError, DEFAULT_BLOCK_SIZE};
use crate::sums::ChecksumIndex;

/// Upper bound on file-list entries in flight, keeping the receiver's queue
/// neither starved nor overrun.
pub const PARTIAL_FILE_LIST_SIZE: i64 = 1024;

/// Window-buffer factor for matching transfers: the literal run may grow to
/// this many blocks before it is force-flushed.
const MATCH_BUFFER_FACTOR: usize = 10;

/// Which entries the user-supplied roots select.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileSelection {
    /// Only the named files; directory roots are skipped, a dot-dir root is
    /// expanded one level.
    Exact,
    /// The named files plus the recursive contents of named directories,
    /// expanded incrementally.
    Recurse,
}

/// Teardown progression of the session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ConnectionPhase {
    Transfer,
    TearingDown,
    Done,
}

impl ConnectionPhase {
    const fn is_active(self) -> bool {
        !matches!(self, Self::Done)
    }

    const fn is_tearing_down(self) -> bool {
        matches!(self, Self::TearingDown)
    }

    fn step_down(&mut self) {
        *self = match self {
            Self::Transfer => Self::TearingDown,
            Self::TearingDown | Self::Done => Self::Done,
        };
    }
}

/// Monotonic per-index record of completed content sends.
#[derive(Debug, Default)]
struct TransmittedSet {
    words: Vec<u64>,
}

impl TransmittedSet {
    fn set(&mut self, index: u32) {
        let word = (index / 64) as usize;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (index % 64);
    }

    fn get(&self, index: u32) -> bool {
        self.words
            .get((index / 64) as usize)
            .is_some_and(|word| word & (1 << (index % 64)) != 0)
    }
}

/// Configures and builds a [`Sender`].
///
/// The server and client profiles preset the flags the respective session
/// roles use; individual options can still be overridden afterwards.
#[derive(Debug)]
pub struct SenderBuilder {
    sources: Vec<PathBuf>,
    seed: checksums::ChecksumSeed,
    file_selection: FileSelection,
    preserve_user: bool,
    receive_filter_rules: bool,
    send_statistics: bool,
    exit_early_if_empty_list: bool,
    exit_after_eof: bool,
    safe_file_list: bool,
    interruptible: bool,
    charset: TextCodec,
    cancel: Option<Arc<AtomicBool>>,
}

impl SenderBuilder {
    /// Starts from neutral defaults: exact selection, safe file list,
    /// interruptible, UTF-8.
    #[must_use]
    pub fn new(sources: Vec<PathBuf>, seed: checksums::ChecksumSeed) -> Self {
        Self {
            sources,
            seed,
            file_selection: FileSelection::Exact,
            preserve_user: false,
            receive_filter_rules: false,
            send_statistics: false,
            exit_early_if_empty_list: false,
            exit_after_eof: false,
            safe_file_list: true,
            interruptible: true,
            charset: TextCodec::utf8(),
            cancel: None,
        }
    }

    /// The server profile: receives filter rules, reports statistics, and
    /// exits early on an empty list.
    #[must_use]
    pub fn new_server(sources: Vec<PathBuf>, seed: checksums::ChecksumSeed) -> Self {
        let mut builder = Self::new(sources, seed);
        builder.receive_filter_rules = true;
        builder.send_statistics = true;
        builder.exit_early_if_empty_list = true;
        builder.exit_after_eof = false;
        builder
    }

    /// The client profile: drains peer messages until EOF after the final
    /// handshake.
    #[must_use]
    pub fn new_client(sources: Vec<PathBuf>, seed: checksums::ChecksumSeed) -> Self {
        let mut builder = Self::new(sources, seed);
        builder.receive_filter_rules = false;
        builder.send_statistics = false;
        builder.exit_early_if_empty_list = false;
        builder.exit_after_eof = true;
        builder
    }

    /// Selects exact or recursive root handling.
    #[must_use]
    pub fn file_selection(mut self, selection: FileSelection) -> Self {
        self.file_selection = selection;
        self
    }

    /// Transmits file ownership (uid and user name).
    #[must_use]
    pub fn preserve_user(mut self, preserve: bool) -> Self {
        self.preserve_user = preserve;
        self
    }

    /// Controls the error-end-list encoding for failed expansions.
    #[must_use]
    pub fn safe_file_list(mut self, safe: bool) -> Self {
        self.safe_file_list = safe;
        self
    }

    /// Honours or ignores the cooperative cancellation flag.
    #[must_use]
    pub fn interruptible(mut self, interruptible: bool) -> Self {
        self.interruptible = interruptible;
        self
    }

    /// Overrides the early-exit behaviour on an empty initial list.
    #[must_use]
    pub fn exit_early_if_empty_list(mut self, exit_early: bool) -> Self {
        self.exit_early_if_empty_list = exit_early;
        self
    }

    /// The character encoding negotiated for pathnames and user names.
    #[must_use]
    pub fn charset(mut self, codec: TextCodec) -> Self {
        self.charset = codec;
        self
    }

    /// Installs a flag the host may set to cancel the run cooperatively.
    #[must_use]
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Binds the configuration to a transport.
    pub fn build<R: Read, W: Write>(self, reader: R, writer: W) -> Sender<R, W> {
        let recursive = self.file_selection == FileSelection::Recurse;
        Sender {
            channel: DuplexChannel::new(reader, writer, self.charset),
            file_list: FileList::new(recursive),
            cache: FileInfoCache::new(),
            transmitted: TransmittedSet::default(),
            transferred_users: Vec::new(),
            stats: SessionStatistics::new(),
            sources: self.sources,
            seed: self.seed,
            file_selection: self.file_selection,
            preserve_user: self.preserve_user,
            receive_filter_rules: self.receive_filter_rules,
            send_statistics: self.send_statistics,
            exit_early_if_empty_list: self.exit_early_if_empty_list,
            exit_after_eof: self.exit_after_eof,
            safe_file_list: self.safe_file_list,
            interruptible: self.interruptible,
            codec: self.charset,
            cancel: self.cancel,
        }
    }
}

/// The sending side of one session.
pub struct Sender<R: Read, W: Write> {
    channel: DuplexChannel<R, W>,
    file_list: FileList,
    cache: FileInfoCache,
    transmitted: TransmittedSet,
    transferred_users: Vec<User>,
    stats: SessionStatistics,
    sources: Vec<PathBuf>,
    seed: checksums::ChecksumSeed,
    file_selection: FileSelection,
    preserve_user: bool,
    receive_filter_rules: bool,
    send_statistics: bool,
    exit_early_if_empty_list: bool,
    exit_after_eof: bool,
    safe_file_list: bool,
    interruptible: bool,
    codec: TextCodec,
    cancel: Option<Arc<AtomicBool>>,
}

impl<R: Read, W: Write> Sender<R, W> {
    /// Runs the session to completion.
    ///
    /// Returns `true` when the initial list was built without errors and no
    /// I/O error accumulated on either side. Statistics are finalised on
    /// every exit path, successful or not.
    ///
    /// # Errors
    ///
    /// Fatal protocol, channel, or cancellation failures. Per-file local
    /// I/O errors are recovered and only lower the returned flag.
    pub fn run(&mut self) -> Result<bool, SenderError> {
        let result = self.transfer();
        self.refresh_totals();
        result
    }

    /// The statistics gathered so far; final after [`run`](Self::run)
    /// returns.
    #[must_use]
    pub const fn statistics(&self) -> &SessionStatistics {
        &self.stats
    }

    /// Consumes the sender and returns the write half of the transport.
    /// Useful to recover a captured in-memory stream after a run.
    pub fn into_writer(self) -> W {
        self.channel.into_writer()
    }

    fn transfer(&mut self) -> Result<bool, SenderError> {
        debug!("sender transfer starting");
        self.check_cancelled()?;

        if self.receive_filter_rules {
            let rules = self.receive_filter_rule_text()?;
            if !rules.is_empty() {
                return Err(SenderError::Protocol(format!(
                    "received a list of filter rules of length {}, which is not supported ({rules})",
                    rules.len()
                )));
            }
        }

        let build_started = Instant::now();
        let (initial_ok, roots) = self.initial_expand();
        let mut builder = SegmentBuilder::new();
        builder.add_all(roots);

        let list_bytes_before = self.channel.bytes_written();
        let segment = self.file_list.new_segment(builder);
        for (_, entry) in segment.files() {
            Self::send_file_meta_data(
                &mut self.channel,
                &mut self.cache,
                &mut self.transferred_users,
                &self.codec,
                self.preserve_user,
                self.file_selection == FileSelection::Recurse,
                entry,
            )?;
        }
        let metadata_done = Instant::now();

        if initial_ok {
            self.send_segment_done()?;
        } else {
            self.send_file_list_error_notification()?;
        }
        let list_done = Instant::now();

        if self.preserve_user && self.file_selection != FileSelection::Recurse {
            self.send_user_list()?;
        }

        self.stats.file_list_build_time_ms =
            (metadata_done - build_started).as_millis().max(1) as u64;
        self.stats.file_list_transfer_time_ms = (list_done - metadata_done).as_millis() as u64;
        self.stats.total_file_list_size += self.channel.bytes_written() - list_bytes_before;

        if !self.safe_file_list && !initial_ok {
            self.channel.put_int_message(MessageCode::IoError, io_error::GENERAL)?;
        }

        let initial_finished = self.file_list.first_segment().map_or(true, |s| s.is_finished());
        if initial_finished && self.exit_early_if_empty_list {
            debug!("empty file list, exiting early");
            self.channel.flush()?;
            if self.exit_after_eof {
                self.read_all_messages_until_eof()?;
            }
            return Ok(initial_ok);
        }

        let send_io_error = self.send_files()?;
        if send_io_error != 0 {
            self.channel.put_int_message(MessageCode::IoError, send_io_error)?;
        }
        self.channel.encode_index(FileList::DONE)?;

        if self.send_statistics {
            self.refresh_totals();
            for value in self.stats.server_block() {
                self.channel.put_varlong(value, 3)?;
            }
        }

        let index = self.channel.decode_index()?;
        if index != FileList::DONE {
            return Err(SenderError::Protocol(format!(
                "invalid packet at end of run ({index})"
            )));
        }
        if self.exit_after_eof {
            self.read_all_messages_until_eof()?;
        }

        Ok(initial_ok && (send_io_error | self.channel.peer_io_error()) == 0)
    }

    // --- main request loop ---------------------------------------------

    fn send_files(&mut self) -> Result<i32, SenderError> {
        let recursive = self.file_selection == FileSelection::Recurse;
        let mut phase = ConnectionPhase::Transfer;
        let mut sent_eof = false;
        let mut io_err = 0i32;
        let mut in_transit = self.file_list.first_segment().map_or(0, |s| s.len() as i64);

        while phase.is_active() {
            self.check_cancelled()?;

            if self.file_list.is_expandable()
                && (self.file_list.expanded_segments() == 1
                    || in_transit < PARTIAL_FILE_LIST_SIZE / 2)
            {
                let limit = (PARTIAL_FILE_LIST_SIZE - in_transit).max(1);
                let (expansion_ok, files_sent) = self.expand_and_send_segments(limit)?;
                in_transit += files_sent;
                if !expansion_ok {
                    warn!("I/O error during file list expansion, notifying peer");
                    io_err |= io_error::GENERAL;
                    self.channel.put_int_message(MessageCode::IoError, io_err)?;
                }
            }

            if recursive && !self.file_list.is_expandable() && !sent_eof {
                debug!("sending file list EOF");
                self.channel.encode_index(FileList::EOF)?;
                sent_eof = true;
            }

            debug!(buffered = self.channel.bytes_buffered(), "waiting for peer index");
            let index = self.channel.decode_index()?;
            debug!(index, "received index");

            if index == FileList::DONE {
                if recursive && !self.file_list.is_empty() {
                    if let Some(removed) = self.file_list.delete_first_segment() {
                        debug!(begin = removed.begin(), "retiring confirmed segment");
                        in_transit -= removed.len() as i64;
                    }
                    if !self.file_list.is_empty() {
                        self.channel.encode_index(FileList::DONE)?;
                    }
                }
                if !recursive || self.file_list.is_empty() {
                    phase.step_down();
                    if phase.is_active() {
                        self.channel.encode_index(FileList::DONE)?;
                    }
                }
            } else if index >= 0 {
                let iflags = self.channel.get_u16()?;
                if !item::is_valid(iflags) {
                    return Err(SenderError::Protocol(format!(
                        "unsupported item flags {iflags:#06x}"
                    )));
                }

                if iflags & item::TRANSFER == 0 {
                    self.acknowledge_entry(index, iflags, &mut in_transit)?;
                } else if !phase.is_tearing_down() {
                    io_err |= self.send_requested_file(index, iflags)?;
                } else {
                    return Err(SenderError::Protocol(format!(
                        "received transfer request for index {index} while tearing down"
                    )));
                }
            } else {
                return Err(SenderError::Protocol(format!(
                    "received invalid index {index} from peer"
                )));
            }
        }

        debug!("finished sending files");
        Ok(io_err)
    }

    /// The peer already holds this entry; drop it from its segment and echo
    /// the acknowledgement.
    fn acknowledge_entry(
        &mut self,
        index: i32,
        iflags: u16,
        in_transit: &mut i64,
    ) -> Result<(), SenderError> {
        let Some(position) = self.file_list.segment_position_of(index) else {
            return Err(SenderError::Protocol(format!(
                "received unknown file index {index} from peer"
            )));
        };
        if let Some(segment) = self.file_list.segment_at_mut(position) {
            if segment.directory_index() != Some(index) {
                if let Some(removed) = segment.remove(index) {
                    debug!(path = %removed.path().display(), index, "peer finished with entry");
                    *in_transit -= 1;
                }
            }
        }
        self.channel.encode_index(index)?;
        self.channel.put_u16(iflags)?;
        Ok(())
    }

    /// Serves one content request. Returns the io-error bits accrued (zero
    /// on success); open failures are recovered with `NO_SEND`.
    fn send_requested_file(&mut self, index: i32, iflags: u16) -> Result<i32, SenderError> {
        let info = match self.file_list.resolve(index) {
            Some(info) if info.attrs().is_regular_file() => info.clone(),
            Some(info) => {
                return Err(SenderError::Protocol(format!(
                    "index {index} is not a regular file ({})",
                    info.path().display()
                )));
            }
            None => {
                return Err(SenderError::Protocol(format!(
                    "received invalid file index {index} from peer"
                )));
            }
        };

        if self.transmitted.get(index as u32) {
            debug!(path = %info.path().display(), "re-sending");
        } else {
            debug!(path = %info.path().display(), "sending");
        }

        let header = self.receive_checksum_header()?;
        debug!(?header, "received peer checksum header");
        let sums = self.receive_checksums(header)?;

        let whole_file = header.is_whole_file();
        let block_size = if whole_file {
            DEFAULT_BLOCK_SIZE
        } else {
            header.block_length as usize
        };
        let buffer_size = if whole_file {
            block_size
        } else {
            block_size * MATCH_BUFFER_FACTOR
        };

        let mut view =
            match FileView::open(info.path(), info.attrs().size(), block_size, buffer_size) {
                Ok(view) => view,
                Err(err) => {
                    warn!(error = %err, "cannot send file");
                    let bits = match err {
                        FileViewOpenError::NotFound { .. } => io_error::VANISHED,
                        FileViewOpenError::Other { .. } => io_error::GENERAL,
                    };
                    if let Some(position) = self.file_list.segment_position_of(index) {
                        if let Some(segment) = self.file_list.segment_at_mut(position) {
                            segment.remove(index);
                        }
                    }
                    self.channel.put_int_message(MessageCode::NoSend, index)?;
                    return Ok(bits);
                }
            };

        self.channel.encode_index(index)?;
        self.channel.put_u16(iflags)?;
        self.send_checksum_header(&header)?;

        let outcome = if whole_file {
            delta::send_whole_file(&mut self.channel, &mut view)?
        } else {
            delta::send_matches_and_data(&mut self.channel, &mut view, &sums, &self.seed)?
        };

        let mut digest = outcome.digest;
        if let Err(err) = view.close() {
            // Deliberate corruption: the mismatching digest makes the peer
            // redrive the file instead of keeping a half-read copy.
            warn!(path = %info.path().display(), error = %err, "read error, poisoning file digest");
            digest[0] = digest[0].wrapping_add(1);
        }
        self.channel.put_all(&digest[..header.digest_length as usize])?;
        self.transmitted.set(index as u32);
        debug!(path = %info.path().display(), size = info.attrs().size(), "sent file");

        self.stats.num_transferred_files += 1;
        self.stats.total_transferred_size += info.attrs().size();
        self.stats.total_literal_size += outcome.literal;
        self.stats.total_matched_size += outcome.matched;
        Ok(0)
    }

    // --- file-list expansion -------------------------------------------

    /// Stats and encodes the user-supplied roots. Never fails the session:
    /// unusable roots are logged and drop the ok flag.
    fn initial_expand(&self) -> (bool, Vec<FileInfo>) {
        let mut ok = true;
        let mut files = Vec::new();

        for path in &self.sources {
            debug!(path = %path.display(), "expanding root");
            let attrs = match FileAttributes::stat(path, self.preserve_user) {
                Ok(attrs) => attrs,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to add root to file list");
                    ok = false;
                    continue;
                }
            };

            let dot_dir_root = is_dot_dir_root(path);
            let name = if dot_dir_root {
                Some(".".to_owned())
            } else {
                path.file_name().and_then(|n| n.to_str()).map(str::to_owned)
            };
            let Some(name) = name else {
                warn!(path = %path.display(), "cannot represent root name in the session charset");
                ok = false;
                continue;
            };
            let name_bytes = match self.codec.encode(&name) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to encode root name");
                    ok = false;
                    continue;
                }
            };

            let entry = FileInfo::new(path.clone(), name_bytes, attrs);
            match self.file_selection {
                FileSelection::Exact if entry.attrs().is_directory() && !entry.is_dot_dir() => {
                    info!(path = %path.display(), "skipping directory");
                }
                FileSelection::Exact if entry.is_dot_dir() => {
                    let (expand_ok, children) = self.expand(&entry);
                    ok = ok && expand_ok;
                    files.push(entry);
                    files.extend(children);
                }
                _ => files.push(entry),
            }
        }

        (ok, files)
    }

    /// Lists the immediate children of `directory`, in name order.
    fn expand(&self, directory: &FileInfo) -> (bool, Vec<FileInfo>) {
        let mut ok = true;
        let mut children = Vec::new();

        let entries = match std::fs::read_dir(directory.path()) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %directory.path().display(), error = %err, "I/O error during expansion");
                return (false, children);
            }
        };

        let mut names: Vec<std::ffi::OsString> = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => names.push(entry.file_name()),
                Err(err) => {
                    warn!(path = %directory.path().display(), error = %err, "readdir failed");
                    ok = false;
                }
            }
        }
        names.sort();

        for name in names {
            let path = directory.path().join(&name);
            let attrs = match FileAttributes::stat(&path, self.preserve_user) {
                Ok(attrs) => attrs,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to stat");
                    ok = false;
                    continue;
                }
            };

            let Some(name) = name.to_str() else {
                warn!(path = %path.display(), "cannot represent file name in the session charset");
                ok = false;
                continue;
            };
            let encoded = match self.codec.encode(name) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to encode file name");
                    ok = false;
                    continue;
                }
            };

            let pathname = if directory.is_dot_dir() {
                encoded
            } else {
                let mut joined = directory.pathname_bytes().to_vec();
                joined.push(b'/');
                joined.extend_from_slice(&encoded);
                joined
            };
            children.push(FileInfo::new(path, pathname, attrs));
        }

        (ok, children)
    }

    /// Expands stub directories and streams their segments until `limit`
    /// entries have been sent or nothing expandable remains.
    fn expand_and_send_segments(&mut self, limit: i64) -> Result<(bool, i64), SenderError> {
        let mut ok = true;
        let mut files_sent = 0i64;
        let mut segments_sent = 0usize;
        let bytes_before = self.channel.bytes_written();

        debug!(limit, "expanding file list");

        while self.file_list.is_expandable() && files_sent < limit {
            let Some(stub) = self.file_list.take_next_stub() else {
                break;
            };
            debug!(
                ordinal = stub.ordinal(),
                reference = FileList::OFFSET - stub.ordinal() as i32,
                "sending stub directory segment"
            );
            self.channel.encode_index(FileList::OFFSET - stub.ordinal() as i32)?;

            let (expand_ok, children) = self.expand(stub.info());
            let mut builder = SegmentBuilder::for_directory(stub);
            builder.add_all(children);

            let segment = self.file_list.new_segment(builder);
            for (_, entry) in segment.files() {
                Self::send_file_meta_data(
                    &mut self.channel,
                    &mut self.cache,
                    &mut self.transferred_users,
                    &self.codec,
                    self.preserve_user,
                    true,
                    entry,
                )?;
                files_sent += 1;
            }

            if expand_ok {
                self.send_segment_done()?;
            } else {
                ok = false;
                self.send_file_list_error_notification()?;
            }
            segments_sent += 1;
        }

        self.stats.total_file_list_size += self.channel.bytes_written() - bytes_before;
        debug!(segments_sent, files_sent, "sent segment metadata");
        Ok((ok, files_sent))
    }

    // --- file-list serialisation ---------------------------------------

    /// Serialises one entry with delta flags against the previous entry.
    #[allow(clippy::too_many_arguments)]
    fn send_file_meta_data(
        channel: &mut DuplexChannel<R, W>,
        cache: &mut FileInfoCache,
        transferred_users: &mut Vec<User>,
        codec: &TextCodec,
        preserve_user: bool,
        recursive: bool,
        info: &FileInfo,
    ) -> Result<(), SenderError> {
        let attrs = info.attrs();
        let mut xflags: u16 = if attrs.is_directory() { xmit::TOP_DIR } else { 0 };

        let mode = attrs.mode();
        if cache.prev_mode() == Some(mode) {
            xflags |= xmit::SAME_MODE;
        } else {
            cache.set_prev_mode(mode);
        }

        let user = attrs.user();
        let mut user_name_bytes: Option<Vec<u8>> = None;
        if preserve_user && cache.prev_user() != Some(user) {
            cache.set_prev_user(user.clone());
            if !user.is_root() {
                let already_sent = transferred_users.iter().any(|u| u.uid() == user.uid());
                if let Some(name) = user.name() {
                    match codec.encode(name) {
                        Ok(bytes) => {
                            if recursive && !already_sent {
                                xflags |= xmit::USER_NAME_FOLLOWS;
                                user_name_bytes = Some(bytes);
                            }
                        }
                        Err(err) => {
                            warn!(uid = user.uid(), error = %err, "cannot encode user name");
                        }
                    }
                }
                if !already_sent {
                    transferred_users.push(user.clone());
                }
            }
        } else {
            xflags |= xmit::SAME_UID;
        }

        xflags |= xmit::SAME_GID;

        let mtime = attrs.last_modified();
        if cache.prev_mtime() == Some(mtime) {
            xflags |= xmit::SAME_TIME;
        } else {
            cache.set_prev_mtime(mtime);
        }

        let name_bytes = info.pathname_bytes();
        let prefix_len = common_prefix_len(cache.prev_name_bytes(), name_bytes).min(255);
        let suffix = &name_bytes[prefix_len..];
        if prefix_len > 0 {
            xflags |= xmit::SAME_NAME;
        }
        if suffix.len() > 255 {
            xflags |= xmit::LONG_NAME;
        }
        cache.set_prev_name_bytes(name_bytes);

        if xflags == 0 && !attrs.is_directory() {
            xflags |= xmit::TOP_DIR;
        }
        if xflags == 0 || xflags & 0xFF00 != 0 {
            xflags |= xmit::EXTENDED_FLAGS;
            channel.put_u16(xflags)?;
        } else {
            channel.put_u8(xflags as u8)?;
        }

        if xflags & xmit::SAME_NAME != 0 {
            channel.put_u8(prefix_len as u8)?;
        }
        if xflags & xmit::LONG_NAME != 0 {
            channel.put_varint(suffix.len() as i32)?;
        } else {
            channel.put_u8(suffix.len() as u8)?;
        }
        channel.put_all(suffix)?;

        channel.put_varlong(attrs.size() as i64, 3)?;
        if xflags & xmit::SAME_TIME == 0 {
            channel.put_varlong(mtime, 4)?;
        }
        if xflags & xmit::SAME_MODE == 0 {
            channel.put_i32(mode as i32)?;
        }

        if preserve_user && xflags & xmit::SAME_UID == 0 {
            channel.put_varint(user.uid() as i32)?;
            if xflags & xmit::USER_NAME_FOLLOWS != 0 {
                let bytes = user_name_bytes.unwrap_or_default();
                if bytes.len() > 255 {
                    return Err(SenderError::UserNameTooLong {
                        uid: user.uid(),
                        len: bytes.len(),
                    });
                }
                channel.put_u8(bytes.len() as u8)?;
                channel.put_all(&bytes)?;
            }
        }

        // A symlink target would follow here; link preservation is not part
        // of this protocol revision.
        Ok(())
    }

    fn send_segment_done(&mut self) -> Result<(), SenderError> {
        debug!("sending segment done");
        self.channel.put_u8(0)?;
        Ok(())
    }

    fn send_file_list_error_notification(&mut self) -> Result<(), SenderError> {
        debug!("sending file list error notification");
        if self.safe_file_list {
            self.channel
                .put_u16(xmit::EXTENDED_FLAGS | xmit::IO_ERROR_ENDLIST)?;
            self.channel.put_varint(io_error::GENERAL)?;
        } else {
            self.channel.put_u8(0)?;
        }
        Ok(())
    }

    /// Batch of uid-to-name mappings, sent after the initial list in
    /// non-recursive sessions.
    fn send_user_list(&mut self) -> Result<(), SenderError> {
        let users = std::mem::take(&mut self.transferred_users);
        for user in &users {
            debug_assert!(!user.is_root());
            let Some(name) = user.name() else {
                continue;
            };
            let bytes = match self.codec.encode(name) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(uid = user.uid(), error = %err, "cannot encode user name");
                    continue;
                }
            };
            if bytes.len() > 255 {
                return Err(SenderError::UserNameTooLong { uid: user.uid(), len: bytes.len() });
            }
            self.channel.put_varint(user.uid() as i32)?;
            self.channel.put_u8(bytes.len() as u8)?;
            self.channel.put_all(&bytes)?;
        }
        self.transferred_users = users;
        self.channel.put_varint(0)?;
        Ok(())
    }

    // --- checksum exchange ---------------------------------------------

    fn receive_checksum_header(&mut self) -> Result<SumHeader, SenderError> {
        let chunk_count = self.channel.get_i32()?;
        let block_length = self.channel.get_i32()?;
        let digest_length = self.channel.get_i32()?;
        let remainder = self.channel.get_i32()?;
        SumHeader::from_wire(chunk_count, block_length, digest_length, remainder)
            .map_err(|err| SenderError::Protocol(err.to_string()))
    }

    fn send_checksum_header(&mut self, header: &SumHeader) -> Result<(), SenderError> {
        for value in header.to_wire() {
            self.channel.put_i32(value)?;
        }
        Ok(())
    }

    fn receive_checksums(&mut self, header: SumHeader) -> Result<ChecksumIndex, SenderError> {
        let mut index = ChecksumIndex::new(header);
        for _ in 0..header.chunk_count {
            let weak = self.channel.get_i32()? as u32;
            let strong = self.channel.get_bytes(header.digest_length as usize)?;
            index.add_chunk(weak, strong);
        }
        Ok(index)
    }

    // --- session plumbing ----------------------------------------------

    fn receive_filter_rule_text(&mut self) -> Result<String, SenderError> {
        let len = self.channel.get_i32()?;
        let len = usize::try_from(len).map_err(|_| {
            SenderError::Protocol(format!("negative filter rule length {len}"))
        })?;
        let bytes = self.channel.get_bytes(len)?;
        self.codec
            .decode(&bytes)
            .map_err(|err| SenderError::Protocol(format!("undecodable filter rules: {err}")))
    }

    /// Teardown read: the only acceptable outcome is end-of-stream.
    fn read_all_messages_until_eof(&mut self) -> Result<(), SenderError> {
        debug!("reading final messages until EOF");
        match self.channel.get_u8() {
            Ok(byte) => Err(SenderError::Protocol(format!(
                "peer sent invalid data during connection tear down ({byte})"
            ))),
            Err(crate::error::ChannelError::Eof) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn refresh_totals(&mut self) {
        self.stats.total_file_size = self.file_list.total_file_size();
        self.stats.num_files = self.file_list.num_files();
        self.stats.total_bytes_read = self.channel.bytes_read();
        self.stats.total_bytes_written = self.channel.bytes_written();
    }

    fn check_cancelled(&self) -> Result<(), SenderError> {
        if self.interruptible {
            if let Some(flag) = &self.cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(SenderError::Interrupted);
                }
            }
        }
        Ok(())
    }
}

fn common_prefix_len(left: &[u8], right: &[u8]) -> usize {
    left.iter().zip(right).take_while(|(a, b)| a == b).count()
}

/// Reports whether a root path names a directory as its own dot-dir, either
/// `.` itself or a path ending in `/.`.
fn is_dot_dir_root(path: &Path) -> bool {
    use std::os::unix::ffi::OsStrExt;
    let bytes = path.as_os_str().as_bytes();
    bytes == b"." || bytes.ends_with(b"/.")
}
