//! Sliding, bounded-memory read window over a file.
//!
//! The view keeps three positions inside its backing buffer: `first` (the
//! earliest byte still needed), `start` and `end` (the current match
//! window), plus a separately movable `mark` bracketing the pending literal
//! run between matches. Sliding pulls more bytes from disk on demand and
//! compacts the buffer without ever dropping the `first..end` range.
//!
//! Read failures after a successful open do not abort the transfer midway:
//! the missing bytes are zero-filled, the error is remembered, and the
//! caller learns about it from [`close`](FileView::close) so it can poison
//! the whole-file digest and make the peer redrive the file.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Window length used when streaming a file nobody holds a basis for.
pub const DEFAULT_BLOCK_SIZE: usize = 128 * 1024;

/// Failure to open a file for sending.
///
/// A missing file is distinguished from other failures because the driver
/// maps the two onto different io-error bits.
#[derive(Debug, Error)]
pub enum FileViewOpenError {
    /// The file disappeared between listing and request.
    #[error("cannot open {path}: file not found", path = path.display())]
    NotFound {
        /// The path that failed to open.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
    /// Any other open failure.
    #[error("cannot open {path}: {source}", path = path.display())]
    Other {
        /// The path that failed to open.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
}

/// A sliding window over one regular file.
#[derive(Debug)]
pub struct FileView {
    path: PathBuf,
    file: File,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    mark: Option<usize>,
    read_pos: usize,
    remaining: u64,
    block_size: usize,
    read_error: Option<io::Error>,
}

impl FileView {
    /// Opens `path` and fills the first window.
    ///
    /// `block_size` bounds the window length; `buffer_size` is the extra
    /// room kept for the pending literal run, so the backing buffer holds
    /// `buffer_size + block_size` bytes.
    ///
    /// # Errors
    ///
    /// [`FileViewOpenError::NotFound`] when the file vanished,
    /// [`FileViewOpenError::Other`] for any other open failure.
    pub fn open(
        path: &Path,
        file_size: u64,
        block_size: usize,
        buffer_size: usize,
    ) -> Result<Self, FileViewOpenError> {
        debug_assert!(block_size > 0);
        let file = File::open(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                FileViewOpenError::NotFound { path: path.to_path_buf(), source }
            } else {
                FileViewOpenError::Other { path: path.to_path_buf(), source }
            }
        })?;

        let mut view = Self {
            path: path.to_path_buf(),
            file,
            buf: vec![0u8; buffer_size + block_size],
            start: 0,
            end: 0,
            mark: None,
            read_pos: 0,
            remaining: file_size,
            block_size,
            read_error: None,
        };
        view.slide(0);
        Ok(view)
    }

    /// The current match window.
    #[must_use]
    pub fn window(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Length of the current window. Never exceeds the block size; shorter
    /// only on the final file tail.
    #[must_use]
    pub const fn window_len(&self) -> usize {
        self.end - self.start
    }

    /// First byte of the window, the one a one-byte slide rolls out.
    #[must_use]
    pub fn leading_byte(&self) -> u8 {
        self.buf[self.start]
    }

    /// Last byte of the window, the one a one-byte slide rolled in.
    #[must_use]
    pub fn trailing_byte(&self) -> u8 {
        self.buf[self.end - 1]
    }

    /// Places the mark `offset` bytes past the window start.
    pub fn set_mark_relative_to_start(&mut self, offset: usize) {
        debug_assert!(self.start + offset <= self.end);
        self.mark = Some(self.start + offset);
    }

    /// Earliest buffered offset still needed: the mark, when it lies before
    /// the window start.
    fn first_offset(&self) -> usize {
        self.mark.map_or(self.start, |mark| mark.min(self.start))
    }

    /// The pending literal run between the mark and the window start.
    #[must_use]
    pub fn marked_slice(&self) -> &[u8] {
        &self.buf[self.first_offset()..self.start]
    }

    /// Everything buffered from the mark through the window end, the range a
    /// match emission feeds into the whole-file digest.
    #[must_use]
    pub fn first_through_end(&self) -> &[u8] {
        &self.buf[self.first_offset()..self.end]
    }

    /// Number of bytes covered by [`first_through_end`](Self::first_through_end).
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.end - self.first_offset()
    }

    /// Reports whether the buffer holds only live bytes, meaning a further
    /// slide could not pull more data without first releasing the literal
    /// run.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.total_bytes() == self.buf.len()
    }

    /// Advances the window start by `amount`, refilling the window from disk
    /// up to the block size. Bytes before the mark and the window are kept
    /// accessible; the buffer is compacted when the tail space runs out.
    ///
    /// Read failures are deferred: the missing bytes read as zero and the
    /// error surfaces at [`close`](Self::close).
    pub fn slide(&mut self, amount: usize) {
        debug_assert!(amount <= self.window_len() || self.end == 0);
        self.start += amount;

        let buffered_ahead = self.read_pos - self.start;
        let remaining = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        let want = self.block_size.min(buffered_ahead.saturating_add(remaining));
        let need = want.saturating_sub(buffered_ahead);

        if need > 0 {
            if need > self.buf.len() - self.read_pos {
                self.compact();
            }
            self.fill(need);
        }
        self.end = self.start + want;
    }

    fn compact(&mut self) {
        let shift = self.first_offset();
        if shift == 0 {
            return;
        }
        self.buf.copy_within(shift..self.read_pos, 0);
        self.start -= shift;
        self.end -= shift;
        self.read_pos -= shift;
        if let Some(mark) = self.mark.as_mut() {
            *mark -= shift;
        }
    }

    fn fill(&mut self, len: usize) {
        let target = self.read_pos + len;
        while self.read_pos < target {
            match self.file.read(&mut self.buf[self.read_pos..target]) {
                Ok(0) => {
                    self.defer_read_error(
                        target,
                        io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "file shrank while being read",
                        ),
                    );
                    return;
                }
                Ok(read) => {
                    self.read_pos += read;
                    self.remaining -= read as u64;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    self.defer_read_error(target, err);
                    return;
                }
            }
        }
    }

    fn defer_read_error(&mut self, target: usize, err: io::Error) {
        let missing = target - self.read_pos;
        self.buf[self.read_pos..target].fill(0);
        self.read_pos = target;
        self.remaining = self.remaining.saturating_sub(missing as u64);
        if self.read_error.is_none() {
            self.read_error = Some(err);
        }
    }

    /// Closes the view, surfacing any read error deferred during sliding.
    ///
    /// # Errors
    ///
    /// The first read failure encountered, if any.
    pub fn close(self) -> Result<(), io::Error> {
        match self.read_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// The path the view reads from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
