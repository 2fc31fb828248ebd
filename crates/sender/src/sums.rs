//! Index over the receiver's block checksums.
//!
//! The receiver announces one `(weak, strong)` pair per block of its basis
//! file. Matching screens window positions by weak sum first, so the pairs
//! are indexed by weak value; a candidate only counts when its recorded
//! block length equals the current window length, which keeps the short
//! final block from matching full-length windows.

use std::collections::HashMap;

use protocol::SumHeader;

/// One block checksum as received from the peer.
#[derive(Clone, Debug)]
pub struct ChunkSum {
    weak: u32,
    strong: Vec<u8>,
    length: u32,
}

impl ChunkSum {
    /// The packed rolling checksum of the block.
    #[must_use]
    pub const fn weak(&self) -> u32 {
        self.weak
    }

    /// The truncated strong digest of the block.
    #[must_use]
    pub fn strong(&self) -> &[u8] {
        &self.strong
    }

    /// The block's length.
    #[must_use]
    pub const fn length(&self) -> u32 {
        self.length
    }
}

/// All block checksums of one file, indexed by weak sum.
#[derive(Debug)]
pub struct ChecksumIndex {
    header: SumHeader,
    chunks: Vec<ChunkSum>,
    by_weak: HashMap<u32, Vec<u32>>,
}

impl ChecksumIndex {
    /// Creates an empty index for the given header.
    #[must_use]
    pub fn new(header: SumHeader) -> Self {
        Self {
            header,
            chunks: Vec::with_capacity(header.chunk_count.min(1 << 16) as usize),
            by_weak: HashMap::new(),
        }
    }

    /// The header the checksums were announced under.
    #[must_use]
    pub const fn header(&self) -> &SumHeader {
        &self.header
    }

    /// Appends the next block's checksum pair, in block order.
    pub fn add_chunk(&mut self, weak: u32, strong: Vec<u8>) {
        let index = self.chunks.len() as u32;
        let length = self.header.chunk_length(index);
        self.chunks.push(ChunkSum { weak, strong, length });
        self.by_weak.entry(weak).or_default().push(index);
    }

    /// Looks up a block by index.
    #[must_use]
    pub fn chunk(&self, index: u32) -> &ChunkSum {
        &self.chunks[index as usize]
    }

    /// Block indices whose weak sum equals `weak` and whose length equals
    /// `window_len`, ordered so indices at or past `preferred` come first.
    ///
    /// The preference implements the locality heuristic: after a match on
    /// block `k`, block `k + 1` is the most likely next match.
    #[must_use]
    pub fn candidates(&self, weak: u32, window_len: u32, preferred: u32) -> Vec<u32> {
        let Some(indices) = self.by_weak.get(&weak) else {
            return Vec::new();
        };
        let mut ordered: Vec<u32> = indices
            .iter()
            .copied()
            .filter(|&index| self.chunks[index as usize].length == window_len && index >= preferred)
            .collect();
        ordered.extend(
            indices
                .iter()
                .copied()
                .filter(|&index| self.chunks[index as usize].length == window_len && index < preferred),
        );
        ordered
    }
}
