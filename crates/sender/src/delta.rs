//! Block-matching delta engine.
//!
//! For each requested file the engine emits a token stream the receiver
//! replays against its basis file: a positive integer announces that many
//! literal bytes, a negative integer `-(k + 1)` references basis block `k`,
//! and zero terminates the stream, immediately followed by the whole-file
//! digest. Matching slides a one-block window over the file, screening each
//! position by rolling checksum and confirming with the seeded strong
//! digest, computed lazily at most once per position.

use std::io::{Read, Write};

use checksums::{block_digest, ChecksumSeed, Md5, RollingChecksum};
use tracing::{debug, trace};

use crate::channel::DuplexChannel;
use crate::error::ChannelError;
use crate::fileview::FileView;
use crate::sums::ChecksumIndex;

/// Largest literal run carried by a single token.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// What one file's delta emission produced.
#[derive(Clone, Copy, Debug)]
pub struct DeltaOutcome {
    /// MD5 over the file content in strict file order.
    pub digest: [u8; 16],
    /// Bytes sent as literal data.
    pub literal: u64,
    /// Bytes covered by match tokens.
    pub matched: u64,
}

fn send_literal<R: Read, W: Write>(
    channel: &mut DuplexChannel<R, W>,
    data: &[u8],
) -> Result<(), ChannelError> {
    for chunk in data.chunks(CHUNK_SIZE) {
        channel.put_i32(chunk.len() as i32)?;
        channel.put_all(chunk)?;
    }
    Ok(())
}

/// Streams the whole file as literal data. Used when the peer announced an
/// empty basis (block length zero).
pub fn send_whole_file<R: Read, W: Write>(
    channel: &mut DuplexChannel<R, W>,
    view: &mut FileView,
) -> Result<DeltaOutcome, ChannelError> {
    let mut file_digest = Md5::new();
    let mut literal = 0u64;

    while view.window_len() > 0 {
        let len = view.window_len();
        send_literal(channel, view.window())?;
        file_digest.update(view.window());
        literal += len as u64;
        view.slide(len);
    }

    channel.put_i32(0)?;
    Ok(DeltaOutcome { digest: file_digest.finalize(), literal, matched: 0 })
}

/// Slides a window over the file, emitting match tokens for blocks the peer
/// already holds and literal runs for everything in between.
pub fn send_matches_and_data<R: Read, W: Write>(
    channel: &mut DuplexChannel<R, W>,
    view: &mut FileView,
    sums: &ChecksumIndex,
    seed: &ChecksumSeed,
) -> Result<DeltaOutcome, ChannelError> {
    let block_length = sums.header().block_length as usize;
    let smallest = sums.header().smallest_chunk_size() as usize;
    debug_assert!(block_length > 0);

    let mut file_digest = Md5::new();
    let mut rolling = RollingChecksum::new();
    rolling.update(view.window());

    let mut preferred = 0u32;
    let mut literal = 0u64;
    let mut matched = 0u64;
    let mut window_digest: Option<[u8; 16]> = None;
    view.set_mark_relative_to_start(0);

    while view.window_len() >= smallest {
        let weak = rolling.value();
        for chunk_index in sums.candidates(weak, view.window_len() as u32, preferred) {
            let digest = match window_digest {
                Some(digest) => digest,
                None => {
                    let digest = block_digest(view.window(), seed);
                    window_digest = Some(digest);
                    digest
                }
            };
            let chunk = sums.chunk(chunk_index);
            if digest[..chunk.strong().len()] == *chunk.strong() {
                trace!(chunk = chunk_index, window = view.window_len(), "block match");
                matched += view.window_len() as u64;

                // Flush the pending literal run, then fold run and matched
                // window into the whole-file digest in file order.
                let run_len = view.marked_slice().len();
                send_literal(channel, view.marked_slice())?;
                literal += run_len as u64;
                file_digest.update(view.first_through_end());

                channel.put_i32(-(chunk_index as i32 + 1))?;
                preferred = chunk_index + 1;

                // Park the window one byte short of the match end; the
                // shared slide below advances over that byte.
                view.set_mark_relative_to_start(view.window_len());
                let slide_by = view.window_len() - 1;
                view.slide(slide_by);
                rolling.update_from_block(view.window());
                break;
            }
        }

        rolling.roll_out(view.leading_byte());

        if view.is_full() {
            // The literal run has filled the buffer; release it before the
            // next slide needs the space.
            let run_len = view.marked_slice().len();
            send_literal(channel, view.marked_slice())?;
            file_digest.update(view.marked_slice());
            literal += run_len as u64;
            view.set_mark_relative_to_start(0);
        }

        view.slide(1);
        if view.window_len() == block_length {
            rolling.roll_in(view.trailing_byte());
        }
        window_digest = None;
    }

    let tail_len = view.total_bytes();
    send_literal(channel, view.first_through_end())?;
    file_digest.update(view.first_through_end());
    literal += tail_len as u64;
    channel.put_i32(0)?;

    debug!(literal, matched, "delta stream complete");
    Ok(DeltaOutcome { digest: file_digest.finalize(), literal, matched })
}
