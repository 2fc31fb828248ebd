//! Framed, buffered, auto-flushing duplex channel.
//!
//! Both directions are multiplexed: application bytes travel in `Data`
//! frames, everything else is an out-of-band message. Outbound application
//! bytes accumulate in a write buffer that is wrapped into a `Data` frame
//! when full, when an out-of-band message must overtake it, or when a read
//! is about to block. The last rule matters: flushing before every blocking
//! read is what prevents protocol deadlock, since the peer may be waiting
//! for our buffered bytes before it can produce the bytes we want.
//!
//! Inbound out-of-band messages are consumed synchronously: a `get_*` call
//! that encounters message frames dispatches each one before it sees the
//! next application byte, so peer diagnostics and io-error reports are never
//! reordered against the data stream.

use std::io::{BufReader, Read, Write};

use flist::FileList;
use protocol::envelope::{MessageCode, MessageHeader, HEADER_LEN};
use protocol::flags::io_error;
use protocol::varint::encode_varlong_to_vec;
use tracing::{debug, error, info, warn};

use crate::error::ChannelError;

/// Size of the buffered-reader window over the transport.
pub const INPUT_BUFFER_SIZE: usize = 8 * 1024;

/// Capacity of the outbound application-byte buffer; one `Data` frame is
/// emitted per filled buffer.
pub const OUTPUT_BUFFER_SIZE: usize = 8 * 1024;

/// State of the run-length index codec for one direction.
#[derive(Clone, Copy, Debug)]
struct IndexCodecState {
    prev_positive: i32,
    prev_negative: i32,
}

impl IndexCodecState {
    const fn new() -> Self {
        Self { prev_positive: -1, prev_negative: 1 }
    }
}

/// The framed bidirectional byte stream between sender and receiver.
pub struct DuplexChannel<R: Read, W: Write> {
    reader: BufReader<R>,
    writer: W,
    out_buf: Vec<u8>,
    in_frame_remaining: usize,
    bytes_read: u64,
    bytes_written: u64,
    encode_state: IndexCodecState,
    decode_state: IndexCodecState,
    codec: protocol::TextCodec,
    peer_io_error: i32,
}

impl<R: Read, W: Write> DuplexChannel<R, W> {
    /// Wraps both halves of an established transport.
    ///
    /// `codec` is the negotiated character encoding, used to decode textual
    /// out-of-band messages from the peer.
    pub fn new(reader: R, writer: W, codec: protocol::TextCodec) -> Self {
        Self {
            reader: BufReader::with_capacity(INPUT_BUFFER_SIZE, reader),
            writer,
            out_buf: Vec::with_capacity(OUTPUT_BUFFER_SIZE),
            in_frame_remaining: 0,
            bytes_read: 0,
            bytes_written: 0,
            encode_state: IndexCodecState::new(),
            decode_state: IndexCodecState::new(),
            codec,
            peer_io_error: 0,
        }
    }

    /// Total bytes consumed from the transport, frame headers included.
    #[must_use]
    pub const fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Total bytes handed to the transport, frame headers included.
    #[must_use]
    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Io-error bits the peer has reported so far, `ERROR_XFER` messages
    /// included.
    #[must_use]
    pub const fn peer_io_error(&self) -> i32 {
        self.peer_io_error
    }

    // --- outbound -------------------------------------------------------

    fn flush_data_frame(&mut self) -> Result<(), ChannelError> {
        if self.out_buf.is_empty() {
            return Ok(());
        }
        let header = MessageHeader::new(MessageCode::Data, self.out_buf.len() as u32)
            .map_err(|err| ChannelError::Protocol(err.to_string()))?;
        self.writer.write_all(&header.encode()).map_err(ChannelError::from)?;
        self.writer.write_all(&self.out_buf).map_err(ChannelError::from)?;
        self.bytes_written += HEADER_LEN as u64;
        self.out_buf.clear();
        Ok(())
    }

    /// Flushes buffered application bytes and the underlying writer.
    pub fn flush(&mut self) -> Result<(), ChannelError> {
        self.flush_data_frame()?;
        self.writer.flush().map_err(ChannelError::from)
    }

    /// Appends raw application bytes to the outbound stream.
    ///
    /// Application bytes count towards [`bytes_written`](Self::bytes_written)
    /// as soon as they are buffered, so position deltas taken around a burst
    /// of puts measure its size without forcing a flush.
    pub fn put_all(&mut self, mut data: &[u8]) -> Result<(), ChannelError> {
        self.bytes_written += data.len() as u64;
        while !data.is_empty() {
            let space = OUTPUT_BUFFER_SIZE - self.out_buf.len();
            if space == 0 {
                self.flush_data_frame()?;
                continue;
            }
            let take = space.min(data.len());
            self.out_buf.extend_from_slice(&data[..take]);
            data = &data[take..];
        }
        Ok(())
    }

    /// Appends one byte.
    pub fn put_u8(&mut self, value: u8) -> Result<(), ChannelError> {
        self.put_all(&[value])
    }

    /// Appends a 16-bit little-endian value.
    pub fn put_u16(&mut self, value: u16) -> Result<(), ChannelError> {
        self.put_all(&value.to_le_bytes())
    }

    /// Appends a 32-bit little-endian value.
    pub fn put_i32(&mut self, value: i32) -> Result<(), ChannelError> {
        self.put_all(&value.to_le_bytes())
    }

    /// Appends a variable-length integer with a one-byte floor.
    pub fn put_varint(&mut self, value: i32) -> Result<(), ChannelError> {
        self.put_varlong(i64::from(value), 1)
    }

    /// Appends a variable-length integer with the given byte floor.
    pub fn put_varlong(&mut self, value: i64, min_bytes: u8) -> Result<(), ChannelError> {
        let mut encoded = Vec::with_capacity(9);
        encode_varlong_to_vec(value, min_bytes, &mut encoded);
        self.put_all(&encoded)
    }

    /// Sends an out-of-band message, serialised ahead of any application
    /// bytes buffered after it was requested.
    pub fn put_message(&mut self, code: MessageCode, payload: &[u8]) -> Result<(), ChannelError> {
        self.flush_data_frame()?;
        let header = MessageHeader::new(code, payload.len() as u32)
            .map_err(|err| ChannelError::Protocol(err.to_string()))?;
        self.writer.write_all(&header.encode()).map_err(ChannelError::from)?;
        self.writer.write_all(payload).map_err(ChannelError::from)?;
        self.bytes_written += (HEADER_LEN + payload.len()) as u64;
        Ok(())
    }

    /// Total application bytes currently buffered but not yet framed.
    #[must_use]
    pub fn bytes_buffered(&self) -> usize {
        self.out_buf.len()
    }

    /// Sends an out-of-band message carrying a single little-endian integer.
    pub fn put_int_message(&mut self, code: MessageCode, value: i32) -> Result<(), ChannelError> {
        self.put_message(code, &value.to_le_bytes())
    }

    // --- inbound --------------------------------------------------------

    fn read_transport_exact(&mut self, buf: &mut [u8]) -> Result<(), ChannelError> {
        self.reader.read_exact(buf)?;
        self.bytes_read += buf.len() as u64;
        Ok(())
    }

    /// Advances to the next `Data` frame, dispatching any message frames
    /// encountered on the way. Flushes pending output first so the peer can
    /// make progress.
    fn next_data_frame(&mut self) -> Result<(), ChannelError> {
        loop {
            self.flush()?;
            let mut raw = [0u8; HEADER_LEN];
            self.read_transport_exact(&mut raw)?;
            let header = MessageHeader::decode(&raw)
                .map_err(|err| ChannelError::Protocol(err.to_string()))?;
            let len = header.payload_len() as usize;
            if header.code() == MessageCode::Data {
                if len > 0 {
                    self.in_frame_remaining = len;
                    return Ok(());
                }
                continue;
            }
            let mut payload = vec![0u8; len];
            self.read_transport_exact(&mut payload)?;
            self.handle_message(header.code(), &payload)?;
        }
    }

    fn handle_message(&mut self, code: MessageCode, payload: &[u8]) -> Result<(), ChannelError> {
        match code {
            MessageCode::IoError => {
                let bits: [u8; 4] = payload.try_into().map_err(|_| {
                    ChannelError::Protocol(format!(
                        "io-error message with {} payload bytes instead of 4",
                        payload.len()
                    ))
                })?;
                let value = i32::from_le_bytes(bits);
                debug!(bits = value, "peer reported io error");
                self.peer_io_error |= value;
                Ok(())
            }
            MessageCode::ErrorXfer
            | MessageCode::Info
            | MessageCode::Error
            | MessageCode::Warning
            | MessageCode::Log => {
                if code == MessageCode::ErrorXfer {
                    self.peer_io_error |= io_error::TRANSFER;
                }
                let text = self.codec.decode(payload).map_err(|err| {
                    ChannelError::Protocol(format!("undecodable peer message: {err}"))
                })?;
                let text = text.trim_end_matches(['\r', '\n']);
                match code {
                    MessageCode::Error | MessageCode::ErrorXfer => {
                        error!(target: "peer", "<receiver> {code:?}: {text}");
                    }
                    MessageCode::Warning => warn!(target: "peer", "<receiver> {code:?}: {text}"),
                    _ => info!(target: "peer", "<receiver> {code:?}: {text}"),
                }
                Ok(())
            }
            MessageCode::Data | MessageCode::NoSend => Err(ChannelError::Protocol(format!(
                "unexpected multiplexed message {code:?} from peer"
            ))),
        }
    }

    /// Reads exactly `len` application bytes.
    pub fn get_bytes(&mut self, len: usize) -> Result<Vec<u8>, ChannelError> {
        let mut out = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            if self.in_frame_remaining == 0 {
                self.next_data_frame()?;
            }
            let take = self.in_frame_remaining.min(len - filled);
            let end = filled + take;
            self.read_transport_exact(&mut out[filled..end])?;
            self.in_frame_remaining -= take;
            filled = end;
        }
        Ok(out)
    }

    /// Reads one application byte.
    pub fn get_u8(&mut self) -> Result<u8, ChannelError> {
        if self.in_frame_remaining == 0 {
            self.next_data_frame()?;
        }
        let mut byte = [0u8; 1];
        self.read_transport_exact(&mut byte)?;
        self.in_frame_remaining -= 1;
        Ok(byte[0])
    }

    /// Reads a 16-bit little-endian value.
    pub fn get_u16(&mut self) -> Result<u16, ChannelError> {
        let low = self.get_u8()?;
        let high = self.get_u8()?;
        Ok(u16::from_le_bytes([low, high]))
    }

    /// Reads a 32-bit little-endian value.
    pub fn get_i32(&mut self) -> Result<i32, ChannelError> {
        let mut bytes = [0u8; 4];
        for byte in &mut bytes {
            *byte = self.get_u8()?;
        }
        Ok(i32::from_le_bytes(bytes))
    }

    /// Captured outbound bytes, for in-crate wire assertions.
    #[cfg(test)]
    pub(crate) fn writer_ref(&self) -> &W {
        &self.writer
    }

    /// Consumes the channel and returns the write half of the transport.
    pub fn into_writer(self) -> W {
        self.writer
    }

    // --- index codec ----------------------------------------------------

    /// Writes a file-list index using the run-length delta encoding.
    ///
    /// `DONE` is a single zero byte; other negative values carry a `0xFF`
    /// prefix. Positive and negative indices are delta-encoded against the
    /// previous value of the same sign.
    pub fn encode_index(&mut self, index: i32) -> Result<(), ChannelError> {
        let mut buf = [0u8; 6];
        let mut cnt = 0;

        let (diff, carrier) = if index >= 0 {
            let diff = index - self.encode_state.prev_positive;
            self.encode_state.prev_positive = index;
            (diff, index)
        } else if index == FileList::DONE {
            return self.put_u8(0x00);
        } else {
            buf[cnt] = 0xFF;
            cnt += 1;
            let positive = -index;
            let diff = positive - self.encode_state.prev_negative;
            self.encode_state.prev_negative = positive;
            (diff, positive)
        };

        if diff > 0 && diff < 0xFE {
            buf[cnt] = diff as u8;
            cnt += 1;
        } else if !(0..=0x7FFF).contains(&diff) {
            buf[cnt] = 0xFE;
            buf[cnt + 1] = ((carrier >> 24) as u8) | 0x80;
            buf[cnt + 2] = carrier as u8;
            buf[cnt + 3] = (carrier >> 8) as u8;
            buf[cnt + 4] = (carrier >> 16) as u8;
            cnt += 5;
        } else {
            buf[cnt] = 0xFE;
            buf[cnt + 1] = (diff >> 8) as u8;
            buf[cnt + 2] = diff as u8;
            cnt += 3;
        }

        self.put_all(&buf[..cnt])
    }

    /// Reads a file-list index written with [`encode_index`](Self::encode_index).
    pub fn decode_index(&mut self) -> Result<i32, ChannelError> {
        let mut byte = self.get_u8()?;

        let is_negative = if byte == 0xFF {
            byte = self.get_u8()?;
            true
        } else if byte == 0 {
            return Ok(FileList::DONE);
        } else {
            false
        };

        let prev = if is_negative {
            self.decode_state.prev_negative
        } else {
            self.decode_state.prev_positive
        };

        let num = if byte == 0xFE {
            let next = self.get_u8()?;
            if next & 0x80 != 0 {
                let high = i32::from(next & !0x80);
                let b0 = i32::from(self.get_u8()?);
                let b1 = i32::from(self.get_u8()?);
                let b2 = i32::from(self.get_u8()?);
                (high << 24) | b0 | (b1 << 8) | (b2 << 16)
            } else {
                let low = i32::from(self.get_u8()?);
                prev + ((i32::from(next) << 8) | low)
            }
        } else {
            prev + i32::from(byte)
        };

        if is_negative {
            self.decode_state.prev_negative = num;
            Ok(-num)
        } else {
            self.decode_state.prev_positive = num;
            Ok(num)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn framed_data(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let header = MessageHeader::new(MessageCode::Data, payload.len() as u32).unwrap();
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(payload);
        out
    }

    fn framed_message(code: MessageCode, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let header = MessageHeader::new(code, payload.len() as u32).unwrap();
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(payload);
        out
    }

    fn channel(inbound: Vec<u8>) -> DuplexChannel<Cursor<Vec<u8>>, Vec<u8>> {
        DuplexChannel::new(Cursor::new(inbound), Vec::new(), protocol::TextCodec::utf8())
    }

    #[test]
    fn typed_reads_cross_frame_boundaries() {
        let mut inbound = framed_data(&[0x34, 0x12]);
        inbound.extend_from_slice(&framed_data(&[0x78, 0x56, 0x00, 0x00]));
        let mut ch = channel(inbound);

        assert_eq!(ch.get_u16().unwrap(), 0x1234);
        assert_eq!(ch.get_i32().unwrap(), 0x5678);
    }

    #[test]
    fn message_frames_are_dispatched_before_data() {
        let mut inbound = framed_message(MessageCode::IoError, &2i32.to_le_bytes());
        inbound.extend_from_slice(&framed_message(MessageCode::Info, b"hello\n"));
        inbound.extend_from_slice(&framed_data(&[0x2a]));
        let mut ch = channel(inbound);

        assert_eq!(ch.get_u8().unwrap(), 0x2a);
        assert_eq!(ch.peer_io_error(), 2);
    }

    #[test]
    fn error_xfer_sets_the_transfer_bit() {
        let mut inbound = framed_message(MessageCode::ErrorXfer, b"boom");
        inbound.extend_from_slice(&framed_data(&[1]));
        let mut ch = channel(inbound);

        assert_eq!(ch.get_u8().unwrap(), 1);
        assert_eq!(ch.peer_io_error() & io_error::TRANSFER, io_error::TRANSFER);
    }

    #[test]
    fn eof_before_data_is_distinct() {
        let mut ch = channel(Vec::new());
        assert!(matches!(ch.get_u8(), Err(ChannelError::Eof)));
    }

    #[test]
    fn invalid_frame_tag_is_a_protocol_error() {
        // Tag byte below MPLEX_BASE.
        let mut ch = channel(vec![0x00, 0x00, 0x00, 0x01]);
        assert!(matches!(ch.get_u8(), Err(ChannelError::Protocol(_))));
    }

    #[test]
    fn writes_are_framed_on_flush() {
        let mut ch = channel(Vec::new());
        ch.put_u8(0xaa).unwrap();
        ch.put_u16(0x1234).unwrap();
        ch.flush().unwrap();

        let written = std::mem::take(&mut ch.writer);
        assert_eq!(written, framed_data(&[0xaa, 0x34, 0x12]));
        assert_eq!(ch.bytes_written(), written.len() as u64);
    }

    #[test]
    fn messages_overtake_nothing_already_buffered() {
        let mut ch = channel(Vec::new());
        ch.put_u8(0x01).unwrap();
        ch.put_int_message(MessageCode::NoSend, 7).unwrap();
        ch.flush().unwrap();

        let mut expected = framed_data(&[0x01]);
        expected.extend_from_slice(&framed_message(MessageCode::NoSend, &7i32.to_le_bytes()));
        assert_eq!(ch.writer, expected);
    }

    #[test]
    fn large_puts_split_into_full_frames() {
        let mut ch = channel(Vec::new());
        let data = vec![0x5au8; OUTPUT_BUFFER_SIZE + 10];
        ch.put_all(&data).unwrap();
        ch.flush().unwrap();

        let mut expected = framed_data(&data[..OUTPUT_BUFFER_SIZE]);
        expected.extend_from_slice(&framed_data(&data[OUTPUT_BUFFER_SIZE..]));
        assert_eq!(ch.writer, expected);
    }

    #[test]
    fn reads_flush_pending_writes_first() {
        let inbound = framed_data(&[0x01]);
        let mut ch = channel(inbound);
        ch.put_u8(0x99).unwrap();
        assert_eq!(ch.get_u8().unwrap(), 0x01);
        // The pending byte went out before the read blocked.
        assert_eq!(ch.writer, framed_data(&[0x99]));
    }

    #[test]
    fn index_codec_round_trips_through_a_loopback() {
        let mut out = channel(Vec::new());
        let indices = [0, 1, 2, 5, 100, 253, 254, 500, 10_000, FileList::DONE, 10_001];
        for &index in &indices {
            out.encode_index(index).unwrap();
        }
        out.flush().unwrap();

        let mut input = channel(std::mem::take(&mut out.writer));
        for &expected in &indices {
            assert_eq!(input.decode_index().unwrap(), expected);
        }
    }

    #[test]
    fn done_is_a_single_zero_byte() {
        let mut ch = channel(Vec::new());
        ch.encode_index(FileList::DONE).unwrap();
        ch.flush().unwrap();
        assert_eq!(ch.writer, framed_data(&[0x00]));
    }

    #[test]
    fn eof_sentinel_uses_the_negative_prefix() {
        let mut ch = channel(Vec::new());
        ch.encode_index(FileList::EOF).unwrap();
        ch.flush().unwrap();
        // -(-2) = 2, delta from the initial negative state 1 is 1.
        assert_eq!(ch.writer, framed_data(&[0xFF, 0x01]));
    }

    #[test]
    fn stub_directory_references_round_trip() {
        let mut out = channel(Vec::new());
        for ordinal in 0..4 {
            out.encode_index(FileList::OFFSET - ordinal).unwrap();
        }
        out.flush().unwrap();

        let mut input = channel(std::mem::take(&mut out.writer));
        for ordinal in 0..4 {
            assert_eq!(input.decode_index().unwrap(), FileList::OFFSET - ordinal);
        }
    }

    #[test]
    fn done_does_not_disturb_positive_delta_state() {
        let mut out = channel(Vec::new());
        out.encode_index(0).unwrap();
        out.encode_index(FileList::DONE).unwrap();
        out.encode_index(1).unwrap();
        out.flush().unwrap();

        let mut input = channel(std::mem::take(&mut out.writer));
        assert_eq!(input.decode_index().unwrap(), 0);
        assert_eq!(input.decode_index().unwrap(), FileList::DONE);
        assert_eq!(input.decode_index().unwrap(), 1);
    }

    #[test]
    fn varlong_puts_match_the_codec() {
        let mut ch = channel(Vec::new());
        ch.put_varlong(0x0012_3456, 3).unwrap();
        ch.flush().unwrap();
        assert_eq!(ch.writer, framed_data(&[0x12, 0x56, 0x34]));
    }

    proptest::proptest! {
        #[test]
        fn index_sequences_round_trip(
            indices in proptest::collection::vec(0i32..200_000, 1..64),
        ) {
            let mut out = channel(Vec::new());
            for &index in &indices {
                out.encode_index(index).unwrap();
            }
            out.flush().unwrap();

            let mut input = channel(std::mem::take(&mut out.writer));
            for &expected in &indices {
                proptest::prop_assert_eq!(input.decode_index().unwrap(), expected);
            }
        }
    }
}
