//! End-to-end sender scenarios over an in-memory transport.
//!
//! Each test scripts the receiver's side of the conversation as a pre-framed
//! byte stream, runs the sender against it, and decodes the sender's output
//! with an independent reimplementation of the receiver's parsers.

use std::io::{Cursor, Read};
use std::path::PathBuf;

use checksums::{block_digest, ChecksumSeed, Md5, RollingChecksum};
use flist::FileList;
use protocol::envelope::{MessageCode, MessageHeader, HEADER_LEN};
use protocol::flags::{io_error, item, xmit};
use protocol::varint::{read_varint, read_varlong};
use sender::{FileSelection, SenderBuilder};

const TRANSFER: u16 = item::TRANSFER;

fn seed() -> ChecksumSeed {
    ChecksumSeed::new(*b"0123456789abcdef")
}

// --- receiver-side script construction ---------------------------------

/// Builds the receiver's inbound byte stream, delta-encoding indices the
/// same way the sender's decoder expects them.
struct ReceiverScript {
    bytes: Vec<u8>,
    prev_positive: i32,
    prev_negative: i32,
}

impl ReceiverScript {
    fn new() -> Self {
        Self { bytes: Vec::new(), prev_positive: -1, prev_negative: 1 }
    }

    fn put_i32(&mut self, value: i32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn put_u16(&mut self, value: u16) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn put_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    fn index(&mut self, ndx: i32) -> &mut Self {
        if ndx == FileList::DONE {
            self.bytes.push(0x00);
            return self;
        }
        let (diff, carrier) = if ndx >= 0 {
            let diff = ndx - self.prev_positive;
            self.prev_positive = ndx;
            (diff, ndx)
        } else {
            self.bytes.push(0xFF);
            let positive = -ndx;
            let diff = positive - self.prev_negative;
            self.prev_negative = positive;
            (diff, positive)
        };
        if diff > 0 && diff < 0xFE {
            self.bytes.push(diff as u8);
        } else if !(0..=0x7FFF).contains(&diff) {
            self.bytes.push(0xFE);
            self.bytes.push(((carrier >> 24) as u8) | 0x80);
            self.bytes.push(carrier as u8);
            self.bytes.push((carrier >> 8) as u8);
            self.bytes.push((carrier >> 16) as u8);
        } else {
            self.bytes.push(0xFE);
            self.bytes.push((diff >> 8) as u8);
            self.bytes.push(diff as u8);
        }
        self
    }

    fn checksum_header(&mut self, count: i32, block: i32, digest: i32, remainder: i32) -> &mut Self {
        self.put_i32(count).put_i32(block).put_i32(digest).put_i32(remainder)
    }

    /// Wraps everything accumulated so far into a single data frame.
    fn into_wire(self) -> Vec<u8> {
        if self.bytes.is_empty() {
            return Vec::new();
        }
        let header = MessageHeader::new(MessageCode::Data, self.bytes.len() as u32).unwrap();
        let mut wire = header.encode().to_vec();
        wire.extend_from_slice(&self.bytes);
        wire
    }
}

// --- sender-side output parsing ----------------------------------------

/// The sender's output split into the application stream and the
/// out-of-band messages interleaved with it.
struct Output {
    data: Cursor<Vec<u8>>,
    messages: Vec<(MessageCode, Vec<u8>)>,
    prev_positive: i32,
    prev_negative: i32,
}

impl Output {
    fn parse(mut wire: &[u8]) -> Self {
        let mut data = Vec::new();
        let mut messages = Vec::new();
        while !wire.is_empty() {
            let header = MessageHeader::decode(wire).expect("well-formed frame header");
            let len = header.payload_len() as usize;
            let payload = &wire[HEADER_LEN..HEADER_LEN + len];
            if header.code() == MessageCode::Data {
                data.extend_from_slice(payload);
            } else {
                messages.push((header.code(), payload.to_vec()));
            }
            wire = &wire[HEADER_LEN + len..];
        }
        Self { data: Cursor::new(data), messages, prev_positive: -1, prev_negative: 1 }
    }

    fn read_u8(&mut self) -> u8 {
        let mut byte = [0u8; 1];
        self.data.read_exact(&mut byte).expect("application byte available");
        byte[0]
    }

    fn read_u16(&mut self) -> u16 {
        let mut bytes = [0u8; 2];
        self.data.read_exact(&mut bytes).expect("u16 available");
        u16::from_le_bytes(bytes)
    }

    fn read_i32(&mut self) -> i32 {
        let mut bytes = [0u8; 4];
        self.data.read_exact(&mut bytes).expect("i32 available");
        i32::from_le_bytes(bytes)
    }

    fn read_bytes(&mut self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        self.data.read_exact(&mut bytes).expect("bytes available");
        bytes
    }

    fn read_index(&mut self) -> i32 {
        let mut byte = self.read_u8();
        let negative = if byte == 0xFF {
            byte = self.read_u8();
            true
        } else if byte == 0 {
            return FileList::DONE;
        } else {
            false
        };
        let prev = if negative { self.prev_negative } else { self.prev_positive };
        let num = if byte == 0xFE {
            let next = self.read_u8();
            if next & 0x80 != 0 {
                let high = i32::from(next & !0x80);
                let b0 = i32::from(self.read_u8());
                let b1 = i32::from(self.read_u8());
                let b2 = i32::from(self.read_u8());
                (high << 24) | b0 | (b1 << 8) | (b2 << 16)
            } else {
                prev + ((i32::from(next) << 8) | i32::from(self.read_u8()))
            }
        } else {
            prev + i32::from(byte)
        };
        if negative {
            self.prev_negative = num;
            -num
        } else {
            self.prev_positive = num;
            num
        }
    }

    fn at_end(&self) -> bool {
        self.data.position() as usize == self.data.get_ref().len()
    }
}

/// One decoded file-list entry.
#[derive(Debug)]
struct WireEntry {
    flags: u16,
    name: Vec<u8>,
    size: i64,
    mtime: Option<i64>,
    mode: Option<i32>,
}

/// Decodes file-entry frames until the segment terminator, tracking name
/// prefix elision exactly like the receiver does.
fn read_segment(output: &mut Output) -> Vec<WireEntry> {
    let mut entries = Vec::new();
    let mut prev_name: Vec<u8> = Vec::new();
    loop {
        let first = output.read_u8();
        if first == 0 {
            return entries;
        }
        let flags = if u16::from(first) & xmit::EXTENDED_FLAGS != 0 {
            u16::from(first) | (u16::from(output.read_u8()) << 8)
        } else {
            u16::from(first)
        };
        assert_eq!(flags & xmit::IO_ERROR_ENDLIST, 0, "unexpected error end-list");

        let prefix_len = if flags & xmit::SAME_NAME != 0 { output.read_u8() as usize } else { 0 };
        let suffix_len = if flags & xmit::LONG_NAME != 0 {
            read_varint(&mut output.data).unwrap() as usize
        } else {
            output.read_u8() as usize
        };
        let suffix = output.read_bytes(suffix_len);

        assert!(prefix_len <= 255);
        assert!(prefix_len <= prev_name.len(), "prefix must refer to the previous name");
        let mut name = prev_name[..prefix_len].to_vec();
        name.extend_from_slice(&suffix);
        prev_name = name.clone();

        let size = read_varlong(&mut output.data, 3).unwrap();
        let mtime = if flags & xmit::SAME_TIME == 0 {
            Some(read_varlong(&mut output.data, 4).unwrap())
        } else {
            None
        };
        let mode = if flags & xmit::SAME_MODE == 0 { Some(output.read_i32()) } else { None };

        entries.push(WireEntry { flags, name, size, mtime, mode });
    }
}

/// A transport reader that deletes a file the first time the sender turns
/// to the network, simulating a file vanishing between list and request.
struct DeletingReader {
    inner: Cursor<Vec<u8>>,
    victim: Option<PathBuf>,
}

impl Read for DeletingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if let Some(victim) = self.victim.take() {
            std::fs::remove_file(victim)?;
        }
        self.inner.read(buf)
    }
}

fn md5_hex(digest: &[u8]) -> String {
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

// --- scenarios ---------------------------------------------------------

#[test]
fn s1_empty_list_server_profile_exits_early() {
    // The server first receives the (empty) filter rule list.
    let mut script = ReceiverScript::new();
    script.put_i32(0);

    let mut sender = SenderBuilder::new_server(vec![], seed())
        .build(Cursor::new(script.into_wire()), Vec::<u8>::new());
    let ok = sender.run().expect("run succeeds");
    assert!(ok);

    let wire = sender_output(sender);
    let mut output = Output::parse(&wire);
    assert!(output.messages.is_empty());
    // One empty segment: just the terminator, nothing else.
    assert!(read_segment(&mut output).is_empty());
    assert!(output.at_end());
}

/// Consumes the sender to recover the captured outbound bytes.
fn sender_output<R: Read>(sender: sender::Sender<R, Vec<u8>>) -> Vec<u8> {
    sender.into_writer()
}

#[test]
fn s2_empty_file_streams_the_empty_digest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a");
    std::fs::write(&path, b"").unwrap();

    let mut script = ReceiverScript::new();
    script.index(0);
    script.put_u16(TRANSFER);
    script.checksum_header(0, 0, 16, 0);
    script.index(FileList::DONE);
    script.index(FileList::DONE);
    script.index(FileList::DONE);

    let mut sender = SenderBuilder::new_client(vec![path], seed())
        .build(Cursor::new(script.into_wire()), Vec::<u8>::new());
    let ok = sender.run().expect("run succeeds");
    assert!(ok);
    assert_eq!(sender.statistics().num_transferred_files, 1);

    let wire = sender_output(sender);
    let mut output = Output::parse(&wire);

    let entries = read_segment(&mut output);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, b"a");
    assert_eq!(entries[0].size, 0);
    assert_eq!(
        entries[0].flags,
        xmit::SAME_UID | xmit::SAME_GID,
        "first entry elides nothing but ownership"
    );
    assert!(entries[0].mtime.is_some());
    assert!(entries[0].mode.is_some());

    // Echo of the request, then the checksum header.
    assert_eq!(output.read_index(), 0);
    assert_eq!(output.read_u16(), TRANSFER);
    assert_eq!(output.read_i32(), 0);
    assert_eq!(output.read_i32(), 0);
    assert_eq!(output.read_i32(), 16);
    assert_eq!(output.read_i32(), 0);

    // Empty content: terminator, then the MD5 of the empty string.
    assert_eq!(output.read_i32(), 0);
    let digest = output.read_bytes(16);
    assert_eq!(md5_hex(&digest), "d41d8cd98f00b204e9800998ecf8427e");

    // Teardown: echo of the first DONE, then the final DONE.
    assert_eq!(output.read_index(), FileList::DONE);
    assert_eq!(output.read_index(), FileList::DONE);
    assert!(output.at_end());
    assert!(output.messages.is_empty());
}

#[test]
fn s3_identical_block_matches_fully() {
    let content: Vec<u8> = (0u8..=255).cycle().take(700).collect();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("b");
    std::fs::write(&path, &content).unwrap();

    let mut script = ReceiverScript::new();
    script.index(0);
    script.put_u16(TRANSFER);
    script.checksum_header(1, 700, 16, 0);
    script.put_i32(RollingChecksum::sum_of(&content) as i32);
    script.put_raw(&block_digest(&content, &seed()));
    script.index(FileList::DONE);
    script.index(FileList::DONE);
    script.index(FileList::DONE);

    let mut sender = SenderBuilder::new_client(vec![path], seed())
        .build(Cursor::new(script.into_wire()), Vec::<u8>::new());
    let ok = sender.run().expect("run succeeds");
    assert!(ok);
    assert_eq!(sender.statistics().total_matched_size, 700);
    assert_eq!(sender.statistics().total_literal_size, 0);
    let stats_read = sender.statistics().total_bytes_read;
    assert!(stats_read > 0);

    let wire = sender_output(sender);
    let mut output = Output::parse(&wire);
    let entries = read_segment(&mut output);
    assert_eq!(entries[0].name, b"b");

    assert_eq!(output.read_index(), 0);
    assert_eq!(output.read_u16(), TRANSFER);
    let header: Vec<i32> = (0..4).map(|_| output.read_i32()).collect();
    assert_eq!(header, vec![1, 700, 16, 0]);

    // A single match token referencing block 0, no literals.
    assert_eq!(output.read_i32(), -1);
    assert_eq!(output.read_i32(), 0);
    let digest = output.read_bytes(16);
    assert_eq!(digest, Md5::digest(&content));

    assert_eq!(output.read_index(), FileList::DONE);
    assert_eq!(output.read_index(), FileList::DONE);
    assert!(output.at_end());
}

#[test]
fn s4_digest_mismatch_forces_a_literal_stream() {
    let content: Vec<u8> = (0u8..=255).cycle().take(700).collect();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("b");
    std::fs::write(&path, &content).unwrap();

    let mut wrong_digest = block_digest(&content, &seed());
    wrong_digest[0] ^= 0xFF;

    let mut script = ReceiverScript::new();
    script.index(0);
    script.put_u16(TRANSFER);
    script.checksum_header(1, 700, 16, 0);
    script.put_i32(RollingChecksum::sum_of(&content) as i32);
    script.put_raw(&wrong_digest);
    script.index(FileList::DONE);
    script.index(FileList::DONE);
    script.index(FileList::DONE);

    let mut sender = SenderBuilder::new_client(vec![path], seed())
        .build(Cursor::new(script.into_wire()), Vec::<u8>::new());
    let ok = sender.run().expect("run succeeds");
    assert!(ok);
    assert_eq!(sender.statistics().total_matched_size, 0);
    assert_eq!(sender.statistics().total_literal_size, 700);

    let wire = sender_output(sender);
    let mut output = Output::parse(&wire);
    read_segment(&mut output);
    assert_eq!(output.read_index(), 0);
    assert_eq!(output.read_u16(), TRANSFER);
    for expected in [1, 700, 16, 0] {
        assert_eq!(output.read_i32(), expected);
    }

    // Literal runs totalling the file size, then the terminator.
    let mut literal = Vec::new();
    loop {
        let token = output.read_i32();
        if token == 0 {
            break;
        }
        assert!(token > 0, "no match tokens may appear");
        literal.extend_from_slice(&output.read_bytes(token as usize));
    }
    assert_eq!(literal, content);
    let digest = output.read_bytes(16);
    assert_eq!(digest, Md5::digest(&content));
}

#[test]
fn s5_recursive_dot_dir_expands_via_a_stub_segment() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["f1", "f2", "f3"] {
        std::fs::write(dir.path().join(name), name.as_bytes()).unwrap();
    }
    let root = dir.path().join(".");

    let mut script = ReceiverScript::new();
    script.index(FileList::DONE);
    script.index(FileList::DONE);
    script.index(FileList::DONE);
    script.index(FileList::DONE);

    let mut sender = SenderBuilder::new_client(vec![root], seed())
        .file_selection(FileSelection::Recurse)
        .build(Cursor::new(script.into_wire()), Vec::<u8>::new());
    let ok = sender.run().expect("run succeeds");
    assert!(ok);

    let wire = sender_output(sender);
    let mut output = Output::parse(&wire);

    // Initial segment: only the dot-dir entry.
    let initial = read_segment(&mut output);
    assert_eq!(initial.len(), 1);
    assert_eq!(initial[0].name, b".");
    assert_ne!(initial[0].flags & xmit::TOP_DIR, 0);

    // The stub-directory reference for expansion ordinal 0.
    assert_eq!(output.read_index(), FileList::OFFSET);

    // The children, in name order, then the segment terminator.
    let children = read_segment(&mut output);
    let names: Vec<&[u8]> = children.iter().map(|entry| entry.name.as_slice()).collect();
    assert_eq!(names, vec![b"f1".as_slice(), b"f2", b"f3"]);
    assert_eq!(children[0].size, 2);

    // Nothing left to expand: the end-of-list sentinel.
    assert_eq!(output.read_index(), FileList::EOF);

    // Segment retirements: one DONE echoed while segments remain, then the
    // teardown DONE and the final DONE.
    assert_eq!(output.read_index(), FileList::DONE);
    assert_eq!(output.read_index(), FileList::DONE);
    assert_eq!(output.read_index(), FileList::DONE);
    assert!(output.at_end());
}

#[test]
fn s6_vanished_file_is_recovered_with_no_send() {
    let dir = tempfile::tempdir().unwrap();
    let doomed = dir.path().join("doomed");
    std::fs::write(&doomed, b"going away").unwrap();

    let mut script = ReceiverScript::new();
    script.index(0);
    script.put_u16(TRANSFER);
    script.checksum_header(0, 0, 16, 0);
    script.index(FileList::DONE);
    script.index(FileList::DONE);
    script.index(FileList::DONE);

    let reader = DeletingReader {
        inner: Cursor::new(script.into_wire()),
        victim: Some(doomed.clone()),
    };
    let mut sender =
        SenderBuilder::new_client(vec![doomed], seed()).build(reader, Vec::<u8>::new());
    let ok = sender.run().expect("run succeeds despite the vanished file");
    assert!(!ok, "a vanished file must lower the success flag");
    assert_eq!(sender.statistics().num_transferred_files, 0);

    let wire = sender_output(sender);
    let mut output = Output::parse(&wire);
    let entries = read_segment(&mut output);
    assert_eq!(entries.len(), 1);

    // No echo, no content, no digest for the vanished index; the teardown
    // exchanges follow directly.
    assert_eq!(output.read_index(), FileList::DONE);
    assert_eq!(output.read_index(), FileList::DONE);
    assert!(output.at_end());

    // The failure travelled as messages: NO_SEND for the index, then the
    // accumulated io-error bits.
    let no_send = output
        .messages
        .iter()
        .find(|(code, _)| *code == MessageCode::NoSend)
        .expect("NO_SEND message present");
    assert_eq!(no_send.1, 0i32.to_le_bytes());

    let io_err = output
        .messages
        .iter()
        .find(|(code, _)| *code == MessageCode::IoError)
        .expect("IO_ERROR message present");
    assert_eq!(
        i32::from_le_bytes(io_err.1.clone().try_into().unwrap()) & io_error::VANISHED,
        io_error::VANISHED
    );
}

#[test]
fn shared_name_prefixes_are_elided_across_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["prefix_alpha", "prefix_beta", "prefix_gamma"] {
        std::fs::write(dir.path().join(name), b"x").unwrap();
    }
    let root = dir.path().join(".");

    let mut script = ReceiverScript::new();
    script.index(FileList::DONE);
    script.index(FileList::DONE);
    script.index(FileList::DONE);
    script.index(FileList::DONE);

    let mut sender = SenderBuilder::new_client(vec![root], seed())
        .file_selection(FileSelection::Recurse)
        .build(Cursor::new(script.into_wire()), Vec::<u8>::new());
    assert!(sender.run().expect("run succeeds"));

    let wire = sender_output(sender);
    let mut output = Output::parse(&wire);
    read_segment(&mut output);
    assert_eq!(output.read_index(), FileList::OFFSET);
    let children = read_segment(&mut output);

    // The decoder reconstructed the names through prefix elision; the
    // second and third entries must have used SAME_NAME.
    let names: Vec<&[u8]> = children.iter().map(|entry| entry.name.as_slice()).collect();
    assert_eq!(names, vec![b"prefix_alpha".as_slice(), b"prefix_beta", b"prefix_gamma"]);
    assert_ne!(children[1].flags & xmit::SAME_NAME, 0);
    assert_ne!(children[2].flags & xmit::SAME_NAME, 0);
}

#[test]
fn filter_rules_are_rejected_when_non_empty() {
    let mut script = ReceiverScript::new();
    script.put_i32(2);
    script.put_raw(b"+x");

    let mut sender = SenderBuilder::new_server(vec![], seed())
        .build(Cursor::new(script.into_wire()), Vec::<u8>::new());
    let err = sender.run().expect_err("filter rules are unsupported");
    assert!(matches!(err, sender::SenderError::Protocol(_)));
}

#[test]
fn transfer_request_during_teardown_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a");
    std::fs::write(&path, b"payload").unwrap();

    let mut script = ReceiverScript::new();
    script.index(FileList::DONE); // enter teardown
    script.index(0);
    script.put_u16(TRANSFER);

    let mut sender = SenderBuilder::new_client(vec![path], seed())
        .build(Cursor::new(script.into_wire()), Vec::<u8>::new());
    let err = sender.run().expect_err("late transfer request is a protocol error");
    assert!(matches!(err, sender::SenderError::Protocol(_)));
}

#[test]
fn unknown_item_flags_are_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a");
    std::fs::write(&path, b"payload").unwrap();

    let mut script = ReceiverScript::new();
    script.index(0);
    script.put_u16(1 << 9); // undefined bit

    let mut sender = SenderBuilder::new_client(vec![path], seed())
        .build(Cursor::new(script.into_wire()), Vec::<u8>::new());
    let err = sender.run().expect_err("unknown item flags are fatal");
    assert!(matches!(err, sender::SenderError::Protocol(_)));
}

#[test]
fn metadata_ack_removes_the_entry_and_echoes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a");
    std::fs::write(&path, b"payload").unwrap();

    let mut script = ReceiverScript::new();
    script.index(0);
    script.put_u16(item::REPORT_TIME); // no TRANSFER bit: metadata-only ack
    script.index(FileList::DONE);
    script.index(FileList::DONE);
    script.index(FileList::DONE);

    let mut sender = SenderBuilder::new_client(vec![path], seed())
        .build(Cursor::new(script.into_wire()), Vec::<u8>::new());
    assert!(sender.run().expect("run succeeds"));
    assert_eq!(sender.statistics().num_transferred_files, 0);

    let wire = sender_output(sender);
    let mut output = Output::parse(&wire);
    read_segment(&mut output);
    assert_eq!(output.read_index(), 0);
    assert_eq!(output.read_u16(), item::REPORT_TIME);
    assert_eq!(output.read_index(), FileList::DONE);
    assert_eq!(output.read_index(), FileList::DONE);
    assert!(output.at_end());
}

#[test]
fn server_profile_appends_the_statistics_block() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a");
    std::fs::write(&path, b"12345").unwrap();

    let mut script = ReceiverScript::new();
    script.put_i32(0); // empty filter rules
    script.index(0);
    script.put_u16(TRANSFER);
    script.checksum_header(0, 0, 16, 0);
    script.index(FileList::DONE);
    script.index(FileList::DONE);
    script.index(FileList::DONE);

    let mut sender = SenderBuilder::new_server(vec![path], seed())
        .build(Cursor::new(script.into_wire()), Vec::<u8>::new());
    assert!(sender.run().expect("run succeeds"));

    let total_read = sender.statistics().total_bytes_read;
    let total_file_size = sender.statistics().total_file_size;
    assert_eq!(total_file_size, 5);

    let wire = sender_output(sender);
    let mut output = Output::parse(&wire);
    read_segment(&mut output);
    assert_eq!(output.read_index(), 0);
    assert_eq!(output.read_u16(), TRANSFER);
    for expected in [0, 0, 16, 0] {
        assert_eq!(output.read_i32(), expected);
    }
    // Whole-file literal: one run of five bytes.
    assert_eq!(output.read_i32(), 5);
    assert_eq!(output.read_bytes(5), b"12345");
    assert_eq!(output.read_i32(), 0);
    output.read_bytes(16);

    // First teardown DONE echo, then the final DONE, then five varlongs.
    assert_eq!(output.read_index(), FileList::DONE);
    assert_eq!(output.read_index(), FileList::DONE);
    let block: Vec<i64> =
        (0..5).map(|_| read_varlong(&mut output.data, 3).unwrap()).collect();
    assert_eq!(block[2], total_file_size as i64);
    assert!(block[0] <= total_read as i64);
    assert!(block[3] >= 1, "build time is clamped to at least 1ms");
    assert!(output.at_end());
}

/// The in-flight entry bound: a directory with more entries than the
/// partial-list limit is still delivered, across multiple refills.
#[test]
fn flow_control_keeps_expanding_after_acks() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("sub");
    std::fs::create_dir(&sub).unwrap();
    for i in 0..20 {
        std::fs::write(sub.join(format!("file{i:02}")), b"x").unwrap();
    }
    let root = dir.path().join(".");

    let mut script = ReceiverScript::new();
    script.index(FileList::DONE);
    script.index(FileList::DONE);
    script.index(FileList::DONE);
    script.index(FileList::DONE);
    script.index(FileList::DONE);

    let mut sender = SenderBuilder::new_client(vec![root], seed())
        .file_selection(FileSelection::Recurse)
        .build(Cursor::new(script.into_wire()), Vec::<u8>::new());
    assert!(sender.run().expect("run succeeds"));

    let wire = sender_output(sender);
    let mut output = Output::parse(&wire);

    // Initial: dot-dir only. First stub expansion: the subdirectory level,
    // second stub expansion: its files.
    let initial = read_segment(&mut output);
    assert_eq!(initial.len(), 1);
    assert_eq!(output.read_index(), FileList::OFFSET);
    let level_one = read_segment(&mut output);
    assert_eq!(level_one.len(), 1);
    assert_eq!(level_one[0].name, b"sub");
    assert_eq!(output.read_index(), FileList::OFFSET - 1);
    let level_two = read_segment(&mut output);
    assert_eq!(level_two.len(), 20);
    assert_eq!(output.read_index(), FileList::EOF);
}
