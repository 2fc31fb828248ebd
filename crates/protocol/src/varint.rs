//! Variable-length integer codec.
//!
//! Every length, size, and time field on the wire uses this encoding unless a
//! fixed-width integer is called for. A value that fits in `min_bytes` bytes
//! with the top byte's high bit clear is emitted as exactly those bytes
//! (marker byte doubling as the most significant byte); otherwise a marker
//! byte whose leading set bits count the extra bytes is prepended, followed by
//! up to eight little-endian data bytes.

use std::io::{self, Read, Write};

fn malformed_integer() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "malformed variable-length integer")
}

fn encode_bytes(value: i64, min_bytes: u8) -> (usize, [u8; 9]) {
    debug_assert!((1..=8).contains(&min_bytes));
    let data = value.to_le_bytes();
    let min = usize::from(min_bytes);

    let mut cnt = 8usize;
    while cnt > min && data[cnt - 1] == 0 {
        cnt -= 1;
    }

    // First flag bit that would collide with the top data byte.
    let bit = 1u8 << (7 + min - cnt);

    let mut out = [0u8; 9];
    if data[cnt - 1] >= bit {
        out[0] = !(bit - 1);
        out[1..=cnt].copy_from_slice(&data[..cnt]);
        (cnt + 1, out)
    } else if cnt > min {
        out[0] = data[cnt - 1] | !(bit * 2 - 1);
        out[1..cnt].copy_from_slice(&data[..cnt - 1]);
        (cnt, out)
    } else {
        out[0] = data[cnt - 1];
        out[1..cnt].copy_from_slice(&data[..cnt - 1]);
        (cnt, out)
    }
}

/// Encodes `value` with a floor of `min_bytes` bytes and writes it to
/// `writer`.
///
/// # Errors
///
/// Propagates any error returned by `writer`.
pub fn write_varlong<W: Write + ?Sized>(writer: &mut W, value: i64, min_bytes: u8) -> io::Result<()> {
    let (len, bytes) = encode_bytes(value, min_bytes);
    writer.write_all(&bytes[..len])
}

/// Encodes a 32-bit value as `write_varlong(value, 1)`.
///
/// # Errors
///
/// Propagates any error returned by `writer`.
pub fn write_varint<W: Write + ?Sized>(writer: &mut W, value: i32) -> io::Result<()> {
    write_varlong(writer, i64::from(value), 1)
}

/// Decodes a variable-length integer written with the same `min_bytes` floor.
///
/// # Errors
///
/// Returns [`io::ErrorKind::UnexpectedEof`] on truncation and
/// [`io::ErrorKind::InvalidData`] when the marker byte announces an
/// impossible byte count.
pub fn read_varlong<R: Read + ?Sized>(reader: &mut R, min_bytes: u8) -> io::Result<i64> {
    debug_assert!((1..=8).contains(&min_bytes));
    let min = usize::from(min_bytes);

    let mut marker = [0u8; 1];
    reader.read_exact(&mut marker)?;

    let extra = marker[0].leading_ones() as usize;
    let cnt = min + extra;
    if cnt > 9 {
        return Err(malformed_integer());
    }

    let mut data = [0u8; 8];
    if cnt > 1 {
        reader.read_exact(&mut data[..cnt - 1])?;
    }

    if extra == 0 {
        data[min - 1] = marker[0];
    } else if cnt <= 8 {
        let mask = (1u8 << (7 + min - cnt)) - 1;
        data[cnt - 1] = marker[0] & mask;
    }
    // cnt == 9: all eight data bytes were streamed, the marker carries none.

    Ok(i64::from_le_bytes(data))
}

/// Decodes a value written with [`write_varint`].
///
/// # Errors
///
/// As [`read_varlong`], plus [`io::ErrorKind::InvalidData`] when the decoded
/// value does not fit a signed 32-bit integer.
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> io::Result<i32> {
    let value = read_varlong(reader, 1)?;
    i32::try_from(value).map_err(|_| malformed_integer())
}

/// Appends the encoding of `value` to `out`. Convenient for fixtures that
/// need the serialized bytes without a writer.
pub fn encode_varlong_to_vec(value: i64, min_bytes: u8, out: &mut Vec<u8>) {
    let (len, bytes) = encode_bytes(value, min_bytes);
    out.extend_from_slice(&bytes[..len]);
}
