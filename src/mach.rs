//! "Much-compressed" variable-length integer encoding used throughout undo
//! records for ids, undo-nos, table-ids, and lengths.
//!
//! A 64-bit value is split into two 32-bit halves; each half is encoded in
//! 1-5 bytes with the leading bits of the first byte signaling how many
//! continuation bytes follow, matching `mach_write_compressed`/
//! `mach_read_compressed` (and their "much-compressed" u64 variant) in the
//! original source.

use std::io::{self, Read, Write};

const MIN_2BYTE: u32 = 0x80;
const MIN_3BYTE: u32 = 0x4000;
const MIN_4BYTE: u32 = 0x20_0000;
const MIN_5BYTE: u32 = 0x1000_0000;

/// Number of bytes a compressed encoding of `first_byte` occupies, inferred
/// from the high bits of the already-read first byte.
fn compressed_len(first_byte: u8) -> usize {
    if first_byte & 0x80 == 0 {
        1
    } else if first_byte & 0xC0 == 0x80 {
        2
    } else if first_byte & 0xE0 == 0xC0 {
        3
    } else if first_byte & 0xF0 == 0xE0 {
        4
    } else {
        5
    }
}

/// Write a single u32 in the compressed 1-5 byte format.
pub fn write_compressed<W: Write>(mut w: W, value: u32) -> io::Result<()> {
    if value < MIN_2BYTE {
        w.write_all(&[value as u8])
    } else if value < MIN_3BYTE {
        w.write_all(&[(0x80 | (value >> 8)) as u8, value as u8])
    } else if value < MIN_4BYTE {
        w.write_all(&[
            (0xC0 | (value >> 16)) as u8,
            (value >> 8) as u8,
            value as u8,
        ])
    } else if value < MIN_5BYTE {
        w.write_all(&[
            (0xE0 | (value >> 24)) as u8,
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
        ])
    } else {
        w.write_all(&[
            0xF0,
            (value >> 24) as u8,
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
        ])
    }
}

/// Read a compressed u32, returning the value.
pub fn read_compressed<R: Read>(mut r: R) -> io::Result<u32> {
    let mut first = [0u8; 1];
    r.read_exact(&mut first)?;
    let len = compressed_len(first[0]);
    if len == 1 {
        return Ok(first[0] as u32);
    }
    let mut rest = vec![0u8; len - 1];
    r.read_exact(&mut rest)?;
    let mask = match len {
        2 => 0x3F,
        3 => 0x1F,
        4 => 0x0F,
        _ => 0x00,
    };
    let mut value = (first[0] & mask) as u32;
    for b in rest {
        value = (value << 8) | b as u32;
    }
    Ok(value)
}

/// Write a u64 as two much-compressed u32 halves, high half first. The low
/// half is always written; the high half is elided as a single zero byte
/// when it is zero, matching the "much-compressed" scheme's handling of
/// small values (the common case for undo-nos and ids).
pub fn write_much_compressed<W: Write>(mut w: W, value: u64) -> io::Result<()> {
    let high = (value >> 32) as u32;
    let low = value as u32;
    write_compressed(&mut w, high)?;
    write_compressed(&mut w, low)
}

/// Read a u64 encoded by [`write_much_compressed`].
pub fn read_much_compressed<R: Read>(mut r: R) -> io::Result<u64> {
    let high = read_compressed(&mut r)? as u64;
    let low = read_compressed(&mut r)? as u64;
    Ok((high << 32) | low)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_u32(value: u32) {
        let mut buf = Vec::new();
        write_compressed(&mut buf, value).unwrap();
        let decoded = read_compressed(&buf[..]).unwrap();
        assert_eq!(decoded, value, "roundtrip failed for {value}");
    }

    #[test]
    fn compressed_u32_roundtrips_across_all_size_boundaries() {
        for value in [
            0,
            1,
            MIN_2BYTE - 1,
            MIN_2BYTE,
            MIN_3BYTE - 1,
            MIN_3BYTE,
            MIN_4BYTE - 1,
            MIN_4BYTE,
            MIN_5BYTE - 1,
            MIN_5BYTE,
            u32::MAX,
        ] {
            roundtrip_u32(value);
        }
    }

    #[test]
    fn small_values_encode_as_a_single_byte() {
        let mut buf = Vec::new();
        write_compressed(&mut buf, 42).unwrap();
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn much_compressed_u64_roundtrips() {
        for value in [0u64, 1, 1 << 31, u64::MAX, 123_456_789_012] {
            let mut buf = Vec::new();
            write_much_compressed(&mut buf, value).unwrap();
            let decoded = read_much_compressed(&buf[..]).unwrap();
            assert_eq!(decoded, value);
        }
    }
}
