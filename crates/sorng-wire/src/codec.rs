//! Byte Codec Kit (spec §4.1).
//!
//! A small, total set of encode/decode operations shared by every wire
//! format in this gateway. Decoders take a buffer and a cursor and return
//! `(value, new_cursor)`; they never panic on short input, they fail with
//! [`ErrorKind::ProtocolError`].

use crate::error::{GatewayError, GatewayResult};

/// Read a big-endian `u32` at `cursor`.
pub fn read_u32_be(buf: &[u8], cursor: usize) -> GatewayResult<(u32, usize)> {
    let end = cursor + 4;
    let bytes = buf
        .get(cursor..end)
        .ok_or_else(|| short_buffer("u32 (BE)", cursor, 4, buf.len()))?;
    Ok((u32::from_be_bytes(bytes.try_into().unwrap()), end))
}

/// Read a little-endian `u32` at `cursor`.
pub fn read_u32_le(buf: &[u8], cursor: usize) -> GatewayResult<(u32, usize)> {
    let end = cursor + 4;
    let bytes = buf
        .get(cursor..end)
        .ok_or_else(|| short_buffer("u32 (LE)", cursor, 4, buf.len()))?;
    Ok((u32::from_le_bytes(bytes.try_into().unwrap()), end))
}

/// Read a big-endian `i32` at `cursor`.
pub fn read_i32_be(buf: &[u8], cursor: usize) -> GatewayResult<(i32, usize)> {
    let (v, c) = read_u32_be(buf, cursor)?;
    Ok((v as i32, c))
}

/// Read a little-endian `i32` at `cursor`.
pub fn read_i32_le(buf: &[u8], cursor: usize) -> GatewayResult<(i32, usize)> {
    let (v, c) = read_u32_le(buf, cursor)?;
    Ok((v as i32, c))
}

pub fn write_u32_be(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn write_u32_le(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn read_u16_be(buf: &[u8], cursor: usize) -> GatewayResult<(u16, usize)> {
    let end = cursor + 2;
    let bytes = buf
        .get(cursor..end)
        .ok_or_else(|| short_buffer("u16 (BE)", cursor, 2, buf.len()))?;
    Ok((u16::from_be_bytes(bytes.try_into().unwrap()), end))
}

pub fn read_u16_le(buf: &[u8], cursor: usize) -> GatewayResult<(u16, usize)> {
    let end = cursor + 2;
    let bytes = buf
        .get(cursor..end)
        .ok_or_else(|| short_buffer("u16 (LE)", cursor, 2, buf.len()))?;
    Ok((u16::from_le_bytes(bytes.try_into().unwrap()), end))
}

pub fn write_u16_be(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn write_u16_le(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn read_u64_be(buf: &[u8], cursor: usize) -> GatewayResult<(u64, usize)> {
    let end = cursor + 8;
    let bytes = buf
        .get(cursor..end)
        .ok_or_else(|| short_buffer("u64 (BE)", cursor, 8, buf.len()))?;
    Ok((u64::from_be_bytes(bytes.try_into().unwrap()), end))
}

pub fn read_u64_le(buf: &[u8], cursor: usize) -> GatewayResult<(u64, usize)> {
    let end = cursor + 8;
    let bytes = buf
        .get(cursor..end)
        .ok_or_else(|| short_buffer("u64 (LE)", cursor, 8, buf.len()))?;
    Ok((u64::from_le_bytes(bytes.try_into().unwrap()), end))
}

pub fn write_u64_be(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn write_u64_le(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Combine a big hi/lo 32-bit pair (as used by protocols that split a
/// 64-bit value the way a JS-double-backed implementation would) into an
/// exact `u64`. Never loses precision — unlike `hi as f64 * 2f64.powi(32) + lo as f64`.
pub fn combine_hi_lo(hi: u32, lo: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}

/// Split a `u64` into its big hi/lo 32-bit pair.
pub fn split_hi_lo(v: u64) -> (u32, u32) {
    ((v >> 32) as u32, v as u32)
}

fn short_buffer(what: &str, cursor: usize, need: usize, len: usize) -> GatewayError {
    GatewayError::protocol_error(format!(
        "truncated frame: need {need} bytes for {what} at offset {cursor}, buffer has {len}"
    ))
}

// ─── VarUInt (unsigned LEB128) ───────────────────────────────────────

/// Maximum number of bytes a VarUInt may occupy before being rejected.
pub const VARUINT_MAX_BYTES: usize = 9;

/// Decode an unsigned LEB128 VarUInt. Uses a 64-bit accumulator so values
/// up to `2^63 - 1` (the largest value that fits in the 9-byte cap) round-trip
/// exactly; a 10th continuation byte is rejected as `ProtocolError`.
pub fn read_varuint(buf: &[u8], cursor: usize) -> GatewayResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    let mut pos = cursor;
    for i in 0..=VARUINT_MAX_BYTES {
        if i == VARUINT_MAX_BYTES {
            return Err(GatewayError::protocol_error(
                "VarUInt exceeds 9-byte continuation limit",
            ));
        }
        let byte = *buf
            .get(pos)
            .ok_or_else(|| short_buffer("VarUInt", pos, 1, buf.len()))?;
        pos += 1;
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, pos));
        }
        shift += 7;
    }
    unreachable!()
}

/// Encode a VarUInt (1–9 bytes, 7 data bits per byte, MSB = continuation).
pub fn write_varuint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let mut byte = (v & 0x7F) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
            out.push(byte);
        } else {
            out.push(byte);
            break;
        }
    }
}

// ─── XDR string / opaque (4-byte padded) ─────────────────────────────

fn xdr_pad_len(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/// Decode an XDR opaque: `u32 length` + `length` bytes + zero pad to a
/// 4-byte boundary. Returns the raw bytes (not copied beyond the slice).
pub fn read_xdr_opaque<'a>(buf: &'a [u8], cursor: usize) -> GatewayResult<(&'a [u8], usize)> {
    let (len, mut pos) = read_u32_be(buf, cursor)?;
    let len = len as usize;
    let data = buf
        .get(pos..pos + len)
        .ok_or_else(|| short_buffer("XDR opaque body", pos, len, buf.len()))?;
    pos += len;
    let pad = xdr_pad_len(len);
    pos += pad;
    if pos > buf.len() {
        return Err(short_buffer("XDR opaque padding", pos - pad, pad, buf.len()));
    }
    Ok((data, pos))
}

/// Decode an XDR string (UTF-8 validated) using the same framing as opaque.
pub fn read_xdr_string(buf: &[u8], cursor: usize) -> GatewayResult<(String, usize)> {
    let (bytes, pos) = read_xdr_opaque(buf, cursor)?;
    let s = String::from_utf8(bytes.to_vec())
        .map_err(|_| GatewayError::protocol_error("XDR string is not valid UTF-8"))?;
    Ok((s, pos))
}

/// Encode an XDR opaque: length prefix, raw bytes, zero padding to 4 bytes.
pub fn write_xdr_opaque(out: &mut Vec<u8>, data: &[u8]) {
    write_u32_be(out, data.len() as u32);
    out.extend_from_slice(data);
    out.extend(std::iter::repeat(0u8).take(xdr_pad_len(data.len())));
}

pub fn write_xdr_string(out: &mut Vec<u8>, s: &str) {
    write_xdr_opaque(out, s.as_bytes());
}

// ─── Native length-prefixed string (VarUInt length, no padding) ──────

pub fn read_native_string(buf: &[u8], cursor: usize) -> GatewayResult<(String, usize)> {
    let (len, pos) = read_varuint(buf, cursor)?;
    let len = len as usize;
    let bytes = buf
        .get(pos..pos + len)
        .ok_or_else(|| short_buffer("native string body", pos, len, buf.len()))?;
    let s = String::from_utf8(bytes.to_vec())
        .map_err(|_| GatewayError::protocol_error("native string is not valid UTF-8"))?;
    Ok((s, pos + len))
}

pub fn write_native_string(out: &mut Vec<u8>, s: &str) {
    write_varuint(out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
}

// ─── Fixed-width ASCII field (TDS-style: N bytes, space-padded, + 1-byte length) ──

/// Write `s` into a fixed `width`-byte field, space-padded (0x20), followed
/// by a 1-byte actual-length byte. `s` is truncated to `width` bytes if
/// longer (TDS truncates rather than erroring).
pub fn write_fixed_ascii_field(out: &mut Vec<u8>, s: &str, width: usize) {
    write_fixed_field_bytes(out, s.as_bytes(), width);
}

/// Byte-level variant of [`write_fixed_ascii_field`] for fields whose
/// content is not valid UTF-8 (e.g. an XOR-obfuscated password) — writing
/// such bytes through a `String` would lossily replace them with U+FFFD.
pub fn write_fixed_field_bytes(out: &mut Vec<u8>, bytes: &[u8], width: usize) {
    let used = bytes.len().min(width);
    out.extend_from_slice(&bytes[..used]);
    out.extend(std::iter::repeat(0x20u8).take(width - used));
    out.push(used as u8);
}

/// Read a fixed-width ASCII field: `width` bytes then a 1-byte actual
/// length. Returns the field trimmed to its declared actual length.
pub fn read_fixed_ascii_field(
    buf: &[u8],
    cursor: usize,
    width: usize,
) -> GatewayResult<(String, usize)> {
    let field_end = cursor + width;
    let field = buf
        .get(cursor..field_end)
        .ok_or_else(|| short_buffer("fixed ASCII field", cursor, width, buf.len()))?;
    let len_byte = *buf
        .get(field_end)
        .ok_or_else(|| short_buffer("fixed ASCII field length byte", field_end, 1, buf.len()))?;
    let actual_len = (len_byte as usize).min(width);
    let s = String::from_utf8_lossy(&field[..actual_len]).into_owned();
    Ok((s, field_end + 1))
}

// ─── Hex / base64 ─────────────────────────────────────────────────────

pub fn to_hex(data: &[u8]) -> String {
    hex::encode(data)
}

pub fn from_hex(s: &str) -> GatewayResult<Vec<u8>> {
    hex::decode(s).map_err(|e| GatewayError::invalid_argument(format!("invalid hex: {e}")))
}

pub fn to_base64(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub fn from_base64(s: &str) -> GatewayResult<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| GatewayError::invalid_argument(format!("invalid base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_be_roundtrip() {
        let mut out = Vec::new();
        write_u32_be(&mut out, 0xDEADBEEF);
        assert_eq!(out, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let (v, c) = read_u32_be(&out, 0).unwrap();
        assert_eq!(v, 0xDEADBEEF);
        assert_eq!(c, 4);
    }

    #[test]
    fn u32_le_roundtrip() {
        let mut out = Vec::new();
        write_u32_le(&mut out, 0x01020304);
        assert_eq!(out, vec![0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn u32_short_buffer_is_protocol_error() {
        let buf = [0u8; 2];
        let err = read_u32_be(&buf, 0).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ProtocolError);
    }

    #[test]
    fn hi_lo_combination_is_exact_for_large_values() {
        // A value that would lose precision if handled as an f64 double.
        let v: u64 = 9_007_199_254_740_993; // 2^53 + 1
        let (hi, lo) = split_hi_lo(v);
        assert_eq!(combine_hi_lo(hi, lo), v);
    }

    // ── VarUInt boundary cases from spec §8 invariant 3 ──────────────

    #[test]
    fn varuint_127_is_one_byte() {
        let mut out = Vec::new();
        write_varuint(&mut out, 127);
        assert_eq!(out, vec![0x7F]);
        let (v, c) = read_varuint(&out, 0).unwrap();
        assert_eq!(v, 127);
        assert_eq!(c, 1);
    }

    #[test]
    fn varuint_128_is_two_bytes() {
        let mut out = Vec::new();
        write_varuint(&mut out, 128);
        assert_eq!(out, vec![0x80, 0x01]);
    }

    #[test]
    fn varuint_16383_is_two_bytes() {
        let mut out = Vec::new();
        write_varuint(&mut out, 16383);
        assert_eq!(out, vec![0xFF, 0x7F]);
    }

    #[test]
    fn varuint_16384_is_three_bytes() {
        let mut out = Vec::new();
        write_varuint(&mut out, 16384);
        assert_eq!(out, vec![0x80, 0x80, 0x01]);
    }

    #[test]
    fn varuint_ten_byte_continuation_run_is_protocol_error() {
        let buf = [0x80u8; 10];
        let err = read_varuint(&buf, 0).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ProtocolError);
    }

    #[test]
    fn varuint_does_not_overflow_64_bit_accumulator() {
        // Largest value that fits the 9-byte cap (9 * 7 = 63 bits).
        let max_9_byte: u64 = (1u64 << 63) - 1;
        let mut out = Vec::new();
        write_varuint(&mut out, max_9_byte);
        assert_eq!(out.len(), 9);
        let (v, _) = read_varuint(&out, 0).unwrap();
        assert_eq!(v, max_9_byte);
    }

    // ── XDR padding (spec §8 invariant 2) ────────────────────────────

    #[test]
    fn xdr_string_empty_has_zero_pad() {
        let mut out = Vec::new();
        write_xdr_string(&mut out, "");
        assert_eq!(out, vec![0, 0, 0, 0]);
    }

    #[test]
    fn xdr_string_length_and_padding_for_various_lengths() {
        for s in ["a", "ab", "abc", "abcd", "abcde"] {
            let mut out = Vec::new();
            write_xdr_string(&mut out, s);
            let expected_pad = (4 - (s.len() % 4)) % 4;
            assert_eq!(out.len(), 4 + s.len() + expected_pad);
            // Trailing pad bytes are zero.
            for b in &out[4 + s.len()..] {
                assert_eq!(*b, 0);
            }
            let (decoded, consumed) = read_xdr_string(&out, 0).unwrap();
            assert_eq!(decoded, s);
            assert_eq!(consumed, out.len());
        }
    }

    #[test]
    fn xdr_opaque_roundtrip_binary() {
        let data = [0x00u8, 0xFF, 0x00];
        let mut out = Vec::new();
        write_xdr_opaque(&mut out, &data);
        let (decoded, consumed) = read_xdr_opaque(&out, 0).unwrap();
        assert_eq!(decoded, &data[..]);
        assert_eq!(consumed, out.len());
    }

    // ── Native string ─────────────────────────────────────────────────

    #[test]
    fn native_string_roundtrip_no_padding() {
        let mut out = Vec::new();
        write_native_string(&mut out, "hello");
        assert_eq!(out.len(), 1 + 5); // VarUInt(5) + 5 bytes, no padding
        let (s, c) = read_native_string(&out, 0).unwrap();
        assert_eq!(s, "hello");
        assert_eq!(c, out.len());
    }

    // ── Fixed-width ASCII field ───────────────────────────────────────

    #[test]
    fn fixed_ascii_field_roundtrip() {
        let mut out = Vec::new();
        write_fixed_ascii_field(&mut out, "sa", 30);
        assert_eq!(out.len(), 31);
        assert_eq!(out[2], 0x20); // space-padded
        assert_eq!(out[30], 2); // actual length byte
        let (s, c) = read_fixed_ascii_field(&out, 0, 30).unwrap();
        assert_eq!(s, "sa");
        assert_eq!(c, 31);
    }

    #[test]
    fn fixed_ascii_field_truncates_overlong_input() {
        let mut out = Vec::new();
        let long = "x".repeat(40);
        write_fixed_ascii_field(&mut out, &long, 30);
        assert_eq!(out.len(), 31);
        assert_eq!(out[30], 30);
    }

    // ── Hex / base64 ──────────────────────────────────────────────────

    #[test]
    fn hex_roundtrip_lowercase() {
        let data = [0xDEu8, 0xAD, 0xBE, 0xEF];
        let s = to_hex(&data);
        assert_eq!(s, "deadbeef");
        assert_eq!(from_hex(&s).unwrap(), data);
    }

    #[test]
    fn base64_roundtrip_binary_with_padding() {
        let data = [0x00u8, 0xFF, 0x00];
        let s = to_base64(&data);
        assert_eq!(s, "AP8A");
        assert_eq!(from_base64(&s).unwrap(), data);
    }

    #[test]
    fn base64_ascii_roundtrip() {
        let s = to_base64(b"hello");
        assert_eq!(from_base64(&s).unwrap(), b"hello");
    }
}
