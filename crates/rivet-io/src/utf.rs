//! Modified UTF-8
//!
//! Strings are measured and encoded as UTF-16 code units. Each unit becomes
//! one, two or three bytes; U+0000 is written as the two-byte form `C0 80`
//! so an encoded string never contains a raw zero byte. Supplementary
//! characters are written as two three-byte surrogates.

use crate::error::StreamError;

/// Largest payload a length-prefixed string may carry
pub const MAX_PREFIXED_LEN: usize = 0xFFFF;

/// Encoded width of a single UTF-16 code unit
#[inline]
pub fn unit_len(unit: u16) -> usize {
    match unit {
        0x0001..=0x007F => 1,
        0x0000 | 0x0080..=0x07FF => 2,
        _ => 3,
    }
}

/// Number of bytes `s` occupies once encoded
pub fn encoded_len(s: &str) -> usize {
    s.encode_utf16().map(unit_len).sum()
}

/// Number of UTF-16 code units in `s`
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Append the encoded form of one code unit
#[inline]
pub fn encode_unit(unit: u16, out: &mut [u8]) -> usize {
    match unit {
        0x0001..=0x007F => {
            out[0] = unit as u8;
            1
        }
        0x0000 | 0x0080..=0x07FF => {
            out[0] = 0xC0 | ((unit >> 6) & 0x1F) as u8;
            out[1] = 0x80 | (unit & 0x3F) as u8;
            2
        }
        _ => {
            out[0] = 0xE0 | ((unit >> 12) & 0x0F) as u8;
            out[1] = 0x80 | ((unit >> 6) & 0x3F) as u8;
            out[2] = 0x80 | (unit & 0x3F) as u8;
            3
        }
    }
}

/// Encode `s` into a fresh buffer, without any length prefix
pub fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(s));
    let mut scratch = [0u8; 3];
    for unit in s.encode_utf16() {
        let n = encode_unit(unit, &mut scratch);
        out.extend_from_slice(&scratch[..n]);
    }
    out
}

/// Decode one code unit given its first byte, pulling continuation bytes from `next`
///
/// `offset` is only used for error reporting.
pub fn decode_unit<F>(first: u8, offset: usize, mut next: F) -> Result<u16, StreamError>
where
    F: FnMut() -> Result<u8, StreamError>,
{
    match first >> 4 {
        0x0..=0x7 => {
            if first == 0 {
                return Err(StreamError::MalformedUtf {
                    offset,
                    reason: "raw zero byte",
                });
            }
            Ok(first as u16)
        }
        0xC | 0xD => {
            let b = continuation(next()?, offset + 1)?;
            Ok((((first & 0x1F) as u16) << 6) | b)
        }
        0xE => {
            let b1 = continuation(next()?, offset + 1)?;
            let b2 = continuation(next()?, offset + 2)?;
            Ok((((first & 0x0F) as u16) << 12) | (b1 << 6) | b2)
        }
        _ => Err(StreamError::MalformedUtf {
            offset,
            reason: "invalid lead byte",
        }),
    }
}

#[inline]
fn continuation(byte: u8, offset: usize) -> Result<u16, StreamError> {
    if byte & 0xC0 != 0x80 {
        return Err(StreamError::MalformedUtf {
            offset,
            reason: "expected continuation byte",
        });
    }
    Ok((byte & 0x3F) as u16)
}

/// Turn collected code units into a `String`
pub fn units_to_string(units: &[u16]) -> Result<String, StreamError> {
    String::from_utf16(units).map_err(|_| StreamError::MalformedUtf {
        offset: 0,
        reason: "unpaired surrogate",
    })
}

/// Decode a complete encoded payload
pub fn decode(bytes: &[u8]) -> Result<String, StreamError> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        let first = bytes[i];
        i += 1;
        let unit = decode_unit(first, start, || {
            let b = *bytes.get(i).ok_or(StreamError::MalformedUtf {
                offset: i,
                reason: "truncated sequence",
            })?;
            i += 1;
            Ok(b)
        })?;
        units.push(unit);
    }
    units_to_string(&units)
}
