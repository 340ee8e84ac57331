//! Callsign field helpers
//!
//! P25, YSF and NXDN carry callsigns as fixed-width, space-padded ASCII.
//! M17 packs up to nine characters into 48 bits using base-40.

use crate::error::ParseError;

/// M17 base-40 alphabet; index 0 is the padding space
pub const BASE40_ALPHABET: &[u8; 40] = b" ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-/.";

/// Encoded M17 broadcast destination
pub const M17_BROADCAST: [u8; 6] = [0xFF; 6];

/// Display form of the M17 broadcast destination
pub const M17_BROADCAST_NAME: &str = "@ALL";

/// Largest valid base-40 value (40^9 - 1)
const BASE40_MAX: u64 = 262_143_999_999_999;

/// Pad or truncate a callsign to a fixed-width field
pub fn pad_callsign(callsign: &str, width: usize) -> Vec<u8> {
    let mut field: Vec<u8> = callsign.bytes().take(width).collect();
    field.resize(width, b' ');
    field
}

/// Parse a fixed-width login callsign field
///
/// The result is trimmed and upper-cased. Empty or non-printable fields are
/// rejected since a login without a usable identity cannot pass the ACL.
pub fn parse_callsign(field: &[u8]) -> Result<String, ParseError> {
    let trimmed = trim_field(field);
    if trimmed.is_empty() || !trimmed.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        return Err(ParseError::InvalidCallsign(
            String::from_utf8_lossy(field).into_owned(),
        ));
    }
    Ok(String::from_utf8_lossy(trimmed).to_ascii_uppercase())
}

/// Parse a callsign field from a voice header
///
/// Voice headers are relayed whatever they contain, so this never fails;
/// unprintable bytes are replaced and an empty field yields `None`.
pub fn parse_callsign_lossy(field: &[u8]) -> Option<String> {
    let trimmed = trim_field(field);
    if trimmed.is_empty() {
        return None;
    }
    let text: String = trimmed
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect();
    Some(text.to_ascii_uppercase())
}

fn trim_field(field: &[u8]) -> &[u8] {
    let end = field
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map_or(0, |p| p + 1);
    let start = field[..end]
        .iter()
        .position(|&b| b != b' ')
        .unwrap_or(end);
    &field[start..end]
}

/// Encode a callsign into the 6-byte M17 base-40 form
pub fn encode_base40(callsign: &str) -> Result<[u8; 6], ParseError> {
    if callsign == M17_BROADCAST_NAME {
        return Ok(M17_BROADCAST);
    }
    if callsign.len() > 9 {
        return Err(ParseError::InvalidCallsign(callsign.to_string()));
    }

    let mut value: u64 = 0;
    for c in callsign.to_ascii_uppercase().bytes().rev() {
        let index = BASE40_ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or_else(|| ParseError::InvalidCallsign(callsign.to_string()))?;
        value = value * 40 + index as u64;
    }

    let bytes = value.to_be_bytes();
    let mut out = [0u8; 6];
    out.copy_from_slice(&bytes[2..]);
    Ok(out)
}

/// Decode a 6-byte M17 base-40 callsign
pub fn decode_base40(encoded: &[u8]) -> Result<String, ParseError> {
    if encoded.len() != 6 {
        return Err(ParseError::InvalidLength {
            frame: "M17 callsign",
            expected: 6,
            actual: encoded.len(),
        });
    }
    if encoded == M17_BROADCAST {
        return Ok(M17_BROADCAST_NAME.to_string());
    }

    let mut value = encoded
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    if value == 0 || value > BASE40_MAX {
        return Err(ParseError::InvalidCallsign(format!("{:02X?}", encoded)));
    }

    let mut callsign = String::with_capacity(9);
    while value > 0 {
        callsign.push(BASE40_ALPHABET[(value % 40) as usize] as char);
        value /= 40;
    }
    let trimmed = callsign.trim();
    if trimmed.is_empty() {
        return Err(ParseError::InvalidCallsign(format!("{:02X?}", encoded)));
    }
    Ok(trimmed.to_string())
}
