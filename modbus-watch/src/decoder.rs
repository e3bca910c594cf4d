//! Register block decoding.
//!
//! The controller exposes one fixed block of input registers:
//!
//! | Offset  | Content                                                   |
//! |---------|-----------------------------------------------------------|
//! | 0..=2   | identifier, two ASCII characters per register, swapped    |
//! | 20      | position in hundredths, read through its hex digits       |
//! | 21      | force in tenths of a kilogram                             |
//!
//! Everything here is pure. Field-level anomalies fall back to a default
//! value; only a block too short to hold every field is an error.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Registers holding the identifier.
pub const IDENTIFIER_OFFSETS: Range<usize> = 0..3;

/// Register holding the position.
pub const POSITION_OFFSET: usize = 20;

/// Register holding the force.
pub const FORCE_OFFSET: usize = 21;

/// Smallest block that contains every decoded field.
pub const MIN_BLOCK_LEN: usize = FORCE_OFFSET + 1;

/// Identifier reported when no register yields any character.
pub const UNKNOWN_IDENTIFIER: &str = "unknown";

/// Force readings above this many kilograms are treated as sensor faults.
pub const MAX_FORCE_KG: f64 = 1000.0;

const FORCE_SCALE: f64 = 0.1;
const POSITION_DIVISOR: f64 = 100.0;

/// Error type for block decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Register block too short: got {len} registers, need at least {required}")]
    ShortBlock { len: usize, required: usize },
}

/// A typed reading decoded from one register block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedReading {
    /// Identifier string assembled from registers 0-2.
    pub id: String,
    /// Position measurement.
    pub position: f64,
    /// Force measurement in kilograms.
    pub force: f64,
}

/// How the position register is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionFormat {
    /// The register's hex digits read as a hexadecimal float literal, divided by 100.
    #[default]
    HexLiteral,
    /// A 32-bit IEEE-754 float spanning the position register and the next one.
    ///
    /// The second word is the force register, so a device using this layout
    /// cannot also report force at offset 21.
    Ieee754,
}

/// Order of the two 16-bit words of a 32-bit value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WordOrder {
    /// High word first.
    Big,
    /// Low word first (default).
    #[default]
    Little,
}

/// Decodes register blocks into [`DecodedReading`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterDecoder {
    position_format: PositionFormat,
    word_order: WordOrder,
}

impl RegisterDecoder {
    /// Create a decoder with an explicit position format.
    pub fn new(position_format: PositionFormat, word_order: WordOrder) -> Self {
        Self {
            position_format,
            word_order,
        }
    }

    /// The position format in use.
    pub fn position_format(&self) -> PositionFormat {
        self.position_format
    }

    /// Decode a full register block.
    pub fn decode(&self, block: &[u16]) -> Result<DecodedReading, DecodeError> {
        if block.len() < MIN_BLOCK_LEN {
            return Err(DecodeError::ShortBlock {
                len: block.len(),
                required: MIN_BLOCK_LEN,
            });
        }

        let position = match self.position_format {
            PositionFormat::HexLiteral => decode_position(Some(block[POSITION_OFFSET])),
            PositionFormat::Ieee754 => {
                decode_ieee754_f32(&block[POSITION_OFFSET..], self.word_order)
                    .map_or(0.0, f64::from)
            }
        };

        Ok(DecodedReading {
            id: decode_identifier(&block[IDENTIFIER_OFFSETS]),
            position,
            force: decode_force(block[FORCE_OFFSET]),
        })
    }
}

/// Decode a block with the default decoder.
pub fn decode_reading(block: &[u16]) -> Result<DecodedReading, DecodeError> {
    RegisterDecoder::default().decode(block)
}

/// Assemble the identifier from the first three registers.
///
/// Each register contributes its two ASCII characters in swapped order.
/// Registers that are zero or hold non-ASCII bytes contribute nothing.
pub fn decode_identifier(block: &[u16]) -> String {
    let id: String = block
        .iter()
        .take(IDENTIFIER_OFFSETS.len())
        .filter_map(|&raw| decimal_to_hex(raw))
        .filter_map(|hex| hex_to_ascii(&hex))
        .map(|pair| swap_pair(&pair))
        .collect();

    if id.is_empty() {
        UNKNOWN_IDENTIFIER.to_string()
    } else {
        id
    }
}

/// Decode the position register.
///
/// A missing or zero register reads as 0.0.
pub fn decode_position(raw: Option<u16>) -> f64 {
    raw.and_then(decimal_to_hex)
        .and_then(|hex| hex_to_float(&hex))
        .map_or(0.0, |value| value / POSITION_DIVISOR)
}

/// Decode the force register, suppressing readings outside `[0, 1000]` kg.
pub fn decode_force(raw: impl Into<f64>) -> f64 {
    let kg = raw.into() * FORCE_SCALE;
    if (0.0..=MAX_FORCE_KG).contains(&kg) {
        kg
    } else {
        0.0
    }
}

/// Four lowercase hex digits for a register, `None` for zero.
pub fn decimal_to_hex(raw: u16) -> Option<String> {
    (raw > 0).then(|| format!("{:04x}", raw))
}

/// Interpret pairs of hex digits as ASCII characters.
///
/// Returns `None` for malformed hex or any byte outside the ASCII range.
pub fn hex_to_ascii(hex: &str) -> Option<String> {
    if hex.is_empty() || hex.len() % 2 != 0 {
        return None;
    }

    hex.as_bytes()
        .chunks(2)
        .map(|digits| {
            if !digits.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            let digits = std::str::from_utf8(digits).ok()?;
            let byte = u8::from_str_radix(digits, 16).ok()?;
            byte.is_ascii().then_some(char::from(byte))
        })
        .collect()
}

/// Swap the two characters of a pair. Other lengths are returned unchanged.
pub fn swap_pair(pair: &str) -> String {
    let mut chars: Vec<char> = pair.chars().collect();
    if chars.len() == 2 {
        chars.swap(0, 1);
    }
    chars.into_iter().collect()
}

/// Parse a hexadecimal floating-point literal such as `2328`, `0x1.8p1` or `-a.4`.
pub fn hex_to_float(literal: &str) -> Option<f64> {
    let literal = literal.trim();
    let (negative, rest) = match literal.as_bytes().first()? {
        b'-' => (true, &literal[1..]),
        b'+' => (false, &literal[1..]),
        _ => (false, literal),
    };
    let rest = rest
        .strip_prefix("0x")
        .or_else(|| rest.strip_prefix("0X"))
        .unwrap_or(rest);

    let (mantissa, exponent) = match rest.split_once(['p', 'P']) {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().ok()?),
        None => (rest, 0),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }

    let mut value = 0.0_f64;
    for c in whole.chars() {
        value = value * 16.0 + f64::from(c.to_digit(16)?);
    }
    let mut scale = 1.0 / 16.0;
    for c in fraction.chars() {
        value += f64::from(c.to_digit(16)?) * scale;
        scale /= 16.0;
    }

    let value = value * 2f64.powi(exponent);
    Some(if negative { -value } else { value })
}

/// Decode a 32-bit IEEE-754 float from two registers.
///
/// Bytes within each word are big-endian; `order` selects which word is high.
pub fn decode_ieee754_f32(words: &[u16], order: WordOrder) -> Option<f32> {
    let (high, low) = match (words, order) {
        ([first, second, ..], WordOrder::Big) => (*first, *second),
        ([first, second, ..], WordOrder::Little) => (*second, *first),
        _ => return None,
    };
    Some(f32::from_bits((u32::from(high) << 16) | u32::from(low)))
}
