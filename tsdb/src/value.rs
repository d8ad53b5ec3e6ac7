//! Per-channel value formats and their on-disk payload layout.
//!
//! A channel's format id selects both the byte layout and the numeric
//! interpretation of every value written to that channel. Integer families
//! carry an optional decimal divisor in the low nibble (10/100/1000), which
//! promotes the stored integer to a double on decode; the divisor exponent
//! doubles as the display-decimals hint.

use serde::Serialize;

use crate::codec;
use crate::error::FormatError;

/// Raw IEEE-754 float, 4 bytes.
pub const FORMAT_FLOAT: u8 = 0x00;
/// Double with 2 display decimals, 8 bytes.
pub const FORMAT_DOUBLE_2DP: u8 = 0x03;
/// UTF-8 string with a single length byte.
pub const FORMAT_STRING_SHORT: u8 = 0x08;
/// Signed 16-bit integer, no divisor.
pub const FORMAT_INT16: u8 = 0x20;
/// Signed 16-bit integer divided by 100 on decode.
pub const FORMAT_INT16_CENTI: u8 = 0x22;
/// Unsigned 32-bit counter.
pub const FORMAT_UINT32: u8 = 0xC0;

/// A value format id as stored in a channel definition entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct FormatId(pub u8);

/// On-disk layout class behind a format id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Float,
    /// `decimals` is the display hint; 7 on disk means "6 or more".
    Double { decimals: u8 },
    /// Length prefix of 1, 2, 4 or 8 bytes, then that many UTF-8 bytes.
    Text { prefix_width: u8 },
    /// Fixed-width integer; `divisor_pow` in 1..=3 selects a 10^n divisor.
    Int {
        width: u8,
        signed: bool,
        divisor_pow: u8,
    },
}

impl FormatId {
    fn layout(self) -> Option<Layout> {
        match self.0 {
            0x00 => Some(Layout::Float),
            0x01..=0x07 => Some(Layout::Double {
                decimals: (self.0 - 1).min(6),
            }),
            0x08..=0x0b => Some(Layout::Text {
                prefix_width: 1 << (self.0 - 0x08),
            }),
            _ => {
                let width = match self.0 >> 4 {
                    0x1 | 0x9 => 1,
                    0x2 | 0xa => 2,
                    0x3 | 0xb => 3,
                    0x4 | 0xc => 4,
                    0x5 | 0xd => 8,
                    _ => return None,
                };
                let divisor_pow = self.0 & 0x0f;
                if divisor_pow > 3 {
                    return None;
                }
                Some(Layout::Int {
                    width,
                    signed: self.0 >> 4 <= 0x5,
                    divisor_pow,
                })
            }
        }
    }

    /// Returns the id unchanged, or `UnknownFormat` if it maps to no layout.
    pub fn validate(self) -> Result<FormatId, FormatError> {
        match self.layout() {
            Some(_) => Ok(self),
            None => Err(FormatError::UnknownFormat { format: self.0 }),
        }
    }

    pub fn is_string(self) -> bool {
        matches!(self.layout(), Some(Layout::Text { .. }))
    }

    /// True for the raw float and the double family.
    pub fn is_floating(self) -> bool {
        matches!(self.layout(), Some(Layout::Float | Layout::Double { .. }))
    }

    /// Display-decimals hint reported alongside decoded values so renderers
    /// can format a channel consistently.
    pub fn decimal_places(self) -> u8 {
        match self.layout() {
            Some(Layout::Float) => 6,
            Some(Layout::Double { decimals }) => decimals,
            Some(Layout::Int { divisor_pow, .. }) => divisor_pow,
            _ => 0,
        }
    }
}

/// A decoded channel value.
///
/// Divisor-carrying integer formats surface as `Double`; exact integer
/// formats stay `Integer` so counters survive bit-exact.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Double(f64),
    Text(String),
}

impl Value {
    /// Numeric view used by aggregation; `None` for strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            Value::Text(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Text(t) => write!(f, "{t:?}"),
        }
    }
}

const DIVISORS: [f64; 4] = [1.0, 10.0, 100.0, 1000.0];

/// Decode one value payload at `offset`, returning the value and the number
/// of payload bytes consumed.
pub fn decode_payload(
    format: FormatId,
    buf: &[u8],
    offset: usize,
) -> Result<(Value, usize), FormatError> {
    let layout = format
        .layout()
        .ok_or(FormatError::UnknownFormat { format: format.0 })?;

    match layout {
        Layout::Float => Ok((Value::Double(codec::read_f32(buf, offset)? as f64), 4)),
        Layout::Double { .. } => Ok((Value::Double(codec::read_f64(buf, offset)?), 8)),
        Layout::Text { prefix_width } => {
            let len = match prefix_width {
                1 => codec::read_u8(buf, offset)? as u64,
                2 => codec::read_u16(buf, offset)? as u64,
                4 => codec::read_u32(buf, offset)? as u64,
                _ => codec::read_u64(buf, offset)?,
            };
            let start = offset + prefix_width as usize;
            let remaining = buf.len().saturating_sub(start) as u64;
            if len > remaining {
                return Err(FormatError::StringTooLong {
                    offset: offset as u64,
                    len,
                });
            }
            let bytes = &buf[start..start + len as usize];
            let text = String::from_utf8_lossy(bytes).into_owned();
            Ok((Value::Text(text), prefix_width as usize + len as usize))
        }
        Layout::Int {
            width,
            signed,
            divisor_pow,
        } => {
            let raw: i64 = if signed {
                match width {
                    1 => codec::read_i8(buf, offset)? as i64,
                    2 => codec::read_i16(buf, offset)? as i64,
                    3 => codec::read_i24(buf, offset)? as i64,
                    4 => codec::read_i32(buf, offset)? as i64,
                    _ => codec::read_i64(buf, offset)?,
                }
            } else {
                match width {
                    1 => codec::read_u8(buf, offset)? as i64,
                    2 => codec::read_u16(buf, offset)? as i64,
                    3 => codec::read_u24(buf, offset)? as i64,
                    4 => codec::read_u32(buf, offset)? as i64,
                    // u64 values can exceed the i64 domain
                    _ => {
                        let wide = codec::read_u64(buf, offset)?;
                        let value = if divisor_pow == 0 {
                            match i64::try_from(wide) {
                                Ok(v) => Value::Integer(v),
                                Err(_) => Value::Double(wide as f64),
                            }
                        } else {
                            Value::Double(wide as f64 / DIVISORS[divisor_pow as usize])
                        };
                        return Ok((value, 8));
                    }
                }
            };
            let value = if divisor_pow == 0 {
                Value::Integer(raw)
            } else {
                Value::Double(raw as f64 / DIVISORS[divisor_pow as usize])
            };
            Ok((value, width as usize))
        }
    }
}

/// Encode one value payload for `format`, appending to `out`.
///
/// Integer formats (scaled or not) take `Value::Integer` holding the raw
/// on-disk integer; the divisor is applied on decode only.
pub fn encode_payload(
    format: FormatId,
    value: &Value,
    out: &mut Vec<u8>,
) -> Result<(), FormatError> {
    let layout = format
        .layout()
        .ok_or(FormatError::UnknownFormat { format: format.0 })?;
    let mismatch = FormatError::TypeMismatch { format: format.0 };

    match layout {
        Layout::Float => match value {
            Value::Double(d) => {
                codec::write_f32(out, *d as f32);
                Ok(())
            }
            _ => Err(mismatch),
        },
        Layout::Double { .. } => match value {
            Value::Double(d) => {
                codec::write_f64(out, *d);
                Ok(())
            }
            _ => Err(mismatch),
        },
        Layout::Text { prefix_width } => {
            let text = match value {
                Value::Text(t) => t,
                _ => return Err(mismatch),
            };
            let len = text.len() as u64;
            let max = match prefix_width {
                1 => u8::MAX as u64,
                2 => u16::MAX as u64,
                4 => u32::MAX as u64,
                _ => u64::MAX,
            };
            if len > max {
                return Err(FormatError::StringTooLong { offset: 0, len });
            }
            match prefix_width {
                1 => codec::write_u8(out, len as u8),
                2 => codec::write_u16(out, len as u16),
                4 => codec::write_u32(out, len as u32),
                _ => codec::write_u64(out, len),
            }
            out.extend_from_slice(text.as_bytes());
            Ok(())
        }
        Layout::Int { width, signed, .. } => {
            let raw = match value {
                Value::Integer(i) => *i,
                _ => return Err(mismatch),
            };
            let out_of_range = FormatError::ValueOutOfRange {
                format: format.0,
                value: raw,
            };
            if signed {
                let bits = width as u32 * 8;
                if width < 8 {
                    let min = -(1i64 << (bits - 1));
                    let max = (1i64 << (bits - 1)) - 1;
                    if raw < min || raw > max {
                        return Err(out_of_range);
                    }
                }
                match width {
                    1 => codec::write_u8(out, raw as i8 as u8),
                    2 => codec::write_u16(out, raw as i16 as u16),
                    3 => codec::write_i24(out, raw as i32),
                    4 => codec::write_u32(out, raw as i32 as u32),
                    _ => codec::write_i64(out, raw),
                }
            } else {
                if raw < 0 {
                    return Err(out_of_range);
                }
                if width < 8 {
                    let max = (1i64 << (width as u32 * 8)) - 1;
                    if raw > max {
                        return Err(out_of_range);
                    }
                }
                match width {
                    1 => codec::write_u8(out, raw as u8),
                    2 => codec::write_u16(out, raw as u16),
                    3 => codec::write_u24(out, raw as u32),
                    4 => codec::write_u32(out, raw as u32),
                    _ => codec::write_u64(out, raw as u64),
                }
            }
            Ok(())
        }
    }
}
