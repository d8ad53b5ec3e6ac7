//! Entry model: the decoded record types and the byte-level entry encoders.
//!
//! Every entry is one self-delimiting unit: a type discriminant byte followed
//! by a type-specific payload. Type bytes 0x00..=0xef are value entries whose
//! discriminant IS the 8-bit channel id; 0xff escapes to a 16-bit id.

use serde::Serialize;

use crate::codec;
use crate::error::FormatError;
use crate::registry::{FIRST_WIDE_CHANNEL_ID, MAX_DENSE_CHANNEL_ID};
use crate::value::{self, FormatId, Value};

/// ASCII "TSDB" padded to 8 bytes with zeros.
pub const FILE_MAGIC: [u8; 8] = *b"TSDB\0\0\0\0";
/// The single supported format version.
pub const FORMAT_VERSION: u32 = 1;
/// Magic plus the 4-byte little-endian version.
pub const HEADER_LEN: usize = 12;

/// Absolute time entry: u64 UNIX milliseconds UTC.
pub const ENTRY_TIME_ABSOLUTE: u8 = 0xf0;
/// Relative time entries: unsigned delta of 1, 2, 3 or 4 bytes.
pub const ENTRY_TIME_DELTA8: u8 = 0xf1;
pub const ENTRY_TIME_DELTA16: u8 = 0xf2;
pub const ENTRY_TIME_DELTA24: u8 = 0xf3;
pub const ENTRY_TIME_DELTA32: u8 = 0xf4;
/// Channel definition with an 8-bit id.
pub const ENTRY_DEFINE_CHANNEL: u8 = 0xf5;
/// Channel definition with a 16-bit id.
pub const ENTRY_DEFINE_CHANNEL_WIDE: u8 = 0xf6;
/// End-of-file marker; nothing may follow it.
pub const ENTRY_END_OF_FILE: u8 = 0xfe;
/// Escape prefix for value entries on 16-bit channel ids.
pub const ENTRY_VALUE_ESCAPE: u8 = 0xff;

/// One decoded record from the entry stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub enum Record {
    ChannelDefined {
        id: u16,
        name: String,
        format: FormatId,
    },
    Timestamp {
        ts_ms: i64,
    },
    Value {
        channel_id: u16,
        ts_ms: i64,
        value: Value,
    },
    EndOfFile,
}

/// Append the file header (magic and version).
pub fn encode_header(out: &mut Vec<u8>) {
    out.extend_from_slice(&FILE_MAGIC);
    codec::write_u32(out, FORMAT_VERSION);
}

/// Append a channel definition entry, picking `0xf5` or `0xf6` by id range.
pub fn encode_channel_definition(
    out: &mut Vec<u8>,
    id: u16,
    format: FormatId,
    name: &str,
) -> Result<(), FormatError> {
    if name.len() > u8::MAX as usize {
        return Err(FormatError::NameTooLong { len: name.len() });
    }
    if id <= MAX_DENSE_CHANNEL_ID {
        codec::write_u8(out, ENTRY_DEFINE_CHANNEL);
        codec::write_u8(out, id as u8);
    } else {
        codec::write_u8(out, ENTRY_DEFINE_CHANNEL_WIDE);
        codec::write_u16(out, id);
    }
    codec::write_u8(out, format.0);
    codec::write_u8(out, name.len() as u8);
    out.extend_from_slice(name.as_bytes());
    Ok(())
}

/// Append an absolute time entry.
pub fn encode_time_absolute(out: &mut Vec<u8>, ts_ms: i64) {
    codec::write_u8(out, ENTRY_TIME_ABSOLUTE);
    codec::write_i64(out, ts_ms);
}

/// Append the narrowest relative time entry that can hold `delta_ms`.
pub fn encode_time_delta(out: &mut Vec<u8>, delta_ms: u32) {
    if delta_ms <= u8::MAX as u32 {
        codec::write_u8(out, ENTRY_TIME_DELTA8);
        codec::write_u8(out, delta_ms as u8);
    } else if delta_ms <= u16::MAX as u32 {
        codec::write_u8(out, ENTRY_TIME_DELTA16);
        codec::write_u16(out, delta_ms as u16);
    } else if delta_ms <= 0x00ff_ffff {
        codec::write_u8(out, ENTRY_TIME_DELTA24);
        codec::write_u24(out, delta_ms);
    } else {
        codec::write_u8(out, ENTRY_TIME_DELTA32);
        codec::write_u32(out, delta_ms);
    }
}

/// Append a value entry for `id`, using the `0xff` escape for 16-bit ids.
pub fn encode_value_entry(
    out: &mut Vec<u8>,
    id: u16,
    format: FormatId,
    val: &Value,
) -> Result<(), FormatError> {
    if id <= MAX_DENSE_CHANNEL_ID {
        codec::write_u8(out, id as u8);
    } else {
        debug_assert!(id >= FIRST_WIDE_CHANNEL_ID);
        codec::write_u8(out, ENTRY_VALUE_ESCAPE);
        codec::write_u16(out, id);
    }
    value::encode_payload(format, val, out)
}

/// Append the end-of-file marker.
pub fn encode_end_of_file(out: &mut Vec<u8>) {
    codec::write_u8(out, ENTRY_END_OF_FILE);
}
