//! Stateful decoder for the day-file entry stream.
//!
//! The format couples timestamp state across entries: a value entry carries no
//! time of its own, it inherits the timestamp established by the most recent
//! time entry. The decoder is therefore a small state machine threaded through
//! `next_record`, not a context-free parser.

use crate::codec;
use crate::error::FormatError;
use crate::record::{
    ENTRY_DEFINE_CHANNEL, ENTRY_DEFINE_CHANNEL_WIDE, ENTRY_END_OF_FILE, ENTRY_TIME_ABSOLUTE,
    ENTRY_TIME_DELTA32, ENTRY_TIME_DELTA8, ENTRY_VALUE_ESCAPE, FILE_MAGIC, FORMAT_VERSION,
    HEADER_LEN, Record,
};
use crate::registry::{ChannelRegistry, FIRST_WIDE_CHANNEL_ID, MAX_DENSE_CHANNEL_ID};
use crate::value::{self, FormatId};

/// How far from the end of an unfinalized file a format error is still
/// attributed to a crashed append and treated as end-of-stream.
pub const TAIL_TOLERANCE: usize = 64 * 1024;

/// How the decoder treats a byte stream that stops mid-entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailPolicy {
    /// The file may still be written: errors in the trailing 64 KiB end the
    /// stream cleanly at the last complete entry.
    Tolerant,
    /// The file is finalized by construction (gz archives): any incomplete
    /// entry is `Truncated`.
    Strict,
}

/// Walks the entry stream after the header and produces decoded records.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    policy: TailPolicy,
    current_ts: Option<i64>,
    registry: ChannelRegistry,
    finalized: bool,
    ended: bool,
}

impl<'a> Decoder<'a> {
    /// Validate the file header and position the decoder on the first entry.
    ///
    /// A file shorter than the header is an empty stream under
    /// [`TailPolicy::Tolerant`] (a writer crashed before the header was
    /// complete); a present-but-wrong header is fatal under either policy.
    pub fn new(buf: &'a [u8], policy: TailPolicy) -> Result<Self, FormatError> {
        if buf.len() < HEADER_LEN {
            return match policy {
                TailPolicy::Tolerant => Ok(Decoder {
                    buf,
                    pos: 0,
                    policy,
                    current_ts: None,
                    registry: ChannelRegistry::new(),
                    finalized: false,
                    ended: true,
                }),
                TailPolicy::Strict => Err(FormatError::Truncated {
                    offset: buf.len() as u64,
                }),
            };
        }

        if buf[..8] != FILE_MAGIC {
            let mut got = [0u8; 8];
            got.copy_from_slice(&buf[..8]);
            return Err(FormatError::BadMagic { got });
        }
        let version = codec::read_u32(buf, 8)?;
        if version != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion { got: version });
        }

        Ok(Decoder {
            buf,
            pos: HEADER_LEN,
            policy,
            current_ts: None,
            registry: ChannelRegistry::new(),
            finalized: false,
            ended: false,
        })
    }

    /// Decode the next record, or `None` at the end of the stream.
    pub fn next_record(&mut self) -> Result<Option<Record>, FormatError> {
        if self.ended {
            return Ok(None);
        }
        if self.pos == self.buf.len() {
            self.ended = true;
            return Ok(None);
        }

        let entry_start = self.pos;
        match self.step() {
            Ok(record) => Ok(Some(record)),
            // Truncated is never masked: it marks bytes after a finalize
            // marker, which tolerating would let a writer truncate away.
            Err(FormatError::Truncated { offset }) => Err(FormatError::Truncated { offset }),
            Err(FormatError::ShortRead { .. }) if self.policy == TailPolicy::Strict => {
                Err(FormatError::Truncated {
                    offset: entry_start as u64,
                })
            }
            Err(e) => {
                if self.policy == TailPolicy::Tolerant
                    && entry_start + TAIL_TOLERANCE >= self.buf.len()
                {
                    self.pos = entry_start;
                    self.ended = true;
                    Ok(None)
                } else {
                    Err(e)
                }
            }
        }
    }

    fn step(&mut self) -> Result<Record, FormatError> {
        let entry_start = self.pos;
        let type_byte = codec::read_u8(self.buf, self.pos)?;
        self.pos += 1;

        match type_byte {
            0x00..=0xef => self.read_value(entry_start, type_byte as u16),
            ENTRY_VALUE_ESCAPE => {
                let id = codec::read_u16(self.buf, self.pos)?;
                self.pos += 2;
                if id < FIRST_WIDE_CHANNEL_ID {
                    return Err(FormatError::InvalidChannelIdRange {
                        entry: type_byte,
                        id,
                    });
                }
                self.read_value(entry_start, id)
            }
            ENTRY_TIME_ABSOLUTE => {
                let ts_ms = codec::read_i64(self.buf, self.pos)?;
                self.pos += 8;
                self.current_ts = Some(ts_ms);
                Ok(Record::Timestamp { ts_ms })
            }
            ENTRY_TIME_DELTA8..=ENTRY_TIME_DELTA32 => {
                let width = (type_byte - ENTRY_TIME_DELTA8) as usize + 1;
                let delta = match width {
                    1 => codec::read_u8(self.buf, self.pos)? as i64,
                    2 => codec::read_u16(self.buf, self.pos)? as i64,
                    3 => codec::read_u24(self.buf, self.pos)? as i64,
                    _ => codec::read_u32(self.buf, self.pos)? as i64,
                };
                self.pos += width;
                let base = self.current_ts.ok_or(FormatError::MissingTimestamp {
                    offset: entry_start as u64,
                })?;
                let ts_ms = base.saturating_add(delta);
                self.current_ts = Some(ts_ms);
                Ok(Record::Timestamp { ts_ms })
            }
            ENTRY_DEFINE_CHANNEL => {
                let id = codec::read_u8(self.buf, self.pos)? as u16;
                self.pos += 1;
                if id > MAX_DENSE_CHANNEL_ID {
                    return Err(FormatError::InvalidChannelIdRange {
                        entry: type_byte,
                        id,
                    });
                }
                self.read_definition(id)
            }
            ENTRY_DEFINE_CHANNEL_WIDE => {
                let id = codec::read_u16(self.buf, self.pos)?;
                self.pos += 2;
                if id < FIRST_WIDE_CHANNEL_ID {
                    return Err(FormatError::InvalidChannelIdRange {
                        entry: type_byte,
                        id,
                    });
                }
                self.read_definition(id)
            }
            ENTRY_END_OF_FILE => {
                if self.pos != self.buf.len() {
                    return Err(FormatError::Truncated {
                        offset: self.pos as u64,
                    });
                }
                self.finalized = true;
                self.ended = true;
                Ok(Record::EndOfFile)
            }
            _ => Err(FormatError::UnknownEntryType {
                offset: entry_start as u64,
                type_byte,
            }),
        }
    }

    fn read_value(&mut self, entry_start: usize, id: u16) -> Result<Record, FormatError> {
        let ts_ms = self.current_ts.ok_or(FormatError::MissingTimestamp {
            offset: entry_start as u64,
        })?;
        let format = self
            .registry
            .lookup(id)
            .map(|def| def.format)
            .ok_or(FormatError::UnknownChannel { id })?;
        let (value, consumed) = value::decode_payload(format, self.buf, self.pos)?;
        self.pos += consumed;
        Ok(Record::Value {
            channel_id: id,
            ts_ms,
            value,
        })
    }

    fn read_definition(&mut self, id: u16) -> Result<Record, FormatError> {
        let format = FormatId(codec::read_u8(self.buf, self.pos)?).validate()?;
        self.pos += 1;
        let name_len = codec::read_u8(self.buf, self.pos)? as usize;
        self.pos += 1;
        let name_bytes =
            self.buf
                .get(self.pos..self.pos + name_len)
                .ok_or_else(|| FormatError::ShortRead {
                    offset: self.pos as u64,
                    needed: name_len - self.buf.len().saturating_sub(self.pos),
                })?;
        self.pos += name_len;
        let name = String::from_utf8_lossy(name_bytes).into_owned();
        self.registry.define(id, format, &name)?;
        Ok(Record::ChannelDefined { id, name, format })
    }

    /// Byte offset of the next entry to decode.
    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    /// Length of the clean prefix: header plus every complete entry decoded
    /// so far. After a tolerant end-of-stream this is the truncation point a
    /// writer resumes from.
    pub fn clean_len(&self) -> u64 {
        self.pos as u64
    }

    /// True once the end-of-file marker has been decoded.
    pub fn finalized(&self) -> bool {
        self.finalized
    }

    pub fn current_timestamp(&self) -> Option<i64> {
        self.current_ts
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn into_registry(self) -> ChannelRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::value::Value;

    fn drain(decoder: &mut Decoder) -> Vec<Record> {
        let mut records = Vec::new();
        while let Some(rec) = decoder.next_record().unwrap() {
            records.push(rec);
        }
        records
    }

    /// Single channel, one absolute time entry, one fixed-point value.
    fn sample_file() -> Vec<u8> {
        let mut buf = Vec::new();
        record::encode_header(&mut buf);
        record::encode_channel_definition(&mut buf, 0, FormatId(0x22), "temp").unwrap();
        record::encode_time_absolute(&mut buf, 1_700_000_000_000);
        record::encode_value_entry(&mut buf, 0, FormatId(0x22), &Value::Integer(2345)).unwrap();
        buf
    }

    #[test]
    fn test_single_channel_round_trip() {
        let buf = sample_file();
        // Byte-exact: header, definition, absolute time, value
        assert_eq!(
            buf,
            [
                0x54, 0x53, 0x44, 0x42, 0x00, 0x00, 0x00, 0x00, // magic
                0x01, 0x00, 0x00, 0x00, // version
                0xf5, 0x00, 0x22, 0x04, 0x74, 0x65, 0x6d, 0x70, // define "temp"
                0xf0, 0x00, 0x68, 0xe5, 0xcf, 0x8b, 0x01, 0x00, 0x00, // time
                0x00, 0x29, 0x09, // value 2345
            ]
        );

        let mut decoder = Decoder::new(&buf, TailPolicy::Tolerant).unwrap();
        let records = drain(&mut decoder);
        assert_eq!(
            records,
            vec![
                Record::ChannelDefined {
                    id: 0,
                    name: "temp".into(),
                    format: FormatId(0x22),
                },
                Record::Timestamp {
                    ts_ms: 1_700_000_000_000
                },
                Record::Value {
                    channel_id: 0,
                    ts_ms: 1_700_000_000_000,
                    value: Value::Double(23.45),
                },
            ]
        );
        assert!(!decoder.finalized());
        assert_eq!(decoder.clean_len(), buf.len() as u64);
    }

    #[test]
    fn test_relative_time_entries_accumulate() {
        let mut buf = sample_file();
        record::encode_time_delta(&mut buf, 5);
        record::encode_value_entry(&mut buf, 0, FormatId(0x22), &Value::Integer(2350)).unwrap();
        // The appended bytes are the narrow delta form
        assert_eq!(&buf[buf.len() - 5..], [0xf1, 0x05, 0x00, 0x2e, 0x09]);

        let mut decoder = Decoder::new(&buf, TailPolicy::Tolerant).unwrap();
        let records = drain(&mut decoder);
        assert_eq!(
            records.last(),
            Some(&Record::Value {
                channel_id: 0,
                ts_ms: 1_700_000_000_005,
                value: Value::Double(23.50),
            })
        );
    }

    #[test]
    fn test_value_before_any_time_entry() {
        let mut buf = Vec::new();
        record::encode_header(&mut buf);
        record::encode_channel_definition(&mut buf, 0, FormatId(0x10), "n").unwrap();
        let value_offset = buf.len() as u64;
        buf.push(0x00);
        buf.push(0x01);
        // Pad the file past the tolerance window so the error is fatal
        buf.extend(std::iter::repeat_n(0xf1u8, TAIL_TOLERANCE + 8).flat_map(|t| [t, 0x00]));

        let mut decoder = Decoder::new(&buf, TailPolicy::Tolerant).unwrap();
        decoder.next_record().unwrap();
        match decoder.next_record() {
            Err(FormatError::MissingTimestamp { offset }) => assert_eq!(offset, value_offset),
            other => panic!("expected MissingTimestamp, got {:?}", other),
        }
    }

    #[test]
    fn test_delta_before_any_time_entry_is_an_error() {
        let mut strict_buf = Vec::new();
        record::encode_header(&mut strict_buf);
        strict_buf.extend_from_slice(&[0xf1, 0x05]);
        let mut decoder = Decoder::new(&strict_buf, TailPolicy::Strict).unwrap();
        assert!(matches!(
            decoder.next_record(),
            Err(FormatError::MissingTimestamp { .. })
        ));
    }

    #[test]
    fn test_wide_channel_value_via_escape() {
        let mut buf = Vec::new();
        record::encode_header(&mut buf);
        record::encode_channel_definition(&mut buf, 0x00f0, FormatId(0x10), "wide").unwrap();
        record::encode_time_absolute(&mut buf, 1000);
        record::encode_value_entry(&mut buf, 0x00f0, FormatId(0x10), &Value::Integer(7)).unwrap();

        let mut decoder = Decoder::new(&buf, TailPolicy::Tolerant).unwrap();
        let records = drain(&mut decoder);
        assert_eq!(
            records.last(),
            Some(&Record::Value {
                channel_id: 0x00f0,
                ts_ms: 1000,
                value: Value::Integer(7),
            })
        );
    }

    #[test]
    fn test_escape_with_narrow_id_is_rejected() {
        let mut buf = Vec::new();
        record::encode_header(&mut buf);
        record::encode_time_absolute(&mut buf, 1000);
        buf.extend_from_slice(&[0xff, 0x05, 0x00, 0x01]);
        let mut decoder = Decoder::new(&buf, TailPolicy::Strict).unwrap();
        decoder.next_record().unwrap();
        assert!(matches!(
            decoder.next_record(),
            Err(FormatError::InvalidChannelIdRange { entry: 0xff, id: 5 })
        ));
    }

    #[test]
    fn test_narrow_definition_with_wide_id_is_rejected() {
        let mut buf = Vec::new();
        record::encode_header(&mut buf);
        buf.extend_from_slice(&[0xf5, 0xf0, 0x10, 0x01, b'x']);
        let mut decoder = Decoder::new(&buf, TailPolicy::Strict).unwrap();
        assert!(matches!(
            decoder.next_record(),
            Err(FormatError::InvalidChannelIdRange {
                entry: 0xf5,
                id: 0xf0
            })
        ));
    }

    #[test]
    fn test_unknown_entry_type() {
        let mut buf = Vec::new();
        record::encode_header(&mut buf);
        buf.push(0xf7);
        let mut decoder = Decoder::new(&buf, TailPolicy::Strict).unwrap();
        match decoder.next_record() {
            Err(FormatError::UnknownEntryType { offset, type_byte }) => {
                assert_eq!(offset, HEADER_LEN as u64);
                assert_eq!(type_byte, 0xf7);
            }
            other => panic!("expected UnknownEntryType, got {:?}", other),
        }
    }

    #[test]
    fn test_finalized_file_ends_with_marker() {
        let mut buf = sample_file();
        record::encode_end_of_file(&mut buf);
        let mut decoder = Decoder::new(&buf, TailPolicy::Tolerant).unwrap();
        let records = drain(&mut decoder);
        assert_eq!(records.last(), Some(&Record::EndOfFile));
        assert!(decoder.finalized());
        assert_eq!(decoder.next_record().unwrap(), None);
    }

    #[test]
    fn test_bytes_after_end_of_file_marker() {
        let mut buf = sample_file();
        record::encode_end_of_file(&mut buf);
        buf.push(0x00);
        let mut decoder = Decoder::new(&buf, TailPolicy::Tolerant).unwrap();
        for _ in 0..3 {
            decoder.next_record().unwrap();
        }
        assert!(matches!(
            decoder.next_record(),
            Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn test_tolerant_stop_at_last_complete_entry() {
        let full = {
            let mut buf = sample_file();
            record::encode_time_delta(&mut buf, 5);
            record::encode_value_entry(&mut buf, 0, FormatId(0x22), &Value::Integer(2350))
                .unwrap();
            buf
        };
        let complete_len = sample_file().len();

        // Cut anywhere inside the trailing time+value entries: the decoder
        // yields the complete prefix and stops cleanly.
        for cut in complete_len + 1..full.len() {
            let mut decoder = Decoder::new(&full[..cut], TailPolicy::Tolerant).unwrap();
            let mut last_complete = HEADER_LEN as u64;
            let mut count = 0;
            while let Some(_) = decoder.next_record().unwrap() {
                count += 1;
                last_complete = decoder.position();
            }
            assert!(count >= 3, "cut at {cut}");
            assert_eq!(decoder.clean_len(), last_complete);
            assert!(decoder.clean_len() <= cut as u64);
        }
    }

    #[test]
    fn test_strict_truncation_is_fatal() {
        let buf = sample_file();
        let cut = &buf[..buf.len() - 1];
        let mut decoder = Decoder::new(cut, TailPolicy::Strict).unwrap();
        decoder.next_record().unwrap();
        decoder.next_record().unwrap();
        assert!(matches!(
            decoder.next_record(),
            Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn test_header_errors() {
        let mut buf = sample_file();
        buf[0] = b'X';
        assert!(matches!(
            Decoder::new(&buf, TailPolicy::Tolerant),
            Err(FormatError::BadMagic { .. })
        ));

        let mut buf = sample_file();
        buf[8] = 2;
        assert!(matches!(
            Decoder::new(&buf, TailPolicy::Tolerant),
            Err(FormatError::UnsupportedVersion { got: 2 })
        ));
    }

    #[test]
    fn test_incomplete_header_tolerant_is_empty_stream() {
        let buf = &FILE_MAGIC[..6];
        let mut decoder = Decoder::new(buf, TailPolicy::Tolerant).unwrap();
        assert_eq!(decoder.next_record().unwrap(), None);
        assert_eq!(decoder.clean_len(), 0);
    }

    #[test]
    fn test_duplicate_definition_is_fatal_outside_tail() {
        let mut buf = Vec::new();
        record::encode_header(&mut buf);
        record::encode_channel_definition(&mut buf, 0, FormatId(0x10), "a").unwrap();
        record::encode_channel_definition(&mut buf, 0, FormatId(0x10), "a").unwrap();
        record::encode_time_absolute(&mut buf, 0);
        // Pad past the tolerance window with harmless delta entries
        for _ in 0..(TAIL_TOLERANCE / 2) {
            record::encode_time_delta(&mut buf, 0);
        }
        let mut decoder = Decoder::new(&buf, TailPolicy::Tolerant).unwrap();
        decoder.next_record().unwrap();
        assert!(matches!(
            decoder.next_record(),
            Err(FormatError::DuplicateChannel { id: 0 })
        ));
    }
}
