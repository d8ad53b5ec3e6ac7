use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while encoding or decoding the day-file byte format.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("bad magic at start of file: expected \"TSDB\", got {got:02x?}")]
    BadMagic { got: [u8; 8] },

    #[error("unsupported format version {got} (this build reads version 1)")]
    UnsupportedVersion { got: u32 },

    #[error("unknown entry type 0x{type_byte:02X} at offset 0x{offset:X}")]
    UnknownEntryType { offset: u64, type_byte: u8 },

    #[error("unknown value format 0x{format:02X}")]
    UnknownFormat { format: u8 },

    #[error("value entry references undefined channel id {id}")]
    UnknownChannel { id: u16 },

    #[error("duplicate definition for channel id {id}")]
    DuplicateChannel { id: u16 },

    #[error("non-dense channel id allocation: expected id {expected}, got {got}")]
    DenseAllocation { expected: u16, got: u16 },

    #[error("channel id {id} is outside the legal range for entry type 0x{entry:02X}")]
    InvalidChannelIdRange { entry: u8, id: u16 },

    #[error("value entry at offset 0x{offset:X} before any time entry")]
    MissingTimestamp { offset: u64 },

    #[error("short read at offset 0x{offset:X}: needed {needed} more bytes")]
    ShortRead { offset: u64, needed: usize },

    #[error("finalized file has trailing or missing bytes at offset 0x{offset:X}")]
    Truncated { offset: u64 },

    #[error("string length {len} at offset 0x{offset:X} exceeds the available bytes")]
    StringTooLong { offset: u64, len: u64 },

    #[error("value {value} does not fit on-disk format 0x{format:02X}")]
    ValueOutOfRange { format: u8, value: i64 },

    #[error("value variant does not match the domain of format 0x{format:02X}")]
    TypeMismatch { format: u8 },

    #[error("channel name is {len} bytes long, the definition entry allows at most 255")]
    NameTooLong { len: usize },

    #[error("all 65536 channel ids in this file are taken")]
    ChannelSpaceExhausted,

    #[error("file is finalized, no further appends are permitted")]
    FileFinalized,
}

/// Errors raised by the query facade.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("invalid query window: end {end_ms} is before start {start_ms}")]
    WindowInvalid { start_ms: i64, end_ms: i64 },

    #[error("query cancelled")]
    Cancelled,
}

/// Top-level error type: I/O, format (tagged with the offending file) or query.
#[derive(Error, Debug)]
pub enum TsdbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("timestamp {ts_ms}ms is outside the representable date range")]
    InvalidTimestamp { ts_ms: i64 },
}

impl TsdbError {
    /// Tag a format error with the path of the file it was found in.
    pub fn format(path: impl Into<PathBuf>, source: FormatError) -> Self {
        TsdbError::Format {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, TsdbError>;
