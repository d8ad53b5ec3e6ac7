//! Opening and scanning single day files.
//!
//! Plain `.tsdb` files and gzip-compressed `.tsdb.gz` archives are handled
//! transparently; archives are fully decompressed into memory, which keeps
//! the decoder a simple slice walker. Plain files are decoded tolerantly
//! (the writer may still be extending them), archives strictly.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use serde::Serialize;

use crate::decoder::{Decoder, TailPolicy};
use crate::error::{Result, TsdbError};
use crate::lock;
use crate::record::Record;
use crate::value::FormatId;

/// True when the path names a gzip-compressed archive.
pub fn is_archive(path: &Path) -> bool {
    path.to_str().map(|s| s.ends_with(".gz")).unwrap_or(false)
}

/// Archives are finalized by construction and decoded strictly; a plain file
/// may carry a crashed append in its tail.
pub fn tail_policy_for(path: &Path) -> TailPolicy {
    if is_archive(path) {
        TailPolicy::Strict
    } else {
        TailPolicy::Tolerant
    }
}

/// Read a day file fully into memory under a shared advisory lock.
pub fn read_day_file(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    lock::lock_shared(&file)?;
    let mut buf = Vec::new();
    if is_archive(path) {
        GzDecoder::new(file).read_to_end(&mut buf)?;
    } else {
        file.read_to_end(&mut buf)?;
    }
    Ok(buf)
}

/// One channel known to a scanned file.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct ChannelSummary {
    pub id: u16,
    pub name: String,
    pub format: FormatId,
    pub decimal_places: u8,
}

/// Full decoded contents of one day file.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct FileScan {
    pub path: String,
    pub finalized: bool,
    /// Header plus every complete entry; anything beyond is a crashed tail.
    pub clean_len: u64,
    pub file_len: u64,
    pub channels: Vec<ChannelSummary>,
    pub records: Vec<Record>,
}

/// Decode a whole day file into records plus its channel table.
pub fn scan_day_file(path: &Path) -> Result<FileScan> {
    let bytes = read_day_file(path)?;
    let mut decoder = Decoder::new(&bytes, tail_policy_for(path))
        .map_err(|e| TsdbError::format(path, e))?;

    let mut records = Vec::new();
    loop {
        match decoder.next_record() {
            Ok(Some(rec)) => records.push(rec),
            Ok(None) => break,
            Err(e) => return Err(TsdbError::format(path, e)),
        }
    }

    let channels = decoder
        .registry()
        .iter()
        .map(|(id, def)| ChannelSummary {
            id,
            name: def.name.clone(),
            format: def.format,
            decimal_places: def.format.decimal_places(),
        })
        .collect();

    Ok(FileScan {
        path: path.display().to_string(),
        finalized: decoder.finalized(),
        clean_len: decoder.clean_len(),
        file_len: bytes.len() as u64,
        channels,
        records,
    })
}
