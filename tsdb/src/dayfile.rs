//! Day-file naming and discovery.
//!
//! Every UTC calendar day maps to one `data_YYYY-MM-DD.tsdb` file; finalized
//! days may instead be present as a `data_YYYY-MM-DD.tsdb.gz` archive. When
//! both exist for a date the plain file wins (it is the one a writer could
//! still be extending).

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveTime};

use crate::error::{Result, TsdbError};

pub const FILE_PREFIX: &str = "data_";
pub const FILE_EXT: &str = ".tsdb";
pub const FILE_EXT_GZ: &str = ".tsdb.gz";

/// A discovered day file.
#[derive(Debug, Clone)]
pub struct DayFile {
    pub path: PathBuf,
    pub date: NaiveDate,
    pub compressed: bool,
}

/// UTC calendar day containing `ts_ms`, or `None` outside chrono's range.
pub fn utc_day(ts_ms: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(ts_ms).map(|dt| dt.date_naive())
}

/// Milliseconds since the epoch at `00:00:00.000Z` of `date`.
pub fn day_start_ms(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

pub fn day_file_name(date: NaiveDate) -> String {
    format!("{FILE_PREFIX}{}{FILE_EXT}", date.format("%Y-%m-%d"))
}

/// Parse `data_YYYY-MM-DD.tsdb[.gz]`, returning the date and whether the
/// name denotes a gzip archive. Anything else returns `None`.
pub fn parse_day_file_name(name: &str) -> Option<(NaiveDate, bool)> {
    let rest = name.strip_prefix(FILE_PREFIX)?;
    let (date_part, compressed) = if let Some(d) = rest.strip_suffix(FILE_EXT_GZ) {
        (d, true)
    } else if let Some(d) = rest.strip_suffix(FILE_EXT) {
        (d, false)
    } else {
        return None;
    };
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    Some((date, compressed))
}

/// Discover the day files of `dir` whose date falls in `first..=last`,
/// ascending by date, plain files shadowing archives of the same date.
pub fn day_files_in_range(dir: &Path, first: NaiveDate, last: NaiveDate) -> Result<Vec<DayFile>> {
    let mut found: Vec<DayFile> = Vec::new();
    for entry in fs::read_dir(dir).map_err(TsdbError::Io)? {
        let entry = entry.map_err(TsdbError::Io)?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some((date, compressed)) = parse_day_file_name(name) else {
            continue;
        };
        if date < first || date > last {
            continue;
        }
        match found.iter_mut().find(|f| f.date == date) {
            Some(existing) => {
                if existing.compressed && !compressed {
                    existing.path = entry.path();
                    existing.compressed = false;
                }
            }
            None => found.push(DayFile {
                path: entry.path(),
                date,
                compressed,
            }),
        }
    }
    found.sort_by_key(|f| f.date);
    Ok(found)
}
