//! Multi-file range scans.
//!
//! A query window maps to the day files whose UTC date intersects it. Each
//! file is decoded independently with its own channel table; channel names,
//! not ids, are the cross-file key, so results are simply concatenated in
//! ascending date order. Cancellation is checked at entry boundaries and a
//! cancelled scan yields no partial results.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;

use crate::dayfile::{DayFile, day_files_in_range, utc_day};
use crate::decoder::Decoder;
use crate::error::{QueryError, Result, TsdbError};
use crate::reader::{read_day_file, tail_policy_for};
use crate::record::Record;
use crate::value::Value;

/// An inclusive `[start_ms, end_ms]` query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl Window {
    pub fn new(start_ms: i64, end_ms: i64) -> Window {
        Window { start_ms, end_ms }
    }

    pub fn validate(&self) -> std::result::Result<(), QueryError> {
        if self.end_ms < self.start_ms {
            Err(QueryError::WindowInvalid {
                start_ms: self.start_ms,
                end_ms: self.end_ms,
            })
        } else {
            Ok(())
        }
    }

    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.start_ms && ts_ms <= self.end_ms
    }

    fn days(&self) -> Result<(NaiveDate, NaiveDate)> {
        let first = utc_day(self.start_ms).ok_or(TsdbError::InvalidTimestamp {
            ts_ms: self.start_ms,
        })?;
        let last = utc_day(self.end_ms).ok_or(TsdbError::InvalidTimestamp {
            ts_ms: self.end_ms,
        })?;
        Ok((first, last))
    }
}

/// Cooperative cancellation signal shared between a query and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn check(&self) -> std::result::Result<(), QueryError> {
        if self.is_cancelled() {
            Err(QueryError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Everything a window scan collected for one channel name.
#[derive(Debug, Clone)]
pub struct SeriesScan {
    pub points: Vec<(i64, Value)>,
    /// Maximum display hint across the format ids that contributed.
    pub decimal_places: u8,
    /// Names of the files the scan opened, ascending by date.
    pub files: Vec<String>,
}

fn file_names(files: &[DayFile]) -> Vec<String> {
    files
        .iter()
        .map(|f| {
            f.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| f.path.display().to_string())
        })
        .collect()
}

/// Stream every in-window sample of `name` across the day files of `dir`.
pub fn scan_series(
    dir: &Path,
    name: &str,
    window: Window,
    cancel: &CancelToken,
) -> Result<SeriesScan> {
    window.validate()?;
    let (first, last) = window.days()?;
    let files = day_files_in_range(dir, first, last)?;

    let mut points = Vec::new();
    let mut decimal_places = 0u8;

    for day in &files {
        cancel.check()?;
        let bytes = read_day_file(&day.path)?;
        let mut decoder = Decoder::new(&bytes, tail_policy_for(&day.path))
            .map_err(|e| TsdbError::format(&day.path, e))?;

        // Ids carrying this name in this file; filled as definitions arrive
        let mut ids = BTreeSet::new();
        loop {
            cancel.check()?;
            match decoder.next_record() {
                Ok(Some(Record::ChannelDefined {
                    id,
                    name: def_name,
                    format,
                })) => {
                    if def_name == name {
                        ids.insert(id);
                        decimal_places = decimal_places.max(format.decimal_places());
                    }
                }
                Ok(Some(Record::Value {
                    channel_id,
                    ts_ms,
                    value,
                })) => {
                    if ids.contains(&channel_id) && window.contains(ts_ms) {
                        points.push((ts_ms, value));
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => return Err(TsdbError::format(&day.path, e)),
            }
        }
    }

    Ok(SeriesScan {
        points,
        decimal_places,
        files: file_names(&files),
    })
}

/// Union of the channel names defined in any file intersecting the window.
pub fn scan_names(
    dir: &Path,
    window: Window,
    cancel: &CancelToken,
) -> Result<(BTreeSet<String>, Vec<String>)> {
    window.validate()?;
    let (first, last) = window.days()?;
    let files = day_files_in_range(dir, first, last)?;

    let mut names = BTreeSet::new();
    for day in &files {
        cancel.check()?;
        let bytes = read_day_file(&day.path)?;
        let mut decoder = Decoder::new(&bytes, tail_policy_for(&day.path))
            .map_err(|e| TsdbError::format(&day.path, e))?;
        loop {
            cancel.check()?;
            match decoder.next_record() {
                Ok(Some(Record::ChannelDefined { name, .. })) => {
                    names.insert(name);
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => return Err(TsdbError::format(&day.path, e)),
            }
        }
    }

    Ok((names, file_names(&files)))
}
