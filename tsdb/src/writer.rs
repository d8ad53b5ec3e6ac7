//! Append side: owns the current day file and emits entries with the
//! smallest legal encoding.
//!
//! The writer rebuilds its channel table and timestamp state by scanning the
//! file on open; nothing is cached across opens. Each append is a single
//! `write_all` of the definition/time/value entries it needs, so a crash can
//! lose at most the entry being written, and the tolerant decoder plus the
//! truncate-on-open rule recover the file to its last complete entry.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::dayfile::{day_file_name, utc_day};
use crate::decoder::{Decoder, TailPolicy};
use crate::error::{FormatError, Result, TsdbError};
use crate::lock;
use crate::record::{self, HEADER_LEN, Record};
use crate::registry::ChannelRegistry;
use crate::value::{FormatId, Value};

/// Appends samples to the day files of one data directory.
///
/// One writer owns a directory; the current day file is held under an
/// exclusive advisory lock between appends. Readers are unaffected (they
/// lock shared and rely on the append-only byte contract).
pub struct DayWriter {
    dir: PathBuf,
    open: Option<OpenDay>,
}

struct OpenDay {
    date: NaiveDate,
    path: PathBuf,
    file: File,
    /// Length of the clean entry prefix; the next append goes here.
    len: u64,
    registry: ChannelRegistry,
    last_ts: Option<i64>,
    /// True when at least one value entry was written at `last_ts`, which
    /// lets an append at the same timestamp skip its time entry.
    value_written_at_ts: bool,
    finalized: bool,
}

impl DayWriter {
    pub fn new(dir: impl Into<PathBuf>) -> DayWriter {
        DayWriter {
            dir: dir.into(),
            open: None,
        }
    }

    /// Persist one sample, creating or reopening the UTC day file that
    /// `ts_ms` belongs to. Rolling forward to a new day finalizes the file
    /// being left; a late sample for an older, still-unfinalized day reopens
    /// that file instead.
    pub fn append(
        &mut self,
        name: &str,
        format: FormatId,
        ts_ms: i64,
        value: &Value,
    ) -> Result<()> {
        let date = utc_day(ts_ms).ok_or(TsdbError::InvalidTimestamp { ts_ms })?;

        if let Some(day) = self.open.take() {
            if day.date == date {
                self.open = Some(day);
            } else {
                let forward = date > day.date;
                if forward {
                    log::info!("utc day rolled over, finalizing {}", day.path.display());
                }
                Self::close_day(day, forward)?;
            }
        }

        let mut day = match self.open.take() {
            Some(day) => day,
            None => Self::open_day(&self.dir, date)?,
        };

        match Self::append_to(&mut day, name, format, ts_ms, value) {
            Ok(()) => {
                self.open = Some(day);
                Ok(())
            }
            // Cached registry and timestamp state may no longer match the
            // file; drop it so the next append re-opens and re-scans.
            Err(e) => Err(e),
        }
    }

    /// Append the end-of-file marker to the open day and close it. One-way:
    /// later appends for that day fail with `FileFinalized`.
    pub fn finalize_current(&mut self) -> Result<()> {
        match self.open.take() {
            Some(day) => Self::close_day(day, true),
            None => Ok(()),
        }
    }

    /// Flush and close without finalizing; the day file can be reopened and
    /// extended later.
    pub fn close(mut self) -> Result<()> {
        match self.open.take() {
            Some(day) => Self::close_day(day, false),
            None => Ok(()),
        }
    }

    /// Path of the currently open day file, if any.
    pub fn current_path(&self) -> Option<&Path> {
        self.open.as_ref().map(|day| day.path.as_path())
    }

    fn open_day(dir: &Path, date: NaiveDate) -> Result<OpenDay> {
        fs::create_dir_all(dir)?;
        let path = dir.join(day_file_name(date));
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        lock::lock_exclusive(&file)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut decoder = Decoder::new(&bytes, TailPolicy::Tolerant)
            .map_err(|e| TsdbError::format(&path, e))?;
        let mut value_written_at_ts = false;
        loop {
            match decoder.next_record() {
                Ok(Some(rec)) => value_written_at_ts = matches!(rec, Record::Value { .. }),
                Ok(None) => break,
                Err(e) => return Err(TsdbError::format(&path, e)),
            }
        }

        let finalized = decoder.finalized();
        let last_ts = decoder.current_timestamp();
        let clean_len = decoder.clean_len();
        let registry = decoder.into_registry();

        let len = if clean_len < HEADER_LEN as u64 {
            // Fresh file, or a writer died before the header was complete
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            let mut header = Vec::with_capacity(HEADER_LEN);
            record::encode_header(&mut header);
            file.write_all(&header)?;
            HEADER_LEN as u64
        } else {
            if clean_len < bytes.len() as u64 {
                log::warn!(
                    "{}: dropping {} trailing bytes from a crashed append",
                    path.display(),
                    bytes.len() as u64 - clean_len
                );
                file.set_len(clean_len)?;
            }
            clean_len
        };

        Ok(OpenDay {
            date,
            path,
            file,
            len,
            registry,
            last_ts,
            value_written_at_ts,
            finalized,
        })
    }

    fn append_to(
        day: &mut OpenDay,
        name: &str,
        format: FormatId,
        ts_ms: i64,
        value: &Value,
    ) -> Result<()> {
        if day.finalized {
            return Err(TsdbError::format(&day.path, FormatError::FileFinalized));
        }
        let format = format
            .validate()
            .map_err(|e| TsdbError::format(&day.path, e))?;

        let mut buf = Vec::new();

        let allocated = day
            .registry
            .allocate(name, format)
            .map_err(|e| TsdbError::format(&day.path, e))?;
        if allocated.newly_defined {
            record::encode_channel_definition(&mut buf, allocated.id, format, name)
                .map_err(|e| TsdbError::format(&day.path, e))?;
        }

        match day.last_ts {
            None => record::encode_time_absolute(&mut buf, ts_ms),
            Some(last) if ts_ms < last => {
                log::warn!(
                    "{}: non-monotone append ({}ms after {}ms), emitting absolute time",
                    day.path.display(),
                    ts_ms,
                    last
                );
                record::encode_time_absolute(&mut buf, ts_ms);
            }
            Some(last) => {
                let delta = ts_ms as i128 - last as i128;
                if delta == 0 && day.value_written_at_ts {
                    // Value entries inherit the current timestamp
                } else if delta > u32::MAX as i128 {
                    record::encode_time_absolute(&mut buf, ts_ms);
                } else {
                    record::encode_time_delta(&mut buf, delta as u32);
                }
            }
        }

        record::encode_value_entry(&mut buf, allocated.id, format, value)
            .map_err(|e| TsdbError::format(&day.path, e))?;

        day.file.seek(SeekFrom::Start(day.len))?;
        day.file.write_all(&buf)?;
        day.len += buf.len() as u64;
        day.last_ts = Some(ts_ms);
        day.value_written_at_ts = true;
        Ok(())
    }

    fn close_day(mut day: OpenDay, finalize: bool) -> Result<()> {
        if finalize && !day.finalized {
            let mut buf = Vec::new();
            record::encode_end_of_file(&mut buf);
            day.file.seek(SeekFrom::Start(day.len))?;
            day.file.write_all(&buf)?;
        }
        day.file.sync_all()?;
        Ok(())
    }
}

impl Drop for DayWriter {
    fn drop(&mut self) {
        if let Some(day) = self.open.take() {
            if let Err(e) = day.file.sync_all() {
                log::warn!("{}: sync on drop failed: {}", day.path.display(), e);
            }
        }
    }
}

/// Finalize a day file in place: truncate any crashed tail and append the
/// end-of-file marker. Returns `false` when the file already carries it.
pub fn finalize_file(path: &Path) -> Result<bool> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    lock::lock_exclusive(&file)?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let mut decoder =
        Decoder::new(&bytes, TailPolicy::Tolerant).map_err(|e| TsdbError::format(path, e))?;
    while decoder
        .next_record()
        .map_err(|e| TsdbError::format(path, e))?
        .is_some()
    {}
    if decoder.finalized() {
        return Ok(false);
    }

    let clean_len = decoder.clean_len();
    let mut buf = Vec::new();
    if clean_len < HEADER_LEN as u64 {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        record::encode_header(&mut buf);
    } else {
        if clean_len < bytes.len() as u64 {
            file.set_len(clean_len)?;
        }
        file.seek(SeekFrom::Start(clean_len))?;
    }
    record::encode_end_of_file(&mut buf);
    file.write_all(&buf)?;
    file.sync_all()?;
    Ok(true)
}
