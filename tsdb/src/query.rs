//! Query facade consumed by the external API layer.
//!
//! Three operations over a data directory: list the channel names visible in
//! a window, stream a channel's samples (downsampling once they exceed the
//! caller's point budget) and compute window aggregates. Responses carry the
//! names of the day files that contributed, and serialize in the camelCase
//! shape the web collaborator expects; the transport itself lives elsewhere.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::Result;
pub use crate::range::{CancelToken, Window};
use crate::range::{scan_names, scan_series};
use crate::value::Value;
use crate::writer::DayWriter;

/// How recent a sample must be (relative to "now") to count as the current
/// value of a channel.
pub const CURRENT_VALUE_WINDOW_MS: i64 = 60_000;

/// Channel names and contributing files for a window.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct SeriesList {
    pub series: Vec<String>,
    pub files: Vec<String>,
}

/// One returned event: either a raw sample or an aggregated time bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
#[serde(untagged)]
pub enum EventPoint {
    Raw {
        timestamp: i64,
        value: Value,
    },
    Bucket {
        timestamp: i64,
        avg: f64,
        min: f64,
        max: f64,
    },
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct Events {
    pub points: Vec<EventPoint>,
    pub downsampled: bool,
    pub decimal_places: u8,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub count: u64,
    /// Last sample of the window, absent unless it is within
    /// [`CURRENT_VALUE_WINDOW_MS`] of now.
    pub current_value: Option<Value>,
    /// Absent for string channels.
    pub max_value: Option<f64>,
    pub decimal_places: u8,
    pub files: Vec<String>,
}

/// Read-side handle over a data directory.
pub struct Database {
    dir: PathBuf,
}

impl Database {
    pub fn open(dir: impl Into<PathBuf>) -> Database {
        Database { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The single writer for this directory. Callers must not create two.
    pub fn writer(&self) -> DayWriter {
        DayWriter::new(&self.dir)
    }

    /// Union of channel names defined in any file intersecting the window.
    pub fn list_series(&self, window: Window, cancel: &CancelToken) -> Result<SeriesList> {
        let (names, files) = scan_names(&self.dir, window, cancel)?;
        Ok(SeriesList {
            series: names.into_iter().collect(),
            files,
        })
    }

    /// Samples of `name` in the window, in file/stream order. When the raw
    /// count exceeds `max_events` (0 means unlimited), numeric channels are
    /// aggregated into uniform min/avg/max buckets and string channels are
    /// thinned, with the `downsampled` flag set.
    pub fn get_events(
        &self,
        name: &str,
        window: Window,
        max_events: usize,
        cancel: &CancelToken,
    ) -> Result<Events> {
        let scan = scan_series(&self.dir, name, window, cancel)?;

        let over_budget = max_events != 0 && scan.points.len() > max_events;
        let (points, downsampled) = if !over_budget {
            let raw = scan
                .points
                .into_iter()
                .map(|(timestamp, value)| EventPoint::Raw { timestamp, value })
                .collect();
            (raw, false)
        } else if scan.points.iter().all(|(_, v)| v.as_f64().is_some()) {
            (bucket_points(&scan.points, window, max_events), true)
        } else {
            (thin_points(scan.points, max_events), true)
        };

        Ok(Events {
            points,
            downsampled,
            decimal_places: scan.decimal_places,
            files: scan.files,
        })
    }

    /// Window aggregates for `name`, with "now" taken from the system clock.
    pub fn get_stats(&self, name: &str, window: Window, cancel: &CancelToken) -> Result<Stats> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        self.get_stats_at(name, window, now_ms, cancel)
    }

    /// Window aggregates for `name` against an explicit "now".
    pub fn get_stats_at(
        &self,
        name: &str,
        window: Window,
        now_ms: i64,
        cancel: &CancelToken,
    ) -> Result<Stats> {
        let scan = scan_series(&self.dir, name, window, cancel)?;

        let current_value = scan
            .points
            .iter()
            .max_by_key(|(ts, _)| *ts)
            .filter(|(ts, _)| *ts >= now_ms - CURRENT_VALUE_WINDOW_MS)
            .map(|(_, value)| value.clone());

        let max_value = scan
            .points
            .iter()
            .filter_map(|(_, v)| v.as_f64())
            .fold(None, |acc: Option<f64>, x| {
                Some(match acc {
                    Some(m) => m.max(x),
                    None => x,
                })
            });

        Ok(Stats {
            count: scan.points.len() as u64,
            current_value,
            max_value,
            decimal_places: scan.decimal_places,
            files: scan.files,
        })
    }
}

/// Aggregate numeric points into `max_events` uniform buckets over the window.
fn bucket_points(points: &[(i64, Value)], window: Window, max_events: usize) -> Vec<EventPoint> {
    struct Acc {
        count: u64,
        sum: f64,
        min: f64,
        max: f64,
    }

    let buckets = max_events.max(1) as i128;
    let span = window.end_ms as i128 - window.start_ms as i128 + 1;
    let width = (span + buckets - 1) / buckets;

    let mut by_bucket: BTreeMap<i128, Acc> = BTreeMap::new();
    for (ts, value) in points {
        let Some(x) = value.as_f64() else { continue };
        let idx = (*ts as i128 - window.start_ms as i128) / width;
        by_bucket
            .entry(idx)
            .and_modify(|acc| {
                acc.count += 1;
                acc.sum += x;
                acc.min = acc.min.min(x);
                acc.max = acc.max.max(x);
            })
            .or_insert(Acc {
                count: 1,
                sum: x,
                min: x,
                max: x,
            });
    }

    by_bucket
        .into_iter()
        .map(|(idx, acc)| EventPoint::Bucket {
            timestamp: (window.start_ms as i128 + idx * width + width / 2) as i64,
            avg: acc.sum / acc.count as f64,
            min: acc.min,
            max: acc.max,
        })
        .collect()
}

/// Keep every k-th point so at most `max_events` survive. Used for string
/// channels, which have no meaningful min/avg/max.
fn thin_points(points: Vec<(i64, Value)>, max_events: usize) -> Vec<EventPoint> {
    let step = points.len().div_ceil(max_events.max(1));
    points
        .into_iter()
        .step_by(step.max(1))
        .map(|(timestamp, value)| EventPoint::Raw { timestamp, value })
        .collect()
}
