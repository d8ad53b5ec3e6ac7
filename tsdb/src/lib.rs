//! Filesystem-backed append-only store for sensor time series.
//!
//! Each UTC day is one self-contained `data_YYYY-MM-DD.tsdb` file holding many
//! named channels. The byte stream is a compact, stateful format: value
//! entries reference a per-file channel table and inherit the current
//! timestamp, which time entries advance either absolutely or by a
//! variable-width delta. See [`decoder`] for the read side, [`writer`] for the
//! append side and [`query`] for the multi-file range queries built on both.

pub mod codec;
pub mod dayfile;
pub mod decoder;
pub mod error;
pub mod lock;
pub mod query;
pub mod range;
pub mod reader;
pub mod record;
pub mod registry;
pub mod value;
pub mod version;
pub mod writer;
