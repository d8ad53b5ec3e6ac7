use std::io::Write as _;
use std::path::Path;

use tsdb::dayfile;
use tsdb::query::{CancelToken, Database, EventPoint, Window};
use tsdb::range;
use tsdb::reader::scan_day_file;
use tsdb::record::Record;
use tsdb::value::{FormatId, Value};
use tsdb::writer::DayWriter;

const TS: i64 = 1_700_000_000_000; // 2023-11-14 UTC
const DAY: &str = "data_2023-11-14.tsdb";

/// Decoded `(name, ts, value)` stream of one file, the cross-file shape
/// queries join on.
fn logical_records(path: &Path) -> Vec<(String, i64, Value)> {
    let scan = scan_day_file(path).unwrap();
    scan.records
        .iter()
        .filter_map(|rec| match rec {
            Record::Value {
                channel_id,
                ts_ms,
                value,
            } => {
                let name = scan
                    .channels
                    .iter()
                    .find(|c| c.id == *channel_id)
                    .map(|c| c.name.clone())
                    .unwrap();
                Some((name, *ts_ms, value.clone()))
            }
            _ => None,
        })
        .collect()
}

#[test]
fn test_append_decode_round_trip_across_formats() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = DayWriter::new(dir.path());

    let samples: Vec<(&str, u8, Value, Value)> = vec![
        // (channel, format, appended, expected decoded)
        ("f32", 0x00, Value::Double(1.5), Value::Double(1.5)),
        ("f64", 0x04, Value::Double(-0.125), Value::Double(-0.125)),
        ("note", 0x08, Value::Text("über".into()), Value::Text("über".into())),
        ("i8", 0x10, Value::Integer(-5), Value::Integer(-5)),
        ("deci", 0x21, Value::Integer(123), Value::Double(12.3)),
        ("centi", 0x22, Value::Integer(2345), Value::Double(23.45)),
        ("milli", 0x33, Value::Integer(-7500), Value::Double(-7.5)),
        ("i32", 0x40, Value::Integer(-70_000), Value::Integer(-70_000)),
        ("i64", 0x50, Value::Integer(i64::MIN), Value::Integer(i64::MIN)),
        ("u8", 0x90, Value::Integer(200), Value::Integer(200)),
        ("u24", 0xb0, Value::Integer(0xFFFFFE), Value::Integer(0xFFFFFE)),
        ("u64", 0xd0, Value::Integer(i64::MAX), Value::Integer(i64::MAX)),
    ];

    for (i, (name, format, value, _)) in samples.iter().enumerate() {
        writer
            .append(name, FormatId(*format), TS + i as i64, value)
            .unwrap();
    }
    writer.close().unwrap();

    let decoded = logical_records(&dir.path().join(DAY));
    assert_eq!(decoded.len(), samples.len());
    for (i, (name, _, _, expected)) in samples.iter().enumerate() {
        assert_eq!(decoded[i].0, *name);
        assert_eq!(decoded[i].1, TS + i as i64);
        assert_eq!(decoded[i].2, *expected, "channel {name}");
    }
}

/// Decoding a file and re-appending the decoded stream produces the same
/// logical records, even though time-entry widths may differ.
#[test]
fn test_reencoded_stream_is_logically_identical() {
    let src = tempfile::tempdir().unwrap();
    let mut writer = DayWriter::new(src.path());
    writer.append("a", FormatId(0x22), TS, &Value::Integer(100)).unwrap();
    writer.append("b", FormatId(0x08), TS, &Value::Text("on".into())).unwrap();
    writer.append("a", FormatId(0x22), TS + 70_000, &Value::Integer(200)).unwrap();
    writer.append("a", FormatId(0x22), TS + 70_001, &Value::Integer(300)).unwrap();
    writer.close().unwrap();

    let src_path = src.path().join(DAY);
    let scan = scan_day_file(&src_path).unwrap();

    let dst = tempfile::tempdir().unwrap();
    let mut rewriter = DayWriter::new(dst.path());
    for rec in &scan.records {
        if let Record::Value {
            channel_id,
            ts_ms,
            value,
        } = rec
        {
            let chan = scan.channels.iter().find(|c| c.id == *channel_id).unwrap();
            // Divisor formats decode to doubles; recover the raw integer
            let raw = match (value, chan.decimal_places) {
                (Value::Double(d), dp) if !chan.format.is_floating() => {
                    Value::Integer((d * 10f64.powi(dp as i32)).round() as i64)
                }
                _ => value.clone(),
            };
            rewriter.append(&chan.name, chan.format, *ts_ms, &raw).unwrap();
        }
    }
    rewriter.close().unwrap();

    assert_eq!(
        logical_records(&src_path),
        logical_records(&dst.path().join(DAY))
    );
}

/// The 241st distinct channel must widen to a 16-bit id.
#[test]
fn test_channel_widening_to_sixteen_bit_ids() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = DayWriter::new(dir.path());
    for i in 0..241u32 {
        writer
            .append(&format!("ch{i}"), FormatId(0x10), TS + i as i64, &Value::Integer(1))
            .unwrap();
    }
    // A later sample on the widened channel goes through the 0xff escape
    writer
        .append("ch240", FormatId(0x10), TS + 500, &Value::Integer(2))
        .unwrap();
    writer.close().unwrap();

    let path = dir.path().join(DAY);
    let scan = scan_day_file(&path).unwrap();

    let wide = scan.channels.iter().find(|c| c.name == "ch240").unwrap();
    assert_eq!(wide.id, 0x00f0);
    let dense_ids: Vec<u16> = scan
        .channels
        .iter()
        .filter(|c| c.id < 0x00f0)
        .map(|c| c.id)
        .collect();
    assert_eq!(dense_ids, (0..240).collect::<Vec<u16>>());

    let bytes = std::fs::read(&path).unwrap();
    assert!(bytes.windows(3).any(|w| w == [0xf6, 0xf0, 0x00]));
    assert!(bytes.windows(3).any(|w| w == [0xff, 0xf0, 0x00]));

    let wide_values: Vec<i64> = scan
        .records
        .iter()
        .filter_map(|rec| match rec {
            Record::Value {
                channel_id: 0x00f0,
                ts_ms,
                ..
            } => Some(*ts_ms),
            _ => None,
        })
        .collect();
    assert_eq!(wide_values, vec![TS + 240, TS + 500]);
}

/// Samples straddling UTC midnight land in two files and one query.
#[test]
fn test_multi_file_window_query() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path());
    let mut writer = db.writer();
    let fmt = FormatId(0x22);
    // 2026-02-13T23:59:59Z and 2026-02-14T00:00:01Z
    writer.append("temp", fmt, 1_771_027_199_000, &Value::Integer(2345)).unwrap();
    writer.append("temp", fmt, 1_771_027_201_000, &Value::Integer(2350)).unwrap();
    writer.close().unwrap();

    let window = Window::new(1_771_027_190_000, 1_771_027_210_000);
    let events = db
        .get_events("temp", window, 100, &CancelToken::new())
        .unwrap();
    assert!(!events.downsampled);
    assert_eq!(
        events.points,
        vec![
            EventPoint::Raw {
                timestamp: 1_771_027_199_000,
                value: Value::Double(23.45),
            },
            EventPoint::Raw {
                timestamp: 1_771_027_201_000,
                value: Value::Double(23.50),
            },
        ]
    );
    assert_eq!(
        events.files,
        vec!["data_2026-02-13.tsdb", "data_2026-02-14.tsdb"]
    );
}

/// A file cut mid-entry decodes to the complete prefix, and a subsequent
/// writer resumes from the last complete entry.
#[test]
fn test_crash_mid_entry_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(DAY);
    {
        let mut writer = DayWriter::new(dir.path());
        writer.append("temp", FormatId(0x22), TS, &Value::Integer(2345)).unwrap();
        writer.append("temp", FormatId(0x22), TS + 5, &Value::Integer(2350)).unwrap();
        writer.close().unwrap();
    }

    // Chop one byte off the final value payload
    let full = std::fs::read(&path).unwrap();
    std::fs::write(&path, &full[..full.len() - 1]).unwrap();

    let decoded = logical_records(&path);
    assert_eq!(decoded, vec![("temp".into(), TS, Value::Double(23.45))]);

    let mut writer = DayWriter::new(dir.path());
    writer.append("temp", FormatId(0x22), TS + 9, &Value::Integer(2360)).unwrap();
    writer.close().unwrap();

    let decoded = logical_records(&path);
    assert_eq!(
        decoded,
        vec![
            ("temp".into(), TS, Value::Double(23.45)),
            ("temp".into(), TS + 9, Value::Double(23.60)),
        ]
    );
}

/// Every prefix of a writer-produced file decodes to a prefix of the full
/// record stream (crash tolerance at arbitrary byte boundaries).
#[test]
fn test_every_prefix_decodes_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(DAY);
    let mut writer = DayWriter::new(dir.path());
    writer.append("temp", FormatId(0x22), TS, &Value::Integer(1)).unwrap();
    writer.append("note", FormatId(0x08), TS + 300, &Value::Text("hello".into())).unwrap();
    writer.append("temp", FormatId(0x22), TS + 70_000, &Value::Integer(2)).unwrap();
    writer.close().unwrap();

    let full = std::fs::read(&path).unwrap();
    let all = logical_records(&path);

    for cut in 0..full.len() {
        std::fs::write(&path, &full[..cut]).unwrap();
        let prefix = logical_records(&path);
        assert!(
            prefix.len() <= all.len() && prefix[..] == all[..prefix.len()],
            "prefix at {cut} bytes is not a prefix of the full stream"
        );
    }
}

/// Finalized files refuse appends; archives decode strictly.
#[test]
fn test_finalize_and_archive_flow() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(DAY);
    {
        let mut writer = DayWriter::new(dir.path());
        writer.append("temp", FormatId(0x22), TS, &Value::Integer(2345)).unwrap();
        writer.finalize_current().unwrap();
    }

    let scan = scan_day_file(&path).unwrap();
    assert!(scan.finalized);
    assert_eq!(scan.records.last(), Some(&Record::EndOfFile));

    // Compress to an archive, as tsdb-archive would, and query across it
    let bytes = std::fs::read(&path).unwrap();
    let gz_path = dir.path().join("data_2023-11-14.tsdb.gz");
    let mut encoder = flate2::write::GzEncoder::new(
        std::fs::File::create(&gz_path).unwrap(),
        flate2::Compression::default(),
    );
    encoder.write_all(&bytes).unwrap();
    encoder.finish().unwrap();
    std::fs::remove_file(&path).unwrap();

    let db = Database::open(dir.path());
    let events = db
        .get_events("temp", Window::new(TS - 1000, TS + 1000), 10, &CancelToken::new())
        .unwrap();
    assert_eq!(events.points.len(), 1);
    assert_eq!(events.files, vec!["data_2023-11-14.tsdb.gz"]);
}

/// The plain file shadows the archive of the same day, so a reopened day
/// wins over its stale archive.
#[test]
fn test_plain_file_shadows_archive() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = DayWriter::new(dir.path());
    writer.append("temp", FormatId(0x10), TS, &Value::Integer(1)).unwrap();
    writer.close().unwrap();

    // Stale archive of the same date with different contents
    let gz_path = dir.path().join("data_2023-11-14.tsdb.gz");
    let mut encoder = flate2::write::GzEncoder::new(
        std::fs::File::create(&gz_path).unwrap(),
        flate2::Compression::default(),
    );
    encoder.write_all(&std::fs::read(dir.path().join(DAY)).unwrap()).unwrap();
    encoder.finish().unwrap();

    let day = dayfile::utc_day(TS).unwrap();
    let files = dayfile::day_files_in_range(dir.path(), day, day).unwrap();
    assert_eq!(files.len(), 1);
    assert!(!files[0].compressed);
}

/// Cancellation mid-query drops all partial results and file handles.
#[test]
fn test_cancellation_between_records() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = DayWriter::new(dir.path());
    for i in 0..100i64 {
        writer.append("n", FormatId(0x10), TS + i, &Value::Integer(i)).unwrap();
    }
    writer.close().unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let result = range::scan_series(dir.path(), "n", Window::new(TS, TS + 100), &cancel);
    assert!(result.is_err());
}
