use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use clap::Parser;
use tsdb::value::{FormatId, Value};
use tsdb::writer::DayWriter;

#[derive(Parser)]
#[command(
    name = "tsdb-import",
    about = "Append samples from CSV lines (timestamp_ms,channel,format_id,value) into a data directory"
)]
struct Args {
    /// Data directory holding the day files
    #[arg(short = 'd', long = "dir", default_value = ".")]
    dir: PathBuf,

    /// Finalize the last open day file once the import completes
    #[arg(long)]
    finalize: bool,

    /// Display version and quit
    #[arg(long)]
    version: bool,

    /// Input CSV file; "-" or absent reads stdin
    input: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.version {
        tsdb::version::print_cli_version_banner("TSDB Import Tool", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) if path.as_os_str() != "-" => Box::new(BufReader::new(
            File::open(path)
                .map_err(|e| format!("Opening input '{}': {}", path.display(), e))?,
        )),
        _ => Box::new(BufReader::new(io::stdin())),
    };

    let mut writer = DayWriter::new(&args.dir);
    let mut imported: u64 = 0;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (name, format, ts_ms, value) = parse_line(trimmed)
            .map_err(|e| format!("line {}: {}", lineno + 1, e))?;
        writer
            .append(&name, format, ts_ms, &value)
            .map_err(|e| format!("line {}: {}", lineno + 1, e))?;
        imported += 1;

        if imported % 100_000 == 0 {
            log::info!("Imported {imported} samples...");
        }
    }

    if args.finalize {
        writer.finalize_current()?;
    } else {
        writer.close()?;
    }

    log::info!("Done, imported {imported} samples into {}", args.dir.display());
    Ok(())
}

/// Parse one `timestamp_ms,channel,format_id,value` line. The value field is
/// taken verbatim (commas included) so string channels stay intact.
fn parse_line(line: &str) -> Result<(String, FormatId, i64, Value), String> {
    let mut parts = line.splitn(4, ',');
    let ts = parts.next().ok_or("missing timestamp")?.trim();
    let name = parts.next().ok_or("missing channel name")?.trim();
    let format = parts.next().ok_or("missing format id")?.trim();
    let raw_value = parts.next().ok_or("missing value")?;

    let ts_ms: i64 = ts.parse().map_err(|e| format!("bad timestamp '{ts}': {e}"))?;
    let format = parse_format_id(format)?;
    let value = if format.is_string() {
        Value::Text(raw_value.to_owned())
    } else if format.is_floating() {
        let d: f64 = raw_value
            .trim()
            .parse()
            .map_err(|e| format!("bad numeric value '{raw_value}': {e}"))?;
        Value::Double(d)
    } else {
        let i: i64 = raw_value
            .trim()
            .parse()
            .map_err(|e| format!("bad integer value '{raw_value}': {e}"))?;
        Value::Integer(i)
    };

    Ok((name.to_owned(), format, ts_ms, value))
}

/// Accept `0x22` or plain decimal format ids.
fn parse_format_id(s: &str) -> Result<FormatId, String> {
    let raw = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
    .map_err(|e| format!("bad format id '{s}': {e}"))?;

    FormatId(raw)
        .validate()
        .map_err(|e| format!("bad format id '{s}': {e}"))
}
