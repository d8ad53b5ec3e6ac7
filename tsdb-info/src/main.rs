use std::path::Path;

use clap::Parser;
use tsdb::record::Record;

#[derive(Parser)]
#[command(name = "tsdb-info", about = "Parse and display TSDB day file structure")]
struct Args {
    /// Input .tsdb or .tsdb.gz file
    #[arg(required_unless_present_any = ["schema", "version"])]
    input: Option<String>,

    /// Only show value entries for this channel name
    #[arg(short = 'c', long = "channel")]
    channel: Option<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Print JSON schema for the output format and exit
    #[arg(long)]
    schema: bool,

    /// Display version and quit
    #[arg(long)]
    version: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Reset SIGPIPE to default so piped output (e.g. head/tail) exits cleanly
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let args = Args::parse();

    if args.version {
        tsdb::version::print_cli_version_banner("TSDB Info Tool", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    if args.schema {
        let schema = schemars::schema_for!(tsdb::reader::FileScan);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let input = args.input.expect("input argument required");
    let scan = tsdb::reader::scan_day_file(Path::new(&input))?;

    if args.json {
        println!("{}", serde_json::to_string(&scan)?);
        return Ok(());
    }

    println!(
        "{} ({} bytes, {} clean, {})",
        scan.path,
        scan.file_len,
        scan.clean_len,
        if scan.finalized {
            "finalized"
        } else {
            "open-ended"
        }
    );

    println!(
        "{:>4} {:>6} {:>16} {:>5} {:>15} {:>4} {:>20}",
        "Type", "ID", "Name", "Fmt", "Timestamp", "Dec", "Value"
    );

    // Channel names are only meaningful through the per-file table
    let name_of = |id: u16| {
        scan.channels
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.name.as_str())
            .unwrap_or("?")
    };

    for rec in &scan.records {
        match rec {
            Record::ChannelDefined { id, name, format } => {
                println!(
                    "{:>4} {:>6} {:>16} {:>5} {:>15} {:>4} {:>20}",
                    "DEF",
                    id,
                    name,
                    format!("0x{:02X}", format.0),
                    "",
                    "",
                    "",
                );
            }
            Record::Timestamp { ts_ms } => {
                println!(
                    "{:>4} {:>6} {:>16} {:>5} {:>15} {:>4} {:>20}",
                    "TIME", "", "", "", ts_ms, "", ""
                );
            }
            Record::Value {
                channel_id,
                ts_ms,
                value,
            } => {
                let name = name_of(*channel_id);
                if let Some(filter) = &args.channel {
                    if name != filter.as_str() {
                        continue;
                    }
                }
                let dec = scan
                    .channels
                    .iter()
                    .find(|c| c.id == *channel_id)
                    .map(|c| c.decimal_places)
                    .unwrap_or(0);
                println!(
                    "{:>4} {:>6} {:>16} {:>5} {:>15} {:>4} {:>20}",
                    "VAL",
                    channel_id,
                    name,
                    "",
                    ts_ms,
                    dec,
                    format!("{}", value),
                );
            }
            Record::EndOfFile => {
                println!("{:>4}", "EOF");
            }
        }
    }

    Ok(())
}
