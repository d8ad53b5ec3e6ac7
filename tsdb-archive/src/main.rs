use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read as _, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::Parser;
use flate2::Compression;
use flate2::write::GzEncoder;
use tsdb::dayfile;

#[derive(Parser)]
#[command(
    name = "tsdb-archive",
    about = "Finalize day files older than the current UTC day and gzip-compress them"
)]
struct Args {
    /// Data directory holding the day files
    #[arg(short = 'd', long = "dir", default_value = ".")]
    dir: PathBuf,

    /// Keep the plain .tsdb file after compressing
    #[arg(long)]
    keep_plain: bool,

    /// Display version and quit
    #[arg(long)]
    version: bool,
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
        tsdb::version::print_cli_version_banner("TSDB Archive Tool", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let today = Utc::now().date_naive();
    let mut archived = 0u32;

    for entry in fs::read_dir(&args.dir)
        .map_err(|e| format!("Reading directory '{}': {}", args.dir.display(), e))?
    {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some((date, compressed)) = dayfile::parse_day_file_name(name) else {
            continue;
        };
        if compressed || date >= today {
            continue;
        }

        let path = entry.path();
        if tsdb::writer::finalize_file(&path)? {
            log::info!("Finalized {}", path.display());
        }

        let gz_path = path.with_extension("tsdb.gz");
        gzip_file(&path, &gz_path)?;
        if !args.keep_plain {
            fs::remove_file(&path)
                .map_err(|e| format!("Removing '{}': {}", path.display(), e))?;
        }
        archived += 1;
    }

    log::info!("Done, archived {archived} day file(s)");
    Ok(())
}

/// Gzip compress `src` to `dst`.
fn gzip_file(src: &Path, dst: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let src_size = fs::metadata(src).map(|m| m.len()).unwrap_or(0);

    let input = File::open(src)
        .map_err(|e| format!("Opening '{}' for compression: {}", src.display(), e))?;
    let mut reader = BufReader::new(input);

    let output =
        File::create(dst).map_err(|e| format!("Creating '{}': {}", dst.display(), e))?;
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());

    let mut buf = [0u8; 65536];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        encoder.write_all(&buf[..n])?;
    }
    encoder.finish()?.into_inner()?.sync_all()?;

    let dst_size = fs::metadata(dst).map(|m| m.len()).unwrap_or(0);
    log::info!(
        "Compressed {} ({} bytes) -> {} ({} bytes)",
        src.display(),
        src_size,
        dst.display(),
        dst_size
    );

    Ok(())
}
