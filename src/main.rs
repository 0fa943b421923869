use clap::Parser;
use lime::{pack, ChecksumKind, PackOptions};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lime")]
#[command(version)]
#[command(about = "Lime datafile packer", long_about = None)]
struct Cli {
    /// Resource manifest file (INI-shaped; see the library documentation)
    manifest: PathBuf,
    /// Output datafile
    output: PathBuf,
    /// DEFLATE level (0 = store, 9 = maximum)
    #[arg(long, default_value_t = 9, value_parser = clap::value_parser!(u32).range(0..=9))]
    clevel: u32,
    /// Checksum algorithm: adler32, crc32 or none
    #[arg(long, default_value = "adler32")]
    chksum: String,
    /// Head identification string stored in the datafile
    #[arg(long, default_value = "")]
    head: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let checksum = match cli.chksum.as_str() {
        "adler32" => ChecksumKind::Adler32,
        "crc32" => ChecksumKind::Crc32,
        "none" => ChecksumKind::None,
        other => return Err(format!("unknown checksum algorithm: {other}").into()),
    };

    let dict = lime::manifest::parse_file(&cli.manifest)?;
    let options = PackOptions {
        level: cli.clevel,
        checksum,
        head: cli.head,
        ..PackOptions::default()
    };
    let summary = pack(&dict, &cli.output, &options)?;

    println!(
        "Packed {} entries ({} payloads, {} shared) into {} ({} bytes)",
        summary.entries,
        summary.payloads,
        summary.dedup_hits,
        cli.output.display(),
        summary.container_size
    );
    Ok(())
}
