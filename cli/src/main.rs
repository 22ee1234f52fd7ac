// cli/src/main.rs — NORKV flash-image control CLI
//
// Every subcommand operates on a raw little-endian flash image file of
// exactly PAGE_COUNT * PAGE_SIZE bytes, mounts it through the same core
// the firmware runs, and (for mutations) writes the image back.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

mod norkvctl;
use norkvctl::{cases, image, inspect, ops};

#[derive(Parser)]
#[command(
    name = "norkvctl",
    version,
    about = "norkvctl — flash-image control and verification for NORKV stores",
    long_about = "norkvctl mounts file-backed NOR flash images through the NORKV core: \
inspect page state, read/write/delete records, factory-reset, and run the \
golden verification cases (exit code 0 means every assertion held)."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable JSON output
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a blank (fully erased) flash image
    Format { image: PathBuf },
    /// Dump the page table and bound ids of an image (read-only)
    Inspect { image: PathBuf },
    /// Bind a record to an id
    Write {
        image: PathBuf,
        id: u16,
        /// Payload as hex bytes
        #[arg(long, conflicts_with = "text")]
        data: Option<String>,
        /// Payload as a UTF-8 string
        #[arg(long)]
        text: Option<String>,
    },
    /// Print the record bound to an id
    Read { image: PathBuf, id: u16 },
    /// Tombstone the record bound to an id
    Delete { image: PathBuf, id: u16 },
    /// Store-level counters
    Stats { image: PathBuf },
    /// Erase every page through the mounted store
    Clean { image: PathBuf },
    /// Build golden case N into the image, mount it, and assert its outcome
    Check { image: PathBuf, case: usize },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Format { image } => image::format(&image),
        Commands::Inspect { image } => inspect::run(&image, cli.json),
        Commands::Write { image, id, data, text } => ops::write(&image, id, data, text),
        Commands::Read { image, id } => ops::read(&image, id, cli.json),
        Commands::Delete { image, id } => ops::delete(&image, id),
        Commands::Stats { image } => ops::stats(&image, cli.json),
        Commands::Clean { image } => ops::clean(&image),
        Commands::Check { image, case } => cases::run(&image, case, cli.json),
    };

    if let Err(err) = result {
        eprintln!("norkvctl: {err}");
        process::exit(err.exit_code());
    }
}
