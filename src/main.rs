use clap::{ArgAction, Parser, Subcommand};
use scalpel::batch::{discover, extract_batches};
use scalpel::extract::ExtractOptions;
use scalpel::listing::{describe, ContainerListing};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{warn, Level};

#[derive(Parser)]
#[command(name = "scalpel", about = "Toolset for dealing with diagnostic log batches")]
struct Cli {
    /// Verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract log files from batches
    Batch {
        /// Batch files or directories to search (default: current directory)
        paths: Vec<PathBuf>,
        /// Directory to place extracted files in
        #[arg(short, long, default_value = ".")]
        dest: PathBuf,
        /// Regex to match file names to extract (repeatable, comma-separated)
        #[arg(short = 'm', long = "match", value_delimiter = ',')]
        patterns: Vec<String>,
        /// Force overwrite of existing files
        #[arg(short, long)]
        force: bool,
        /// Unpack gzipped logs
        #[arg(short = 'z', long)]
        unpack: bool,
        /// Only show what would be extracted
        #[arg(short, long)]
        test: bool,
        /// Show sizes next to extracted file names
        #[arg(short, long)]
        long: bool,
    },
    /// List the entries of batches without extracting them
    List {
        paths: Vec<PathBuf>,
        /// Emit one JSON document per batch
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level_for(cli.verbose))
        .with_target(false)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::with_default(subscriber, || run(cli.command))
}

fn run(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {

        // ── Batch ────────────────────────────────────────────────────────────
        Commands::Batch { paths, dest, patterns, force, unpack, test, long } => {
            let opts = ExtractOptions { dest, force, unpack, test, long, patterns };
            let summary = extract_batches(&paths, &opts, &mut out)?;
            if summary.is_failure() {
                return Err(format!("none of {} candidate file(s) could be extracted", summary.candidates).into());
            }
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { paths, json } => {
            for path in discover(&paths) {
                let content = match std::fs::read(&path) {
                    Ok(c) => c,
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "Cannot read file");
                        continue;
                    }
                };
                match describe(&path.to_string_lossy(), &content) {
                    Ok(listing) if json => writeln!(out, "{}", serde_json::to_string_pretty(&listing)?)?,
                    Ok(listing)         => print_listing(&mut out, &listing)?,
                    Err(err)            => warn!(path = %path.display(), error = %err, "Not a batch"),
                }
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn level_for(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn print_listing<W: Write>(out: &mut W, listing: &ContainerListing) -> io::Result<()> {
    writeln!(out, "{} ({} batch, {} entries)", listing.path, listing.encoding, listing.entries.len())?;
    writeln!(out, "  {:>5} {:>12}  {:<40} Envelope", "Type", "Size", "Name")?;
    for e in &listing.entries {
        let envelope = match &e.envelope {
            Some(env) => format!(
                "v{} {}/{} {}{}",
                env.version,
                env.platform.name(),
                env.image_type.name(),
                env.image_version,
                if env.compressed { " gzip" } else { "" },
            ),
            None => "-".into(),
        };
        writeln!(out, "  {:>5} {:>12}  {:<40} {}", e.kind, e.size, e.name, envelope)?;
    }
    Ok(())
}
