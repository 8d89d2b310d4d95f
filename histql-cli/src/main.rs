//! histql CLI
//!
//! Command-line interface for the histql query compiler: reads a query
//! from the arguments or a file, compiles it against the local tracefs
//! event metadata when available, and prints the trigger program.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use histql_compiler::Compiler;
use histql_schema::{EventMetadata, EventRegistry, StubMetadata};

/// Mount points probed for event metadata when none is given.
const TRACEFS_PATHS: &[&str] = &["/sys/kernel/tracing", "/sys/kernel/debug/tracing"];

#[derive(ClapParser)]
#[command(name = "histql")]
#[command(about = "Compile SQL-like queries into tracing histogram triggers", long_about = None)]
#[command(version)]
struct Cli {
    /// Query text; all words are joined into one statement.
    query: Vec<String>,

    /// Read the query from a file instead ('-' for stdin).
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Tracefs mount point to read event metadata from.
    #[arg(short, long)]
    tracefs: Option<PathBuf>,

    /// Print the compiled program as JSON instead of shell commands.
    #[arg(long)]
    json: bool,

    /// Log level
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level)?;

    let query = read_query(&cli)?;
    let compiler = Compiler::new(load_metadata(cli.tracefs.as_deref()));

    let compiled = match compiler.compile(&query) {
        Ok(compiled) => compiled,
        Err(err) => {
            if let Some(caret) = err.render_caret(&query) {
                eprintln!("{}", caret);
            }
            return Err(err.into());
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&compiled)?);
    } else {
        print!("{}", compiled.to_shell_script());
    }
    Ok(())
}

fn setup_logging(level: &str) -> Result<()> {
    let level = level.parse::<Level>().unwrap_or(Level::WARN);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))?;

    Ok(())
}

fn read_query(cli: &Cli) -> Result<String> {
    match &cli.file {
        Some(path) if path.as_os_str() == "-" => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read query from stdin")?;
            Ok(buffer)
        }
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read query file {}", path.display())),
        None if cli.query.is_empty() => {
            anyhow::bail!("No query given; pass it as arguments or with --file")
        }
        None => Ok(cli.query.join(" ")),
    }
}

/// Event metadata from the given mount point, a probed default mount, or
/// the stub when no tracefs is readable.
fn load_metadata(tracefs: Option<&std::path::Path>) -> Arc<dyn EventMetadata> {
    if let Some(dir) = tracefs {
        return match EventRegistry::from_tracefs(dir) {
            Ok(registry) => {
                info!(events = registry.len(), dir = %dir.display(), "Loaded event metadata");
                Arc::new(registry)
            }
            Err(err) => {
                warn!(%err, "Could not read tracefs; compiling without metadata");
                Arc::new(StubMetadata)
            }
        };
    }

    for dir in TRACEFS_PATHS {
        let dir = std::path::Path::new(dir);
        if let Ok(registry) = EventRegistry::from_tracefs(dir) {
            info!(events = registry.len(), dir = %dir.display(), "Loaded event metadata");
            return Arc::new(registry);
        }
    }
    warn!("No tracefs mount found; system and type lookups will use stub markers");
    Arc::new(StubMetadata)
}
