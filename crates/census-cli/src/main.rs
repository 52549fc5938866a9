//! Census CLI
//!
//! - `census serve`: run the citizen import HTTP service
//! - `census check <file>`: validate an import payload offline

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod config;
mod server;

use config::ServiceConfig;

#[derive(Parser)]
#[command(name = "census")]
#[command(author, version, about = "Census: citizen import registry")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service.
    Serve(ServeArgs),

    /// Validate an import payload (schema, dates, relations) without storing it.
    Check {
        /// JSON file shaped like a `POST /imports` body
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// JSON config file; the flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address (default 127.0.0.1:8080)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Persist imports to this JSON snapshot
    #[arg(long)]
    data_path: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset (default `info`)
    #[arg(long)]
    log_filter: Option<String>,

    /// Write `{"addr", "pid"}` here once listening
    #[arg(long)]
    ready_file: Option<PathBuf>,
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn cmd_serve(args: ServeArgs) -> Result<()> {
    let base = match args.config.as_deref() {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    let config = base.with_overrides(args.listen, args.data_path, args.log_filter);
    init_tracing(&config.log_filter);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to initialize tokio runtime: {e}"))?;

    rt.block_on(server::serve(config, args.ready_file))
}

fn cmd_check(file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .map_err(|e| anyhow!("failed to read {}: {e}", file.display()))?;
    let payload: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| anyhow!("BadRequest: {} is not valid JSON: {e}", file.display()))?;

    match census_model::parse_import(&payload) {
        Ok(citizens) => {
            println!("ok: {} citizens", citizens.len());
            Ok(())
        }
        Err(err) => Err(anyhow!("{}: {err}", err.kind())),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => cmd_serve(args),
        Commands::Check { file } => {
            init_tracing("warn");
            cmd_check(&file)
        }
    }
}
