//! Ragmill CLI
//!
//! Main entry point for the ragmill command-line tool.
//! Drives the document pipeline: chunking, embedding, index management
//! and retrieval queries over a local data directory.

mod commands;

use clap::{Parser, Subcommand};
use commands::{ChunkCommand, EmbedCommand, IndexCommand, QueryCommand};
use ragmill_core::{config::AppConfig, logging};
use std::path::PathBuf;

/// Ragmill - document chunking, embedding and retrieval pipeline
#[derive(Parser, Debug)]
#[command(name = "ragmill")]
#[command(about = "Document chunking, embedding and retrieval pipeline", long_about = None)]
#[command(version)]
struct Cli {
    /// Data directory holding projects, indices and configuration
    #[arg(short, long, global = true, env = "RAGMILL_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run and manage document chunking jobs
    Chunk(ChunkCommand),

    /// Embed a project's chunk set into a new index run
    Embed(EmbedCommand),

    /// Inspect persisted index runs
    Index(IndexCommand),

    /// Query indices (comparison and context assembly)
    Query(QueryCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.data_dir)?;
    if cli.verbose {
        config.log_level = Some("debug".to_string());
    } else if let Some(level) = cli.log_level {
        config.log_level = Some(level);
    }

    logging::init_logging(config.log_level.as_deref(), cli.no_color)?;

    tracing::debug!("Data directory: {:?}", config.data_dir);

    let command_name = match &cli.command {
        Commands::Chunk(_) => "chunk",
        Commands::Embed(_) => "embed",
        Commands::Index(_) => "index",
        Commands::Query(_) => "query",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Chunk(cmd) => cmd.execute(&config).await,
        Commands::Embed(cmd) => cmd.execute(&config).await,
        Commands::Index(cmd) => cmd.execute(&config).await,
        Commands::Query(cmd) => cmd.execute(&config).await,
    };

    if let Err(e) = &result {
        tracing::error!("Command failed: {}", e);
    }

    Ok(result?)
}
