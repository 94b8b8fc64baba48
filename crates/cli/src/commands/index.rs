//! Index command handler.
//!
//! Inspects persisted index runs for a project.

use clap::{Args, Subcommand};
use ragmill_core::{config::AppConfig, paths, AppResult};
use ragmill_retrieval::{store, IndexManager};

/// Inspect persisted index runs
#[derive(Args, Debug)]
pub struct IndexCommand {
    #[command(subcommand)]
    pub action: IndexAction,
}

#[derive(Subcommand, Debug)]
pub enum IndexAction {
    /// List a project's index runs
    List(IndexListCommand),
    /// Show one index run's configuration
    Show(IndexShowCommand),
}

/// List a project's index runs
#[derive(Args, Debug)]
pub struct IndexListCommand {
    /// Project identifier
    pub project: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl IndexListCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let manager = IndexManager::new(&config.data_dir);
        let runs = manager.list(&self.project)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&runs)?);
        } else if runs.is_empty() {
            println!("No index runs for project '{}'", self.project);
        } else {
            for run in runs {
                println!("{}", run);
            }
        }
        Ok(())
    }
}

/// Show one index run's configuration
#[derive(Args, Debug)]
pub struct IndexShowCommand {
    /// Project identifier
    pub project: String,

    /// Index run reference (as shown by `index list`)
    pub index_ref: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl IndexShowCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let run_dir = paths::index_run_dir(&config.data_dir, &self.project, &self.index_ref);
        let loaded = store::load_run(&run_dir)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&loaded.config)?);
        } else {
            println!("Index: {}", self.index_ref);
            println!("  Model: {} ({})", loaded.config.model_name, loaded.config.model_id);
            println!("  Dimension: {}", loaded.config.dimension);
            println!("  Points: {}", loaded.config.chunk_count);
            println!("  Created: {}", loaded.config.created_at);
        }
        Ok(())
    }
}

impl IndexCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        match &self.action {
            IndexAction::List(cmd) => cmd.execute(config).await,
            IndexAction::Show(cmd) => cmd.execute(config).await,
        }
    }
}
