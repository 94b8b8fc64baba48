//! Embed command handler.
//!
//! Embeds a project's chunk set into a fresh index run and follows the
//! batch progress until the job settles.

use clap::{Args, Subcommand};
use ragmill_core::{config::AppConfig, AppError, AppResult};
use ragmill_embeddings::ProviderRegistry;
use ragmill_pipeline::{EmbeddingOrchestrator, PipelineEvent, ProgressChannel};
use ragmill_retrieval::IndexManager;
use std::sync::Arc;
use std::time::Duration;

/// Embed a project's chunk set into a new index run
#[derive(Args, Debug)]
pub struct EmbedCommand {
    #[command(subcommand)]
    pub action: EmbedAction,
}

#[derive(Subcommand, Debug)]
pub enum EmbedAction {
    /// Start an embedding run
    Start(EmbedStartCommand),
    /// Cancel a running embedding job
    Cancel(EmbedCancelCommand),
    /// Show the running embedding job, if any
    Status(EmbedStatusCommand),
    /// List the registered embedding models
    Models(EmbedModelsCommand),
}

/// Start an embedding run
#[derive(Args, Debug)]
pub struct EmbedStartCommand {
    /// Project identifier
    pub project: String,

    /// Embedding model id (see `ragmill embed models`)
    #[arg(short, long, default_value = "hash-384")]
    pub model: String,

    /// Output progress events as JSON lines
    #[arg(long)]
    pub json: bool,
}

impl EmbedStartCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!(
            "Executing embed start for project '{}' with model '{}'",
            self.project,
            self.model
        );

        let channel = Arc::new(ProgressChannel::new());
        let orch = Arc::new(EmbeddingOrchestrator::new(
            config.clone(),
            Arc::new(ProviderRegistry::new(config.models.clone())),
            Arc::new(IndexManager::new(&config.data_dir)),
            Arc::clone(&channel),
        ));

        let handle = orch.start(&self.project, &self.model).await?;
        println!("Started embedding job {}", handle.job_id);

        let (_, mut rx) = channel.subscribe(&handle.job_id);
        loop {
            match tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
                Ok(Some(event)) => {
                    self.print_event(&event);
                    match event {
                        PipelineEvent::EmbeddingCompleted { .. }
                        | PipelineEvent::EmbeddingCancelled { .. } => return Ok(()),
                        PipelineEvent::EmbeddingFailed { error, .. } => {
                            return Err(AppError::Embedding(error));
                        }
                        _ => {}
                    }
                }
                Ok(None) => return Ok(()),
                Err(_) => {
                    // No live job means the terminal event slipped past
                    // before we subscribed.
                    if orch.status(&self.project).is_none() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn print_event(&self, event: &PipelineEvent) {
        if self.json {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{}", line);
            }
            return;
        }

        match event {
            PipelineEvent::Embedding { progress, .. } => {
                println!(
                    "Batch {}/{}: {}/{} chunks ({:.1}/s, ETA {:.0}s)",
                    progress.batch,
                    progress.total_batches,
                    progress.processed,
                    progress.total,
                    progress.chunks_per_sec,
                    progress.eta_secs
                );
            }
            PipelineEvent::EmbeddingCompleted {
                index_ref,
                chunk_count,
                ..
            } => {
                println!("Embedding completed: index '{}' ({} points)", index_ref, chunk_count);
            }
            PipelineEvent::EmbeddingCancelled { .. } => {
                println!("Embedding cancelled");
            }
            PipelineEvent::EmbeddingFailed { error, .. } => {
                println!("Embedding failed: {}", error);
            }
            _ => {}
        }
    }
}

fn orchestrator(config: &AppConfig) -> Arc<EmbeddingOrchestrator> {
    Arc::new(EmbeddingOrchestrator::new(
        config.clone(),
        Arc::new(ProviderRegistry::new(config.models.clone())),
        Arc::new(IndexManager::new(&config.data_dir)),
        Arc::new(ProgressChannel::new()),
    ))
}

/// Cancel a running embedding job.
///
/// Embedding runs inside the process that started it, so cancellation
/// reaches jobs owned by this process only. A run being followed by
/// `embed start` is cancelled by interrupting that invocation.
#[derive(Args, Debug)]
pub struct EmbedCancelCommand {
    /// Project identifier
    pub project: String,
}

impl EmbedCancelCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        if orchestrator(config).cancel(&self.project) {
            println!("Cancellation requested for project '{}'", self.project);
        } else {
            println!(
                "No embedding job running for project '{}' in this process",
                self.project
            );
        }
        Ok(())
    }
}

/// Show the running embedding job, if any.
///
/// Like `embed cancel`, this sees jobs owned by this process only.
#[derive(Args, Debug)]
pub struct EmbedStatusCommand {
    /// Project identifier
    pub project: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl EmbedStatusCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        match orchestrator(config).status(&self.project) {
            Some(handle) if self.json => {
                let output = serde_json::json!({
                    "jobId": handle.job_id,
                    "modelId": handle.model_id,
                    "running": true,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            Some(handle) => {
                println!("Job: {}", handle.job_id);
                println!("  Model: {}", handle.model_id);
                println!("  Status: running");
            }
            None => println!(
                "No embedding job running for project '{}' in this process",
                self.project
            ),
        }
        Ok(())
    }
}

/// List registered embedding models
#[derive(Args, Debug)]
pub struct EmbedModelsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl EmbedModelsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(&config.models)?);
            return Ok(());
        }

        for model in &config.models {
            println!(
                "{}  {} (provider: {}, dimension: {})",
                model.id, model.name, model.provider, model.dimension
            );
        }
        Ok(())
    }
}

impl EmbedCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        match &self.action {
            EmbedAction::Start(cmd) => cmd.execute(config).await,
            EmbedAction::Cancel(cmd) => cmd.execute(config).await,
            EmbedAction::Status(cmd) => cmd.execute(config).await,
            EmbedAction::Models(cmd) => cmd.execute(config).await,
        }
    }
}
