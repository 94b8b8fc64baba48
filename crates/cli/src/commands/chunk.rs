//! Chunk command handler.
//!
//! Runs the external chunking engine for a project and follows its
//! progress until the job settles.

use clap::{Args, Subcommand};
use ragmill_core::{config::AppConfig, AppError, AppResult};
use ragmill_pipeline::{
    ChunkingConfig, ChunkingOrchestrator, JobStore, PipelineEvent, ProgressChannel,
};
use std::sync::Arc;
use std::time::Duration;

/// Run and manage document chunking jobs
#[derive(Args, Debug)]
pub struct ChunkCommand {
    #[command(subcommand)]
    pub action: ChunkAction,
}

#[derive(Subcommand, Debug)]
pub enum ChunkAction {
    /// Chunk a project's uploaded documents
    Start(ChunkStartCommand),
    /// Stop a running chunking job
    Stop(ChunkStopCommand),
    /// Show the current job record
    Status(ChunkStatusCommand),
    /// Check whether an interrupted run can be resumed
    ResumeCheck(ChunkResumeCheckCommand),
    /// Delete a project's chunk data
    Delete(ChunkDeleteCommand),
}

/// Chunk a project's documents
#[derive(Args, Debug)]
pub struct ChunkStartCommand {
    /// Project identifier
    pub project: String,

    /// Maximum tokens per chunk
    #[arg(long, default_value = "512")]
    pub max_tokens: u32,

    /// Disable merging of chunks sharing the same headings
    #[arg(long)]
    pub no_merge_peers: bool,

    /// Disable LaTeX extraction from equations
    #[arg(long)]
    pub no_formula_enrichment: bool,

    /// Disable text recognition for scanned documents
    #[arg(long)]
    pub no_ocr: bool,

    /// Disable table structure preservation
    #[arg(long)]
    pub no_table_structure: bool,

    /// Classify images (charts, diagrams, ...)
    #[arg(long)]
    pub picture_classification: bool,

    /// Generate image captions with a vision model
    #[arg(long)]
    pub picture_description: bool,

    /// Extract and format code blocks
    #[arg(long)]
    pub code_enrichment: bool,

    /// Resume from a checkpoint if one is fresh enough
    #[arg(long)]
    pub resume: bool,

    /// Output progress events as JSON lines
    #[arg(long)]
    pub json: bool,
}

impl ChunkStartCommand {
    fn chunk_config(&self) -> ChunkingConfig {
        ChunkingConfig {
            max_tokens: self.max_tokens,
            merge_peers: !self.no_merge_peers,
            formula_enrichment: !self.no_formula_enrichment,
            ocr: !self.no_ocr,
            table_structure: !self.no_table_structure,
            picture_classification: self.picture_classification,
            picture_description: self.picture_description,
            code_enrichment: self.code_enrichment,
            ..ChunkingConfig::default()
        }
    }

    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing chunk start for project '{}'", self.project);

        let channel = Arc::new(ProgressChannel::new());
        let orch = Arc::new(ChunkingOrchestrator::new(
            config.clone(),
            Arc::new(JobStore::new()),
            Arc::clone(&channel),
        ));

        let mut chunk_config = self.chunk_config();
        let mut resume = false;
        if self.resume {
            let check = orch.resume_check(&self.project).await;
            if check.resumable {
                // A resumed run must reuse the interrupted run's config.
                if let Some(previous) = check.config {
                    chunk_config = previous;
                }
                resume = true;
                println!(
                    "Resuming from checkpoint ({} completed parts, {:.1}h old)",
                    check.completed_parts,
                    check.age_hours.unwrap_or(0.0)
                );
            } else {
                println!("No usable checkpoint, starting fresh");
            }
        }

        let outcome = orch.start(&self.project, chunk_config, resume).await?;
        if outcome.joined {
            println!("Joined running job {}", outcome.job_id);
        } else {
            println!("Started job {}", outcome.job_id);
        }

        let (_, mut rx) = channel.subscribe(&outcome.job_id);
        loop {
            match tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
                Ok(Some(event)) => {
                    self.print_event(&event);
                    match event {
                        PipelineEvent::ChunkingCompleted { .. }
                        | PipelineEvent::ChunkingStopped { .. } => return Ok(()),
                        PipelineEvent::ChunkingFailed { error, .. } => {
                            return Err(AppError::Other(error));
                        }
                        _ => {}
                    }
                }
                Ok(None) => return Ok(()),
                Err(_) => {
                    // Fall back to the record in case a terminal event
                    // slipped past before we subscribed.
                    if let Some(job) = orch.status(&self.project).await? {
                        if job.status.is_terminal() {
                            if let Some(error) = job.error {
                                return Err(AppError::Other(error));
                            }
                            return Ok(());
                        }
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
            PipelineEvent::Chunking { progress, .. } => {
                let file = progress.file.as_deref().unwrap_or("");
                let position = match (progress.current, progress.total) {
                    (Some(current), Some(total)) => format!(" ({}/{})", current, total),
                    _ => String::new(),
                };
                println!("[{:?}] {}{}", progress.status, file, position);
            }
            PipelineEvent::ChunkingCompleted { chunk_count, .. } => {
                println!("Chunking completed: {} chunks", chunk_count);
            }
            PipelineEvent::ChunkingFailed { error, .. } => {
                println!("Chunking failed: {}", error);
            }
            PipelineEvent::ChunkingStopped { .. } => {
                println!("Chunking stopped");
            }
            _ => {}
        }
    }
}

/// Stop a running chunking job
#[derive(Args, Debug)]
pub struct ChunkStopCommand {
    /// Project identifier
    pub project: String,
}

impl ChunkStopCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let orch = Arc::new(ChunkingOrchestrator::new(
            config.clone(),
            Arc::new(JobStore::new()),
            Arc::new(ProgressChannel::new()),
        ));

        if orch.stop(&self.project).await? {
            println!("Stopped chunking for project '{}'", self.project);
        } else {
            println!("No chunking job running for project '{}'", self.project);
        }
        Ok(())
    }
}

/// Show the current job record
#[derive(Args, Debug)]
pub struct ChunkStatusCommand {
    /// Project identifier
    pub project: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl ChunkStatusCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let store = JobStore::new();
        let path = ragmill_core::paths::job_file(&config.data_dir, &self.project);
        let job = store.read(&path).await?;

        match job {
            Some(job) if self.json => {
                println!("{}", serde_json::to_string_pretty(&job)?);
            }
            Some(job) => {
                println!("Job: {}", job.job_id);
                println!("  Status: {:?}", job.status);
                println!("  Started: {}", job.started_at);
                println!("  Updated: {}", job.updated_at);
                if let Some(progress) = &job.progress {
                    println!("  Last milestone: {:?}", progress.status);
                }
                if let Some(error) = &job.error {
                    println!("  Error: {}", error);
                }
            }
            None => println!("No job record for project '{}'", self.project),
        }
        Ok(())
    }
}

/// Check whether an interrupted run can be resumed
#[derive(Args, Debug)]
pub struct ChunkResumeCheckCommand {
    /// Project identifier
    pub project: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl ChunkResumeCheckCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let path = ragmill_core::paths::checkpoint_file(&config.data_dir, &self.project);
        let check = ragmill_pipeline::check_resumable(&path).await;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&check)?);
        } else if check.resumable {
            println!(
                "Resumable: {} completed parts, checkpoint {:.1}h old",
                check.completed_parts,
                check.age_hours.unwrap_or(0.0)
            );
        } else {
            println!("Not resumable");
        }
        Ok(())
    }
}

/// Delete a project's chunk data
///
/// Removes the chunk set, engine scratch output, checkpoint, and job
/// record. Persisted index runs are unaffected.
#[derive(Args, Debug)]
pub struct ChunkDeleteCommand {
    /// Project identifier
    pub project: String,
}

impl ChunkDeleteCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let orch = Arc::new(ChunkingOrchestrator::new(
            config.clone(),
            Arc::new(JobStore::new()),
            Arc::new(ProgressChannel::new()),
        ));
        orch.delete_chunks(&self.project).await?;
        println!("Deleted chunk data for project '{}'", self.project);
        Ok(())
    }
}

impl ChunkCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        match &self.action {
            ChunkAction::Start(cmd) => cmd.execute(config).await,
            ChunkAction::Stop(cmd) => cmd.execute(config).await,
            ChunkAction::Status(cmd) => cmd.execute(config).await,
            ChunkAction::ResumeCheck(cmd) => cmd.execute(config).await,
            ChunkAction::Delete(cmd) => cmd.execute(config).await,
        }
    }
}
