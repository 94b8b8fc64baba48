//! Query command handler.
//!
//! Retrieval queries over a project's index runs: side-by-side
//! comparison across indices, and token-budgeted context assembly for a
//! single index.

use clap::{Args, Subcommand};
use ragmill_core::{config::AppConfig, AppResult};
use ragmill_embeddings::ProviderRegistry;
use ragmill_retrieval::{
    CompareOptions, ContextOptions, IndexManager, RetrievalEngine, ScoredDocument,
};
use std::sync::Arc;

/// Query indices (comparison and context assembly)
#[derive(Args, Debug)]
pub struct QueryCommand {
    #[command(subcommand)]
    pub action: QueryAction,
}

#[derive(Subcommand, Debug)]
pub enum QueryAction {
    /// Run one query against several indices side by side
    Compare(QueryCompareCommand),
    /// Assemble a token-budgeted context set from one index
    Context(QueryContextCommand),
}

fn engine(config: &AppConfig) -> RetrievalEngine {
    RetrievalEngine::new(
        Arc::new(IndexManager::new(&config.data_dir)),
        Arc::new(ProviderRegistry::new(config.models.clone())),
    )
}

fn print_document(doc: &ScoredDocument) {
    let source = doc
        .metadata
        .get("source")
        .and_then(|v| v.as_str())
        .unwrap_or("?");
    let preview: String = doc.text.chars().take(80).collect();
    println!(
        "  {:.3}  [{} tokens] {}: {}",
        doc.similarity, doc.tokens, source, preview
    );
}

/// Run one query against several indices side by side
#[derive(Args, Debug)]
pub struct QueryCompareCommand {
    /// Project identifier
    pub project: String,

    /// Query text
    pub query: String,

    /// Index runs to compare (default: all of the project's runs)
    #[arg(short, long)]
    pub index: Vec<String>,

    /// Documents kept per index
    #[arg(short = 'k', long, default_value = "5")]
    pub top_k: usize,

    /// Similarity floor
    #[arg(long, default_value = "0.55")]
    pub min_similarity: f32,

    /// Drop documents below this token estimate
    #[arg(long, default_value = "0")]
    pub min_tokens: u64,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl QueryCompareCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing query compare for project '{}'", self.project);

        let manager = IndexManager::new(&config.data_dir);
        let index_refs = if self.index.is_empty() {
            manager.list(&self.project)?
        } else {
            self.index.clone()
        };

        let options = CompareOptions {
            top_k: self.top_k,
            min_similarity: self.min_similarity,
            min_tokens: self.min_tokens,
        };
        let rows = engine(config)
            .compare(&self.project, &self.query, &index_refs, &options)
            .await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&rows)?);
            return Ok(());
        }

        for row in &rows {
            println!("{} ({})", row.index_ref, row.model_id);
            if let Some(error) = &row.error {
                println!("  error: {}", error);
                continue;
            }
            println!(
                "  {} retrieved, {} selected, avg similarity {:.3}, {}ms",
                row.retrieved_count, row.selected_count, row.avg_similarity, row.duration_ms
            );
            for doc in &row.documents {
                print_document(doc);
            }
        }
        Ok(())
    }
}

/// Assemble a token-budgeted context set from one index
#[derive(Args, Debug)]
pub struct QueryContextCommand {
    /// Project identifier
    pub project: String,

    /// Query text
    pub query: String,

    /// Index run to query
    #[arg(short, long)]
    pub index: String,

    /// Maximum number of documents
    #[arg(short, long, default_value = "10")]
    pub limit: usize,

    /// Estimated-token budget for the whole context set
    #[arg(long, default_value = "3000")]
    pub max_tokens: usize,

    /// Similarity floor
    #[arg(long, default_value = "0.45")]
    pub min_similarity: f32,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl QueryContextCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing query context for project '{}'", self.project);

        let options = ContextOptions {
            limit: self.limit,
            max_tokens: self.max_tokens,
            min_similarity: self.min_similarity,
        };
        let result = engine(config)
            .context(&self.project, &self.query, &self.index, &options)
            .await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }

        println!(
            "{} retrieved, {} selected, {} estimated tokens, {}ms",
            result.retrieved_count, result.selected_count, result.total_tokens, result.duration_ms
        );
        for doc in &result.documents {
            print_document(doc);
        }
        Ok(())
    }
}

impl QueryCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        match &self.action {
            QueryAction::Compare(cmd) => cmd.execute(config).await,
            QueryAction::Context(cmd) => cmd.execute(config).await,
        }
    }
}
