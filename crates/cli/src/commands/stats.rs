//! Stats command handler.
//!
//! Describes the persisted index.

use clap::Args;
use folio_core::{config::AppConfig, AppResult};

/// Show index statistics
#[derive(Args, Debug)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatsCommand {
    pub fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing stats command");

        let stats = folio_knowledge::stats(&config.workspace)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
            return Ok(());
        }

        println!("Passages:   {}", stats.passages);
        println!("Dimension:  {}", stats.dimension);
        println!("Embeddings: {} / {}", stats.provider, stats.model);
        println!(
            "Chunking:   {} chars, {} overlap",
            stats.chunk_size, stats.chunk_overlap
        );
        println!("Built at:   {}", stats.built_at.to_rfc3339());
        println!("Generation: {}", stats.generation);
        println!("Source:     sha256 {}", stats.source_sha256);
        println!(
            "Index file: {} ({} bytes)",
            stats.index_path.display(),
            stats.size_bytes
        );

        Ok(())
    }
}
