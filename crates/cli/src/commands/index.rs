//! Index command handler.
//!
//! Chunks, embeds and persists the book.

use clap::Args;
use folio_core::{config::AppConfig, AppResult};
use folio_knowledge::IndexOptions;
use std::path::PathBuf;

/// Build the passage index from a book
#[derive(Args, Debug)]
pub struct IndexCommand {
    /// A text file, or a directory of .txt files read in name order
    pub source: PathBuf,

    /// Maximum passage length in characters
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Characters shared by consecutive passages
    #[arg(long)]
    pub overlap: Option<usize>,

    /// Glob applied to file names when the source is a directory
    #[arg(long, default_value = "*")]
    pub filter: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl IndexCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing index command for {:?}", self.source);

        let options = IndexOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.overlap,
            filter: Some(self.filter.clone()),
        };

        let stats = folio_knowledge::build_index(&config.workspace, &self.source, options).await?;

        if self.json {
            let output = serde_json::json!({
                "passages": stats.passages,
                "dimension": stats.dimension,
                "sourceChars": stats.source_chars,
                "durationSecs": stats.duration_secs,
                "indexPath": stats.index_path,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!(
                "Indexed {} passages ({} chars, {} dimensions) in {:.2}s",
                stats.passages, stats.source_chars, stats.dimension, stats.duration_secs
            );
            println!("Index written to {}", stats.index_path.display());
        }

        Ok(())
    }
}
