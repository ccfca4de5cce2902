//! Clean command handler.

use clap::Args;
use folio_core::{config::AppConfig, AppResult};

/// Delete the persisted index
#[derive(Args, Debug)]
pub struct CleanCommand {}

impl CleanCommand {
    pub fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing clean command");

        if folio_knowledge::clean(&config.workspace)? {
            println!("Index removed");
        } else {
            println!("No index to remove");
        }

        Ok(())
    }
}
