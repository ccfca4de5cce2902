//! Ask command handler.
//!
//! Answers one question from the indexed book, or refuses.

use clap::Args;
use folio_core::{config::AppConfig, AppError, AppResult};
use folio_knowledge::AskResult;
use folio_llm::CancelToken;

const EXCERPT_CHARS: usize = 160;

/// Ask a question about the indexed book
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub question: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ask command");
        tracing::debug!("Question: {}", self.question);

        let pipeline = folio_knowledge::open_pipeline(&config.workspace, config)?;

        // Ctrl-C cancels in-flight service calls instead of killing the process
        let (handle, cancel) = CancelToken::new();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling");
                handle.cancel();
            }
        });

        let result = pipeline.ask(&self.question, &cancel).await;
        interrupt.abort();

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                if let Some(notice) = failure_notice(&e, cancel.is_cancelled()) {
                    eprintln!("{}", notice);
                }
                return Err(e);
            }
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print_answer(&result);
        }

        Ok(())
    }
}

/// Line shown on stderr before a failed query exits.
fn failure_notice(err: &AppError, cancelled: bool) -> Option<String> {
    if cancelled {
        return Some("cancelled".to_string());
    }
    if err.is_service_unavailable() {
        return Some(format!("service unavailable, retry later ({})", err));
    }
    None
}

fn print_answer(result: &AskResult) {
    println!("{}", result.answer.text);

    if result.sources.is_empty() {
        return;
    }

    println!();
    println!("Sources:");
    for source in &result.sources {
        println!(
            "  [Passage {}] chars {}-{}: {}",
            source.id,
            source.char_start,
            source.char_end,
            excerpt(&source.text)
        );
    }
}

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", cut.trim_end())
}
