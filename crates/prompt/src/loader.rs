//! Prompt loader for YAML prompt definitions.

use crate::types::{PromptBehavior, PromptDefinition};
use folio_core::{AppError, AppResult};
use std::path::{Path, PathBuf};

/// Identifier of the built-in grounded answering prompt.
pub const DEFAULT_PROMPT_ID: &str = "grounded.answer";

const DEFAULT_SYSTEM_TEMPLATE: &str = r#"You are a careful reading assistant for a single book.
Answer the question using ONLY the passages in the context below. Do not use outside knowledge, even if you are sure of the answer.

If the context does not contain the answer, reply with exactly {{sentinel}} and nothing else.

Otherwise write a {{style}}, {{tone}} answer, then finish with a final line of the form "{{cited_prefix}} <ids>" listing the numbers of the passages you used, separated by commas.

Context:

{{context}}"#;

/// The built-in grounded answering prompt.
pub fn default_prompt() -> PromptDefinition {
    PromptDefinition {
        id: DEFAULT_PROMPT_ID.to_string(),
        title: "Grounded Answer".to_string(),
        api_version: "1.0".to_string(),
        created_by: "folio".to_string(),
        behavior: PromptBehavior {
            tone: "neutral".to_string(),
            style: "concise".to_string(),
        },
        system: DEFAULT_SYSTEM_TEMPLATE.to_string(),
        template: "{{question}}".to_string(),
    }
}

fn prompts_dir(workspace_path: &Path) -> PathBuf {
    workspace_path.join(".folio").join("prompts")
}

/// Load a prompt definition by ID from `.folio/prompts/<id>.yml`.
///
/// # Example
/// ```no_run
/// use folio_prompt::load_prompt;
/// use std::path::Path;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let prompt = load_prompt(Path::new("."), "grounded.answer")?;
/// println!("Loaded prompt: {}", prompt.title);
/// # Ok(())
/// # }
/// ```
pub fn load_prompt(workspace_path: &Path, prompt_id: &str) -> AppResult<PromptDefinition> {
    let prompt_file = prompts_dir(workspace_path).join(format!("{}.yml", prompt_id));

    tracing::debug!("Loading prompt from: {:?}", prompt_file);

    if !prompt_file.exists() {
        return Err(AppError::Prompt(format!(
            "Prompt file not found: {:?}",
            prompt_file
        )));
    }

    let contents = std::fs::read_to_string(&prompt_file).map_err(|e| {
        AppError::Prompt(format!(
            "Failed to read prompt file {:?}: {}",
            prompt_file, e
        ))
    })?;

    let definition: PromptDefinition = serde_yaml::from_str(&contents).map_err(|e| {
        AppError::Prompt(format!(
            "Failed to parse prompt YAML {:?}: {}",
            prompt_file, e
        ))
    })?;

    validate_prompt(&definition)?;

    tracing::info!("Loaded prompt: {} ({})", definition.id, definition.title);

    Ok(definition)
}

/// Load a workspace override if one exists, else fall back to the built-in
/// definition for [`DEFAULT_PROMPT_ID`].
pub fn resolve_prompt(workspace_path: &Path, prompt_id: &str) -> AppResult<PromptDefinition> {
    let prompt_file = prompts_dir(workspace_path).join(format!("{}.yml", prompt_id));

    if prompt_file.exists() {
        return load_prompt(workspace_path, prompt_id);
    }

    if prompt_id == DEFAULT_PROMPT_ID {
        tracing::debug!("Using built-in prompt: {}", DEFAULT_PROMPT_ID);
        return Ok(default_prompt());
    }

    Err(AppError::Prompt(format!("Unknown prompt: {}", prompt_id)))
}

fn validate_prompt(def: &PromptDefinition) -> AppResult<()> {
    if def.id.is_empty() {
        return Err(AppError::Prompt("Prompt ID cannot be empty".to_string()));
    }

    if def.title.is_empty() {
        return Err(AppError::Prompt("Prompt title cannot be empty".to_string()));
    }

    if !def.api_version.contains('.') {
        return Err(AppError::Prompt(format!(
            "Invalid apiVersion format: {}. Expected format: 'x.y'",
            def.api_version
        )));
    }

    // Without the context slot the model answers from nothing; without the
    // sentinel it has no way to decline
    for slot in ["{{context}}", "{{sentinel}}"] {
        if !def.system.contains(slot) {
            return Err(AppError::Prompt(format!(
                "Prompt {} must reference {} in its system template",
                def.id, slot
            )));
        }
    }

    if def.template.trim().is_empty() {
        return Err(AppError::Prompt(
            "Prompt template cannot be empty".to_string(),
        ));
    }

    Ok(())
}
