//! Knowledge configuration management and on-disk layout.
//!
//! Everything lives under `<workspace>/.folio/index/`:
//! - `config.yaml`: [`KnowledgeConfig`]
//! - `index.sqlite`: the persisted embedding index

use crate::types::KnowledgeConfig;
use folio_core::{AppError, AppResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Load the knowledge configuration, falling back to defaults when absent.
pub fn load_config(workspace: &Path) -> AppResult<KnowledgeConfig> {
    let config_path = get_config_path(workspace);

    if !config_path.exists() {
        tracing::debug!("No knowledge config at {:?}, using defaults", config_path);
        return Ok(KnowledgeConfig::default());
    }

    let content = fs::read_to_string(&config_path).map_err(|e| {
        AppError::InvalidConfiguration(format!(
            "Failed to read config at {:?}: {}",
            config_path, e
        ))
    })?;

    let config: KnowledgeConfig = serde_yaml::from_str(&content).map_err(|e| {
        AppError::InvalidConfiguration(format!(
            "Failed to parse config at {:?}: {}",
            config_path, e
        ))
    })?;

    tracing::debug!("Loaded knowledge config from {:?}", config_path);
    Ok(config)
}

/// Save the knowledge configuration.
pub fn save_config(workspace: &Path, config: &KnowledgeConfig) -> AppResult<()> {
    let config_path = get_config_path(workspace);

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::Index(format!("Failed to create index directory: {}", e))
        })?;
    }

    let yaml = serde_yaml::to_string(config)?;

    fs::write(&config_path, yaml).map_err(|e| {
        AppError::Index(format!(
            "Failed to write config to {:?}: {}",
            config_path, e
        ))
    })?;

    tracing::debug!("Saved knowledge config to {:?}", config_path);
    Ok(())
}

/// Directory holding the index and its configuration.
pub fn get_index_dir(workspace: &Path) -> PathBuf {
    workspace.join(".folio").join("index")
}

/// Path to the knowledge config file.
pub fn get_config_path(workspace: &Path) -> PathBuf {
    get_index_dir(workspace).join("config.yaml")
}

/// Path to the persisted SQLite index.
pub fn get_index_path(workspace: &Path) -> PathBuf {
    get_index_dir(workspace).join("index.sqlite")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_default_config() {
        let temp = TempDir::new().unwrap();
        let config = load_config(temp.path()).unwrap();

        assert_eq!(config.provider, "trigram");
        assert_eq!(config.chunk_size, 1200);
    }

    #[test]
    fn test_save_and_load_config() {
        let temp = TempDir::new().unwrap();
        let config = KnowledgeConfig {
            chunk_size: 800,
            chunk_overlap: 100,
            ..Default::default()
        };

        save_config(temp.path(), &config).unwrap();

        let loaded = load_config(temp.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_malformed_config_is_invalid_configuration() {
        let temp = TempDir::new().unwrap();
        let path = get_config_path(temp.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "chunk_size: [not a number").unwrap();

        assert!(matches!(
            load_config(temp.path()),
            Err(AppError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_paths() {
        let workspace = Path::new("/books");
        assert_eq!(
            get_index_path(workspace),
            PathBuf::from("/books/.folio/index/index.sqlite")
        );
        assert_eq!(
            get_config_path(workspace),
            PathBuf::from("/books/.folio/index/config.yaml")
        );
    }
}
