//! Reads the book to index.
//!
//! A source is either one UTF-8 text file or a directory whose `.txt`
//! files (not recursive) are read in filename order and joined with a blank
//! line. A directory can be narrowed with a file name glob such as
//! `*Chapter*.txt`.

use folio_core::{AppError, AppResult};
use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Load the source text from a file or a directory of `.txt` files.
///
/// `filter` only applies to directories; `None` and `"*"` keep every file.
pub fn load_source(path: &Path, filter: Option<&str>) -> AppResult<String> {
    let pattern = match filter.map(str::trim) {
        None | Some("") | Some("*") => None,
        Some(raw) => Some(Pattern::new(raw).map_err(|e| {
            AppError::InvalidConfiguration(format!("Invalid file filter '{}': {}", raw, e))
        })?),
    };

    if !path.exists() {
        return Err(AppError::Index(format!(
            "Source path does not exist: {:?}",
            path
        )));
    }

    let files = if path.is_file() {
        vec![path.to_path_buf()]
    } else if path.is_dir() {
        let files = text_files(path);
        match &pattern {
            Some(pattern) if !files.is_empty() => {
                let matched = matching(files, pattern);
                if matched.is_empty() {
                    return Err(AppError::Index(format!(
                        "No files matched the filter '{}' in {:?}",
                        pattern.as_str(),
                        path
                    )));
                }
                matched
            }
            _ => files,
        }
    } else {
        return Err(AppError::Index(format!(
            "Source is neither a file nor a directory: {:?}",
            path
        )));
    };

    if files.is_empty() {
        return Err(AppError::Index(format!(
            "No .txt files found in {:?}",
            path
        )));
    }

    let mut parts = Vec::with_capacity(files.len());
    for file in &files {
        let text = fs::read_to_string(file).map_err(|e| {
            AppError::Index(format!("Failed to read source file {:?}: {}", file, e))
        })?;
        tracing::debug!(chars = text.chars().count(), "Read source file {:?}", file);
        parts.push(text);
    }

    let source = parts.join("\n\n");
    if source.trim().is_empty() {
        return Err(AppError::Index(format!("Source is empty: {:?}", path)));
    }

    tracing::info!(files = files.len(), "Loaded source from {:?}", path);
    Ok(source)
}

fn text_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"))
        })
        .collect();

    files.sort();
    files
}

fn matching(files: Vec<PathBuf>, pattern: &Pattern) -> Vec<PathBuf> {
    files
        .into_iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| pattern.matches(name))
        })
        .collect()
}
