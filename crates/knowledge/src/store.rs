//! SQLite persistence for the embedding index.
//!
//! Layout:
//! - `meta(key TEXT PRIMARY KEY, value TEXT)`: build metadata
//! - `passages(...)`: one row per passage, embedding as little-endian `f32` BLOB
//!
//! Saves go to a sibling temporary file that is renamed over the target, so
//! a crashed build never leaves a half-written index behind.

use crate::index::{EmbeddingIndex, IndexMetadata};
use crate::types::{Passage, PassageId};
use chrono::{DateTime, SecondsFormat, Utc};
use folio_core::{AppError, AppResult};
use rusqlite::{params, Connection, OpenFlags};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const FORMAT_VERSION: &str = "1";

const SCHEMA: &str = r#"
    CREATE TABLE meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE passages (
        id INTEGER PRIMARY KEY,
        ordinal INTEGER NOT NULL UNIQUE,
        char_start INTEGER NOT NULL,
        char_end INTEGER NOT NULL,
        text TEXT NOT NULL,
        hash TEXT NOT NULL,
        embedding BLOB NOT NULL
    );
"#;

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> AppError + '_ {
    move |e| AppError::Index(format!("{}: {}", context, e))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Persist `index` at `path`, replacing any previous file.
pub fn save(index: &EmbeddingIndex, path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::Index(format!("Failed to create index directory: {}", e)))?;
    }

    let tmp = temp_path(path);
    if tmp.exists() {
        fs::remove_file(&tmp)?;
    }

    write_database(index, &tmp).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })?;

    fs::rename(&tmp, path)
        .map_err(|e| AppError::Index(format!("Failed to move index into place: {}", e)))?;

    tracing::debug!(
        passages = index.len(),
        "Saved SQLite index at {:?}",
        path
    );
    Ok(())
}

fn write_database(index: &EmbeddingIndex, path: &Path) -> AppResult<()> {
    let mut conn = Connection::open(path).map_err(db_err("Failed to open SQLite index"))?;
    conn.execute_batch(SCHEMA)
        .map_err(db_err("Failed to create tables"))?;

    let tx = conn
        .transaction()
        .map_err(db_err("Failed to start transaction"))?;

    {
        let meta = index.metadata();
        let mut stmt = tx
            .prepare("INSERT INTO meta (key, value) VALUES (?1, ?2)")
            .map_err(db_err("Failed to prepare metadata insert"))?;

        let entries = [
            ("format_version", FORMAT_VERSION.to_string()),
            ("provider", meta.provider.clone()),
            ("model", meta.model.clone()),
            ("dimension", meta.dimension.to_string()),
            ("generation", meta.generation.clone()),
            (
                "built_at",
                meta.built_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ),
            ("source_sha256", meta.source_sha256.clone()),
            ("chunk_size", meta.chunk_size.to_string()),
            ("chunk_overlap", meta.chunk_overlap.to_string()),
        ];

        for (key, value) in entries {
            stmt.execute(params![key, value])
                .map_err(db_err("Failed to insert metadata"))?;
        }

        let mut stmt = tx
            .prepare(
                "INSERT INTO passages (id, ordinal, char_start, char_end, text, hash, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .map_err(db_err("Failed to prepare passage insert"))?;

        for passage in index.passages() {
            let embedding = passage.embedding.as_deref().ok_or_else(|| {
                AppError::Index(format!("Passage {} has no embedding", passage.id))
            })?;

            stmt.execute(params![
                passage.id.0 as i64,
                passage.ordinal as i64,
                passage.char_start as i64,
                passage.char_end as i64,
                passage.text,
                passage.hash,
                embedding_to_bytes(embedding),
            ])
            .map_err(db_err("Failed to insert passage"))?;
        }
    }

    tx.commit().map_err(db_err("Failed to commit index"))?;
    Ok(())
}

/// Load a persisted index.
pub fn load(path: &Path) -> AppResult<EmbeddingIndex> {
    if !path.exists() {
        return Err(AppError::Index(format!(
            "No index found at {:?}. Run `folio index <SOURCE>` first.",
            path
        )));
    }

    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(db_err("Failed to open SQLite index"))?;

    let metadata = read_metadata(&conn)?;
    let passages = read_passages(&conn, metadata.dimension)?;

    tracing::debug!(
        passages = passages.len(),
        generation = %metadata.generation,
        "Loaded SQLite index from {:?}",
        path
    );

    EmbeddingIndex::from_parts(metadata, passages)
}

fn read_metadata(conn: &Connection) -> AppResult<IndexMetadata> {
    let mut stmt = conn
        .prepare("SELECT key, value FROM meta")
        .map_err(db_err("Failed to read index metadata"))?;

    let entries: HashMap<String, String> = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(db_err("Failed to read index metadata"))?
        .collect::<Result<_, _>>()
        .map_err(db_err("Failed to read index metadata"))?;

    let get = |key: &str| meta_value(&entries, key);
    let get_usize = |key: &str| -> AppResult<usize> {
        meta_value(&entries, key)?
            .parse::<usize>()
            .map_err(|e| AppError::Index(format!("Invalid '{}' in index metadata: {}", key, e)))
    };

    let version = get("format_version")?;
    if version != FORMAT_VERSION {
        return Err(AppError::Index(format!(
            "Unsupported index format version {} (expected {}). Rebuild the index.",
            version, FORMAT_VERSION
        )));
    }

    let built_at = DateTime::parse_from_rfc3339(get("built_at")?)
        .map_err(|e| AppError::Index(format!("Invalid build timestamp: {}", e)))?
        .with_timezone(&Utc);

    Ok(IndexMetadata {
        provider: get("provider")?.to_string(),
        model: get("model")?.to_string(),
        dimension: get_usize("dimension")?,
        generation: get("generation")?.to_string(),
        built_at,
        source_sha256: get("source_sha256")?.to_string(),
        chunk_size: get_usize("chunk_size")?,
        chunk_overlap: get_usize("chunk_overlap")?,
    })
}

fn meta_value<'a>(entries: &'a HashMap<String, String>, key: &str) -> AppResult<&'a str> {
    entries
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| AppError::Index(format!("Index metadata is missing '{}'", key)))
}

fn read_passages(conn: &Connection, dimension: usize) -> AppResult<Vec<Passage>> {
    let expected_bytes = dimension.checked_mul(4).ok_or_else(|| {
        AppError::Index(format!("Corrupt index: dimension {} is out of range", dimension))
    })?;

    let mut stmt = conn
        .prepare(
            "SELECT id, ordinal, char_start, char_end, text, hash, embedding
             FROM passages ORDER BY ordinal",
        )
        .map_err(db_err("Failed to prepare passage query"))?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Vec<u8>>(6)?,
            ))
        })
        .map_err(db_err("Failed to query passages"))?;

    let mut passages = Vec::new();
    for row in rows {
        let (id, ordinal, char_start, char_end, text, hash, blob) =
            row.map_err(db_err("Failed to read passage"))?;

        if blob.len() != expected_bytes {
            return Err(AppError::Index(format!(
                "Corrupt index: passage {} has {} embedding bytes, expected {}",
                id,
                blob.len(),
                expected_bytes
            )));
        }

        passages.push(Passage {
            id: PassageId(to_u32(id)?),
            ordinal: to_u32(ordinal)?,
            char_start: to_usize(char_start)?,
            char_end: to_usize(char_end)?,
            text,
            hash,
            embedding: Some(bytes_to_embedding(&blob)?),
        });
    }

    Ok(passages)
}

fn to_u32(value: i64) -> AppResult<u32> {
    u32::try_from(value).map_err(|_| AppError::Index(format!("Corrupt index: bad id {}", value)))
}

fn to_usize(value: i64) -> AppResult<usize> {
    usize::try_from(value)
        .map_err(|_| AppError::Index(format!("Corrupt index: bad offset {}", value)))
}

/// Convert embedding vector to bytes for storage.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to embedding vector.
fn bytes_to_embedding(bytes: &[u8]) -> AppResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(AppError::Index(
            "Invalid embedding bytes length".to_string(),
        ));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_bytes_round_trip() {
        let values = vec![0.0, -1.5, f32::MIN_POSITIVE, 1.0e-7, 12345.678];
        let bytes = embedding_to_bytes(&values);
        assert_eq!(bytes.len(), 20);
        assert_eq!(bytes_to_embedding(&bytes).unwrap(), values);
    }

    #[test]
    fn test_invalid_byte_length() {
        assert!(bytes_to_embedding(&[0, 1, 2]).is_err());
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let tmp = temp_path(Path::new("/w/.folio/index/index.sqlite"));
        assert_eq!(tmp, PathBuf::from("/w/.folio/index/index.sqlite.tmp"));
    }

    #[test]
    fn test_load_missing_index() {
        let temp = tempfile::TempDir::new().unwrap();
        let result = load(&temp.path().join("index.sqlite"));
        assert!(matches!(result, Err(AppError::Index(_))));
    }

    #[test]
    fn test_load_garbage_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("index.sqlite");
        fs::write(&path, b"definitely not sqlite").unwrap();

        assert!(matches!(load(&path), Err(AppError::Index(_))));
    }
}
