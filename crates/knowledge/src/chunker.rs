//! Splits source text into overlapping, bounded-size passages.
//!
//! Offsets are counted in Unicode scalar values. Each passage ends at the
//! last paragraph boundary inside its window, else the last sentence
//! boundary (UAX #29), else a hard cut at the window edge. A boundary is
//! only accepted in the second half of the window and past the overlap, so
//! passages never degenerate and every step makes progress.

use crate::types::{Passage, PassageId};
use folio_core::{AppError, AppResult};
use sha2::{Digest, Sha256};
use unicode_segmentation::UnicodeSegmentation;

/// Calculate SHA-256 hash of text.
pub fn calculate_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split `source` into passages of at most `max_chars` characters, each
/// sharing exactly `overlap_chars` characters with its predecessor.
///
/// # Errors
/// `InvalidConfiguration` unless `max_chars > 0` and `overlap_chars < max_chars`.
pub fn chunk(source: &str, max_chars: usize, overlap_chars: usize) -> AppResult<Vec<Passage>> {
    if max_chars == 0 {
        return Err(AppError::InvalidConfiguration(
            "chunk size must be greater than 0".to_string(),
        ));
    }
    if overlap_chars >= max_chars {
        return Err(AppError::InvalidConfiguration(format!(
            "chunk overlap ({}) must be smaller than chunk size ({})",
            overlap_chars, max_chars
        )));
    }

    // Byte offset of every char, plus the end of the text
    let byte_offsets: Vec<usize> = source
        .char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(source.len()))
        .collect();
    let total = byte_offsets.len() - 1;

    if total == 0 {
        return Ok(Vec::new());
    }

    let paragraphs = paragraph_boundaries(source);
    let sentences = sentence_boundaries(source, &byte_offsets);

    let mut passages = Vec::new();
    let mut start = 0;

    loop {
        let end = if total - start <= max_chars {
            total
        } else {
            let window_end = start + max_chars;
            let min_end = (start + overlap_chars + 1).max(start + max_chars / 2);

            last_in_range(&paragraphs, min_end, window_end)
                .or_else(|| last_in_range(&sentences, min_end, window_end))
                .unwrap_or(window_end)
        };

        let text = &source[byte_offsets[start]..byte_offsets[end]];
        let ordinal = passages.len() as u32;
        passages.push(Passage {
            id: PassageId(ordinal),
            ordinal,
            char_start: start,
            char_end: end,
            text: text.to_string(),
            hash: calculate_hash(text),
            embedding: None,
        });

        if end == total {
            break;
        }
        start = end - overlap_chars;
    }

    tracing::debug!(
        "Chunked {} chars into {} passages (size: {}, overlap: {})",
        total,
        passages.len(),
        max_chars,
        overlap_chars
    );

    Ok(passages)
}

/// Largest boundary `b` with `lo <= b <= hi`.
fn last_in_range(boundaries: &[usize], lo: usize, hi: usize) -> Option<usize> {
    let idx = boundaries.partition_point(|&b| b <= hi);
    boundaries[..idx].last().copied().filter(|&b| b >= lo)
}

/// Char offsets where text resumes after a blank line.
fn paragraph_boundaries(source: &str) -> Vec<usize> {
    let chars: Vec<char> = source.chars().collect();
    let mut boundaries = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '\n' {
            i += 1;
            continue;
        }

        let mut j = i;
        let mut newlines = 0;
        while j < chars.len() && chars[j].is_whitespace() {
            if chars[j] == '\n' {
                newlines += 1;
            }
            j += 1;
        }

        if newlines >= 2 && j < chars.len() {
            boundaries.push(j);
        }
        i = j.max(i + 1);
    }

    boundaries
}

/// Char offsets where a UAX #29 sentence starts, excluding 0.
fn sentence_boundaries(source: &str, byte_offsets: &[usize]) -> Vec<usize> {
    source
        .split_sentence_bound_indices()
        .map(|(b, _)| b)
        .filter(|&b| b > 0)
        .map(|b| byte_offsets.binary_search(&b).unwrap_or_else(|i| i))
        .collect()
}
