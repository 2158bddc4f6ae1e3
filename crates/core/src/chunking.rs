use crate::error::IngestError;
use crate::extractor::PageText;
use crate::models::{DocumentChunk, IngestionOptions};
use sha2::{Digest, Sha256};

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

impl From<IngestionOptions> for ChunkingConfig {
    fn from(value: IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
        }
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (position, _) in text.match_indices(separator) {
        if position > start {
            pieces.push(text[start..position].to_string());
        }
        start = position;
    }
    if start < text.len() {
        pieces.push(text[start..].to_string());
    }

    pieces.into_iter().filter(|piece| !piece.is_empty()).collect()
}

fn join_pieces(pieces: &[String]) -> Option<String> {
    let joined = pieces.concat();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn merge_pieces(pieces: &[String], config: ChunkingConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: Vec<String> = Vec::new();
    let mut total = 0usize;

    for piece in pieces {
        let length = char_len(piece);

        if total + length > config.max_chars && !window.is_empty() {
            if let Some(chunk) = join_pieces(&window) {
                chunks.push(chunk);
            }

            while total > config.overlap_chars
                || (total + length > config.max_chars && total > 0)
            {
                let dropped = window.remove(0);
                total -= char_len(&dropped);
            }
        }

        window.push(piece.clone());
        total += length;
    }

    if let Some(chunk) = join_pieces(&window) {
        chunks.push(chunk);
    }

    chunks
}

fn split_recursive(text: &str, separators: &[&str], config: ChunkingConfig) -> Vec<String> {
    let mut separator = separators.last().copied().unwrap_or("");
    let mut remaining: &[&str] = &[];

    for (position, candidate) in separators.iter().enumerate() {
        if candidate.is_empty() {
            separator = candidate;
            break;
        }
        if text.contains(candidate) {
            separator = candidate;
            remaining = &separators[position + 1..];
            break;
        }
    }

    let mut chunks = Vec::new();
    let mut short_pieces = Vec::new();

    for piece in split_keeping_separator(text, separator) {
        if char_len(&piece) < config.max_chars {
            short_pieces.push(piece);
            continue;
        }

        if !short_pieces.is_empty() {
            chunks.extend(merge_pieces(&short_pieces, config));
            short_pieces.clear();
        }

        if remaining.is_empty() {
            chunks.push(piece);
        } else {
            chunks.extend(split_recursive(&piece, remaining, config));
        }
    }

    if !short_pieces.is_empty() {
        chunks.extend(merge_pieces(&short_pieces, config));
    }

    chunks
}

pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    split_recursive(text, &SEPARATORS, config)
}

pub fn build_chunks(
    source_name: &str,
    pages: &[PageText],
    options: &IngestionOptions,
) -> Result<Vec<DocumentChunk>, IngestError> {
    let config = ChunkingConfig::from(*options);
    config.validate()?;

    let mut chunks = Vec::new();
    let mut cursor = 0u64;

    for page in pages {
        for text in split_text(&page.text, config) {
            chunks.push(DocumentChunk {
                chunk_id: make_chunk_id(source_name, page.number, cursor, &text),
                source_name: source_name.to_string(),
                page: page.number,
                chunk_index: cursor,
                text,
            });
            cursor = cursor.saturating_add(1);
        }
    }

    Ok(chunks)
}

fn make_chunk_id(source_name: &str, page: Option<u32>, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_name.as_bytes());
    hasher.update(page.unwrap_or(0).to_le_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
