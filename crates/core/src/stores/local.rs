use crate::traits::VectorIndex;
use crate::{DocumentChunk, IndexEntry, RetrievedChunk, SearchError};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const ENTRIES_FILE: &str = "entries.jsonl";

// Appends hold the write lock across the file write, so a search sees a whole batch or none of it.
pub struct LocalVectorStore {
    log_path: PathBuf,
    entries: RwLock<Vec<IndexEntry>>,
}

impl LocalVectorStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, SearchError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;

        let log_path = dir.join(ENTRIES_FILE);
        let entries = load_entries(&log_path).await?;
        info!(path = %log_path.display(), entries = entries.len(), "vector index opened");

        Ok(Self {
            log_path,
            entries: RwLock::new(entries),
        })
    }
}

async fn load_entries(path: &Path) -> Result<Vec<IndexEntry>, SearchError> {
    if !fs::try_exists(path).await? {
        return Ok(Vec::new());
    }

    let raw = fs::read_to_string(path).await?;
    repair_unterminated_tail(path, &raw).await?;
    let mut entries = Vec::new();

    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<IndexEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(error) => warn!(
                path = %path.display(),
                line = line_no + 1,
                %error,
                "skipping unreadable index entry"
            ),
        }
    }

    Ok(entries)
}

// The next append must start on a fresh line. A complete last entry gets its newline back, a
// partial one is cut off.
async fn repair_unterminated_tail(path: &Path, raw: &str) -> Result<(), SearchError> {
    if raw.is_empty() || raw.ends_with('\n') {
        return Ok(());
    }

    let keep = raw.rfind('\n').map(|position| position + 1).unwrap_or(0);
    let tail = &raw[keep..];

    if serde_json::from_str::<IndexEntry>(tail).is_ok() {
        let mut file = OpenOptions::new().append(true).open(path).await?;
        file.write_all(b"\n").await?;
        file.sync_data().await?;
    } else {
        let file = OpenOptions::new().write(true).open(path).await?;
        file.set_len(keep as u64).await?;
        file.sync_data().await?;
        warn!(
            path = %path.display(),
            dropped_bytes = tail.len(),
            "truncated partial index entry"
        );
    }

    Ok(())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorIndex for LocalVectorStore {
    async fn index_vector_chunks(
        &self,
        chunks: &[DocumentChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError> {
        if chunks.len() != embeddings.len() {
            return Err(SearchError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        if chunks.is_empty() {
            return Ok(());
        }

        let mut entries = self.entries.write().await;

        if let Some(expected) = entries.first().map(|entry| entry.embedding.len()) {
            if let Some(bad) = embeddings.iter().find(|vector| vector.len() != expected) {
                return Err(SearchError::Request(format!(
                    "embedding dimension {} != {} already stored in the index",
                    bad.len(),
                    expected
                )));
            }
        }

        let ingested_at = Utc::now();
        let batch = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| IndexEntry {
                chunk: chunk.clone(),
                embedding: embedding.clone(),
                ingested_at,
            })
            .collect::<Vec<_>>();

        let mut buffer = Vec::new();
        for entry in &batch {
            serde_json::to_writer(&mut buffer, entry)?;
            buffer.push(b'\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(&buffer).await?;
        file.sync_data().await?;

        entries.extend(batch);
        debug!(appended = chunks.len(), total = entries.len(), "index entries appended");
        Ok(())
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        let entries = self.entries.read().await;

        if let Some(stored) = entries.first().map(|entry| entry.embedding.len()) {
            if query_vector.len() != stored {
                return Err(SearchError::Request(format!(
                    "query vector dim {} is not {} as stored in the index",
                    query_vector.len(),
                    stored
                )));
            }
        }

        let mut scored = entries
            .iter()
            .map(|entry| (cosine_similarity(query_vector, &entry.embedding), entry))
            .collect::<Vec<_>>();
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, entry)| RetrievedChunk {
                text: entry.chunk.text.clone(),
                source_name: entry.chunk.source_name.clone(),
                page: entry.chunk.page,
                score,
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, SearchError> {
        Ok(self.entries.read().await.len())
    }
}
