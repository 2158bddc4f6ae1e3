use crate::embeddings::Embedder;
use crate::extractor::{load_document, PageText};
use crate::traits::VectorIndex;
use crate::{build_chunks, DocumentFormat, IngestError, IngestionOptions, UploadOutcome};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

const EMBED_BATCH_SIZE: usize = 64;

pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(DocumentFormat::from_file_name)
            .is_some();

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub files_indexed: usize,
    pub chunks_indexed: usize,
    pub skipped_files: Vec<SkippedDocument>,
}

pub struct DocumentIngestor {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    upload_dir: PathBuf,
    options: IngestionOptions,
}

impl DocumentIngestor {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        upload_dir: impl Into<PathBuf>,
        options: IngestionOptions,
    ) -> Self {
        Self {
            embedder,
            index,
            upload_dir: upload_dir.into(),
            options,
        }
    }

    pub async fn ingest_upload(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<UploadOutcome, IngestError> {
        let Some(format) = DocumentFormat::from_file_name(file_name) else {
            debug!(file = %file_name, "rejecting unsupported upload");
            return Ok(UploadOutcome::unsupported());
        };
        let source_name = base_name(Path::new(file_name))?;

        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let upload_dir = self.upload_dir.clone();
        let bytes = bytes.to_vec();

        let pages = tokio::task::spawn_blocking(move || -> Result<Vec<PageText>, IngestError> {
            let mut transient = tempfile::Builder::new()
                .prefix("temp_")
                .tempfile_in(&upload_dir)?;
            transient.write_all(&bytes)?;
            transient.flush()?;

            let pages = load_document(transient.path(), format);
            transient.close()?;
            pages
        })
        .await
        .map_err(|error| IngestError::Io(std::io::Error::other(error)))??;

        let chunks_indexed = self.ingest_pages(&source_name, &pages).await?;
        Ok(UploadOutcome::uploaded(&source_name, chunks_indexed))
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<usize, IngestError> {
        let source_name = base_name(path)?;
        let format = DocumentFormat::from_file_name(&source_name).ok_or_else(|| {
            IngestError::InvalidArgument(format!("unsupported format: {}", path.display()))
        })?;

        let owned = path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || load_document(&owned, format))
            .await
            .map_err(|error| IngestError::Io(std::io::Error::other(error)))??;

        self.ingest_pages(&source_name, &pages).await
    }

    pub async fn ingest_folder(&self, folder: &Path) -> Result<IngestionReport, IngestError> {
        let files = discover_documents(folder);

        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf or txt files found in {}",
                folder.display()
            )));
        }

        let mut report = IngestionReport {
            files_indexed: 0,
            chunks_indexed: 0,
            skipped_files: Vec::new(),
        };

        for path in files {
            match self.ingest_file(&path).await {
                Ok(chunks) => {
                    report.files_indexed += 1;
                    report.chunks_indexed += chunks;
                }
                Err(error) => report.skipped_files.push(SkippedDocument {
                    path,
                    reason: error.to_string(),
                }),
            }
        }

        Ok(report)
    }

    async fn ingest_pages(
        &self,
        source_name: &str,
        pages: &[PageText],
    ) -> Result<usize, IngestError> {
        let chunks = build_chunks(source_name, pages, &self.options)?;
        if chunks.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no readable text in {source_name}"
            )));
        }

        let texts = chunks
            .iter()
            .map(|chunk| chunk.text.clone())
            .collect::<Vec<_>>();
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            embeddings.extend(self.embedder.embed_batch(batch).await?);
        }

        self.index.index_vector_chunks(&chunks, &embeddings).await?;
        info!(
            file = %source_name,
            pages = pages.len(),
            chunks = chunks.len(),
            embedder = self.embedder.name(),
            "document indexed"
        );

        Ok(chunks.len())
    }
}

fn base_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}
