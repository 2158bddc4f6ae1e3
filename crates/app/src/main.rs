mod chat;
mod server;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use unibot_core::{
    AnswerGenerator, CharacterNgramEmbedder, DocumentAssistant, DocumentIngestor, Embedder,
    HttpEmbedder, HttpEmbedderConfig, InMemorySessionStore, IngestionOptions, LocalVectorStore,
    OpenAiChatModel, OpenAiConfig, QdrantStore, RetrievalOptions, Retriever, VectorIndex,
};
use url::Url;

#[derive(Parser)]
#[command(name = "unibot", version, about = "Question answering over uploaded PDF and TXT files")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the persistent vector index.
    #[arg(long, global = true, env = "UNIBOT_DB_PATH", default_value = "db_unibot")]
    db_path: PathBuf,

    /// Directory for transient upload files.
    #[arg(long, global = true, env = "UNIBOT_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// Vector index backend.
    #[arg(long, global = true, value_enum, env = "UNIBOT_INDEX_BACKEND", default_value_t = IndexBackend::Local)]
    index_backend: IndexBackend,

    /// Qdrant base URL, used with `--index-backend qdrant`.
    #[arg(long, global = true, env = "UNIBOT_QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection.
    #[arg(long, global = true, env = "UNIBOT_QDRANT_COLLECTION", default_value = "unibot_chunks")]
    qdrant_collection: String,

    /// OpenAI-compatible embeddings endpoint. Falls back to the offline n-gram embedder.
    #[arg(long, global = true, env = "UNIBOT_EMBEDDING_URL")]
    embedding_url: Option<String>,

    /// Embedding model name.
    #[arg(long, global = true, env = "UNIBOT_EMBEDDING_MODEL", default_value = "all-MiniLM-L6-v2")]
    embedding_model: String,

    #[arg(long, global = true, env = "UNIBOT_EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// OpenAI-compatible chat completions base URL.
    #[arg(long, global = true, env = "UNIBOT_LLM_URL", default_value = "https://api.groq.com/openai/v1")]
    llm_url: String,

    #[arg(long, global = true, env = "UNIBOT_LLM_MODEL", default_value = "llama-3.3-70b-versatile")]
    llm_model: String,

    #[arg(long, global = true, env = "UNIBOT_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    #[arg(long, global = true, env = "GROQ_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    /// Maximum characters per chunk.
    #[arg(long, global = true, default_value_t = 1000)]
    chunk_size: usize,

    /// Characters shared by consecutive chunks.
    #[arg(long, global = true, default_value_t = 100)]
    chunk_overlap: usize,

    /// Chunks retrieved per question.
    #[arg(long, global = true, default_value_t = 3)]
    top_k: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum IndexBackend {
    Local,
    Qdrant,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API.
    Serve {
        #[arg(long, env = "UNIBOT_HOST", default_value = "127.0.0.1")]
        host: String,
        #[arg(long, env = "UNIBOT_PORT", default_value_t = 8000)]
        port: u16,
        /// Upload body limit in megabytes.
        #[arg(long, default_value_t = 50)]
        max_upload_mb: usize,
    },
    /// Interactive terminal chat against a running API.
    Chat {
        #[arg(long, env = "UNIBOT_SERVER", default_value = "http://localhost:8000")]
        server: String,
    },
    /// Index every PDF and TXT file under a folder.
    Ingest {
        /// Folder that contains documents recursively.
        #[arg(long)]
        folder: String,
    },
}

impl Cli {
    fn ingestion_options(&self) -> IngestionOptions {
        IngestionOptions {
            chunk_max_chars: self.chunk_size,
            chunk_overlap_chars: self.chunk_overlap,
        }
    }

    fn embedder(&self) -> Arc<dyn Embedder> {
        match &self.embedding_url {
            Some(base_url) => Arc::new(HttpEmbedder::new(HttpEmbedderConfig {
                base_url: base_url.clone(),
                model: self.embedding_model.clone(),
                api_key: self.embedding_api_key.clone(),
            })),
            None => Arc::new(CharacterNgramEmbedder::default()),
        }
    }

    async fn vector_index(&self, embedder: &dyn Embedder) -> anyhow::Result<Arc<dyn VectorIndex>> {
        match self.index_backend {
            IndexBackend::Local => Ok(Arc::new(LocalVectorStore::open(&self.db_path).await?)),
            IndexBackend::Qdrant => {
                let dimensions = embedder.embed("dimension probe").await?.len();
                let store = QdrantStore::new(&self.qdrant_url, &self.qdrant_collection, dimensions)?;
                store.ensure_collection().await?;
                Ok(Arc::new(store))
            }
        }
    }

    fn chat_model(&self) -> OpenAiChatModel {
        OpenAiChatModel::new(OpenAiConfig {
            base_url: self.llm_url.clone(),
            model: self.llm_model.clone(),
            api_key: self.llm_api_key.clone(),
            temperature: self.temperature,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "unibot boot"
    );

    match &cli.command {
        Command::Serve {
            host,
            port,
            max_upload_mb,
        } => {
            if cli.llm_api_key.is_none() {
                warn!("no chat model api key configured; questions will fail upstream");
            }

            let embedder = cli.embedder();
            let index = cli.vector_index(embedder.as_ref()).await?;
            let assistant = DocumentAssistant::new(
                DocumentIngestor::new(
                    embedder.clone(),
                    index.clone(),
                    &cli.upload_dir,
                    cli.ingestion_options(),
                ),
                Retriever::new(embedder, index, RetrievalOptions { top_k: cli.top_k })?,
                AnswerGenerator::new(
                    Arc::new(cli.chat_model()),
                    Arc::new(InMemorySessionStore::new()),
                ),
            );
            info!(chunks = assistant.indexed_chunks().await?, "index ready");

            let router = server::build_router(Arc::new(assistant), max_upload_mb * 1024 * 1024);
            server::serve(router, host, *port).await?;
        }
        Command::Chat { server } => {
            chat::run(Url::parse(server)?).await?;
        }
        Command::Ingest { folder } => {
            let embedder = cli.embedder();
            let index = cli.vector_index(embedder.as_ref()).await?;
            let ingestor =
                DocumentIngestor::new(embedder, index, &cli.upload_dir, cli.ingestion_options());

            let report = ingestor.ingest_folder(Path::new(folder)).await?;

            if !report.skipped_files.is_empty() {
                warn!(
                    "skipped_files={} for folder={}",
                    report.skipped_files.len(),
                    folder
                );
                for skipped in &report.skipped_files {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
                }
            }

            println!(
                "{} files, {} chunks ingested at {}",
                report.files_indexed,
                report.chunks_indexed,
                Utc::now().to_rfc3339()
            );
        }
    }

    Ok(())
}
