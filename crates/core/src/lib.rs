pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod retrieval;
pub mod session;
pub mod stores;
pub mod traits;

pub use chunking::{build_chunks, split_text, ChunkingConfig};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, HttpEmbedder, HttpEmbedderConfig,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{AskError, EmbedError, IngestError, LlmError, SearchError};
pub use extractor::{load_document, PageText, PdfExtractor};
pub use ingest::{discover_documents, DocumentIngestor, IngestionReport, SkippedDocument};
pub use llm::{ChatMessage, ChatModel, OpenAiChatModel, OpenAiConfig};
pub use models::{
    distinct_sources, Answer, DocumentChunk, DocumentFormat, IndexEntry, IngestionOptions,
    RetrievalOptions, RetrievedChunk, Role, Turn, UploadOutcome, UploadStatus,
};
pub use orchestrator::{build_messages, system_prompt, AnswerGenerator, DocumentAssistant};
pub use retrieval::{format_context, Retriever};
pub use session::InMemorySessionStore;
pub use stores::{LocalVectorStore, QdrantStore};
pub use traits::{SessionStore, VectorIndex};
