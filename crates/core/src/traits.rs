use crate::{DocumentChunk, RetrievedChunk, SearchError, Turn};
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn index_vector_chunks(
        &self,
        chunks: &[DocumentChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError>;

    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError>;

    async fn count(&self) -> Result<usize, SearchError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn history(&self, session_id: &str) -> Vec<Turn>;

    async fn append(&self, session_id: &str, turns: Vec<Turn>);
}
