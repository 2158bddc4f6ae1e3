use crate::embeddings::Embedder;
use crate::traits::VectorIndex;
use crate::{AskError, RetrievalOptions, RetrievedChunk, SearchError};
use std::sync::Arc;

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    options: RetrievalOptions,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        options: RetrievalOptions,
    ) -> Result<Self, SearchError> {
        if options.top_k == 0 {
            return Err(SearchError::Request("top_k must be at least 1".to_string()));
        }
        Ok(Self {
            embedder,
            index,
            options,
        })
    }

    pub async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedChunk>, AskError> {
        let query_vector = self.embedder.embed(question).await?;
        let hits = self
            .index
            .search_vector(&query_vector, self.options.top_k)
            .await?;
        Ok(hits)
    }

    pub async fn indexed_chunks(&self) -> Result<usize, SearchError> {
        self.index.count().await
    }
}

pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|chunk| chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CharacterNgramEmbedder, DocumentChunk, LocalVectorStore};
    use tempfile::tempdir;

    #[test]
    fn context_is_blank_line_separated() {
        let chunk = |text: &str| RetrievedChunk {
            text: text.to_string(),
            source_name: "a.txt".to_string(),
            page: None,
            score: 1.0,
        };
        assert_eq!(format_context(&[chunk("one"), chunk("two")]), "one\n\ntwo");
        assert_eq!(format_context(&[]), "");
    }

    #[tokio::test]
    async fn zero_top_k_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = LocalVectorStore::open(dir.path()).await?;

        let result = Retriever::new(
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(index),
            RetrievalOptions { top_k: 0 },
        );
        assert!(result.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn retrieves_at_most_top_k_across_all_documents() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempdir()?;
        let embedder = CharacterNgramEmbedder::default();
        let index = Arc::new(LocalVectorStore::open(dir.path()).await?);

        let texts = [
            ("a.txt", "The Tagus river flows through Lisbon."),
            ("b.txt", "Paris is the capital of France."),
            ("c.pdf", "France borders Spain and Belgium."),
            ("d.txt", "Photosynthesis happens in chloroplasts."),
        ];
        let chunks = texts
            .iter()
            .enumerate()
            .map(|(index, (name, text))| DocumentChunk {
                chunk_id: format!("c{index}"),
                source_name: name.to_string(),
                page: None,
                chunk_index: index as u64,
                text: text.to_string(),
            })
            .collect::<Vec<_>>();
        let vectors = texts
            .iter()
            .map(|(_, text)| embedder.embed_text(text))
            .collect::<Vec<_>>();
        index.index_vector_chunks(&chunks, &vectors).await?;

        let retriever = Retriever::new(Arc::new(embedder), index, RetrievalOptions::default())?;
        let hits = retriever.retrieve("Paris is the capital of France.").await?;

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].source_name, "b.txt");
        assert_eq!(retriever.indexed_chunks().await?, 4);
        Ok(())
    }
}
