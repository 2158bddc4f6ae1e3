use crate::ingest::DocumentIngestor;
use crate::llm::{ChatMessage, ChatModel};
use crate::retrieval::{format_context, Retriever};
use crate::traits::SessionStore;
use crate::{
    distinct_sources, Answer, AskError, IngestError, LlmError, RetrievedChunk, SearchError, Turn,
    UploadOutcome,
};
use std::sync::Arc;
use tracing::info;

pub const NO_CONTEXT: &str =
    "No relevant context was found in the uploaded documents for this question.";

pub fn system_prompt(context: &str) -> String {
    let context = if context.trim().is_empty() {
        NO_CONTEXT
    } else {
        context
    };

    format!(
        "Use the following pieces of retrieved context to answer the question. \
         If the context does not contain the answer, say that you don't know. \
         Use a friendly and concise tone, answering in European Portuguese or English to match \
         the language of the latest question. \
         Whenever you use information from a document, cite the file name in parentheses at \
         the end of the sentence.\n\n{context}"
    )
}

pub fn build_messages(context: &str, history: &[Turn], question: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_prompt(context)));
    messages.extend(history.iter().map(|turn| ChatMessage {
        role: turn.role,
        content: turn.content.clone(),
    }));
    messages.push(ChatMessage::user(question));
    messages
}

// Only writer of session history.
pub struct AnswerGenerator {
    model: Arc<dyn ChatModel>,
    sessions: Arc<dyn SessionStore>,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn ChatModel>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { model, sessions }
    }

    pub async fn generate(
        &self,
        question: &str,
        session_id: &str,
        retrieved: &[RetrievedChunk],
    ) -> Result<String, LlmError> {
        let history = self.sessions.history(session_id).await;
        let messages = build_messages(&format_context(retrieved), &history, question);

        let answer = self.model.complete(&messages).await?;

        self.sessions
            .append(
                session_id,
                vec![Turn::user(question), Turn::assistant(answer.clone())],
            )
            .await;

        Ok(answer)
    }
}

pub struct DocumentAssistant {
    ingestor: DocumentIngestor,
    retriever: Retriever,
    generator: AnswerGenerator,
}

impl DocumentAssistant {
    pub fn new(ingestor: DocumentIngestor, retriever: Retriever, generator: AnswerGenerator) -> Self {
        Self {
            ingestor,
            retriever,
            generator,
        }
    }

    pub async fn upload(&self, file_name: &str, bytes: &[u8]) -> Result<UploadOutcome, IngestError> {
        self.ingestor.ingest_upload(file_name, bytes).await
    }

    pub async fn ask(&self, question: &str, session_id: &str) -> Result<Answer, AskError> {
        let retrieved = self.retriever.retrieve(question).await?;
        let answer = self
            .generator
            .generate(question, session_id, &retrieved)
            .await?;

        info!(
            session_id = %session_id,
            retrieved = retrieved.len(),
            "question answered"
        );

        Ok(Answer {
            question: question.to_string(),
            answer,
            sources: distinct_sources(&retrieved),
            session_id: session_id.to_string(),
        })
    }

    pub async fn indexed_chunks(&self) -> Result<usize, SearchError> {
        self.retriever.indexed_chunks().await
    }
}
