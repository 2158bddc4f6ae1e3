use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use unibot_core::{Answer, AskError, DocumentAssistant, IngestError, SearchError, UploadOutcome};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        ApiError::Internal(error.to_string())
    }
}

impl From<AskError> for ApiError {
    fn from(error: AskError) -> Self {
        ApiError::Internal(error.to_string())
    }
}

impl From<SearchError> for ApiError {
    fn from(error: SearchError) -> Self {
        ApiError::Internal(error.to_string())
    }
}

impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        ApiError::InvalidRequest(error.body_text())
    }
}

#[derive(Clone)]
pub struct AppState {
    assistant: Arc<DocumentAssistant>,
}

pub fn build_router(assistant: Arc<DocumentAssistant>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/upload", post(upload_handler))
        .route("/ask", get(ask_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { assistant })
}

pub async fn serve(router: Router, host: &str, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!(addr = %listener.local_addr()?, "unibot api listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}

async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadOutcome>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::InvalidRequest("`file` field has no file name".to_string()))?;
        let bytes = field.bytes().await?;

        let outcome = state
            .assistant
            .upload(&file_name, &bytes)
            .await
            .map_err(|error| {
                error!(file = %file_name, %error, "upload failed");
                ApiError::from(error)
            })?;
        return Ok(Json(outcome));
    }

    Err(ApiError::InvalidRequest(
        "missing multipart field `file`".to_string(),
    ))
}

fn default_session_id() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
pub struct AskParams {
    question: String,
    #[serde(default = "default_session_id")]
    session_id: String,
}

async fn ask_handler(
    State(state): State<AppState>,
    Query(params): Query<AskParams>,
) -> Result<Json<Answer>, ApiError> {
    state
        .assistant
        .ask(&params.question, &params.session_id)
        .await
        .map(Json)
        .map_err(|error| {
            error!(session_id = %params.session_id, %error, "ask failed");
            ApiError::from(error)
        })
}

async fn health_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let chunks = state.assistant.indexed_chunks().await?;
    Ok(Json(json!({ "status": "ok", "chunks": chunks })))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use serde_json::Value;
    use tempfile::{tempdir, TempDir};
    use tower::util::ServiceExt;
    use unibot_core::{
        AnswerGenerator, CharacterNgramEmbedder, ChatMessage, ChatModel, DocumentIngestor,
        InMemorySessionStore, IngestionOptions, LlmError, LocalVectorStore, RetrievalOptions,
        Retriever,
    };

    pub(crate) struct EchoContextModel;

    #[async_trait]
    impl ChatModel for EchoContextModel {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            let system = messages
                .first()
                .map(|message| message.content.as_str())
                .unwrap_or_default();
            Ok(if system.contains("Paris is the capital of France") {
                "Paris is the capital of France (notes.txt).".to_string()
            } else {
                "I don't know.".to_string()
            })
        }
    }

    struct FailingModel;

    #[async_trait]
    impl ChatModel for FailingModel {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
            Err(LlmError::Api {
                status: 503,
                message: "model overloaded".to_string(),
            })
        }
    }

    pub(crate) async fn test_app(model: Arc<dyn ChatModel>) -> (TempDir, Router) {
        let root = tempdir().expect("tempdir");
        let embedder = Arc::new(CharacterNgramEmbedder::default());
        let index = Arc::new(
            LocalVectorStore::open(root.path().join("db"))
                .await
                .expect("index opens"),
        );
        let assistant = DocumentAssistant::new(
            DocumentIngestor::new(
                embedder.clone(),
                index.clone(),
                root.path().join("uploads"),
                IngestionOptions::default(),
            ),
            Retriever::new(embedder, index, RetrievalOptions::default()).expect("retriever"),
            AnswerGenerator::new(model, Arc::new(InMemorySessionStore::new())),
        );
        (root, build_router(Arc::new(assistant), 1024 * 1024))
    }

    fn multipart_request(field: &str, file_name: &str, content: &[u8]) -> Request<Body> {
        let boundary = "unibot-test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn upload_text_file_succeeds() {
        let (_root, app) = test_app(Arc::new(EchoContextModel)).await;

        let response = app
            .oneshot(multipart_request(
                "file",
                "notes.txt",
                b"Paris is the capital of France.",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "status": "success", "message": "notes.txt uploaded" })
        );
    }

    #[tokio::test]
    async fn unsupported_upload_is_a_normal_result() {
        let (_root, app) = test_app(Arc::new(EchoContextModel)).await;

        let response = app
            .oneshot(multipart_request("file", "slides.pptx", b"PK"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "status": "error", "message": "Format not supported" })
        );
    }

    #[tokio::test]
    async fn unreadable_pdf_is_a_server_error_with_detail() {
        let (_root, app) = test_app(Arc::new(EchoContextModel)).await;

        let response = app
            .oneshot(multipart_request("file", "broken.pdf", b"%PDF-1.4\n%broken"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(body["detail"]
            .as_str()
            .is_some_and(|detail| detail.starts_with("pdf parse error")));
    }

    #[tokio::test]
    async fn upload_without_file_field_is_rejected() {
        let (_root, app) = test_app(Arc::new(EchoContextModel)).await;

        let response = app
            .oneshot(multipart_request("document", "notes.txt", b"text"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ask_answers_with_sources_and_default_session() {
        let (_root, app) = test_app(Arc::new(EchoContextModel)).await;

        let upload = app
            .clone()
            .oneshot(multipart_request(
                "file",
                "notes.txt",
                b"Paris is the capital of France.",
            ))
            .await
            .unwrap();
        assert_eq!(upload.status(), StatusCode::OK);

        let response = app
            .oneshot(get("/ask?question=What%20is%20the%20capital%20of%20France%3F"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["question"], "What is the capital of France?");
        assert!(body["answer"]
            .as_str()
            .is_some_and(|answer| answer.contains("Paris")));
        assert_eq!(body["sources"], json!(["notes.txt"]));
        assert_eq!(body["session_id"], "default");
    }

    #[tokio::test]
    async fn ask_echoes_explicit_session_id() {
        let (_root, app) = test_app(Arc::new(EchoContextModel)).await;

        let response = app
            .oneshot(get("/ask?question=hello&session_id=abc-123"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["session_id"], "abc-123");
        assert_eq!(body["sources"], json!([]));
    }

    #[tokio::test]
    async fn model_failure_maps_to_500_detail() {
        let (_root, app) = test_app(Arc::new(FailingModel)).await;

        let response = app.oneshot(get("/ask?question=hello")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await,
            json!({ "detail": "chat api error: 503 - model overloaded" })
        );
    }

    #[tokio::test]
    async fn health_reports_chunk_count() {
        let (_root, app) = test_app(Arc::new(EchoContextModel)).await;

        let response = app.oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "status": "ok", "chunks": 0 }));
    }
}
