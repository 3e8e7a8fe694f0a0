//! HTTP 서버 - axum 라우터와 공유 상태
//!
//! | Method | Path                              |
//! |--------|-----------------------------------|
//! | GET    | /api/v1/ollama/generate           |
//! | GET    | /api/v1/ollama/generate_stream    |
//! | GET    | /api/v1/rag/listRags              |
//! | POST   | /api/v1/rag/upload                |
//! | GET    | /api/v1/rag/search                |
//! | GET    | /health                           |

pub mod response;
mod routes;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::chat::{ChatOptions, RagChat};
use crate::config::AppConfig;
use crate::embedding::{EmbeddingGateway, EmbeddingProvider, OllamaEmbedding};
use crate::error::Result;
use crate::extractor::{ContentExtractor, TextExtractor};
use crate::knowledge::{
    ChunkConfig, Database, IngestionPipeline, KnowledgeRegistry, KnowledgeStore, TokenChunker,
};
use crate::llm::{ChatProvider, OllamaChat};

pub use response::{ApiError, ApiResponse, ChatPayload};

// ============================================================================
// AppState
// ============================================================================

/// 요청 핸들러 공유 상태
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: KnowledgeStore,
    pub registry: KnowledgeRegistry,
    pub pipeline: IngestionPipeline,
    pub chat: RagChat,
}

impl AppState {
    /// 설정으로 Ollama 클라이언트와 SQLite 저장소를 연결
    pub fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let db = Database::open(&config.storage.db_path())?;
        let embedding: Arc<dyn EmbeddingProvider> =
            Arc::new(OllamaEmbedding::new(&config.ollama, &config.embedding)?);
        let llm: Arc<dyn ChatProvider> = Arc::new(OllamaChat::new(&config.ollama, &config.chat)?);

        tracing::info!(
            "Using Ollama at {} (embedding: {}, default chat model: {})",
            config.ollama.base_url,
            config.embedding.model,
            config.chat.default_model
        );

        Self::new(config, db, embedding, llm, Arc::new(ContentExtractor::new()))
    }

    /// 구성 요소를 직접 주입
    pub fn new(
        config: AppConfig,
        db: Database,
        embedding: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn ChatProvider>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self> {
        let store = KnowledgeStore::new(db.clone());
        let registry = KnowledgeRegistry::open(db)?;
        let embedder = Arc::new(EmbeddingGateway::new(embedding, &config.embedding));
        let chunker = TokenChunker::new(ChunkConfig::from(&config.chunking))?;

        let pipeline = IngestionPipeline::new(extractor, chunker, embedder.clone(), store.clone());
        let chat = RagChat::new(embedder, store.clone(), llm, ChatOptions::from(&config.chat));

        Ok(Self {
            config: Arc::new(config),
            store,
            registry,
            pipeline,
            chat,
        })
    }
}

// ============================================================================
// Router
// ============================================================================

/// API 라우터 생성
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.server.max_upload_bytes;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/ollama/generate", get(routes::generate))
        .route("/api/v1/ollama/generate_stream", get(routes::generate_stream))
        .route("/api/v1/rag/listRags", get(routes::list_rags))
        .route("/api/v1/rag/upload", post(routes::upload))
        .route("/api/v1/rag/search", get(routes::search))
        .route("/health", get(routes::health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// 서버 실행 (shutdown 토큰이 취소되면 정상 종료)
pub async fn serve(state: AppState, shutdown: CancellationToken) -> std::io::Result<()> {
    let addr = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("RAG server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
