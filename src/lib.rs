//! rag-knowledge - Ollama 기반 RAG 지식베이스 서비스
//!
//! 업로드된 문서를 청킹/임베딩하여 SQLite에 저장하고,
//! 검색된 청크로 프롬프트를 보강해 LLM 응답(단건/스트리밍)을 제공합니다.

pub mod chat;
pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod knowledge;
pub mod llm;
pub mod server;

#[cfg(test)]
mod test_support;

// Re-exports
pub use chat::{RagAnswer, RagChat};
pub use config::{get_data_dir, AppConfig};
pub use embedding::{EmbeddingGateway, EmbeddingProvider, OllamaEmbedding};
pub use error::{ErrorKind, RagError, Result};
pub use extractor::{ContentExtractor, TextExtractor};
pub use knowledge::{
    split, Chunk, ChunkConfig, Chunker, Database, IngestReport, IngestionPipeline,
    KnowledgeRegistry, KnowledgeStore, RetrievalResult, ScoredChunk, StoreStats, TokenChunker,
    UploadedFile,
};
pub use llm::{ChatProvider, ChatStream, OllamaChat};
pub use server::AppState;
