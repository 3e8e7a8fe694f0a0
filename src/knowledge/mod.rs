//! Knowledge 모듈 - RAG 지식 저장소
//!
//! - Db: 저장소와 레지스트리가 공유하는 SQLite 연결
//! - Store: 지식베이스별 청크/벡터 저장 + 코사인 유사도 검색
//! - Registry: 지식베이스 이름 집합
//! - Chunker: 토큰 경계 텍스트 분할
//! - Pipeline: 업로드 파일 → 추출 → 청킹 → 임베딩 → 저장

mod chunker;
mod db;
mod pipeline;
mod registry;
mod store;
mod vector;

// Re-exports
pub(crate) use chunker::floor_char_boundary;
pub use chunker::{split, ChunkConfig, Chunker, TokenChunker};
pub use db::Database;
pub use pipeline::{document_id, FileOutcome, FileStatus, IngestReport, IngestionPipeline, UploadedFile};
pub use registry::{validate_name, KnowledgeRegistry, MAX_NAME_CHARS};
pub use store::{KnowledgeStore, StoreStats};
pub use vector::{cosine_similarity, Chunk, RetrievalResult, ScoredChunk};
