//! Ingestion Pipeline - 업로드 파일을 지식베이스로 색인
//!
//! 파일마다: 추출 → 청킹 → 임베딩 → 저장 + 레지스트리 등록 (한 트랜잭션)
//!
//! 한 파일의 실패는 다른 파일에 영향을 주지 않으며 보고서에 기록됩니다.
//! 파이프라인 수준의 재시도는 없습니다 (임베딩 게이트웨이가 재시도 담당).

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::embedding::EmbeddingGateway;
use crate::error::{ErrorKind, RagError, Result};
use crate::extractor::TextExtractor;

use super::chunker::{Chunker, TokenChunker};
use super::registry::validate_name;
use super::store::KnowledgeStore;
use super::vector::Chunk;

// ============================================================================
// Types
// ============================================================================

/// 업로드된 파일 (요청 범위에서만 유지)
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// 원본 파일 이름
    pub name: String,
    /// 파일 내용
    pub content: Vec<u8>,
    /// MIME 타입 (multipart 헤더)
    pub content_type: Option<String>,
}

/// 파일별 처리 결과
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOutcome {
    pub file_name: String,
    #[serde(flatten)]
    pub status: FileStatus,
}

/// 파일 처리 상태
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    /// 색인 완료
    Ingested {
        #[serde(rename = "docId")]
        doc_id: String,
        chunks: usize,
    },
    /// 실패 (에러 분류 + 공개 메시지)
    Failed { kind: ErrorKind, message: String },
    /// 취소로 처리하지 않음
    Skipped,
}

/// 업로드 처리 보고서
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub knowledge_base: String,
    pub files: Vec<FileOutcome>,
}

impl IngestReport {
    /// 모든 파일이 색인되었는지
    pub fn all_succeeded(&self) -> bool {
        self.files
            .iter()
            .all(|f| matches!(f.status, FileStatus::Ingested { .. }))
    }

    /// 색인된 파일 수
    pub fn ingested_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Ingested { .. }))
            .count()
    }

    /// 실패한 파일 수
    pub fn failed_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Failed { .. }))
            .count()
    }

    /// 저장된 총 청크 수
    pub fn total_chunks(&self) -> usize {
        self.files
            .iter()
            .map(|f| match f.status {
                FileStatus::Ingested { chunks, .. } => chunks,
                _ => 0,
            })
            .sum()
    }
}

/// 문서 ID: 파일 이름의 SHA-256 앞 16자리 (hex)
///
/// 지식베이스 안에서 파일 이름이 같으면 같은 문서로 보고,
/// 내용이 바뀌어도 이전 버전의 청크를 교체합니다.
pub fn document_id(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());

    digest
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

// ============================================================================
// IngestionPipeline
// ============================================================================

/// 업로드 색인 파이프라인
#[derive(Clone)]
pub struct IngestionPipeline {
    extractor: Arc<dyn TextExtractor>,
    chunker: TokenChunker,
    embedder: Arc<EmbeddingGateway>,
    store: KnowledgeStore,
}

impl IngestionPipeline {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        chunker: TokenChunker,
        embedder: Arc<EmbeddingGateway>,
        store: KnowledgeStore,
    ) -> Self {
        Self {
            extractor,
            chunker,
            embedder,
            store,
        }
    }

    /// 파일 목록을 지식베이스에 색인
    ///
    /// # Errors
    /// 지식베이스 이름이 유효하지 않으면 `InvalidConfig`.
    /// 파일 단위 실패는 보고서에만 기록됩니다.
    pub async fn ingest(&self, knowledge_base: &str, files: Vec<UploadedFile>) -> Result<IngestReport> {
        self.ingest_with_cancel(knowledge_base, files, &CancellationToken::new())
            .await
    }

    /// 취소 가능한 색인 (파일 사이에서 취소 확인)
    pub async fn ingest_with_cancel(
        &self,
        knowledge_base: &str,
        files: Vec<UploadedFile>,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        validate_name(knowledge_base)?;

        tracing::info!(
            "Ingesting {} file(s) into knowledge base '{}'",
            files.len(),
            knowledge_base
        );

        let mut outcomes = Vec::with_capacity(files.len());

        for file in files {
            if cancel.is_cancelled() {
                outcomes.push(FileOutcome {
                    file_name: file.name,
                    status: FileStatus::Skipped,
                });
                continue;
            }

            let status = match self.ingest_file(knowledge_base, &file).await {
                Ok((doc_id, chunks)) => {
                    tracing::info!(
                        "Ingested {} ({} chunks) into '{}'",
                        file.name,
                        chunks,
                        knowledge_base
                    );
                    FileStatus::Ingested { doc_id, chunks }
                }
                Err(e) => {
                    tracing::warn!("Failed to ingest {}: {}", file.name, e);
                    FileStatus::Failed {
                        kind: e.kind(),
                        message: e.public_message(),
                    }
                }
            };

            outcomes.push(FileOutcome {
                file_name: file.name,
                status,
            });
        }

        let report = IngestReport {
            knowledge_base: knowledge_base.to_string(),
            files: outcomes,
        };

        tracing::info!(
            "Ingestion into '{}' finished: {} ingested, {} failed, {} chunks",
            knowledge_base,
            report.ingested_count(),
            report.failed_count(),
            report.total_chunks()
        );

        Ok(report)
    }

    /// 단일 파일 처리
    async fn ingest_file(&self, knowledge_base: &str, file: &UploadedFile) -> Result<(String, usize)> {
        let text = self.extractor.extract(file).await?;
        let pieces = self.chunker.chunk(&text);
        let doc_id = document_id(&file.name);

        tracing::debug!("{}: {} chunks via {}", file.name, pieces.len(), self.chunker.name());

        let mut chunks = Vec::with_capacity(pieces.len());
        if !pieces.is_empty() {
            let embeddings = self.embedder.embed(&pieces).await?;
            if embeddings.len() != pieces.len() {
                return Err(RagError::EmbeddingModelError(format!(
                    "expected {} embeddings, got {}",
                    pieces.len(),
                    embeddings.len()
                )));
            }

            chunks = pieces
                .into_iter()
                .zip(embeddings)
                .enumerate()
                .map(|(offset, (text, embedding))| Chunk {
                    text,
                    embedding,
                    knowledge_base: knowledge_base.to_string(),
                    source_doc_id: doc_id.clone(),
                    offset: offset as u32,
                })
                .collect();
        }

        // 텍스트가 없는 파일도 지식베이스 이름은 등록 (이전 버전 청크는 제거)
        let stored = self
            .store
            .replace_document(knowledge_base, &doc_id, &chunks)?;
        Ok((doc_id, stored))
    }
}

// ============================================================================
// Tests
// ============================================================================
