//! 에러 타입 - RAG 서비스 공통 에러 분류
//!
//! 라이브러리 계층은 `RagError`를 반환하고,
//! CLI/부트스트랩 계층은 `anyhow`로 감싸서 사용합니다.

use serde::Serialize;
use thiserror::Error;

/// RAG 서비스 결과 타입
pub type Result<T> = std::result::Result<T, RagError>;

// ============================================================================
// RagError
// ============================================================================

/// RAG 서비스 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 잘못된 호출 파라미터 또는 설정 (예: overlap >= max_tokens)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// 임베딩 서비스 전송 실패 (재시도 대상)
    #[error("embedding service unavailable: {0}")]
    EmbeddingServiceUnavailable(String),

    /// 임베딩 모델 응답 오류 (재시도하지 않음)
    #[error("embedding model error: {0}")]
    EmbeddingModelError(String),

    /// 지식 저장소 접근 불가
    #[error("knowledge store unavailable: {0}")]
    StoreUnavailable(String),

    /// 등록되지 않은 지식베이스
    #[error("unknown knowledge base: {0}")]
    UnknownKnowledgeBase(String),

    /// LLM 서비스 전송 실패
    #[error("LLM service unavailable: {0}")]
    LlmServiceUnavailable(String),

    /// LLM 서비스가 인식하지 못하는 모델
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// 파일 텍스트 추출 실패
    #[error("text extraction failed: {0}")]
    ExtractionFailed(String),
}

impl RagError {
    /// 에러 분류
    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            RagError::EmbeddingServiceUnavailable(_) => ErrorKind::EmbeddingServiceUnavailable,
            RagError::EmbeddingModelError(_) => ErrorKind::EmbeddingModelError,
            RagError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            RagError::UnknownKnowledgeBase(_) => ErrorKind::UnknownKnowledgeBase,
            RagError::LlmServiceUnavailable(_) => ErrorKind::LlmServiceUnavailable,
            RagError::UnknownModel(_) => ErrorKind::UnknownModel,
            RagError::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
        }
    }

    /// 전송 계층 일시 장애 여부 (임베딩 게이트웨이 재시도 판단용)
    pub fn is_transient(&self) -> bool {
        matches!(self, RagError::EmbeddingServiceUnavailable(_))
    }

    /// 사용자에게 노출할 메시지
    ///
    /// 내부 원인(소스 에러, 스택)은 포함하지 않습니다.
    /// 호출자가 입력한 값에 대한 에러만 상세 내용을 포함합니다.
    pub fn public_message(&self) -> String {
        match self {
            RagError::InvalidConfig(detail) => format!("invalid request: {}", detail),
            RagError::UnknownKnowledgeBase(name) => format!("unknown knowledge base: {}", name),
            RagError::UnknownModel(model) => format!("unknown model: {}", model),
            other => other.kind().message().to_string(),
        }
    }
}

impl From<rusqlite::Error> for RagError {
    fn from(err: rusqlite::Error) -> Self {
        RagError::StoreUnavailable(err.to_string())
    }
}

// ============================================================================
// ErrorKind
// ============================================================================

/// 에러 종류 (직렬화 가능한 분류 태그)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidConfig,
    EmbeddingServiceUnavailable,
    EmbeddingModelError,
    StoreUnavailable,
    UnknownKnowledgeBase,
    LlmServiceUnavailable,
    UnknownModel,
    ExtractionFailed,
}

impl ErrorKind {
    /// snake_case 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::EmbeddingServiceUnavailable => "embedding_service_unavailable",
            ErrorKind::EmbeddingModelError => "embedding_model_error",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::UnknownKnowledgeBase => "unknown_knowledge_base",
            ErrorKind::LlmServiceUnavailable => "llm_service_unavailable",
            ErrorKind::UnknownModel => "unknown_model",
            ErrorKind::ExtractionFailed => "extraction_failed",
        }
    }

    /// 분류별 기본 사용자 메시지
    pub fn message(&self) -> &'static str {
        match self {
            ErrorKind::InvalidConfig => "invalid request",
            ErrorKind::EmbeddingServiceUnavailable => "embedding service is unavailable",
            ErrorKind::EmbeddingModelError => "embedding model returned an invalid response",
            ErrorKind::StoreUnavailable => "knowledge store is unavailable",
            ErrorKind::UnknownKnowledgeBase => "unknown knowledge base",
            ErrorKind::LlmServiceUnavailable => "LLM service is unavailable",
            ErrorKind::UnknownModel => "unknown model",
            ErrorKind::ExtractionFailed => "could not extract text from file",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            RagError::InvalidConfig("x".into()).kind(),
            ErrorKind::InvalidConfig
        );
        assert_eq!(
            RagError::UnknownModel("m".into()).kind().as_str(),
            "unknown_model"
        );
    }

    #[test]
    fn test_only_embedding_transport_is_transient() {
        assert!(RagError::EmbeddingServiceUnavailable("timeout".into()).is_transient());
        assert!(!RagError::EmbeddingModelError("bad".into()).is_transient());
        assert!(!RagError::LlmServiceUnavailable("down".into()).is_transient());
    }

    #[test]
    fn test_public_message_hides_internal_detail() {
        let err = RagError::StoreUnavailable("disk I/O error at /var/lib/x.db".into());
        assert_eq!(err.public_message(), "knowledge store is unavailable");

        let err = RagError::UnknownModel("llama9".into());
        assert_eq!(err.public_message(), "unknown model: llama9");
    }

    #[test]
    fn test_sqlite_error_maps_to_store_unavailable() {
        let err: RagError = rusqlite::Error::InvalidQuery.into();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    }
}
