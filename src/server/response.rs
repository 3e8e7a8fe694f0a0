//! HTTP 응답 envelope 및 채팅 응답 페이로드
//!
//! 모든 JSON 응답은 `{code, message, data}` 형식입니다.
//! `code`: 0 성공, 1 실패 / `data`: 없으면 생략

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::chat::RagAnswer;
use crate::error::{ErrorKind, RagError};
use crate::knowledge::RetrievalResult;
use crate::llm::ChatResponseChunk;

pub const CODE_SUCCESS: i32 = 0;
pub const CODE_FAIL: i32 = 1;

// ============================================================================
// ApiResponse
// ============================================================================

/// 공통 응답 envelope
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: CODE_SUCCESS,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    /// 실패 응답 + 부가 데이터 (예: 업로드 보고서)
    pub fn fail_with(message: impl Into<String>, data: T) -> Self {
        Self {
            code: CODE_FAIL,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn fail(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code: CODE_FAIL,
            message: if message.is_empty() {
                "fail".to_string()
            } else {
                message
            },
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

// ============================================================================
// ApiError
// ============================================================================

/// 핸들러 에러 → 실패 envelope
#[derive(Debug)]
pub struct ApiError(pub RagError);

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        Self(err)
    }
}

/// 에러 분류별 HTTP 상태
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidConfig => StatusCode::BAD_REQUEST,
        ErrorKind::UnknownKnowledgeBase | ErrorKind::UnknownModel => StatusCode::NOT_FOUND,
        ErrorKind::ExtractionFailed => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::EmbeddingModelError => StatusCode::BAD_GATEWAY,
        ErrorKind::EmbeddingServiceUnavailable | ErrorKind::LlmServiceUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorKind::StoreUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected: {}", self.0);
        }

        (status, ApiResponse::fail(self.0.public_message())).into_response()
    }
}

// ============================================================================
// Chat Payload
// ============================================================================

/// 채팅 응답 페이로드 (단건/스트림 이벤트 공용)
///
/// `{"model":..,"result":{"output":{"content":..},"metadata":{"finishReason":..}}}`
#[derive(Debug, Clone, Serialize)]
pub struct ChatPayload {
    pub model: String,
    pub result: ChatResult,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: RetrievalResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResult {
    pub output: ChatOutput,
    pub metadata: ChatMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutput {
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMetadata {
    pub finish_reason: Option<String>,
}

impl ChatPayload {
    fn new(model: &str, content: String, finish_reason: Option<String>) -> Self {
        Self {
            model: model.to_string(),
            result: ChatResult {
                output: ChatOutput { content },
                metadata: ChatMetadata { finish_reason },
            },
            sources: vec![],
        }
    }

    /// 스트림 조각 → 이벤트 페이로드
    pub fn from_chunk(model: &str, chunk: ChatResponseChunk) -> Self {
        Self::new(model, chunk.content, chunk.finish_reason)
    }
}

impl From<RagAnswer> for ChatPayload {
    fn from(answer: RagAnswer) -> Self {
        let mut payload = Self::new(&answer.model, answer.content, answer.finish_reason);
        payload.sources = answer.sources;
        payload
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope() {
        let json = serde_json::to_value(ApiResponse::success(vec!["a", "b"])).unwrap();
        assert_eq!(json, serde_json::json!({"code": 0, "message": "success", "data": ["a", "b"]}));
    }

    #[test]
    fn test_fail_envelope_omits_data() {
        let json = serde_json::to_value(ApiResponse::fail("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"code": 1, "message": "boom"}));

        let json = serde_json::to_value(ApiResponse::fail("")).unwrap();
        assert_eq!(json["message"], "fail");
    }

    #[test]
    fn test_chat_payload_shape() {
        let payload = ChatPayload::from_chunk(
            "llama3",
            ChatResponseChunk {
                content: "Hi".to_string(),
                finish_reason: None,
            },
        );
        let json = serde_json::to_value(payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "llama3",
                "result": {"output": {"content": "Hi"}, "metadata": {"finishReason": null}}
            })
        );
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_for(ErrorKind::InvalidConfig), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::UnknownModel), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(ErrorKind::LlmServiceUnavailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
