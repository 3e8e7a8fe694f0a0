//! 요청 핸들러

use std::convert::Infallible;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::Deserialize;

use crate::error::RagError;
use crate::knowledge::{RetrievalResult, UploadedFile};

use super::response::{ApiError, ApiResponse, ChatPayload};
use super::AppState;

type ApiResult<T> = std::result::Result<T, ApiError>;

// ============================================================================
// Parameters
// ============================================================================

/// generate / generate_stream 쿼리
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateParams {
    pub model: Option<String>,
    pub message: Option<String>,
    pub rag_tag: Option<String>,
    pub top_k: Option<usize>,
}

/// search 쿼리
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub rag_tag: Option<String>,
    pub query: Option<String>,
    pub top_k: Option<usize>,
}

/// 검증된 채팅 요청
struct ChatArgs {
    model: String,
    message: String,
    rag_tag: Option<String>,
    top_k: Option<usize>,
}

impl GenerateParams {
    fn into_args(self, state: &AppState) -> Result<ChatArgs, RagError> {
        let message = self
            .message
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| RagError::InvalidConfig("message is required".to_string()))?;

        Ok(ChatArgs {
            model: self
                .model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| state.config.chat.default_model.clone()),
            message,
            rag_tag: self.rag_tag.filter(|t| !t.trim().is_empty()),
            top_k: self.top_k,
        })
    }
}

fn query_error(rejection: QueryRejection) -> ApiError {
    ApiError(RagError::InvalidConfig(rejection.body_text()))
}

// ============================================================================
// Chat
// ============================================================================

/// GET /api/v1/ollama/generate
pub async fn generate(
    State(state): State<AppState>,
    params: Result<Query<GenerateParams>, QueryRejection>,
) -> ApiResult<ApiResponse<ChatPayload>> {
    let Query(params) = params.map_err(query_error)?;
    let args = params.into_args(&state)?;

    let answer = state
        .chat
        .ask(&args.model, &args.message, args.rag_tag.as_deref(), args.top_k)
        .await?;

    Ok(ApiResponse::success(ChatPayload::from(answer)))
}

/// GET /api/v1/ollama/generate_stream
///
/// 각 SSE 이벤트는 부분 채팅 응답입니다. 도중 실패는 `error` 이벤트
/// (실패 envelope)로 전달되고 스트림이 닫힙니다.
pub async fn generate_stream(
    State(state): State<AppState>,
    params: Result<Query<GenerateParams>, QueryRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Query(params) = params.map_err(query_error)?;
    let args = params.into_args(&state)?;

    let stream = state
        .chat
        .ask_stream(&args.model, &args.message, args.rag_tag.as_deref(), args.top_k)
        .await?;

    let model = args.model;
    // SSE 바디가 drop되면 ChatStream도 drop → 생산자 취소
    let events = stream.map(move |item| {
        let event = match item {
            Ok(chunk) => Event::default().json_data(ChatPayload::from_chunk(&model, chunk)),
            Err(e) => {
                tracing::warn!("Chat stream failed: {}", e);
                Event::default()
                    .event("error")
                    .json_data(ApiResponse::fail(e.public_message()))
            }
        };

        Ok::<_, Infallible>(event.unwrap_or_else(|_| {
            Event::default()
                .event("error")
                .data(r#"{"code":1,"message":"fail"}"#)
        }))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

// ============================================================================
// Knowledge
// ============================================================================

/// GET /api/v1/rag/listRags
pub async fn list_rags(State(state): State<AppState>) -> ApiResult<ApiResponse<Vec<String>>> {
    let names = state.registry.list()?;
    Ok(ApiResponse::success(names.into_iter().collect()))
}

/// POST /api/v1/rag/upload (multipart: `ragName`, `file`...)
pub async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Response> {
    let mut multipart = multipart
        .map_err(|e| ApiError(RagError::InvalidConfig(e.body_text())))?;

    let mut rag_name: Option<String> = None;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("ragName") => {
                rag_name = Some(field.text().await.map_err(multipart_error)?);
            }
            Some("file") => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let content = field.bytes().await.map_err(multipart_error)?;

                files.push(UploadedFile {
                    name,
                    content: content.to_vec(),
                    content_type,
                });
            }
            other => {
                tracing::debug!("Ignoring multipart field {:?}", other);
            }
        }
    }

    let rag_name = rag_name
        .ok_or_else(|| RagError::InvalidConfig("ragName is required".to_string()))?;
    if files.is_empty() {
        return Err(RagError::InvalidConfig("at least one file is required".to_string()).into());
    }

    tracing::info!("Upload of {} file(s) into '{}'", files.len(), rag_name);

    let report = state.pipeline.ingest(&rag_name, files).await?;

    if report.ingested_count() == 0 {
        let response = ApiResponse::fail_with("no file could be ingested", report);
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, response).into_response());
    }

    Ok(ApiResponse::success(report).into_response())
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError(RagError::InvalidConfig(format!("invalid multipart body: {}", err.body_text())))
}

/// GET /api/v1/rag/search
pub async fn search(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> ApiResult<ApiResponse<RetrievalResult>> {
    let Query(params) = params.map_err(query_error)?;

    let rag_tag = params
        .rag_tag
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| RagError::InvalidConfig("ragTag is required".to_string()))?;
    let query = params
        .query
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| RagError::InvalidConfig("query is required".to_string()))?;

    if !state.registry.contains(&rag_tag)? {
        return Err(RagError::UnknownKnowledgeBase(rag_tag).into());
    }

    let top_k = params.top_k.unwrap_or(state.config.chat.default_top_k);
    let results = state.chat.retrieve(&query, &rag_tag, top_k).await?;

    Ok(ApiResponse::success(results))
}

// ============================================================================
// Health
// ============================================================================

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================================
// Tests
// ============================================================================
