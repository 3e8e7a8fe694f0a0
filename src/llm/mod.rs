//! LLM 모듈 - Ollama 채팅 API 클라이언트
//!
//! - `ChatProvider`: 채팅 완성 인터페이스 (단건/스트리밍)
//! - `OllamaChat`: Ollama `/api/chat` 구현체 (스트리밍은 NDJSON)
//! - `ChatStream`: 취소 가능한 스트리밍 응답
//!
//! 스트리밍은 한 개의 생산자 태스크가 bounded 채널에 청크를 보내고,
//! 소비자가 `ChatStream`을 drop하면 `CancellationToken`이 취소되어
//! 생산자가 HTTP 응답을 drop(= 업스트림 연결 종료)합니다.
//!
//! ref: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-a-chat-completion

mod stream;

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::config::{ChatConfig, OllamaConfig};
use crate::error::{RagError, Result};

pub use stream::{ChatSink, ChatStream};

/// 정상 종료 사유
pub const FINISH_STOP: &str = "STOP";

// ============================================================================
// Types
// ============================================================================

/// 메시지 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 채팅 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// 채팅 요청
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

/// 단건 채팅 응답
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub model: String,
    pub content: String,
    pub finish_reason: Option<String>,
}

/// 스트리밍 응답 조각
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponseChunk {
    /// 증분 텍스트
    pub content: String,
    /// 마지막 조각이면 종료 사유
    pub finish_reason: Option<String>,
}

// ============================================================================
// ChatProvider Trait
// ============================================================================

/// 채팅 프로바이더 트레이트
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// 단건 완성
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion>;

    /// 스트리밍 완성
    ///
    /// 모델 확인 등 요청 단계의 실패는 `Err`로, 스트림 도중의 실패는
    /// 스트림 아이템으로 전달됩니다.
    async fn stream(&self, request: ChatRequest) -> Result<ChatStream>;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Ollama Chat
// ============================================================================

/// Ollama 채팅 구현체
#[derive(Debug, Clone)]
pub struct OllamaChat {
    client: reqwest::Client,
    endpoint: String,
    buffer: usize,
    /// 응답 헤더 대기 및 스트리밍 조각 사이 대기 한도
    timeout: Duration,
}

/// Ollama `/api/chat` 요청 본문
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

/// Ollama `/api/chat` 응답 (단건 또는 NDJSON 한 줄)
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

impl OllamaChat {
    /// 설정으로 생성
    pub fn new(ollama: &OllamaConfig, config: &ChatConfig) -> Result<Self> {
        // 전체 요청 타임아웃은 스트리밍 본문까지 끊으므로 연결 단계에만 적용
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| RagError::InvalidConfig(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", ollama.base_url.trim_end_matches('/')),
            buffer: config.stream_buffer.max(1),
            timeout: config.timeout(),
        })
    }

    /// 요청 전송 + 상태 코드 확인
    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response> {
        let body = OllamaChatRequest {
            model: &request.model,
            messages: &request.messages,
            stream,
        };

        tracing::debug!(
            "Sending chat request to {} (model: {}, stream: {})",
            self.endpoint,
            request.model,
            stream
        );

        let pending = self.client.post(&self.endpoint).json(&body).send();
        let response = tokio::time::timeout(self.timeout, pending)
            .await
            .map_err(|_| {
                RagError::LlmServiceUnavailable(format!(
                    "chat request timed out after {:?}",
                    self.timeout
                ))
            })?
            .map_err(|e| RagError::LlmServiceUnavailable(format!("chat request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(&request.model, status.as_u16(), &body));
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for OllamaChat {
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion> {
        let response = self.send(&request, false).await?;

        let body = tokio::time::timeout(self.timeout, response.text())
            .await
            .map_err(|_| {
                RagError::LlmServiceUnavailable(format!(
                    "chat response timed out after {:?}",
                    self.timeout
                ))
            })?
            .map_err(|e| {
                RagError::LlmServiceUnavailable(format!("failed to read chat response: {}", e))
            })?;

        let parsed: OllamaChatResponse = serde_json::from_str(&body).map_err(|e| {
            RagError::LlmServiceUnavailable(format!("invalid chat response: {}", e))
        })?;

        if let Some(error) = parsed.error {
            return Err(classify_error(&request.model, 200, &error));
        }

        Ok(ChatCompletion {
            model: parsed.model.unwrap_or(request.model),
            content: parsed.message.map(|m| m.content).unwrap_or_default(),
            finish_reason: Some(finish_reason(parsed.done_reason.as_deref())),
        })
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStream> {
        let response = self.send(&request, true).await?;
        let (sink, stream) = ChatStream::channel(self.buffer);
        let model = request.model;
        let idle = self.timeout;

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            loop {
                let next = tokio::select! {
                    biased;
                    _ = sink.cancelled() => {
                        tracing::debug!("Chat stream cancelled by consumer (model: {})", model);
                        return;
                    }
                    next = tokio::time::timeout(idle, bytes.next()) => next,
                };

                // 조각 사이 대기 한도 초과 (전체 길이 제한은 없음)
                let Ok(next) = next else {
                    sink.send(Err(RagError::LlmServiceUnavailable(format!(
                        "chat stream stalled for {:?}",
                        idle
                    ))))
                    .await;
                    return;
                };

                match next {
                    Some(Ok(chunk)) => {
                        buffer.extend_from_slice(&chunk);

                        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                            let line: Vec<u8> = buffer.drain(..=pos).collect();
                            match parse_stream_line(&model, &line) {
                                Ok(None) => {}
                                Ok(Some(item)) => {
                                    let done = item.finish_reason.is_some();
                                    if !sink.send(Ok(item)).await || done {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    sink.send(Err(e)).await;
                                    return;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        sink.send(Err(RagError::LlmServiceUnavailable(format!(
                            "chat stream interrupted: {}",
                            e
                        ))))
                        .await;
                        return;
                    }
                    None => {
                        // 개행 없이 끝난 마지막 줄
                        match parse_stream_line(&model, &buffer) {
                            Ok(Some(item)) if item.finish_reason.is_some() => {
                                sink.send(Ok(item)).await;
                            }
                            Ok(_) => {
                                sink.send(Err(RagError::LlmServiceUnavailable(
                                    "chat stream ended before completion".to_string(),
                                )))
                                .await;
                            }
                            Err(e) => {
                                sink.send(Err(e)).await;
                            }
                        }
                        return;
                    }
                }
            }
        });

        Ok(stream)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Ollama 에러 응답 분류
///
/// 404, 4xx의 "not found" 메시지, 또는 `model ... not found` 문구는
/// 알 수 없는 모델입니다. 5xx는 메시지와 상관없이 서비스 장애입니다.
fn classify_error(model: &str, status: u16, body: &str) -> RagError {
    let detail = serde_json::from_str::<OllamaChatResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .unwrap_or_else(|| body.to_string());
    let lower = detail.to_lowercase();
    let missing_model = lower.starts_with("model") && lower.contains("not found");
    let client_error = (400..500).contains(&status);

    if status == 404 || (client_error && lower.contains("not found")) || missing_model {
        return RagError::UnknownModel(model.to_string());
    }

    RagError::LlmServiceUnavailable(format!("chat request failed ({}): {}", status, detail))
}

/// NDJSON 한 줄 파싱 (빈 줄은 None)
fn parse_stream_line(model: &str, line: &[u8]) -> Result<Option<ChatResponseChunk>> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let parsed: OllamaChatResponse = serde_json::from_str(line).map_err(|e| {
        RagError::LlmServiceUnavailable(format!("invalid chat stream line: {}", e))
    })?;

    if let Some(error) = parsed.error {
        return Err(classify_error(model, 200, &error));
    }

    Ok(Some(ChatResponseChunk {
        content: parsed.message.map(|m| m.content).unwrap_or_default(),
        finish_reason: parsed
            .done
            .then(|| finish_reason(parsed.done_reason.as_deref())),
    }))
}

/// Ollama done_reason → 대문자 종료 사유 (기본 STOP)
fn finish_reason(done_reason: Option<&str>) -> String {
    done_reason
        .filter(|r| !r.is_empty())
        .map(str::to_uppercase)
        .unwrap_or_else(|| FINISH_STOP.to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_stub;
    use axum::{body::Body, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn request(model: &str) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::user("hi")],
        }
    }

    fn client(base_url: String) -> OllamaChat {
        OllamaChat::new(&OllamaConfig { base_url }, &ChatConfig::default()).unwrap()
    }

    /// drop될 때 플래그를 세우는 가드 (업스트림 연결 종료 관찰용)
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    async fn chat_stub(Json(body): Json<serde_json::Value>) -> axum::response::Response {
        let model = body["model"].as_str().unwrap_or_default().to_string();
        if model == "missing" {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": "model \"missing\" not found, try pulling it first"})),
            )
                .into_response();
        }

        if body["stream"] == serde_json::json!(false) {
            return Json(serde_json::json!({
                "model": model,
                "message": {"role": "assistant", "content": "Hello there"},
                "done": true,
                "done_reason": "stop"
            }))
            .into_response();
        }

        let lines = [
            r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#,
            r#"{"message":{"role":"assistant","content":"lo"},"done":false}"#,
            r#"{"message":{"role":"assistant","content":""},"done":true,"done_reason":"stop"}"#,
        ];
        // 두 번째 줄은 두 조각으로 나눠 보내 버퍼링 확인
        let body = format!("{}\n{}\n{}\n", lines[0], lines[1], lines[2]);
        let (head, tail) = body.split_at(lines[0].len() + 10);
        let parts = vec![
            Ok::<_, std::io::Error>(head.to_string()),
            Ok(tail.to_string()),
        ];
        Body::from_stream(futures::stream::iter(parts)).into_response()
    }

    #[tokio::test]
    async fn test_complete_against_stub() {
        let base_url = spawn_stub(Router::new().route("/api/chat", post(chat_stub))).await;

        let completion = client(base_url).complete(request("llama3")).await.unwrap();
        assert_eq!(completion.content, "Hello there");
        assert_eq!(completion.model, "llama3");
        assert_eq!(completion.finish_reason.as_deref(), Some("STOP"));
    }

    #[tokio::test]
    async fn test_stream_preserves_delta_order() {
        let base_url = spawn_stub(Router::new().route("/api/chat", post(chat_stub))).await;

        let stream = client(base_url).stream(request("llama3")).await.unwrap();
        let items: Vec<ChatResponseChunk> = stream.map(|r| r.unwrap()).collect().await;

        let text: String = items.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(text, "Hello");
        assert_eq!(items.last().unwrap().finish_reason.as_deref(), Some("STOP"));
        assert!(items[..items.len() - 1].iter().all(|c| c.finish_reason.is_none()));
    }

    #[tokio::test]
    async fn test_unknown_model_is_reported_before_streaming() {
        let base_url = spawn_stub(Router::new().route("/api/chat", post(chat_stub))).await;
        let chat = client(base_url);

        let err = chat.stream(request("missing")).await.unwrap_err();
        assert!(matches!(err, RagError::UnknownModel(ref m) if m == "missing"));

        let err = chat.complete(request("missing")).await.unwrap_err();
        assert!(matches!(err, RagError::UnknownModel(_)));
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(format!("http://{}", addr))
            .complete(request("llama3"))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::LlmServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_dropping_stream_closes_upstream_connection() {
        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();

        let app = Router::new().route(
            "/api/chat",
            post(move || {
                let guard = DropFlag(flag.clone());
                async move {
                    // 끝나지 않는 토큰 스트림
                    let stream = futures::stream::unfold(guard, |guard| async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        let line = "{\"message\":{\"content\":\"tok \"},\"done\":false}\n";
                        Some((Ok::<_, std::io::Error>(line.to_string()), guard))
                    });
                    Body::from_stream(stream)
                }
            }),
        );
        let base_url = spawn_stub(app).await;

        let mut stream = client(base_url).stream(request("llama3")).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.content, "tok ");
        drop(stream);

        let observed = tokio::time::timeout(Duration::from_secs(5), async {
            while !closed.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(observed.is_ok(), "upstream body was not dropped after cancellation");
    }

    #[tokio::test]
    async fn test_long_stream_outlives_request_timeout() {
        // 1초 타임아웃, 300ms 간격 5줄 → 전체 1.5초지만 조각 사이는 짧음
        let app = Router::new().route(
            "/api/chat",
            post(|| async {
                let stream = futures::stream::unfold(0u32, |n| async move {
                    if n > 5 {
                        return None;
                    }
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    let line = if n == 5 {
                        "{\"message\":{\"content\":\"\"},\"done\":true}\n".to_string()
                    } else {
                        "{\"message\":{\"content\":\"t\"},\"done\":false}\n".to_string()
                    };
                    Some((Ok::<_, std::io::Error>(line), n + 1))
                });
                Body::from_stream(stream)
            }),
        );
        let base_url = spawn_stub(app).await;
        let config = ChatConfig {
            timeout_secs: 1,
            ..ChatConfig::default()
        };
        let chat = OllamaChat::new(&OllamaConfig { base_url }, &config).unwrap();

        let stream = chat.stream(request("llama3")).await.unwrap();
        let items: Vec<Result<ChatResponseChunk>> = stream.collect().await;

        assert_eq!(items.len(), 6);
        assert!(items.iter().all(|r| r.is_ok()));
        let last = items.last().unwrap().as_ref().unwrap();
        assert_eq!(last.finish_reason.as_deref(), Some("STOP"));
    }

    #[tokio::test]
    async fn test_stalled_stream_reports_unavailable() {
        let app = Router::new().route(
            "/api/chat",
            post(|| async {
                let first = futures::stream::once(async {
                    Ok::<_, std::io::Error>(
                        "{\"message\":{\"content\":\"a\"},\"done\":false}\n".to_string(),
                    )
                });
                let silent = futures::stream::pending::<std::io::Result<String>>();
                Body::from_stream(first.chain(silent))
            }),
        );
        let base_url = spawn_stub(app).await;
        let config = ChatConfig {
            timeout_secs: 1,
            ..ChatConfig::default()
        };
        let chat = OllamaChat::new(&OllamaConfig { base_url }, &config).unwrap();

        let mut stream = chat.stream(request("llama3")).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().content, "a");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, RagError::LlmServiceUnavailable(_)));
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_classify_error_only_blames_model_for_client_errors() {
        assert!(matches!(
            classify_error("m", 404, "{}"),
            RagError::UnknownModel(_)
        ));
        assert!(matches!(
            classify_error("m", 400, r#"{"error":"template not found"}"#),
            RagError::UnknownModel(_)
        ));
        assert!(matches!(
            classify_error("m", 500, r#"{"error":"runner process not found"}"#),
            RagError::LlmServiceUnavailable(_)
        ));
        assert!(matches!(
            classify_error("m", 502, "upstream not found"),
            RagError::LlmServiceUnavailable(_)
        ));
        assert!(matches!(
            classify_error("m", 500, r#"{"error":"model \"m\" not found, try pulling it first"}"#),
            RagError::UnknownModel(_)
        ));
    }

    #[test]
    fn test_parse_stream_line() {
        assert_eq!(parse_stream_line("m", b"  \n").unwrap(), None);

        let item = parse_stream_line("m", br#"{"message":{"content":"x"},"done":false}"#)
            .unwrap()
            .unwrap();
        assert_eq!(item.content, "x");
        assert_eq!(item.finish_reason, None);

        let item = parse_stream_line("m", br#"{"done":true,"done_reason":"length"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(item.finish_reason.as_deref(), Some("LENGTH"));

        let err = parse_stream_line("m", br#"{"error":"model 'm' not found"}"#).unwrap_err();
        assert!(matches!(err, RagError::UnknownModel(_)));

        assert!(parse_stream_line("m", b"not json").is_err());
    }
}
