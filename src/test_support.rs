//! 테스트용 스텁 프로바이더와 스텁 HTTP 서버

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use async_trait::async_trait;
use axum::Router;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extractor::TextExtractor;
use crate::knowledge::UploadedFile;
use crate::llm::{
    ChatCompletion, ChatProvider, ChatRequest, ChatResponseChunk, ChatStream, FINISH_STOP,
};

/// axum 라우터를 임의 포트에 띄우고 base URL 반환
pub async fn spawn_stub(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

// ============================================================================
// HashEmbedding
// ============================================================================

/// 결정적 bag-of-words 임베딩 (같은 텍스트 → 같은 벡터)
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.dimension];
        for word in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            v[(hasher.finish() % self.dimension as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn name(&self) -> &str {
        "hash"
    }
}

// ============================================================================
// FailingExtractor
// ============================================================================

/// 지정한 파일 이름만 추출 실패, 나머지는 UTF-8 디코딩
pub struct FailingExtractor {
    fail_on: String,
}

impl FailingExtractor {
    pub fn new(fail_on: &str) -> Self {
        Self {
            fail_on: fail_on.to_string(),
        }
    }
}

#[async_trait]
impl TextExtractor for FailingExtractor {
    async fn extract(&self, file: &UploadedFile) -> Result<String> {
        if file.name == self.fail_on {
            return Err(RagError::ExtractionFailed(format!("{}: corrupt", file.name)));
        }
        Ok(String::from_utf8_lossy(&file.content).into_owned())
    }
}

// ============================================================================
// ScriptedChat
// ============================================================================

/// 고정된 델타를 돌려주는 채팅 프로바이더 (마지막 요청 기록)
pub struct ScriptedChat {
    deltas: Vec<String>,
    last_request: Mutex<Option<ChatRequest>>,
}

impl ScriptedChat {
    /// 이 모델 이름은 UnknownModel로 응답
    pub const UNKNOWN_MODEL: &'static str = "missing-model";

    pub fn new(deltas: Vec<&str>) -> Self {
        Self {
            deltas: deltas.into_iter().map(str::to_string).collect(),
            last_request: Mutex::new(None),
        }
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.last_request.lock().unwrap().clone()
    }

    fn record(&self, request: &ChatRequest) -> Result<()> {
        *self.last_request.lock().unwrap() = Some(request.clone());
        if request.model == Self::UNKNOWN_MODEL {
            return Err(RagError::UnknownModel(request.model.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion> {
        self.record(&request)?;
        Ok(ChatCompletion {
            model: request.model,
            content: self.deltas.concat(),
            finish_reason: Some(FINISH_STOP.to_string()),
        })
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStream> {
        self.record(&request)?;

        let (sink, stream) = ChatStream::channel(4);
        let deltas = self.deltas.clone();
        tokio::spawn(async move {
            for delta in deltas {
                let item = ChatResponseChunk {
                    content: delta,
                    finish_reason: None,
                };
                if !sink.send(Ok(item)).await {
                    return;
                }
            }
            sink.send(Ok(ChatResponseChunk {
                content: String::new(),
                finish_reason: Some(FINISH_STOP.to_string()),
            }))
            .await;
        });

        Ok(stream)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
