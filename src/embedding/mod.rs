//! 임베딩 모듈 - Ollama API를 통한 텍스트 벡터화
//!
//! - `EmbeddingProvider`: 외부 임베딩 모델 1회 호출 단위 인터페이스
//! - `OllamaEmbedding`: Ollama `/api/embed` 구현체
//! - `EmbeddingGateway`: 배치 분할 + 지수 백오프 재시도 + 순서 보존
//!
//! ## 사용법
//! ```rust,ignore
//! let provider = Arc::new(OllamaEmbedding::new(&config.ollama, &config.embedding)?);
//! let gateway = EmbeddingGateway::new(provider, &config.embedding);
//! let vectors = gateway.embed(&["Hello".to_string(), "world".to_string()]).await?;
//! ```
//!
//! ref: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-embeddings

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{EmbeddingConfig, OllamaConfig};
use crate::error::{RagError, Result};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// `embed_batch` 한 번이 외부 서비스 호출 한 번에 대응합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 배치 임베딩 (입력 순서대로 벡터 하나씩)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// 프로바이더/모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Ollama Embedding
// ============================================================================

/// Ollama 임베딩 구현체
#[derive(Debug)]
pub struct OllamaEmbedding {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

/// Ollama `/api/embed` 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Ollama `/api/embed` 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Ollama 에러 응답
#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

impl OllamaEmbedding {
    /// 설정으로 생성
    pub fn new(ollama: &OllamaConfig, config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RagError::InvalidConfig(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/embed", ollama.base_url.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                RagError::EmbeddingServiceUnavailable(format!("embedding request failed: {}", e))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            RagError::EmbeddingServiceUnavailable(format!("failed to read embedding response: {}", e))
        })?;

        // 429 / 5xx - 일시 장애로 분류 (재시도 대상)
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(RagError::EmbeddingServiceUnavailable(format!(
                "embedding service returned {}",
                status
            )));
        }

        // 그 외 에러 - 모델 오류 (재시도 안 함)
        if !status.is_success() {
            let detail = serde_json::from_str::<OllamaError>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(RagError::EmbeddingModelError(format!(
                "embedding model '{}' failed ({}): {}",
                self.model, status, detail
            )));
        }

        let parsed: EmbedResponse = serde_json::from_str(&body).map_err(|e| {
            RagError::EmbeddingModelError(format!("failed to parse embedding response: {}", e))
        })?;

        Ok(parsed.embeddings)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// 지수 백오프 재시도 정책
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 첫 시도 이후 추가 재시도 횟수
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// `attempt`(0부터) 번째 실패 후 대기 시간
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl From<&EmbeddingConfig> for RetryPolicy {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

// ============================================================================
// EmbeddingGateway
// ============================================================================

/// 임베딩 게이트웨이
///
/// 입력을 `batch_size` 단위로 나눠 호출하고, 전송 실패만 재시도합니다.
/// 결과는 입력과 같은 순서, 같은 개수, 같은 차원이 보장됩니다.
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    retry: RetryPolicy,
    dimension: Option<usize>,
}

impl EmbeddingGateway {
    /// 설정으로 생성
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            batch_size: config.batch_size.max(1),
            retry: RetryPolicy::from(config),
            dimension: config.dimension,
        }
    }

    /// 재시도 정책 교체
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// 텍스트 목록 임베딩 (순서 보존)
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        let batches = texts.len().div_ceil(self.batch_size);

        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            tracing::debug!(
                "Embedding batch {}/{} ({} texts) via {}",
                i + 1,
                batches,
                batch.len(),
                self.provider.name()
            );

            let vectors = self.embed_with_retry(batch).await?;
            if vectors.len() != batch.len() {
                return Err(RagError::EmbeddingModelError(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }
            results.extend(vectors);
        }

        self.check_dimensions(&results)?;
        Ok(results)
    }

    /// 단일 질의 임베딩
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::EmbeddingModelError("empty embedding response".to_string()))
    }

    /// 재시도 루프 (전송 실패 시 지수 백오프)
    async fn embed_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0;

        loop {
            match self.provider.embed_batch(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let backoff = self.retry.backoff(attempt);
                    tracing::warn!(
                        "Embedding request failed: {}, retrying in {:?} (attempt {}/{})",
                        e,
                        backoff,
                        attempt + 1,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 모든 벡터가 같은 (설정된) 차원인지 확인
    fn check_dimensions(&self, vectors: &[Vec<f32>]) -> Result<()> {
        let Some(first) = vectors.first() else {
            return Ok(());
        };

        let expected = self.dimension.unwrap_or(first.len());
        if expected == 0 {
            return Err(RagError::EmbeddingModelError(
                "embedding model returned an empty vector".to_string(),
            ));
        }

        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(RagError::EmbeddingModelError(format!(
                "embedding dimension {} does not match expected {}",
                bad.len(),
                expected
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
