//! 설정 모듈 - 계층형 설정 로딩
//!
//! 우선순위 (낮음 → 높음):
//! 1. 내장 기본값
//! 2. TOML 설정 파일 (`--config` 또는 `./rag-knowledge.toml`)
//! 3. 환경변수 (`RAG_` 접두사, 섹션 구분은 `__`)
//!
//! 예: `RAG_SERVER__PORT=9000`, `RAG_EMBEDDING__MODEL=mxbai-embed-large`

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// 기본 설정 파일 이름 (현재 디렉토리 기준)
pub const DEFAULT_CONFIG_FILE: &str = "rag-knowledge.toml";

/// 환경변수 접두사
pub const ENV_PREFIX: &str = "RAG_";

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.local/share/.rag-knowledge/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rag-knowledge")
}

// ============================================================================
// AppConfig
// ============================================================================

/// 전체 애플리케이션 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ollama: OllamaConfig,
    pub embedding: EmbeddingConfig,
    pub chat: ChatConfig,
    pub chunking: ChunkingConfig,
    pub storage: StorageConfig,
}

/// HTTP 서버 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 업로드 요청 최대 크기 (바이트)
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            max_upload_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Ollama 서버 설정 (임베딩/채팅 공용)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
        }
    }
}

/// 임베딩 게이트웨이 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// 임베딩 모델 이름
    pub model: String,
    /// 기대 차원 (None이면 첫 응답 기준)
    pub dimension: Option<usize>,
    /// 외부 호출 1회당 최대 텍스트 수
    pub batch_size: usize,
    /// 전송 실패 시 추가 재시도 횟수
    pub max_retries: u32,
    /// 재시도 초기 백오프 (ms)
    pub initial_backoff_ms: u64,
    /// 재시도 최대 백오프 (ms)
    pub max_backoff_ms: u64,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
            dimension: None,
            batch_size: 16,
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            timeout_secs: 60,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 채팅 게이트웨이 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// 모델 미지정 시 사용할 기본 모델 (CLI)
    pub default_model: String,
    /// 기본 검색 결과 수
    pub default_top_k: usize,
    /// 컨텍스트 블록 최대 길이 (UTF-8 바이트, 문자 경계에서 자름)
    pub max_context_chars: usize,
    /// 시스템 프롬프트 템플릿 (`{documents}` 자리에 컨텍스트 삽입)
    pub system_prompt: Option<String>,
    /// 응답 헤더까지의 타임아웃, 스트리밍 중에는 조각 사이 최대 대기 시간 (초)
    pub timeout_secs: u64,
    /// 스트리밍 채널 버퍼 크기
    pub stream_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_model: "deepseek-r1:1.5b".to_string(),
            default_top_k: 5,
            max_context_chars: 8_000,
            system_prompt: None,
            timeout_secs: 300,
            stream_buffer: 32,
        }
    }
}

impl ChatConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 청킹 설정 (토큰 단위)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 800,
            overlap_tokens: 100,
        }
    }
}

/// 저장소 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 데이터 디렉토리 (None이면 get_data_dir())
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// SQLite DB 파일 경로
    pub fn db_path(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(get_data_dir)
            .join("knowledge.db")
    }
}

impl AppConfig {
    /// 계층형 설정 로딩
    ///
    /// `path`가 주어지면 해당 파일이 반드시 존재해야 합니다.
    /// 없으면 현재 디렉토리의 `rag-knowledge.toml`을 선택적으로 읽습니다.
    pub fn load(path: Option<&Path>) -> std::result::Result<Self, Box<figment::Error>> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        match path {
            Some(p) => figment = figment.merge(Toml::file_exact(p)),
            None => {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    figment = figment.merge(Toml::file(local));
                }
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment.extract().map_err(Box::new)
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.ollama.base_url).map_err(|e| {
            RagError::InvalidConfig(format!(
                "ollama.base_url '{}' is not a valid URL: {}",
                self.ollama.base_url, e
            ))
        })?;

        if self.chunking.max_tokens == 0 || self.chunking.overlap_tokens >= self.chunking.max_tokens
        {
            return Err(RagError::InvalidConfig(format!(
                "chunking.overlap_tokens ({}) must be smaller than chunking.max_tokens ({})",
                self.chunking.overlap_tokens, self.chunking.max_tokens
            )));
        }

        if self.embedding.batch_size == 0 {
            return Err(RagError::InvalidConfig(
                "embedding.batch_size must be at least 1".to_string(),
            ));
        }

        if self.embedding.dimension == Some(0) {
            return Err(RagError::InvalidConfig(
                "embedding.dimension must be positive".to_string(),
            ));
        }

        if self.chat.default_top_k == 0 {
            return Err(RagError::InvalidConfig(
                "chat.default_top_k must be at least 1".to_string(),
            ));
        }

        if self.chat.stream_buffer == 0 {
            return Err(RagError::InvalidConfig(
                "chat.stream_buffer must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// 서버 바인드 주소
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

// ============================================================================
// Tests
// ============================================================================
