//! RAG 채팅 게이트웨이
//!
//! 질의 임베딩 → 지식베이스 검색 → 컨텍스트 블록 구성 → 시스템 프롬프트 +
//! 사용자 질의 → LLM (단건 또는 스트리밍)
//!
//! 지식베이스를 지정하지 않으면 일반 채팅으로 전달됩니다.
//! 지정했지만 청크가 없는 지식베이스는 빈 컨텍스트로 완료됩니다.

use std::sync::Arc;

use serde::Serialize;

use crate::config::ChatConfig;
use crate::embedding::EmbeddingGateway;
use crate::error::{RagError, Result};
use crate::knowledge::{floor_char_boundary, KnowledgeStore, RetrievalResult};
use crate::llm::{ChatMessage, ChatProvider, ChatRequest, ChatStream};

/// 기본 시스템 프롬프트 (`{documents}` 자리에 컨텍스트 삽입)
pub const DEFAULT_SYSTEM_PROMPT: &str = "Use the information from the DOCUMENTS section to provide accurate answers but act as if you knew this information innately.\nIf unsure, simply state that you don't know.\nDOCUMENTS:\n{documents}";

/// 컨텍스트 청크 구분자
const CONTEXT_SEPARATOR: &str = "\n\n";

// ============================================================================
// Types
// ============================================================================

/// 게이트웨이 옵션
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub default_top_k: usize,
    /// 컨텍스트 블록 최대 길이 (UTF-8 바이트)
    pub max_context_chars: usize,
    pub system_prompt: String,
}

impl From<&ChatConfig> for ChatOptions {
    fn from(config: &ChatConfig) -> Self {
        Self {
            default_top_k: config.default_top_k,
            max_context_chars: config.max_context_chars,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}

/// RAG 응답
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RagAnswer {
    pub model: String,
    pub content: String,
    pub finish_reason: Option<String>,
    /// 컨텍스트로 사용된 청크
    pub sources: RetrievalResult,
}

// ============================================================================
// RagChat
// ============================================================================

/// RAG 채팅 게이트웨이
#[derive(Clone)]
pub struct RagChat {
    embedder: Arc<EmbeddingGateway>,
    store: KnowledgeStore,
    llm: Arc<dyn ChatProvider>,
    options: ChatOptions,
}

impl RagChat {
    pub fn new(
        embedder: Arc<EmbeddingGateway>,
        store: KnowledgeStore,
        llm: Arc<dyn ChatProvider>,
        options: ChatOptions,
    ) -> Self {
        Self {
            embedder,
            store,
            llm,
            options,
        }
    }

    pub fn options(&self) -> &ChatOptions {
        &self.options
    }

    /// 단건 질의
    pub async fn ask(
        &self,
        model: &str,
        query: &str,
        knowledge_base: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<RagAnswer> {
        let (request, sources) = self.prepare(model, query, knowledge_base, top_k).await?;
        let completion = self.llm.complete(request).await?;

        Ok(RagAnswer {
            model: completion.model,
            content: completion.content,
            finish_reason: completion.finish_reason,
            sources,
        })
    }

    /// 스트리밍 질의 (재시도 없음)
    pub async fn ask_stream(
        &self,
        model: &str,
        query: &str,
        knowledge_base: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<ChatStream> {
        let (request, _) = self.prepare(model, query, knowledge_base, top_k).await?;
        self.llm.stream(request).await
    }

    /// 지식베이스 검색
    ///
    /// 청크가 없는 지식베이스는 임베딩 호출 없이 빈 결과를 반환합니다.
    pub async fn retrieve(
        &self,
        query: &str,
        knowledge_base: &str,
        top_k: usize,
    ) -> Result<RetrievalResult> {
        if top_k == 0 {
            return Ok(vec![]);
        }

        if !self.store.contains_knowledge_base(knowledge_base)? {
            tracing::debug!("Knowledge base '{}' has no chunks, empty context", knowledge_base);
            return Ok(vec![]);
        }

        let query_embedding = self.embedder.embed_query(query).await?;
        self.store.search(&query_embedding, knowledge_base, top_k)
    }

    /// LLM 요청 구성
    async fn prepare(
        &self,
        model: &str,
        query: &str,
        knowledge_base: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<(ChatRequest, RetrievalResult)> {
        if model.trim().is_empty() {
            return Err(RagError::InvalidConfig("model must not be empty".to_string()));
        }

        if query.trim().is_empty() {
            return Err(RagError::InvalidConfig("message must not be empty".to_string()));
        }

        let top_k = top_k.unwrap_or(self.options.default_top_k);
        if top_k == 0 {
            return Err(RagError::InvalidConfig("topK must be at least 1".to_string()));
        }

        // 지식베이스 미지정 → 일반 채팅
        let Some(knowledge_base) = knowledge_base.filter(|kb| !kb.trim().is_empty()) else {
            return Ok((
                ChatRequest {
                    model: model.to_string(),
                    messages: vec![ChatMessage::user(query)],
                },
                vec![],
            ));
        };

        let sources = self.retrieve(query, knowledge_base, top_k).await?;
        let context = build_context(&sources, self.options.max_context_chars);

        tracing::debug!(
            "Augmenting prompt with {} chunks ({} bytes) from '{}'",
            sources.len(),
            context.len(),
            knowledge_base
        );

        let system = self.options.system_prompt.replace("{documents}", &context);

        Ok((
            ChatRequest {
                model: model.to_string(),
                messages: vec![ChatMessage::system(system), ChatMessage::user(query)],
            },
            sources,
        ))
    }
}

/// 검색 결과를 컨텍스트 블록으로 결합 (최대 `max_bytes`)
///
/// 한도를 넘는 청크는 UTF-8 경계에서 잘리고 이후 청크는 버려집니다.
pub fn build_context(results: &RetrievalResult, max_bytes: usize) -> String {
    let mut context = String::new();

    for result in results {
        let separator = if context.is_empty() { "" } else { CONTEXT_SEPARATOR };
        let needed = separator.len() + result.text.len();

        if context.len() + needed <= max_bytes {
            context.push_str(separator);
            context.push_str(&result.text);
            continue;
        }

        let remaining = max_bytes.saturating_sub(context.len() + separator.len());
        let cut = floor_char_boundary(&result.text, remaining);
        if cut > 0 {
            context.push_str(separator);
            context.push_str(&result.text[..cut]);
        }
        break;
    }

    context
}

// ============================================================================
// Tests
// ============================================================================
