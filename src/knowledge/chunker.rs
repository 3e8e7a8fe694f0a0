//! Text Chunking Module
//!
//! 추출된 문서 텍스트를 토큰 단위 청크로 분할합니다.
//! 토큰은 공백으로 구분된 단어이며, 연속된 청크는 정확히
//! `overlap_tokens`개의 토큰을 공유합니다.

use crate::config::ChunkingConfig;
use crate::error::{RagError, Result};

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 청크 당 최대 토큰 수
    pub max_tokens: usize,
    /// 청크 간 중첩 토큰 수
    pub overlap_tokens: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_tokens: 800,
            overlap_tokens: 100,
        }
    }
}

impl ChunkConfig {
    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.overlap_tokens >= self.max_tokens {
            return Err(RagError::InvalidConfig(format!(
                "overlap_tokens ({}) must be smaller than max_tokens ({})",
                self.overlap_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}

impl From<&ChunkingConfig> for ChunkConfig {
    fn from(config: &ChunkingConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            overlap_tokens: config.overlap_tokens,
        }
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// TokenChunker
// ============================================================================

/// 토큰 경계 청커
///
/// 생성 시점에 설정이 검증되므로 `chunk`는 실패하지 않습니다.
#[derive(Debug, Clone)]
pub struct TokenChunker {
    config: ChunkConfig,
}

impl TokenChunker {
    /// 설정으로 생성 (overlap >= max 이면 InvalidConfig)
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkConfig {
        self.config
    }
}

impl Chunker for TokenChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        split_words(text, self.config.max_tokens, self.config.overlap_tokens)
    }

    fn name(&self) -> &'static str {
        "TokenChunker"
    }
}

/// 텍스트를 토큰 단위 청크로 분할
///
/// # Arguments
/// * `text` - 분할할 텍스트
/// * `max_tokens` - 청크 당 최대 토큰 수
/// * `overlap_tokens` - 연속 청크 간 중첩 토큰 수
///
/// # Errors
/// `overlap_tokens >= max_tokens` 이면 `InvalidConfig`
pub fn split(text: &str, max_tokens: usize, overlap_tokens: usize) -> Result<Vec<String>> {
    ChunkConfig {
        max_tokens,
        overlap_tokens,
    }
    .validate()?;

    Ok(split_words(text, max_tokens, overlap_tokens))
}

/// 검증된 설정으로 분할 (overlap < max 전제)
fn split_words(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();

    if words.is_empty() {
        return vec![];
    }

    let stride = max_tokens - overlap_tokens;
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + max_tokens).min(words.len());
        chunks.push(words[start..end].join(" "));

        if end >= words.len() {
            break;
        }

        start += stride;
    }

    chunks
}

// ============================================================================
// Helper Functions
// ============================================================================

/// UTF-8 경계 조정 (인덱스 이하로)
#[inline]
pub(crate) fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let mut i = index;
        while i > 0 && !s.is_char_boundary(i) {
            i -= 1;
        }
        i
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_scenario() {
        let chunks = split("A B C D E F", 3, 1).unwrap();
        assert_eq!(chunks, vec!["A B C", "C D E", "E F"]);
    }

    #[test]
    fn test_split_empty() {
        assert!(split("", 4, 1).unwrap().is_empty());
        assert!(split("   \n\t ", 4, 1).unwrap().is_empty());
    }

    #[test]
    fn test_split_rejects_overlap_not_smaller() {
        assert!(matches!(split("a b", 3, 3), Err(RagError::InvalidConfig(_))));
        assert!(matches!(split("a b", 2, 5), Err(RagError::InvalidConfig(_))));
        assert!(matches!(split("a b", 0, 0), Err(RagError::InvalidConfig(_))));
    }

    #[test]
    fn test_split_small_text_single_chunk() {
        let chunks = split("a   b\nc", 4, 1).unwrap();
        assert_eq!(chunks, vec!["a b c"]);
    }

    #[test]
    fn test_split_no_overlap() {
        let chunks = split("a b c d e f g h", 4, 0).unwrap();
        assert_eq!(chunks, vec!["a b c d", "e f g h"]);
    }

    #[test]
    fn test_chunks_bounded_and_overlap_exact() {
        let text: String = (0..97).map(|i| format!("w{} ", i)).collect();

        for (max, overlap) in [(5, 0), (5, 2), (7, 6), (10, 3), (1, 0)] {
            let chunks = split(&text, max, overlap).unwrap();
            assert!(!chunks.is_empty());

            for chunk in &chunks {
                assert!(chunk.split_whitespace().count() <= max);
            }

            for pair in chunks.windows(2) {
                let prev: Vec<&str> = pair[0].split_whitespace().collect();
                let next: Vec<&str> = pair[1].split_whitespace().collect();
                assert_eq!(&prev[prev.len() - overlap..], &next[..overlap]);
            }

            // 마지막 청크는 마지막 토큰으로 끝남
            assert!(chunks.last().unwrap().ends_with("w96"));
        }
    }

    #[test]
    fn test_token_chunker_validates_on_construction() {
        assert!(TokenChunker::new(ChunkConfig {
            max_tokens: 2,
            overlap_tokens: 2
        })
        .is_err());

        let chunker = TokenChunker::new(ChunkConfig {
            max_tokens: 3,
            overlap_tokens: 1,
        })
        .unwrap();
        assert_eq!(chunker.chunk("A B C D E F").len(), 3);
        assert_eq!(chunker.name(), "TokenChunker");
    }

    #[test]
    fn test_floor_char_boundary() {
        let s = "Hello, 세계!"; // UTF-8 다중 바이트 문자

        assert_eq!(floor_char_boundary(s, 5), 5);
        assert_eq!(floor_char_boundary(s, 100), s.len());
        assert_eq!(floor_char_boundary("", 0), 0);
        // '세' (3바이트) 중간 인덱스는 시작 위치로 내림
        assert_eq!(floor_char_boundary(s, 8), 7);
    }
}
