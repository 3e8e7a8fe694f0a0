//! Vector 타입 및 유틸리티
//!
//! 청크 레코드, 검색 결과, 코사인 유사도, 임베딩 BLOB 인코딩을 제공합니다.

use serde::Serialize;

// ============================================================================
// Types
// ============================================================================

/// 저장 단위 청크
///
/// `(knowledge_base, source_doc_id, offset)`가 청크의 논리적 키입니다.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// 청크 텍스트
    pub text: String,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
    /// 소속 지식베이스 이름
    pub knowledge_base: String,
    /// 원본 문서 ID (파일 단위로 안정적인 값)
    pub source_doc_id: String,
    /// 문서 내 청크 인덱스 (0-based)
    pub offset: u32,
}

/// 검색된 청크와 유사도
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub source_doc_id: String,
    pub offset: u32,
    pub text: String,
    /// 코사인 유사도 (-1.0 ~ 1.0)
    pub score: f32,
}

/// 검색 결과 (유사도 내림차순)
pub type RetrievalResult = Vec<ScoredChunk>;

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 두 벡터 간의 코사인 유사도를 계산합니다.
/// 차원이 다르거나 영벡터가 포함되면 0.0을 반환합니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 임베딩을 little-endian f32 BLOB으로 인코딩
pub(crate) fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// BLOB을 임베딩으로 디코딩 (길이가 4의 배수가 아니면 None)
pub(crate) fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }

    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) - -1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_embedding_blob() {
        let v = vec![0.25_f32, -1.5, 3.0e-7];
        let bytes = encode_embedding(&v);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_embedding(&bytes), Some(v));
        assert_eq!(decode_embedding(&[0, 1, 2]), None);
    }
}
