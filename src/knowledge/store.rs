//! Knowledge Store - rusqlite 기반 청크/벡터 저장소
//!
//! `(벡터, 청크 텍스트, 메타데이터)`를 저장하고
//! 지식베이스 단위로 필터링된 코사인 유사도 검색을 제공합니다.
//!
//! 검색은 정확 탐색(exact scan)이며, 동점은 삽입 순서(먼저 저장된 청크 우선)로
//! 정렬됩니다. 등록되지 않은 지식베이스 검색은 빈 결과를 반환합니다.

use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::error::{RagError, Result};

use super::db::Database;
use super::vector::{
    cosine_similarity, decode_embedding, encode_embedding, Chunk, RetrievalResult, ScoredChunk,
};

/// store_meta 테이블의 차원 키
const META_DIMENSION: &str = "embedding_dimension";

// ============================================================================
// Types
// ============================================================================

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub knowledge_base_count: usize,
    pub chunk_count: usize,
    pub dimension: Option<usize>,
    pub db_path: Option<PathBuf>,
}

// ============================================================================
// KnowledgeStore
// ============================================================================

/// Knowledge Store
///
/// 내부적으로 동기화된 SQLite 연결을 공유하므로 `Clone`으로
/// 여러 태스크에 나눠줄 수 있습니다.
#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    db: Database,
}

impl KnowledgeStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// 청크 저장 (있으면 덮어쓰기)
    ///
    /// 하나의 트랜잭션으로 저장하며, `(knowledge_base, source_doc_id, offset)`가
    /// 같은 청크는 텍스트와 벡터만 갱신되고 원래 삽입 순서를 유지합니다.
    ///
    /// # Returns
    /// 저장(또는 갱신)된 청크 수
    pub fn upsert(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        write_chunks(&tx, chunks)?;
        tx.commit()?;

        tracing::debug!("Upserted {} chunks", chunks.len());
        Ok(chunks.len())
    }

    /// 문서 하나의 청크를 통째로 교체하고 지식베이스를 등록
    ///
    /// 한 트랜잭션 안에서 새 청크를 덮어쓰고, 새 버전보다 뒤쪽 offset에 남은
    /// 이전 청크를 지운 뒤 `knowledge_bases`에 이름을 넣습니다.
    /// 청크가 비어 있으면 해당 문서의 청크가 모두 지워집니다.
    ///
    /// # Returns
    /// 저장된 청크 수
    pub fn replace_document(
        &self,
        knowledge_base: &str,
        source_doc_id: &str,
        chunks: &[Chunk],
    ) -> Result<usize> {
        if let Some(stray) = chunks
            .iter()
            .find(|c| c.knowledge_base != knowledge_base || c.source_doc_id != source_doc_id)
        {
            return Err(RagError::InvalidConfig(format!(
                "chunk {}#{} does not belong to {}/{}",
                stray.source_doc_id, stray.offset, knowledge_base, source_doc_id
            )));
        }

        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;

        if !chunks.is_empty() {
            write_chunks(&tx, chunks)?;
        }

        let removed = tx.execute(
            "DELETE FROM chunks
             WHERE knowledge_base = ?1 AND source_doc_id = ?2 AND chunk_offset >= ?3",
            params![knowledge_base, source_doc_id, chunks.len() as i64],
        )?;

        tx.execute(
            "INSERT OR IGNORE INTO knowledge_bases (name, created_at) VALUES (?1, ?2)",
            params![knowledge_base, Utc::now().to_rfc3339()],
        )?;

        tx.commit()?;

        tracing::debug!(
            "Replaced {} in '{}': {} chunks written, {} stale removed",
            source_doc_id,
            knowledge_base,
            chunks.len(),
            removed
        );
        Ok(chunks.len())
    }

    /// 지식베이스 내 유사도 검색
    ///
    /// # Arguments
    /// * `query_embedding` - 질의 벡터
    /// * `knowledge_base` - 검색할 지식베이스
    /// * `top_k` - 최대 결과 수
    ///
    /// # Returns
    /// 코사인 유사도 내림차순 결과 (동점은 삽입 순서)
    pub fn search(
        &self,
        query_embedding: &[f32],
        knowledge_base: &str,
        top_k: usize,
    ) -> Result<RetrievalResult> {
        if top_k == 0 {
            return Ok(vec![]);
        }

        if query_embedding.is_empty() {
            return Err(RagError::InvalidConfig(
                "query embedding is empty".to_string(),
            ));
        }

        // 잠금 구간: 행 로딩만 수행
        let rows: Vec<(String, u32, String, Vec<u8>)> = {
            let conn = self.db.lock()?;

            if let Some(dimension) = read_dimension(&conn)? {
                if dimension != query_embedding.len() {
                    return Err(RagError::InvalidConfig(format!(
                        "query dimension {} does not match store dimension {}",
                        query_embedding.len(),
                        dimension
                    )));
                }
            }

            let mut stmt = conn.prepare(
                "SELECT source_doc_id, chunk_offset, text, embedding
                 FROM chunks
                 WHERE knowledge_base = ?1
                 ORDER BY id",
            )?;

            let rows = stmt
                .query_map(params![knowledge_base], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut scored = Vec::with_capacity(rows.len());
        for (source_doc_id, offset, text, blob) in rows {
            let embedding = decode_embedding(&blob).ok_or_else(|| {
                RagError::StoreUnavailable(format!(
                    "corrupt embedding for {}#{}",
                    source_doc_id, offset
                ))
            })?;

            scored.push(ScoredChunk {
                source_doc_id,
                offset,
                text,
                score: cosine_similarity(query_embedding, &embedding),
            });
        }

        // sort_by는 안정 정렬 → 동점은 id(삽입) 순서 유지
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);

        Ok(scored)
    }

    /// 지식베이스에 청크가 하나라도 있는지 확인
    pub fn contains_knowledge_base(&self, knowledge_base: &str) -> Result<bool> {
        let conn = self.db.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM chunks WHERE knowledge_base = ?1 LIMIT 1",
                params![knowledge_base],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// 청크 개수 (지식베이스 지정 시 해당 지식베이스만)
    pub fn count(&self, knowledge_base: Option<&str>) -> Result<usize> {
        let conn = self.db.lock()?;
        let count: i64 = match knowledge_base {
            Some(kb) => conn.query_row(
                "SELECT COUNT(*) FROM chunks WHERE knowledge_base = ?1",
                params![kb],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?,
        };
        Ok(count as usize)
    }

    /// 저장된 임베딩 차원 (아직 저장된 청크가 없으면 None)
    pub fn dimension(&self) -> Result<Option<usize>> {
        let conn = self.db.lock()?;
        read_dimension(&conn)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.db.lock()?;

        let chunk_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        let knowledge_base_count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT knowledge_base) FROM chunks",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            knowledge_base_count: knowledge_base_count as usize,
            chunk_count: chunk_count as usize,
            dimension: read_dimension(&conn)?,
            db_path: self.db.path().map(|p| p.to_path_buf()),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 차원 검사 후 청크 쓰기 (호출자가 트랜잭션을 소유)
fn write_chunks(tx: &rusqlite::Transaction<'_>, chunks: &[Chunk]) -> Result<()> {
    let stored_dimension = read_dimension(tx)?;
    let dimension = match stored_dimension {
        Some(d) => d,
        None => chunks[0].embedding.len(),
    };

    if dimension == 0 {
        return Err(RagError::EmbeddingModelError(
            "cannot store an empty embedding".to_string(),
        ));
    }

    if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != dimension) {
        return Err(RagError::EmbeddingModelError(format!(
            "embedding dimension {} does not match store dimension {}",
            bad.embedding.len(),
            dimension
        )));
    }

    if stored_dimension.is_none() {
        tx.execute(
            "INSERT INTO store_meta (key, value) VALUES (?1, ?2)",
            params![META_DIMENSION, dimension.to_string()],
        )?;
    }

    let now = Utc::now().to_rfc3339();
    let mut stmt = tx.prepare(
        "INSERT INTO chunks
            (knowledge_base, source_doc_id, chunk_offset, text, embedding, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (knowledge_base, source_doc_id, chunk_offset)
         DO UPDATE SET text = excluded.text, embedding = excluded.embedding",
    )?;

    for chunk in chunks {
        stmt.execute(params![
            chunk.knowledge_base,
            chunk.source_doc_id,
            chunk.offset,
            chunk.text,
            encode_embedding(&chunk.embedding),
            now,
        ])?;
    }

    Ok(())
}

/// store_meta에서 임베딩 차원 읽기
fn read_dimension(conn: &rusqlite::Connection) -> Result<Option<usize>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            params![META_DIMENSION],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        Some(v) => v
            .parse::<usize>()
            .map(Some)
            .map_err(|e| RagError::StoreUnavailable(format!("corrupt dimension metadata: {}", e))),
        None => Ok(None),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, KnowledgeStore) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        (dir, KnowledgeStore::new(db))
    }

    fn chunk(kb: &str, doc: &str, offset: u32, text: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            text: text.to_string(),
            embedding,
            knowledge_base: kb.to_string(),
            source_doc_id: doc.to_string(),
            offset,
        }
    }

    #[test]
    fn test_upsert_then_search_exact_vector_first() {
        let (_dir, store) = create_test_store();

        store
            .upsert(&[
                chunk("kb1", "doc", 0, "alpha", vec![1.0, 0.0, 0.0]),
                chunk("kb1", "doc", 1, "beta", vec![0.0, 1.0, 0.0]),
                chunk("kb1", "doc", 2, "gamma", vec![0.6, 0.8, 0.0]),
            ])
            .unwrap();

        let results = store.search(&[0.0, 1.0, 0.0], "kb1", 3).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].text, "beta");
        assert!((results[0].score - 1.0).abs() < 1e-5);
        assert_eq!(results[1].text, "gamma");
        assert_eq!(results[2].text, "alpha");
    }

    #[test]
    fn test_search_filters_by_knowledge_base() {
        let (_dir, store) = create_test_store();

        store
            .upsert(&[
                chunk("kb1", "a", 0, "in kb1", vec![1.0, 0.0]),
                chunk("kb2", "b", 0, "in kb2", vec![1.0, 0.0]),
            ])
            .unwrap();

        let results = store.search(&[1.0, 0.0], "kb2", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "in kb2");
    }

    #[test]
    fn test_search_unknown_knowledge_base_is_empty() {
        let (_dir, store) = create_test_store();
        store
            .upsert(&[chunk("kb1", "a", 0, "x", vec![1.0, 0.0])])
            .unwrap();

        assert!(store.search(&[1.0, 0.0], "missing", 5).unwrap().is_empty());
        assert!(!store.contains_knowledge_base("missing").unwrap());
        assert!(store.contains_knowledge_base("kb1").unwrap());
    }

    #[test]
    fn test_ties_broken_by_insertion_order() {
        let (_dir, store) = create_test_store();

        store
            .upsert(&[
                chunk("kb", "d1", 0, "first", vec![1.0, 1.0]),
                chunk("kb", "d2", 0, "second", vec![1.0, 1.0]),
                chunk("kb", "d3", 0, "third", vec![1.0, 1.0]),
            ])
            .unwrap();

        let results = store.search(&[1.0, 1.0], "kb", 2).unwrap();
        let texts: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_duplicate_key_overwrites_in_place() {
        let (_dir, store) = create_test_store();

        store
            .upsert(&[
                chunk("kb", "doc", 0, "old", vec![1.0, 0.0]),
                chunk("kb", "other", 0, "later", vec![1.0, 0.0]),
            ])
            .unwrap();
        store
            .upsert(&[chunk("kb", "doc", 0, "new", vec![1.0, 0.0])])
            .unwrap();

        assert_eq!(store.count(Some("kb")).unwrap(), 2);

        // 덮어쓴 청크는 원래 삽입 위치를 유지
        let results = store.search(&[1.0, 0.0], "kb", 2).unwrap();
        assert_eq!(results[0].text, "new");
        assert_eq!(results[1].text, "later");
    }

    #[test]
    fn test_dimension_is_fixed_after_first_upsert() {
        let (_dir, store) = create_test_store();
        assert_eq!(store.dimension().unwrap(), None);

        store
            .upsert(&[chunk("kb", "d", 0, "x", vec![1.0, 0.0, 0.0])])
            .unwrap();
        assert_eq!(store.dimension().unwrap(), Some(3));

        let err = store
            .upsert(&[chunk("kb", "d", 1, "y", vec![1.0, 0.0])])
            .unwrap_err();
        assert!(matches!(err, RagError::EmbeddingModelError(_)));

        let err = store.search(&[1.0, 0.0], "kb", 1).unwrap_err();
        assert!(matches!(err, RagError::InvalidConfig(_)));
    }

    #[test]
    fn test_mixed_dimensions_in_one_batch_rejected_atomically() {
        let (_dir, store) = create_test_store();

        let err = store
            .upsert(&[
                chunk("kb", "d", 0, "x", vec![1.0, 0.0]),
                chunk("kb", "d", 1, "y", vec![1.0]),
            ])
            .unwrap_err();
        assert!(matches!(err, RagError::EmbeddingModelError(_)));
        assert_eq!(store.count(None).unwrap(), 0);
        assert_eq!(store.dimension().unwrap(), None);
    }

    #[test]
    fn test_top_k_zero_and_truncation() {
        let (_dir, store) = create_test_store();
        let chunks: Vec<Chunk> = (0..10)
            .map(|i| chunk("kb", "d", i, &format!("c{}", i), vec![1.0, i as f32]))
            .collect();
        store.upsert(&chunks).unwrap();

        assert!(store.search(&[1.0, 0.0], "kb", 0).unwrap().is_empty());
        assert_eq!(store.search(&[1.0, 0.0], "kb", 4).unwrap().len(), 4);
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = create_test_store();
        store
            .upsert(&[
                chunk("a", "d", 0, "x", vec![1.0]),
                chunk("b", "d", 0, "y", vec![1.0]),
                chunk("b", "d", 1, "z", vec![1.0]),
            ])
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.chunk_count, 3);
        assert_eq!(stats.knowledge_base_count, 2);
        assert_eq!(stats.dimension, Some(1));
        assert!(stats.db_path.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_upserts_for_different_knowledge_bases() {
        let (_dir, store) = create_test_store();

        let mut handles = Vec::new();
        for kb in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let chunks: Vec<Chunk> = (0..20)
                    .map(|i| chunk(&format!("kb{}", kb), "doc", i, "t", vec![1.0, 0.5]))
                    .collect();
                store.upsert(&chunks).unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.count(None).unwrap(), 160);
        assert_eq!(store.count(Some("kb3")).unwrap(), 20);
    }

    #[test]
    fn test_replace_document_drops_stale_tail_and_registers() {
        let (_dir, store) = create_test_store();

        store
            .replace_document(
                "kb",
                "doc",
                &[
                    chunk("kb", "doc", 0, "old one", vec![1.0, 0.0]),
                    chunk("kb", "doc", 1, "old two", vec![0.0, 1.0]),
                ],
            )
            .unwrap();
        store
            .upsert(&[chunk("kb", "other", 0, "sibling", vec![1.0, 1.0])])
            .unwrap();

        store
            .replace_document("kb", "doc", &[chunk("kb", "doc", 0, "new one", vec![1.0, 0.0])])
            .unwrap();

        let texts: Vec<String> = store
            .search(&[1.0, 0.0], "kb", 10)
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(texts.len(), 2);
        assert!(texts.contains(&"new one".to_string()));
        assert!(texts.contains(&"sibling".to_string()));

        let conn = store.db.lock().unwrap();
        let registered: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM knowledge_bases WHERE name = 'kb'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(registered, 1);
    }

    #[test]
    fn test_replace_document_rejects_foreign_chunks() {
        let (_dir, store) = create_test_store();
        let err = store
            .replace_document("kb", "doc", &[chunk("kb", "elsewhere", 0, "x", vec![1.0])])
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidConfig(_)));
        assert_eq!(store.count(None).unwrap(), 0);
    }
}
