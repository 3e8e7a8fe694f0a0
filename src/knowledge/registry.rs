//! Knowledge Registry - 지식베이스 이름 집합
//!
//! 청크와 같은 SQLite DB에 저장되므로 프로세스 재시작 후에도 유지됩니다.
//! `INSERT OR IGNORE`를 연결 잠금 아래에서 실행하므로 같은 이름을 동시에
//! 등록해도 논리적 삽입은 최대 한 번입니다.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::error::{RagError, Result};

use super::db::Database;

/// 지식베이스 이름 최대 길이 (문자 수)
pub const MAX_NAME_CHARS: usize = 128;

/// 지식베이스 레지스트리
#[derive(Debug, Clone)]
pub struct KnowledgeRegistry {
    db: Database,
}

impl KnowledgeRegistry {
    /// 레지스트리 생성
    ///
    /// 생성 시 청크 테이블과 대조하여 누락된 이름을 복구합니다.
    pub fn open(db: Database) -> Result<Self> {
        let registry = Self { db };
        let repaired = registry.reconcile()?;
        if repaired > 0 {
            tracing::warn!("Registry reconciled {} knowledge base(s) from stored chunks", repaired);
        }
        Ok(registry)
    }

    /// 지식베이스 이름 등록
    ///
    /// # Returns
    /// 새로 추가되었으면 true, 이미 있으면 false
    pub fn register(&self, name: &str) -> Result<bool> {
        validate_name(name)?;

        let conn = self.db.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO knowledge_bases (name, created_at) VALUES (?1, ?2)",
            params![name, Utc::now().to_rfc3339()],
        )?;

        if inserted > 0 {
            tracing::info!("Registered knowledge base: {}", name);
        }

        Ok(inserted > 0)
    }

    /// 등록된 이름 목록 (사전순)
    pub fn list(&self) -> Result<BTreeSet<String>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare("SELECT name FROM knowledge_bases ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;
        Ok(names)
    }

    /// 이름 등록 여부
    pub fn contains(&self, name: &str) -> Result<bool> {
        let conn = self.db.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM knowledge_bases WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// 청크는 있으나 레지스트리에 없는 지식베이스 이름을 복구
    ///
    /// upsert와 register 사이에 프로세스가 중단된 경우를 위한 것입니다.
    ///
    /// # Returns
    /// 복구된 이름 수
    pub fn reconcile(&self) -> Result<usize> {
        let conn = self.db.lock()?;
        let repaired = conn.execute(
            "INSERT OR IGNORE INTO knowledge_bases (name, created_at)
             SELECT DISTINCT knowledge_base, ?1 FROM chunks",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(repaired)
    }
}

/// 지식베이스 이름 검증
///
/// 앞뒤 공백만 있는 이름, 너무 긴 이름, 제어 문자를 포함한 이름은 거부합니다.
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(RagError::InvalidConfig(
            "knowledge base name must not be empty".to_string(),
        ));
    }

    if name.chars().count() > MAX_NAME_CHARS {
        return Err(RagError::InvalidConfig(format!(
            "knowledge base name exceeds {} characters",
            MAX_NAME_CHARS
        )));
    }

    if name.chars().any(char::is_control) {
        return Err(RagError::InvalidConfig(
            "knowledge base name contains control characters".to_string(),
        ));
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
