//! SQLite 연결 핸들 - 지식 저장소와 레지스트리가 공유
//!
//! 저장 위치: ~/.local/share/.rag-knowledge/knowledge.db
//!
//! 연결은 `Arc<Mutex<Connection>>`으로 공유되며, 잠금은 동기 구간에서만
//! 잡습니다. 네트워크 호출(`.await`) 동안에는 절대 잠금을 보유하지 않습니다.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, OpenFlags};

use crate::error::{RagError, Result};

/// 공유 SQLite 데이터베이스
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

impl Database {
    /// 데이터베이스 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로 (부모 디렉토리도 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RagError::StoreUnavailable(format!(
                        "failed to create database directory {:?}: {}",
                        parent, e
                    ))
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        };

        db.initialize()?;
        Ok(db)
    }

    /// 메모리 DB (테스트/임시 용도)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        };
        db.initialize()?;
        Ok(db)
    }

    /// DB 파일 경로 (메모리 DB면 None)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 연결 잠금 획득
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RagError::StoreUnavailable(format!("lock error: {}", e)))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                knowledge_base TEXT NOT NULL,
                source_doc_id TEXT NOT NULL,
                chunk_offset INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (knowledge_base, source_doc_id, chunk_offset)
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_knowledge_base
                ON chunks(knowledge_base);

            CREATE TABLE IF NOT EXISTS knowledge_bases (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        tracing::debug!("Knowledge database initialized at {:?}", self.path);
        Ok(())
    }
}
