//! SQLite 기반 대화 기록 저장소
//!
//! 저장 위치: `<data_dir>/history.db`
//!
//! 메시지는 JSON으로 직렬화되어 세션별 삽입 순서(`id`)로 저장됩니다.
//! 모든 쓰기는 하나의 연결 락과 트랜잭션으로 직렬화되어 한 번의 append가
//! 다른 append와 섞이지 않습니다.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags};

use crate::llm::ChatMessage;

use super::HistoryStore;

/// 영속 대화 기록 저장소
pub struct SqliteHistory {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteHistory {
    /// 저장소 열기 (없으면 스키마 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create history directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open history database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_history_session ON history(session_id, id);
            "#,
        )
        .context("Failed to initialize history schema")?;

        tracing::debug!("History store initialized at {:?}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 저장된 세션 수
    pub fn session_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(DISTINCT session_id) FROM history", [], |row| {
                row.get(0)
            })
            .context("Failed to count sessions")?;
        Ok(count as usize)
    }

    fn load(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<ChatMessage>> {
        let conn = self.lock()?;

        // 최근 limit개를 역순으로 읽은 뒤 뒤집음
        let limit = limit.map_or(-1, |l| l as i64);
        let mut stmt = conn
            .prepare(
                "SELECT message FROM history WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .context("Failed to prepare history query")?;

        let rows = stmt
            .query_map(params![session_id, limit], |row| row.get::<_, String>(0))
            .context("Failed to read history")?;

        let mut messages = Vec::new();
        for row in rows {
            let raw = row.context("Failed to read history row")?;
            let message: ChatMessage = serde_json::from_str(&raw)
                .with_context(|| format!("Corrupt history entry in {:?}", self.db_path))?;
            messages.push(message);
        }
        messages.reverse();
        Ok(messages)
    }
}

#[async_trait]
impl HistoryStore for SqliteHistory {
    async fn get_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        self.load(session_id, None)
    }

    async fn append(&self, session_id: &str, messages: Vec<ChatMessage>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let encoded: Vec<String> = messages
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<_, _>>()
            .context("Failed to serialize messages")?;
        let now = chrono::Utc::now().to_rfc3339();

        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO history (session_id, message, created_at) VALUES (?1, ?2, ?3)",
                )
                .context("Failed to prepare history insert")?;
            for message in &encoded {
                stmt.execute(params![session_id, message, now])
                    .context("Failed to insert history message")?;
            }
        }
        tx.commit().context("Failed to commit history")?;

        tracing::debug!("Appended {} message(s) to session {}", encoded.len(), session_id);
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM history WHERE session_id = ?1", params![session_id])
            .context("Failed to clear session")?;
        tracing::debug!("Cleared {} message(s) from session {}", removed, session_id);
        Ok(())
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        self.load(session_id, Some(limit))
    }
}
