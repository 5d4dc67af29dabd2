//! Keyword Index - SQLite FTS5 기반 BM25 키워드 인덱스
//!
//! 빌드마다 벡터 인덱스의 전체 청크로부터 통째로 재생성되는 번들입니다.
//! 저장 위치: `<data_dir>/keyword.db`
//!
//! - `keyword_fts`: FTS5 가상 테이블. `rowid` = 인덱스 위치, `chunk_id`, `text`
//!   (위치 → 청크 id → 원문이 한 행에 묶여 있어 세 목록이 항상 정렬 일치)
//! - `keyword_meta`: 마지막 빌드 시각과 청크 수 (행이 없으면 미구축 상태)

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;

// ============================================================================
// Types
// ============================================================================

/// 인덱스에 넣을 항목
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordEntry {
    pub chunk_id: String,
    pub text: String,
}

/// BM25 검색 결과
#[derive(Debug, Clone)]
pub struct KeywordHit {
    /// 인덱스 내 위치 (0-based)
    pub position: i64,
    pub chunk_id: String,
    pub text: String,
    /// 양수 BM25 스코어 (높을수록 관련)
    pub score: f64,
}

/// 키워드 인덱스 상태
#[derive(Debug, Clone, Serialize)]
pub struct KeywordStats {
    pub built_at: Option<DateTime<Utc>>,
    pub chunk_count: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// KeywordIndex
// ============================================================================

/// FTS5 키워드 인덱스
pub struct KeywordIndex {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl KeywordIndex {
    /// 인덱스 열기 (없으면 빈 스키마 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create keyword index directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open keyword index database")?;

        let index = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        index.initialize()?;
        Ok(index)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS keyword_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                built_at TEXT NOT NULL,
                chunk_count INTEGER NOT NULL
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS keyword_fts USING fts5(
                chunk_id UNINDEXED,
                text,
                tokenize = 'unicode61'
            );
            "#,
        )
        .context("Failed to initialize keyword index schema (FTS5 required)")?;

        tracing::debug!("Keyword index initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 인덱스 전체 재구축
    ///
    /// 트림 후 빈 텍스트는 버립니다. 남는 항목이 없으면 기존 인덱스를 건드리지 않고
    /// 0을 반환합니다. 교체는 하나의 트랜잭션으로 수행되어 동시 검색은
    /// 이전 번들 또는 새 번들 중 하나만 봅니다.
    pub fn rebuild(&self, entries: &[KeywordEntry]) -> Result<usize> {
        let kept: Vec<&KeywordEntry> = entries
            .iter()
            .filter(|e| !e.text.trim().is_empty())
            .collect();

        if kept.len() < entries.len() {
            tracing::warn!(
                "Discarded {} empty chunk(s) while rebuilding keyword index",
                entries.len() - kept.len()
            );
        }
        if kept.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .context("Failed to begin keyword rebuild")?;

        tx.execute("DELETE FROM keyword_fts", [])
            .context("Failed to clear keyword index")?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO keyword_fts (rowid, chunk_id, text) VALUES (?1, ?2, ?3)",
            )?;
            for (position, entry) in kept.iter().enumerate() {
                stmt.execute(params![position as i64, entry.chunk_id, entry.text])
                    .context("Failed to insert keyword entry")?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO keyword_meta (id, built_at, chunk_count) VALUES (1, ?1, ?2)",
            params![Utc::now().to_rfc3339(), kept.len() as i64],
        )
        .context("Failed to record keyword index metadata")?;

        tx.commit().context("Failed to commit keyword rebuild")?;

        tracing::info!("Rebuilt keyword index with {} chunks", kept.len());
        Ok(kept.len())
    }

    /// 한 번이라도 구축되었는지 여부
    pub fn is_built(&self) -> Result<bool> {
        let conn = self.lock()?;
        let row: Option<i64> = conn
            .query_row("SELECT chunk_count FROM keyword_meta WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(row.is_some())
    }

    /// BM25 키워드 검색
    ///
    /// 질의를 인덱스와 같은 규칙(유니코드 영숫자 단어, 소문자)으로 토큰화한 뒤
    /// OR 결합하여 검색합니다. 미구축이거나 토큰이 없으면 빈 결과입니다.
    /// source: https://www.sqlite.org/fts5.html#the_bm25_function
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<KeywordHit>> {
        let terms = tokenize(query);
        if terms.is_empty() || limit == 0 || !self.is_built()? {
            return Ok(vec![]);
        }

        let match_expr = terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR ");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT rowid, chunk_id, text, bm25(keyword_fts) AS score
            FROM keyword_fts
            WHERE keyword_fts MATCH ?1
            ORDER BY score, rowid
            LIMIT ?2
            "#,
        )?;

        let hits = stmt
            .query_map(params![match_expr, limit as i64], |row| {
                Ok(KeywordHit {
                    position: row.get(0)?,
                    chunk_id: row.get(1)?,
                    text: row.get(2)?,
                    // FTS5 bm25()는 음수일수록 관련도가 높음
                    score: -row.get::<_, f64>(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read keyword search results")?;

        Ok(hits)
    }

    /// 위치 순서대로 모든 항목
    pub fn entries(&self) -> Result<Vec<KeywordEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT chunk_id, text FROM keyword_fts ORDER BY rowid")?;
        let entries = stmt
            .query_map([], |row| {
                Ok(KeywordEntry {
                    chunk_id: row.get(0)?,
                    text: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// 인덱스 상태
    pub fn stats(&self) -> Result<KeywordStats> {
        let conn = self.lock()?;
        let meta: Option<(String, i64)> = conn
            .query_row(
                "SELECT built_at, chunk_count FROM keyword_meta WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(KeywordStats {
            built_at: meta.as_ref().and_then(|(s, _)| {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }),
            chunk_count: meta.map(|(_, n)| n as usize).unwrap_or(0),
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 키워드 토큰화
///
/// 유니코드 영숫자가 아닌 문자를 구분자로 보고 소문자로 바꿉니다.
/// FTS5 `unicode61` 토크나이저의 단어 경계와 일치합니다. 중복은 제거합니다.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let word = word.to_lowercase();
        if !terms.contains(&word) {
            terms.push(word);
        }
    }
    terms
}

// ============================================================================
// Tests
// ============================================================================
