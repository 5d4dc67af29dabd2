//! 대화 기록 저장소
//!
//! `session_id → 역할 태그 메시지 목록`. 세션은 첫 기록 시 암묵적으로 생성되며
//! 만료되지 않습니다. 같은 세션의 append는 세션별 락으로 직렬화됩니다.
//!
//! - `SqliteHistory`: `<data_dir>/history.db`에 영속 (CLI 기본)
//! - `InMemoryHistory`: 프로세스 메모리

mod sqlite;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::llm::ChatMessage;

pub use sqlite::SqliteHistory;

/// 대화 기록 저장소 트레이트
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// 세션의 전체 메시지 (없는 세션은 빈 목록)
    async fn get_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>>;

    /// 세션 끝에 메시지 추가
    async fn append(&self, session_id: &str, messages: Vec<ChatMessage>) -> Result<()>;

    /// 세션 기록 삭제
    async fn clear(&self, session_id: &str) -> Result<()>;

    /// 마지막 `limit`개 메시지
    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let mut messages = self.get_messages(session_id).await?;
        let start = messages.len().saturating_sub(limit);
        Ok(messages.split_off(start))
    }
}

type Session = Arc<Mutex<Vec<ChatMessage>>>;

/// 프로세스 메모리 기반 저장소
#[derive(Default)]
pub struct InMemoryHistory {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    async fn session(&self, session_id: &str) -> Session {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            return session.clone();
        }
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// 저장된 세션 수
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn get_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let session = self.sessions.read().await.get(session_id).cloned();
        match session {
            Some(session) => Ok(session.lock().await.clone()),
            None => Ok(vec![]),
        }
    }

    async fn append(&self, session_id: &str, messages: Vec<ChatMessage>) -> Result<()> {
        let session = self.session(session_id).await;
        session.lock().await.extend(messages);
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_session_is_empty() {
        let store = InMemoryHistory::new();
        assert!(store.get_messages("nope").await.unwrap().is_empty());
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_append_and_recent_suffix() {
        let store = InMemoryHistory::new();
        for i in 0..5 {
            store
                .append("s", vec![ChatMessage::user(format!("q{}", i))])
                .await
                .unwrap();
        }

        let recent = store.recent_messages("s", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "q3");
        assert_eq!(recent[1].content, "q4");
        assert_eq!(store.recent_messages("s", 50).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_pairs_together() {
        let store = Arc::new(InMemoryHistory::new());
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append(
                        "shared",
                        vec![
                            ChatMessage::user(format!("q{}", i)),
                            ChatMessage::assistant(format!("a{}", i)),
                        ],
                    )
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let messages = store.get_messages("shared").await.unwrap();
        assert_eq!(messages.len(), 40);
        for pair in messages.chunks(2) {
            assert_eq!(&pair[0].content[1..], &pair[1].content[1..]);
        }
    }

    #[tokio::test]
    async fn test_clear_removes_session() {
        let store = InMemoryHistory::new();
        store.append("s", vec![ChatMessage::user("q")]).await.unwrap();
        store.clear("s").await.unwrap();
        assert!(store.get_messages("s").await.unwrap().is_empty());
    }
}
