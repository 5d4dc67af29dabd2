//! 테스트용 협력자 구현
//!
//! 네트워크 없이 결정적으로 동작하는 임베더 / 콘텐츠 소스 / 채팅 모델입니다.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::embedding::EmbeddingProvider;
use crate::knowledge::tokenize;
use crate::llm::{ChatMessage, ChatModel, Completion, ToolSpec};
use crate::scraper::ContentSource;

// ============================================================================
// HashEmbedder
// ============================================================================

/// 단어 해시 버킷 기반 bag-of-words 임베더
///
/// `EMBED_FAIL`을 포함한 입력이 있으면 배치 전체가 실패합니다.
pub struct HashEmbedder {
    dimension: usize,
    batch_calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            batch_calls: AtomicUsize::new(0),
        }
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in tokenize(text) {
            let digest = Sha256::digest(word.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bytes) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if texts.iter().any(|t| t.contains("EMBED_FAIL")) {
            return Err(anyhow!("embedding backend rejected input"));
        }
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }
}

// ============================================================================
// StaticSource
// ============================================================================

/// 메모리 내 페이지 집합
pub struct StaticSource {
    pages: Mutex<BTreeMap<String, String>>,
}

impl StaticSource {
    pub fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: Mutex::new(
                pages
                    .iter()
                    .map(|(url, text)| (url.to_string(), text.to_string()))
                    .collect(),
            ),
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.pages.lock().unwrap().keys().cloned().collect()
    }

    pub fn set(&self, url: &str, text: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), text.to_string());
    }

    pub fn remove(&self, url: &str) {
        self.pages.lock().unwrap().remove(url);
    }
}

#[async_trait]
impl ContentSource for StaticSource {
    async fn fetch_all_urls(&self, _site_url: &str) -> Result<Vec<String>> {
        Ok(self.urls())
    }

    async fn fetch_text(&self, url: &str) -> String {
        self.pages.lock().unwrap().get(url).cloned().unwrap_or_default()
    }
}

// ============================================================================
// ScriptedChat
// ============================================================================

/// 미리 정한 응답을 순서대로 돌려주는 채팅 모델
pub struct ScriptedChat {
    script: Mutex<VecDeque<Completion>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
    tools_offered: Mutex<Vec<usize>>,
    delay: Option<Duration>,
}

impl ScriptedChat {
    pub fn new(script: Vec<Completion>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            tools_offered: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn texts(replies: &[&str]) -> Self {
        Self::new(
            replies
                .iter()
                .map(|r| Completion::Text(r.to_string()))
                .collect(),
        )
    }

    /// 응답마다 지연
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    /// 호출별로 제공된 툴 수
    pub fn tools_offered(&self) -> Vec<usize> {
        self.tools_offered.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<Completion> {
        self.calls.lock().unwrap().push(messages.to_vec());
        self.tools_offered.lock().unwrap().push(tools.len());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("script exhausted"))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
