//! Vector Index - 벡터 검색 트레이트 및 유틸리티
//!
//! 청크(id → 임베딩 + 메타데이터)를 저장하는 영속 컬렉션의 공통 인터페이스입니다.
//! 거리 함수는 코사인 거리(`1 - cos`)로 통일합니다.

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// 청크 메타데이터 (벡터 인덱스에 임베딩과 함께 저장)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// 원본 페이지 URL
    pub source_url: String,
    /// 페이지 전체 정규화 텍스트의 해시 (청크 단독 해시 아님)
    pub content_hash: String,
    /// 청크 원문
    pub text: String,
}

/// 저장용 청크 레코드
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// `"{source_url}#{sequence}"`
    pub id: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

/// 저장된 청크 (임베딩 제외)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredChunk {
    pub id: String,
    pub metadata: ChunkMetadata,
}

/// 최근접 이웃 검색 결과
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub metadata: ChunkMetadata,
    /// 코사인 거리 (낮을수록 유사)
    pub distance: f32,
}

impl VectorHit {
    /// 유사도 스코어 `1 - distance`
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

// ============================================================================
// VectorIndex Trait
// ============================================================================

/// VectorIndex 트레이트 (async)
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 청크 upsert (같은 id가 있으면 교체)
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<usize>;

    /// `source_url`이 목록에 포함된 모든 청크 삭제
    async fn delete_by_sources(&self, source_urls: &[String]) -> Result<usize>;

    /// 현재 인덱스에 존재하는 고유 `source_url` 집합 (코퍼스 스냅샷)
    async fn source_urls(&self) -> Result<BTreeSet<String>>;

    /// 해당 URL의 청크 중 id가 가장 작은 것 하나 (변경 감지용 샘플)
    async fn first_chunk_for_source(&self, source_url: &str) -> Result<Option<StoredChunk>>;

    /// 최근접 이웃 검색 (거리 오름차순)
    async fn query(&self, embedding: &[f32], limit: usize) -> Result<Vec<VectorHit>>;

    /// id 목록으로 청크 조회 (없는 id는 무시, 순서 보장 안 함)
    async fn get(&self, ids: &[String]) -> Result<Vec<StoredChunk>>;

    /// 모든 청크 (id 오름차순)
    async fn all_chunks(&self) -> Result<Vec<StoredChunk>>;

    /// 청크 개수
    async fn count(&self) -> Result<usize>;

    /// 점검용 샘플
    async fn sample(&self, limit: usize) -> Result<Vec<StoredChunk>> {
        let mut chunks = self.all_chunks().await?;
        chunks.truncate(limit);
        Ok(chunks)
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 청크 id 생성: `"{source_url}#{sequence}"`
pub fn chunk_id(source_url: &str, sequence: usize) -> String {
    format!("{}#{}", source_url, sequence)
}

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위이며, 길이가 다르거나 영벡터면 0.0입니다.
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

// ============================================================================
// Tests
// ============================================================================
