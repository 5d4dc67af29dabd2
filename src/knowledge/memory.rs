//! 인메모리 벡터 인덱스
//!
//! 프로세스 수명 동안만 유지되는 `VectorIndex` 구현입니다.
//! 테스트와 라이브러리 임베딩 용도로 LanceDB 대신 사용합니다.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::vector::{
    cosine_similarity, ChunkMetadata, ChunkRecord, StoredChunk, VectorHit, VectorIndex,
};

/// BTreeMap 기반 벡터 인덱스 (id 오름차순 유지)
#[derive(Default)]
pub struct MemoryVectorStore {
    rows: RwLock<BTreeMap<String, (ChunkMetadata, Vec<f32>)>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 임베딩 조회
    pub async fn embedding(&self, id: &str) -> Option<Vec<f32>> {
        self.rows.read().await.get(id).map(|(_, e)| e.clone())
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorStore {
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<usize> {
        let mut rows = self.rows.write().await;
        for record in records {
            rows.insert(
                record.id.clone(),
                (record.metadata.clone(), record.embedding.clone()),
            );
        }
        Ok(records.len())
    }

    async fn delete_by_sources(&self, source_urls: &[String]) -> Result<usize> {
        let targets: BTreeSet<&str> = source_urls.iter().map(String::as_str).collect();
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, (meta, _)| !targets.contains(meta.source_url.as_str()));
        Ok(before - rows.len())
    }

    async fn source_urls(&self) -> Result<BTreeSet<String>> {
        let rows = self.rows.read().await;
        Ok(rows.values().map(|(m, _)| m.source_url.clone()).collect())
    }

    async fn first_chunk_for_source(&self, source_url: &str) -> Result<Option<StoredChunk>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .find(|(_, (m, _))| m.source_url == source_url)
            .map(|(id, (m, _))| StoredChunk {
                id: id.clone(),
                metadata: m.clone(),
            }))
    }

    async fn query(&self, embedding: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        let rows = self.rows.read().await;
        let mut hits: Vec<VectorHit> = rows
            .iter()
            .map(|(id, (m, e))| VectorHit {
                id: id.clone(),
                metadata: m.clone(),
                distance: 1.0 - cosine_similarity(embedding, e),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn get(&self, ids: &[String]) -> Result<Vec<StoredChunk>> {
        let rows = self.rows.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                rows.get(id).map(|(m, _)| StoredChunk {
                    id: id.clone(),
                    metadata: m.clone(),
                })
            })
            .collect())
    }

    async fn all_chunks(&self) -> Result<Vec<StoredChunk>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .map(|(id, (m, _))| StoredChunk {
                id: id.clone(),
                metadata: m.clone(),
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.rows.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str, seq: usize, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: format!("{}#{}", url, seq),
            metadata: ChunkMetadata {
                source_url: url.to_string(),
                content_hash: "hash".to_string(),
                text: format!("chunk {} of {}", seq, url),
            },
            embedding,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_delete_by_source() {
        let store = MemoryVectorStore::new();
        store
            .upsert(&[
                record("a", 0, vec![1.0, 0.0]),
                record("a", 1, vec![1.0, 0.0]),
                record("b", 0, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 3);

        let deleted = store.delete_by_sources(&["a".to_string()]).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(
            store.source_urls().await.unwrap().into_iter().collect::<Vec<_>>(),
            vec!["b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_query_orders_by_distance() {
        let store = MemoryVectorStore::new();
        store
            .upsert(&[record("a", 0, vec![1.0, 0.0]), record("b", 0, vec![0.0, 1.0])])
            .await
            .unwrap();

        let hits = store.query(&[0.9, 0.1], 2).await.unwrap();
        assert_eq!(hits[0].id, "a#0");
        assert!(hits[0].similarity() > hits[1].similarity());
    }

    #[tokio::test]
    async fn test_first_chunk_is_lowest_id() {
        let store = MemoryVectorStore::new();
        store
            .upsert(&[record("a", 1, vec![1.0]), record("a", 0, vec![1.0])])
            .await
            .unwrap();
        let first = store.first_chunk_for_source("a").await.unwrap().unwrap();
        assert_eq!(first.id, "a#0");
        assert!(store.first_chunk_for_source("zzz").await.unwrap().is_none());
    }
}
