//! 하이브리드 검색 - BM25 키워드 + 벡터 검색 RRF 통합
//!
//! RRF (Reciprocal Rank Fusion) 알고리즘으로
//! 키워드 검색(FTS5)과 벡터 검색(코사인 거리)을 통합합니다.
//! 두 점수 체계의 스케일이 달라도 순위만 사용하므로 보정이 필요 없습니다.
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;

use crate::embedding::EmbeddingProvider;

use super::gate::IndexGate;
use super::keyword::KeywordIndex;
use super::vector::{ChunkMetadata, VectorIndex};

/// RRF 감쇠 상수 기본값
pub const DEFAULT_RRF_K: f32 = 60.0;

// ============================================================================
// Types
// ============================================================================

/// 검색 결과
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    /// 청크 id (`"{source_url}#{sequence}"`)
    pub id: String,
    pub metadata: ChunkMetadata,
    /// 모드별 스코어 (hybrid: RRF 합, vector: `1 - distance`, keyword: BM25)
    pub score: f32,
    /// 결과가 나온 목록
    pub method: SearchMethod,
}

/// 검색 방법
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    /// 벡터 목록에만 존재
    Vector,
    /// 키워드 목록에만 존재
    Keyword,
    /// 두 목록 모두에 존재
    Hybrid,
}

/// 검색 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SearchMode {
    #[default]
    Hybrid,
    Vector,
    Keyword,
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
pub struct HybridRetriever {
    vector: Arc<dyn VectorIndex>,
    keyword: Arc<KeywordIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    gate: IndexGate,
    rrf_k: f32,
}

impl HybridRetriever {
    pub fn new(
        vector: Arc<dyn VectorIndex>,
        keyword: Arc<KeywordIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        gate: IndexGate,
    ) -> Self {
        Self {
            vector,
            keyword,
            embedder,
            gate,
            rrf_k: DEFAULT_RRF_K,
        }
    }

    /// RRF 상수 지정
    pub fn with_rrf_k(mut self, rrf_k: f32) -> Self {
        self.rrf_k = rrf_k;
        self
    }

    /// 하이브리드 검색 (RRF 통합)
    ///
    /// 벡터와 키워드 목록을 각각 `2k`개 가져와 통합한 뒤 상위 `k`개를 반환합니다.
    /// 코퍼스가 비어 있으면 빈 결과이며, 키워드 인덱스가 없으면 벡터 순위만 사용합니다.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        self.search_with(query, k, SearchMode::Hybrid).await
    }

    /// 모드를 지정한 검색
    pub async fn search_with(
        &self,
        query: &str,
        k: usize,
        mode: SearchMode,
    ) -> Result<Vec<RetrievedChunk>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(vec![]);
        }

        // 임베딩은 게이트 밖에서 (페이지 교체를 막지 않음)
        let query_embedding = match mode {
            SearchMode::Keyword => None,
            _ => Some(
                self.embedder
                    .embed(query)
                    .await
                    .context("Failed to embed query")?,
            ),
        };

        let _guard = self.gate.read().await;

        if self.vector.count().await.context("Failed to count chunks")? == 0 {
            return Ok(vec![]);
        }

        let candidates = k * 2;

        // 1. 벡터 목록
        let vector_hits = match &query_embedding {
            Some(embedding) => self
                .vector
                .query(embedding, candidates)
                .await
                .context("Vector search failed")?,
            None => vec![],
        };

        // 2. 키워드 목록 (미구축/오류 시 빈 목록)
        let keyword_hits = if mode == SearchMode::Vector {
            vec![]
        } else {
            self.keyword.search(query, candidates).unwrap_or_else(|e| {
                tracing::warn!("Keyword search unavailable: {:#}", e);
                vec![]
            })
        };

        tracing::debug!(
            "Retrieved {} vector / {} keyword candidates for '{}'",
            vector_hits.len(),
            keyword_hits.len(),
            query
        );

        let vector_ids: Vec<String> = vector_hits.iter().map(|h| h.id.clone()).collect();
        let keyword_ids: Vec<String> = keyword_hits.iter().map(|h| h.chunk_id.clone()).collect();
        let in_vector: HashSet<&str> = vector_ids.iter().map(String::as_str).collect();
        let in_keyword: HashSet<&str> = keyword_ids.iter().map(String::as_str).collect();

        let ranked: Vec<(String, f32)> = match mode {
            SearchMode::Hybrid => rrf_fuse(&[vector_ids.clone(), keyword_ids.clone()], self.rrf_k),
            SearchMode::Vector => vector_hits.iter().map(|h| (h.id.clone(), h.similarity())).collect(),
            SearchMode::Keyword => keyword_hits
                .iter()
                .map(|h| (h.chunk_id.clone(), h.score as f32))
                .collect(),
        };

        // 3. 메타데이터 해석 (벡터 결과에 없으면 인덱스에서 조회, 사라진 청크는 제외)
        let mut metadata: HashMap<String, ChunkMetadata> = vector_hits
            .into_iter()
            .map(|h| (h.id, h.metadata))
            .collect();
        let missing: Vec<String> = ranked
            .iter()
            .filter(|(id, _)| !metadata.contains_key(id))
            .map(|(id, _)| id.clone())
            .collect();
        if !missing.is_empty() {
            for chunk in self
                .vector
                .get(&missing)
                .await
                .context("Failed to resolve keyword hits")?
            {
                metadata.insert(chunk.id, chunk.metadata);
            }
        }

        let mut results = Vec::with_capacity(k);
        for (id, score) in ranked {
            let Some(meta) = metadata.remove(&id) else {
                tracing::debug!("Dropping stale keyword hit: {}", id);
                continue;
            };
            let method = match (in_vector.contains(id.as_str()), in_keyword.contains(id.as_str())) {
                (true, true) => SearchMethod::Hybrid,
                (false, true) => SearchMethod::Keyword,
                _ => SearchMethod::Vector,
            };
            results.push(RetrievedChunk {
                id,
                metadata: meta,
                score,
                method,
            });
            if results.len() == k {
                break;
            }
        }

        Ok(results)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// RRF (Reciprocal Rank Fusion)
///
/// 각 목록의 항목에 `1 / (k + rank)` (rank는 1부터)를 부여하고 id별로 합산합니다.
/// 같은 목록 안의 중복 id는 첫 등장만 셉니다. 스코어 내림차순, 동점은 id 오름차순.
pub fn rrf_fuse(lists: &[Vec<String>], k: f32) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();

    for list in lists {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut rank = 0usize;
        for id in list {
            if !seen.insert(id.as_str()) {
                continue;
            }
            rank += 1;
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (k + rank as f32);
        }
    }

    let mut fused: Vec<(String, f32)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

/// 검색 결과를 생성 모델에 넘길 근거 블록으로 변환
pub fn format_evidence(query: &str, hits: &[RetrievedChunk]) -> String {
    if hits.is_empty() {
        return format!("No results for '{}'.", query);
    }

    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "[{}] source: {} (score: {:.4})\n\"{}\"",
                i + 1,
                hit.metadata.source_url,
                hit.score,
                hit.metadata.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::keyword::KeywordEntry;
    use crate::knowledge::memory::MemoryVectorStore;
    use crate::knowledge::vector::ChunkRecord;
    use crate::knowledge::builder::IndexBuilder;
    use crate::knowledge::chunker::{ChunkConfig, TokenChunker};
    use crate::testing::{HashEmbedder, StaticSource};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rrf_contribution_uses_one_based_rank() {
        let fused = rrf_fuse(&[ids(&["a", "b"])], 60.0);
        assert_eq!(fused[0].0, "a");
        assert!((fused[0].1 - 1.0 / 61.0).abs() < 1e-6);
        assert!((fused[1].1 - 1.0 / 62.0).abs() < 1e-6);
    }

    #[test]
    fn test_rrf_presence_in_both_lists_scores_higher() {
        let both = rrf_fuse(&[ids(&["x", "y"]), ids(&["x", "z"])], 60.0);
        let single = rrf_fuse(&[ids(&["x", "y"]), ids(&["z"])], 60.0);

        let score = |fused: &[(String, f32)], id: &str| {
            fused.iter().find(|(i, _)| i == id).map(|(_, s)| *s).unwrap()
        };
        assert!(score(&both, "x") > score(&single, "x"));
        assert_eq!(both[0].0, "x");
    }

    #[test]
    fn test_rrf_ignores_duplicates_within_list() {
        let fused = rrf_fuse(&[ids(&["a", "a", "b"])], 60.0);
        assert_eq!(fused.len(), 2);
        assert!((fused[1].1 - 1.0 / 62.0).abs() < 1e-6);
    }

    #[test]
    fn test_format_evidence() {
        assert_eq!(format_evidence("anything", &[]), "No results for 'anything'.");

        let hit = RetrievedChunk {
            id: "https://a.test/x#0".to_string(),
            metadata: ChunkMetadata {
                source_url: "https://a.test/x".to_string(),
                content_hash: "h".to_string(),
                text: " Cloud migration service. ".to_string(),
            },
            score: 0.0325,
            method: SearchMethod::Hybrid,
        };
        let text = format_evidence("cloud", &[hit]);
        assert!(text.starts_with("[1] source: https://a.test/x"));
        assert!(text.contains("\"Cloud migration service.\""));
    }

    struct Corpus {
        _dir: TempDir,
        vector: Arc<MemoryVectorStore>,
        keyword: Arc<KeywordIndex>,
        retriever: HybridRetriever,
    }

    async fn corpus(chunks: &[(&str, &str)]) -> Corpus {
        let dir = TempDir::new().unwrap();
        let vector = Arc::new(MemoryVectorStore::new());
        let keyword = Arc::new(KeywordIndex::open(&dir.path().join("keyword.db")).unwrap());
        let embedder = Arc::new(HashEmbedder::new(64));

        let texts: Vec<String> = chunks.iter().map(|(_, t)| t.to_string()).collect();
        let embeddings = embedder.embed_batch(&texts).await.unwrap();
        let records: Vec<ChunkRecord> = chunks
            .iter()
            .zip(embeddings)
            .map(|((id, text), embedding)| ChunkRecord {
                id: id.to_string(),
                metadata: ChunkMetadata {
                    source_url: id.split('#').next().unwrap_or_default().to_string(),
                    content_hash: "h".to_string(),
                    text: text.to_string(),
                },
                embedding,
            })
            .collect();
        vector.upsert(&records).await.unwrap();

        let retriever = HybridRetriever::new(
            vector.clone(),
            keyword.clone(),
            embedder,
            IndexGate::new(),
        );
        Corpus {
            _dir: dir,
            vector,
            keyword,
            retriever,
        }
    }

    #[tokio::test]
    async fn test_empty_corpus_returns_empty() {
        let c = corpus(&[]).await;
        let results = c.retriever.search("anything", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_without_keyword_index_uses_vector_ranking() {
        let c = corpus(&[
            ("https://a.test/k8s#0", "kubernetes cluster operations"),
            ("https://a.test/ai#0", "machine learning platform"),
        ])
        .await;
        assert!(!c.keyword.is_built().unwrap());

        let results = c.retriever.search("kubernetes cluster", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "https://a.test/k8s#0");
        assert!(results.iter().all(|r| r.method == SearchMethod::Vector));
    }

    #[tokio::test]
    async fn test_hybrid_marks_chunks_found_by_both() {
        let c = corpus(&[
            ("https://a.test/k8s#0", "kubernetes cluster operations"),
            ("https://a.test/ai#0", "machine learning platform"),
            ("https://a.test/db#0", "database backup guide"),
        ])
        .await;
        let entries: Vec<KeywordEntry> = c
            .vector
            .all_chunks()
            .await
            .unwrap()
            .into_iter()
            .map(|s| KeywordEntry {
                chunk_id: s.id,
                text: s.metadata.text,
            })
            .collect();
        c.keyword.rebuild(&entries).unwrap();

        let results = c.retriever.search("kubernetes", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "https://a.test/k8s#0");
        assert_eq!(results[0].method, SearchMethod::Hybrid);
        assert!(results[0].score > 1.0 / 61.0);
    }

    #[tokio::test]
    async fn test_stale_keyword_hits_are_dropped() {
        let c = corpus(&[("https://a.test/live#0", "live page text")]).await;
        c.keyword
            .rebuild(&[
                KeywordEntry {
                    chunk_id: "https://a.test/gone#0".to_string(),
                    text: "vanished page text".to_string(),
                },
                KeywordEntry {
                    chunk_id: "https://a.test/live#0".to_string(),
                    text: "live page text".to_string(),
                },
            ])
            .unwrap();

        let results = c
            .retriever
            .search_with("vanished", 5, SearchMode::Keyword)
            .await
            .unwrap();
        assert!(results.is_empty());

        let results = c.retriever.search("page text", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "https://a.test/live#0");
    }

    /// 쿼리 임베딩 도중 쓰기 가드를 잡아 보는 임베더
    struct WriterCheckEmbedder {
        inner: HashEmbedder,
        gate: IndexGate,
        writer_admitted: AtomicBool,
    }

    #[async_trait]
    impl EmbeddingProvider for WriterCheckEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let admitted = tokio::time::timeout(Duration::from_millis(200), self.gate.write())
                .await
                .is_ok();
            self.writer_admitted.store(admitted, Ordering::SeqCst);
            self.inner.embed(text).await
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.inner.embed_batch(texts).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn name(&self) -> &str {
            "writer-check"
        }
    }

    #[tokio::test]
    async fn test_query_embedding_does_not_hold_gate() {
        let c = corpus(&[("https://a.test/k8s#0", "kubernetes cluster operations")]).await;
        let gate = IndexGate::new();
        let embedder = Arc::new(WriterCheckEmbedder {
            inner: HashEmbedder::new(64),
            gate: gate.clone(),
            writer_admitted: AtomicBool::new(false),
        });
        let retriever = HybridRetriever::new(c.vector.clone(), c.keyword.clone(), embedder.clone(), gate);

        let results = retriever
            .search_with("kubernetes", 1, SearchMode::Vector)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(embedder.writer_admitted.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_search_during_page_replacement_sees_one_version() {
        let dir = TempDir::new().unwrap();
        let vector = Arc::new(MemoryVectorStore::new());
        let keyword = Arc::new(KeywordIndex::open(&dir.path().join("keyword.db")).unwrap());
        let embedder = Arc::new(HashEmbedder::new(32));
        let url = "https://a.test/pricing";
        let page = |version: usize| {
            (0..60)
                .map(|i| format!("pricing plan{} tier{}", version, i))
                .collect::<Vec<_>>()
                .join(" ")
        };
        let source = Arc::new(StaticSource::new(&[(url, page(0).as_str())]));
        let gate = IndexGate::new();
        let chunker = TokenChunker::new(ChunkConfig {
            chunk_size: 16,
            overlap: 4,
        })
        .unwrap();
        let builder = Arc::new(IndexBuilder::new(
            vector.clone(),
            keyword.clone(),
            embedder.clone(),
            Arc::new(chunker),
            source.clone(),
            gate.clone(),
        ));
        let retriever = Arc::new(HybridRetriever::new(vector.clone(), keyword, embedder, gate));
        let urls = vec![url.to_string()];
        builder.build(&urls).await.unwrap();

        let writer = {
            let builder = builder.clone();
            let source = source.clone();
            let urls = urls.clone();
            tokio::spawn(async move {
                for version in 1..=10 {
                    source.set(url, &page(version));
                    builder.build(&urls).await.unwrap();
                }
            })
        };

        let reader = {
            let retriever = retriever.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let results = retriever.search("pricing plan", 20).await.unwrap();
                    assert!(!results.is_empty());
                    let first = &results[0].metadata.content_hash;
                    assert!(results.iter().all(|r| &r.metadata.content_hash == first));
                    tokio::task::yield_now().await;
                }
            })
        };

        writer.await.unwrap();
        reader.await.unwrap();
    }
}
