//! Index Builder - 크롤 결과와 인덱스 동기화
//!
//! 한 번의 빌드는 다음 순서로 진행됩니다.
//!
//! 1. 벡터 인덱스의 코퍼스 스냅샷(고유 `source_url`)을 계산
//! 2. 크롤 집합에 없는 URL의 청크 삭제
//! 3. 각 URL: 텍스트 fetch → 해시 → 변경 시 청킹/임베딩 → 기존 청크 삭제 후 upsert
//!    (페이지 간 의존성이 없어 `build_concurrency` 만큼 병렬 처리)
//! 4. 모든 페이지가 끝난 뒤 키워드 인덱스를 벡터 인덱스 전체로부터 재구축
//!
//! 한 페이지의 실패는 빌드를 중단시키지 않습니다.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::embedding::EmbeddingProvider;
use crate::scraper::ContentSource;

use super::chunker::Chunker;
use super::gate::IndexGate;
use super::hasher::content_hash;
use super::keyword::{KeywordEntry, KeywordIndex};
use super::vector::{chunk_id, ChunkMetadata, ChunkRecord, VectorIndex};

/// 기본 페이지 병렬 처리 수
pub const DEFAULT_BUILD_CONCURRENCY: usize = 4;

// ============================================================================
// Types
// ============================================================================

/// 빌드 결과 요약
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    /// 새로 청킹/임베딩된 페이지 수
    pub processed: usize,
    /// 빈 텍스트 또는 내용 변경 없음으로 건너뛴 페이지 수
    pub skipped: usize,
    /// 크롤 집합에서 사라져 삭제된 페이지 수
    pub deleted: usize,
    /// 임베딩/저장 실패 페이지 수
    pub failed: usize,
    /// 재구축된 키워드 인덱스 크기 (재구축하지 않았으면 0)
    pub keyword_chunks: usize,
}

/// 페이지 단위 처리 결과
#[derive(Debug)]
enum PageOutcome {
    Processed { chunks: usize },
    Unchanged,
    Empty,
}

// ============================================================================
// IndexBuilder
// ============================================================================

/// 증분 인덱스 빌더
pub struct IndexBuilder {
    vector: Arc<dyn VectorIndex>,
    keyword: Arc<KeywordIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Arc<dyn Chunker>,
    source: Arc<dyn ContentSource>,
    gate: IndexGate,
    concurrency: usize,
}

impl IndexBuilder {
    pub fn new(
        vector: Arc<dyn VectorIndex>,
        keyword: Arc<KeywordIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: Arc<dyn Chunker>,
        source: Arc<dyn ContentSource>,
        gate: IndexGate,
    ) -> Self {
        Self {
            vector,
            keyword,
            embedder,
            chunker,
            source,
            gate,
            concurrency: DEFAULT_BUILD_CONCURRENCY,
        }
    }

    /// 페이지 병렬 처리 수 지정 (최소 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// 크롤된 URL 집합으로 인덱스 동기화
    ///
    /// 중복 URL은 한 번만 처리합니다. 인덱스 자체를 읽거나 쓸 수 없을 때만 에러를 반환합니다.
    pub async fn build(&self, crawled_urls: &[String]) -> Result<BuildReport> {
        let crawled: BTreeSet<String> = crawled_urls
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();

        let mut report = BuildReport::default();

        // 1-2. 사라진 페이지 삭제
        let existing = self
            .vector
            .source_urls()
            .await
            .context("Failed to read corpus snapshot from vector index")?;
        let to_delete: Vec<String> = existing.difference(&crawled).cloned().collect();

        if !to_delete.is_empty() {
            let _guard = self.gate.write().await;
            let removed = self
                .vector
                .delete_by_sources(&to_delete)
                .await
                .context("Failed to delete stale pages")?;
            report.deleted = to_delete.len();
            tracing::info!(
                "Deleted {} stale page(s) ({} chunks)",
                to_delete.len(),
                removed
            );
        }

        // 3. 페이지 처리
        let this = self;
        let outcomes: Vec<(String, Result<PageOutcome>)> = stream::iter(crawled.into_iter())
            .map(move |url| async move {
                let outcome = this.process_page(&url).await;
                (url, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (url, outcome) in outcomes {
            match outcome {
                Ok(PageOutcome::Processed { chunks }) => {
                    tracing::info!("Indexed {} ({} chunks)", url, chunks);
                    report.processed += 1;
                }
                Ok(PageOutcome::Unchanged) => {
                    tracing::debug!("Unchanged: {}", url);
                    report.skipped += 1;
                }
                Ok(PageOutcome::Empty) => {
                    tracing::warn!("No content fetched, skipping: {}", url);
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to index {}: {:#}", url, e);
                    report.failed += 1;
                }
            }
        }

        // 4. 키워드 인덱스 재구축 (모든 페이지 처리 이후)
        report.keyword_chunks = self.rebuild_keyword_index().await?;

        tracing::info!(
            "Build finished: processed={}, skipped={}, deleted={}, failed={}",
            report.processed,
            report.skipped,
            report.deleted,
            report.failed
        );
        Ok(report)
    }

    /// 단일 페이지 처리
    async fn process_page(&self, url: &str) -> Result<PageOutcome> {
        let text = self.source.fetch_text(url).await;
        if text.trim().is_empty() {
            return Ok(PageOutcome::Empty);
        }

        let new_hash = content_hash(&text);
        let existing = self
            .vector
            .first_chunk_for_source(url)
            .await
            .context("Failed to look up existing chunk")?;

        if let Some(chunk) = &existing {
            if chunk.metadata.content_hash == new_hash {
                return Ok(PageOutcome::Unchanged);
            }
        }

        let chunks = self.chunker.chunk(&text);
        if chunks.is_empty() {
            return Ok(PageOutcome::Empty);
        }

        let embeddings = self
            .embedder
            .embed_batch(&chunks)
            .await
            .with_context(|| format!("Failed to embed {} chunks", chunks.len()))?;

        if embeddings.len() != chunks.len() {
            anyhow::bail!(
                "Embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            );
        }

        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(seq, (text, embedding))| ChunkRecord {
                id: chunk_id(url, seq),
                metadata: ChunkMetadata {
                    source_url: url.to_string(),
                    content_hash: new_hash.clone(),
                    text,
                },
                embedding,
            })
            .collect();

        // 삭제 + upsert는 검색과 직렬화
        let _guard = self.gate.write().await;
        if existing.is_some() {
            self.vector
                .delete_by_sources(&[url.to_string()])
                .await
                .context("Failed to delete previous chunks")?;
        }
        self.vector
            .upsert(&records)
            .await
            .context("Failed to upsert chunks")?;

        Ok(PageOutcome::Processed {
            chunks: records.len(),
        })
    }

    /// 벡터 인덱스 전체로부터 키워드 인덱스 재구축
    ///
    /// 청크가 하나도 없으면 기존 번들을 그대로 두고 경고만 남깁니다.
    async fn rebuild_keyword_index(&self) -> Result<usize> {
        let chunks = {
            let _guard = self.gate.read().await;
            self.vector
                .all_chunks()
                .await
                .context("Failed to read chunks for keyword rebuild")?
        };

        if chunks.is_empty() {
            tracing::warn!("Vector index is empty, keyword index left untouched");
            return Ok(0);
        }

        let entries: Vec<KeywordEntry> = chunks
            .into_iter()
            .map(|c| KeywordEntry {
                chunk_id: c.id,
                text: c.metadata.text,
            })
            .collect();

        self.keyword
            .rebuild(&entries)
            .context("Failed to rebuild keyword index")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::{ChunkConfig, TokenChunker};
    use crate::knowledge::memory::MemoryVectorStore;
    use crate::testing::{HashEmbedder, StaticSource};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        vector: Arc<MemoryVectorStore>,
        keyword: Arc<KeywordIndex>,
        embedder: Arc<HashEmbedder>,
        source: Arc<StaticSource>,
        builder: IndexBuilder,
    }

    fn fixture(pages: &[(&str, &str)]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let vector = Arc::new(MemoryVectorStore::new());
        let keyword = Arc::new(KeywordIndex::open(&dir.path().join("keyword.db")).unwrap());
        let embedder = Arc::new(HashEmbedder::new(32));
        let source = Arc::new(StaticSource::new(pages));
        let chunker = TokenChunker::new(ChunkConfig {
            chunk_size: 16,
            overlap: 4,
        })
        .unwrap();

        let builder = IndexBuilder::new(
            vector.clone(),
            keyword.clone(),
            embedder.clone(),
            Arc::new(chunker),
            source.clone(),
            IndexGate::new(),
        )
        .with_concurrency(2);

        Fixture {
            _dir: dir,
            vector,
            keyword,
            embedder,
            source,
            builder,
        }
    }

    fn long_page(topic: &str) -> String {
        (0..60)
            .map(|i| format!("{} sentence number {}.", topic, i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[tokio::test]
    async fn test_second_build_is_idempotent() {
        let f = fixture(&[
            ("https://site.test/a", &long_page("alpha")),
            ("https://site.test/b", "Short beta page about storage."),
        ]);
        let urls = f.source.urls();

        let first = f.builder.build(&urls).await.unwrap();
        assert_eq!(first.processed, 2);
        assert_eq!(first.skipped, 0);
        assert!(first.keyword_chunks > 2);

        let before = f.vector.all_chunks().await.unwrap();
        let embedding_before = f.vector.embedding("https://site.test/a#1").await;
        let calls_before = f.embedder.batch_calls();

        let second = f.builder.build(&urls).await.unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(second.deleted, 0);
        assert_eq!(f.embedder.batch_calls(), calls_before);

        assert_eq!(f.vector.all_chunks().await.unwrap(), before);
        assert_eq!(f.vector.embedding("https://site.test/a#1").await, embedding_before);
    }

    #[tokio::test]
    async fn test_missing_page_is_deleted_everywhere() {
        let f = fixture(&[
            ("https://site.test/a", "Alpha page about kubernetes."),
            ("https://site.test/b", "Beta page about zebrafish."),
        ]);
        f.builder.build(&f.source.urls()).await.unwrap();
        assert_eq!(f.keyword.search("zebrafish", 5).unwrap().len(), 1);

        f.source.remove("https://site.test/b");
        let report = f.builder.build(&f.source.urls()).await.unwrap();

        assert_eq!(report.deleted, 1);
        let sources = f.vector.source_urls().await.unwrap();
        assert!(!sources.contains("https://site.test/b"));
        assert!(f.keyword.search("zebrafish", 5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_content_change_replaces_all_chunks() {
        let url = "https://site.test/a";
        let f = fixture(&[(url, &long_page("original"))]);
        f.builder.build(&f.source.urls()).await.unwrap();
        let old_count = f.vector.count().await.unwrap();
        assert!(old_count > 1);

        f.source.set(url, "Completely rewritten and much shorter page.");
        let report = f.builder.build(&f.source.urls()).await.unwrap();
        assert_eq!(report.processed, 1);

        let chunks = f.vector.all_chunks().await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, format!("{}#0", url));
        assert_eq!(
            chunks[0].metadata.content_hash,
            content_hash("Completely rewritten and much shorter page.")
        );
        assert!(f.keyword.search("original", 5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chunks_of_one_page_share_hash() {
        let url = "https://site.test/a";
        let text = long_page("shared");
        let f = fixture(&[(url, &text)]);
        f.builder.build(&f.source.urls()).await.unwrap();

        let expected = content_hash(&text);
        let chunks = f.vector.all_chunks().await.unwrap();
        assert!(chunks.iter().all(|c| c.metadata.content_hash == expected));
    }

    #[tokio::test]
    async fn test_page_failures_do_not_abort_build() {
        let f = fixture(&[
            ("https://site.test/ok", "Healthy page content."),
            ("https://site.test/empty", "   "),
            ("https://site.test/broken", "This page triggers EMBED_FAIL in the embedder."),
        ]);
        let mut urls = f.source.urls();
        urls.push("https://site.test/ok".to_string());

        let report = f.builder.build(&urls).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);

        let sources = f.vector.source_urls().await.unwrap();
        assert_eq!(sources.len(), 1);
        assert!(sources.contains("https://site.test/ok"));
    }

    #[tokio::test]
    async fn test_empty_corpus_leaves_keyword_index_untouched() {
        let f = fixture(&[("https://site.test/a", "")]);
        let report = f.builder.build(&f.source.urls()).await.unwrap();

        assert_eq!(report.processed, 0);
        assert_eq!(report.keyword_chunks, 0);
        assert!(!f.keyword.is_built().unwrap());
    }
}
