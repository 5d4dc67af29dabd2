//! LanceDB Vector Index - 영속 벡터 컬렉션
//!
//! 테이블 `chunks` 하나에 (id, source_url, content_hash, text, embedding)을 저장하고
//! 코사인 거리 ANN 검색을 제공합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::table::Table;
use lancedb::DistanceType;

use super::vector::{ChunkMetadata, ChunkRecord, StoredChunk, VectorHit, VectorIndex};

/// 청크 테이블 이름
const TABLE_NAME: &str = "chunks";

/// 메타데이터 컬럼 (임베딩 제외)
const META_COLUMNS: [&str; 4] = ["id", "source_url", "content_hash", "text"];

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 인덱스 구현
pub struct LanceVectorStore {
    table: Table,
    dimension: i32,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기 (테이블이 없으면 빈 테이블 생성)
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원 (임베딩 프로바이더와 일치해야 함)
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;
        let dimension = i32::try_from(dimension).context("Embedding dimension out of range")?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        let names = db
            .table_names()
            .execute()
            .await
            .context("Failed to list LanceDB tables")?;

        let table = if names.iter().any(|n| n == TABLE_NAME) {
            db.open_table(TABLE_NAME)
                .execute()
                .await
                .context("Failed to open chunk table")?
        } else {
            db.create_empty_table(TABLE_NAME, Self::schema(dimension))
                .execute()
                .await
                .context("Failed to create chunk table")?
        };

        Ok(Self { table, dimension })
    }

    /// 청크 테이블 스키마
    fn schema(dimension: i32) -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("source_url", DataType::Utf8, false),
            Field::new("content_hash", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ]))
    }

    /// 레코드들을 Arrow RecordBatch로 변환
    fn records_to_batch(&self, records: &[ChunkRecord]) -> Result<RecordBatch> {
        if let Some(bad) = records
            .iter()
            .find(|r| r.embedding.len() != self.dimension as usize)
        {
            anyhow::bail!(
                "Embedding dimension mismatch for {}: expected {}, got {}",
                bad.id,
                self.dimension,
                bad.embedding.len()
            );
        }

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let urls: Vec<&str> = records
            .iter()
            .map(|r| r.metadata.source_url.as_str())
            .collect();
        let hashes: Vec<&str> = records
            .iter()
            .map(|r| r.metadata.content_hash.as_str())
            .collect();
        let texts: Vec<&str> = records.iter().map(|r| r.metadata.text.as_str()).collect();

        let flat: Vec<f32> = records
            .iter()
            .flat_map(|r| r.embedding.iter().copied())
            .collect();
        let embeddings = FixedSizeListArray::try_new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            self.dimension,
            Arc::new(Float32Array::from(flat)) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Self::schema(self.dimension),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(urls)),
                Arc::new(StringArray::from(hashes)),
                Arc::new(StringArray::from(texts)),
                Arc::new(embeddings),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// 필터에 맞는 모든 행의 메타데이터 스캔
    async fn scan(&self, filter: Option<String>) -> Result<Vec<StoredChunk>> {
        let total = self
            .table
            .count_rows(filter.clone())
            .await
            .context("Failed to count rows")?;
        if total == 0 {
            return Ok(vec![]);
        }

        let mut query = self
            .table
            .query()
            .select(Select::Columns(
                META_COLUMNS.iter().map(|c| c.to_string()).collect(),
            ))
            .limit(total);
        if let Some(filter) = filter {
            query = query.only_if(filter);
        }

        let batches: Vec<RecordBatch> = query
            .execute()
            .await
            .context("Failed to execute scan")?
            .try_collect()
            .await
            .context("Failed to read scan results")?;

        let mut chunks = Vec::with_capacity(total);
        for batch in &batches {
            chunks.extend(batch_to_chunks(batch)?.into_iter().map(|(chunk, _)| chunk));
        }
        chunks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(chunks)
    }
}

#[async_trait]
impl VectorIndex for LanceVectorStore {
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let batch = self.records_to_batch(records)?;
        let schema = batch.schema();

        // 같은 id의 기존 행 제거 후 추가
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        self.table
            .delete(&in_filter("id", &ids))
            .await
            .context("Failed to delete replaced chunks")?;

        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.table
            .add(batches)
            .execute()
            .await
            .context("Failed to add chunks to table")?;

        Ok(records.len())
    }

    async fn delete_by_sources(&self, source_urls: &[String]) -> Result<usize> {
        if source_urls.is_empty() {
            return Ok(0);
        }

        let filter = in_filter("source_url", source_urls);
        let before = self
            .table
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count rows for delete")?;
        if before == 0 {
            return Ok(0);
        }

        self.table
            .delete(&filter)
            .await
            .context("Failed to delete chunks")?;
        Ok(before)
    }

    async fn source_urls(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .scan(None)
            .await?
            .into_iter()
            .map(|c| c.metadata.source_url)
            .collect())
    }

    async fn first_chunk_for_source(&self, source_url: &str) -> Result<Option<StoredChunk>> {
        let filter = format!("source_url = {}", sql_literal(source_url));
        Ok(self.scan(Some(filter)).await?.into_iter().next())
    }

    async fn query(&self, embedding: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        if limit == 0 || self.count().await? == 0 {
            return Ok(vec![]);
        }

        let batches: Vec<RecordBatch> = self
            .table
            .vector_search(embedding.to_vec())
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?
            .try_collect()
            .await
            .context("Failed to read vector search results")?;

        let mut hits = Vec::new();
        for batch in &batches {
            for (chunk, distance) in batch_to_chunks(batch)? {
                hits.push(VectorHit {
                    id: chunk.id,
                    metadata: chunk.metadata,
                    distance: distance.unwrap_or(1.0),
                });
            }
        }
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(hits)
    }

    async fn get(&self, ids: &[String]) -> Result<Vec<StoredChunk>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        self.scan(Some(in_filter("id", ids))).await
    }

    async fn all_chunks(&self) -> Result<Vec<StoredChunk>> {
        self.scan(None).await
    }

    async fn count(&self) -> Result<usize> {
        self.table
            .count_rows(None)
            .await
            .context("Failed to count rows")
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// SQL 문자열 리터럴 (작은따옴표 이스케이프)
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `column IN ('a', 'b')` 필터
fn in_filter(column: &str, values: &[String]) -> String {
    let list = values
        .iter()
        .map(|v| sql_literal(v))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} IN ({})", column, list)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

/// RecordBatch → (청크, `_distance`) 목록
fn batch_to_chunks(batch: &RecordBatch) -> Result<Vec<(StoredChunk, Option<f32>)>> {
    let ids = string_column(batch, "id")?;
    let urls = string_column(batch, "source_url")?;
    let hashes = string_column(batch, "content_hash")?;
    let texts = string_column(batch, "text")?;
    // _distance 컬럼은 벡터 검색에서만 LanceDB가 추가
    let distances = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    Ok((0..batch.num_rows())
        .map(|i| {
            (
                StoredChunk {
                    id: ids.value(i).to_string(),
                    metadata: ChunkMetadata {
                        source_url: urls.value(i).to_string(),
                        content_hash: hashes.value(i).to_string(),
                        text: texts.value(i).to_string(),
                    },
                },
                distances.map(|d| d.value(i)),
            )
        })
        .collect())
}

// ============================================================================
// Tests
// ============================================================================
