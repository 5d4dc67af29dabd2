//! OpenAI 임베딩 프로바이더
//!
//! source: https://platform.openai.com/docs/api-reference/embeddings

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;
use crate::http::send_with_retry;

/// 기본 API 베이스 URL
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// text-embedding-3-small 기본 차원
pub const OPENAI_DEFAULT_DIMENSION: usize = 1536;

/// 요청당 최대 입력 수
const MAX_BATCH_INPUTS: usize = 256;

/// OpenAI (호환) 임베딩 구현체
#[derive(Debug)]
pub struct OpenAiEmbedding {
    api_key: String,
    endpoint: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
}

impl OpenAiEmbedding {
    /// 새 인스턴스 생성
    ///
    /// # Arguments
    /// * `base_url` - `https://api.openai.com/v1` 또는 호환 엔드포인트
    /// * `model` - 임베딩 모델 이름
    /// * `dimension` - 기대하는 임베딩 차원
    pub fn new(api_key: String, base_url: &str, model: &str, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: 0");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            dimension,
            client,
        })
    }

    /// 단일 요청 (최대 `MAX_BATCH_INPUTS` 입력)
    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input: inputs,
            // text-embedding-3 계열만 차원 축소를 지원
            dimensions: self
                .model
                .starts_with("text-embedding-3")
                .then_some(self.dimension),
        };

        let body = send_with_retry("OpenAI embeddings", || {
            self.client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&request)
        })
        .await?;

        let response: EmbedResponse =
            serde_json::from_str(&body).context("Failed to parse embedding response")?;
        order_embeddings(response, inputs.len(), self.dimension)
    }
}

/// OpenAI API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

/// OpenAI API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// 응답을 입력 순서로 정렬하고 개수/차원 검증
fn order_embeddings(
    response: EmbedResponse,
    expected: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut data = response.data;
    if data.len() != expected {
        anyhow::bail!(
            "Embedding response has {} vectors for {} inputs",
            data.len(),
            expected
        );
    }
    data.sort_by_key(|d| d.index);

    data.into_iter()
        .map(|d| {
            if d.embedding.len() != dimension {
                anyhow::bail!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    dimension,
                    d.embedding.len()
                );
            }
            Ok(d.embedding)
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // 빈 텍스트 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());

        for (i, batch) in texts.chunks(MAX_BATCH_INPUTS).enumerate() {
            tracing::debug!("Embedding batch {} ({} inputs)", i + 1, batch.len());
            results.extend(self.request(batch).await?);
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(items: Vec<(usize, Vec<f32>)>) -> EmbedResponse {
        EmbedResponse {
            data: items
                .into_iter()
                .map(|(index, embedding)| EmbeddingData { index, embedding })
                .collect(),
        }
    }

    #[test]
    fn test_order_embeddings_restores_input_order() {
        let ordered =
            order_embeddings(response(vec![(1, vec![2.0, 2.0]), (0, vec![1.0, 1.0])]), 2, 2)
                .unwrap();
        assert_eq!(ordered, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
    }

    #[test]
    fn test_order_embeddings_rejects_mismatch() {
        assert!(order_embeddings(response(vec![(0, vec![1.0])]), 2, 1).is_err());
        assert!(order_embeddings(response(vec![(0, vec![1.0])]), 1, 3).is_err());
    }

    #[test]
    fn test_endpoint_and_request_shape() {
        let embedder = OpenAiEmbedding::new(
            "fake_key".to_string(),
            "https://api.openai.com/v1/",
            "text-embedding-3-small",
            1536,
        )
        .unwrap();
        assert_eq!(embedder.endpoint, "https://api.openai.com/v1/embeddings");

        let inputs = vec!["a".to_string()];
        let json = serde_json::to_value(EmbedRequest {
            model: "text-embedding-ada-002",
            input: &inputs,
            dimensions: None,
        })
        .unwrap();
        assert!(json.get("dimensions").is_none());
        assert_eq!(json["input"][0], "a");
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(OpenAiEmbedding::new("k".to_string(), OPENAI_BASE_URL, "m", 0).is_err());
    }

    #[tokio::test]
    async fn test_empty_text_yields_zero_vector() {
        let embedder =
            OpenAiEmbedding::new("k".to_string(), OPENAI_BASE_URL, "m", 4).unwrap();
        assert_eq!(embedder.embed("  ").await.unwrap(), vec![0.0; 4]);
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
    }
}
