//! 임베딩 모듈 - 원격 API를 통한 텍스트 벡터화
//!
//! 텍스트를 고정 차원 벡터로 변환하는 프로바이더입니다.
//! 시맨틱 검색과 인덱스 빌드의 핵심 모듈입니다.
//!
//! - OpenAI: `POST {base_url}/embeddings` (배치 입력)
//! - Gemini: `batchEmbedContents` (배치 입력, 60 RPM 제한)
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(EmbeddingBackend::OpenAi, "text-embedding-3-small", 1536, OPENAI_BASE_URL)?;
//! let vectors = embedder.embed_batch(&["Hello, world!".to_string()]).await?;
//! ```

mod gemini;
mod openai;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::ValueEnum;

pub use gemini::{GeminiEmbedding, GEMINI_DEFAULT_DIMENSION};
pub use openai::{OpenAiEmbedding, OPENAI_BASE_URL, OPENAI_DEFAULT_DIMENSION};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩 (검색 질의용)
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (입력과 같은 길이/순서)
    ///
    /// 기본 구현은 순차 호출입니다.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

/// 임베딩 백엔드 선택
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbeddingBackend {
    #[value(name = "openai")]
    OpenAi,
    Gemini,
}

impl EmbeddingBackend {
    /// 백엔드 기본 차원
    pub fn default_dimension(self) -> usize {
        match self {
            EmbeddingBackend::OpenAi => OPENAI_DEFAULT_DIMENSION,
            EmbeddingBackend::Gemini => GEMINI_DEFAULT_DIMENSION,
        }
    }
}

// ============================================================================
// API Key Management
// ============================================================================

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|k| !k.is_empty())
}

/// OpenAI API 키 로드 (`OPENAI_API_KEY`)
pub fn get_openai_api_key() -> Result<String> {
    if let Some(key) = non_empty_env("OPENAI_API_KEY") {
        tracing::debug!("Using API key from OPENAI_API_KEY");
        return Ok(key);
    }

    anyhow::bail!(
        "API key not found. Set OPENAI_API_KEY environment variable.\n\
         Get your API key at: https://platform.openai.com/api-keys"
    )
}

/// Gemini API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY` 환경변수
/// 2. `GOOGLE_AI_API_KEY` 환경변수
pub fn get_gemini_api_key() -> Result<String> {
    if let Some(key) = non_empty_env("GEMINI_API_KEY") {
        tracing::debug!("Using API key from GEMINI_API_KEY");
        return Ok(key);
    }

    if let Some(key) = non_empty_env("GOOGLE_AI_API_KEY") {
        tracing::debug!("Using API key from GOOGLE_AI_API_KEY");
        return Ok(key);
    }

    anyhow::bail!(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )
}

/// 백엔드별 API 키 존재 여부 확인
pub fn has_api_key(backend: EmbeddingBackend) -> bool {
    match backend {
        EmbeddingBackend::OpenAi => non_empty_env("OPENAI_API_KEY").is_some(),
        EmbeddingBackend::Gemini => {
            non_empty_env("GEMINI_API_KEY").is_some()
                || non_empty_env("GOOGLE_AI_API_KEY").is_some()
        }
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 임베딩 프로바이더 생성
///
/// 환경변수에서 API 키를 읽습니다. `base_url`은 OpenAI 호환 엔드포인트에만 쓰입니다.
pub fn create_embedder(
    backend: EmbeddingBackend,
    model: &str,
    dimension: usize,
    base_url: &str,
) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match backend {
        EmbeddingBackend::OpenAi => Arc::new(OpenAiEmbedding::new(
            get_openai_api_key()?,
            base_url,
            model,
            dimension,
        )?),
        EmbeddingBackend::Gemini => {
            Arc::new(GeminiEmbedding::with_dimension(get_gemini_api_key()?, dimension)?)
        }
    };

    tracing::info!(
        "Using {} embedding (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================
