//! 설정 모듈
//!
//! 모든 값은 CLI 플래그 또는 `SITE_RAG_*` 환경변수로 지정합니다.
//! API 키는 별도로 `OPENAI_API_KEY`, `GEMINI_API_KEY` / `GOOGLE_AI_API_KEY`에서 읽습니다.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use crate::agent::{AgentMode, DEFAULT_MAX_ITERATIONS};
use crate::embedding::{EmbeddingBackend, OPENAI_BASE_URL};
use crate::knowledge::ChunkConfig;
use crate::llm::DEFAULT_CHAT_MODEL;

/// 벡터 인덱스 디렉토리 이름
pub const VECTOR_DIR_NAME: &str = "vectors.lance";
/// 키워드 번들 파일 이름
pub const KEYWORD_DB_NAME: &str = "keyword.db";
/// 대화 기록 파일 이름
pub const HISTORY_DB_NAME: &str = "history.db";

/// 기본 데이터 디렉토리 (`<data_local_dir>/.site-rag`)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".site-rag")
}

/// 실행 설정
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// 데이터 디렉토리 (기본: <data_local_dir>/.site-rag)
    #[arg(long, global = true, env = "SITE_RAG_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// 임베딩 프로바이더
    #[arg(long, global = true, env = "SITE_RAG_EMBEDDING_PROVIDER", value_enum, default_value = "openai")]
    pub embedding_provider: EmbeddingBackend,

    /// 임베딩 모델 (OpenAI)
    #[arg(long, global = true, env = "SITE_RAG_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    pub embedding_model: String,

    /// 임베딩 차원 (기본: OpenAI 1536, Gemini 768)
    #[arg(long, global = true, env = "SITE_RAG_EMBEDDING_DIMENSION")]
    pub embedding_dimension: Option<usize>,

    /// 생성 모델
    #[arg(long, global = true, env = "SITE_RAG_CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    pub chat_model: String,

    /// OpenAI 호환 API 베이스 URL
    #[arg(long, global = true, env = "SITE_RAG_OPENAI_BASE_URL", default_value = OPENAI_BASE_URL)]
    pub openai_base_url: String,

    /// 청크 크기 (토큰)
    #[arg(long, global = true, env = "SITE_RAG_CHUNK_SIZE", default_value_t = 512)]
    pub chunk_size: usize,

    /// 청크 겹침 (토큰)
    #[arg(long, global = true, env = "SITE_RAG_CHUNK_OVERLAP", default_value_t = 50)]
    pub chunk_overlap: usize,

    /// 검색 결과 수
    #[arg(long, global = true, env = "SITE_RAG_TOP_K", default_value_t = 5)]
    pub top_k: usize,

    /// RRF 감쇠 상수
    #[arg(long, global = true, env = "SITE_RAG_RRF_K", default_value_t = 60.0)]
    pub rrf_k: f32,

    /// 대화 기록 컨텍스트 최대 메시지 수
    #[arg(long, global = true, env = "SITE_RAG_MAX_HISTORY_MESSAGES", default_value_t = 20)]
    pub max_history_messages: usize,

    /// 답변 루프 반복 상한 (`iterations > N`이면 종료)
    #[arg(long, global = true, env = "SITE_RAG_MAX_ITERATIONS", default_value_t = DEFAULT_MAX_ITERATIONS)]
    pub max_iterations: usize,

    /// 빌드 시 페이지 병렬 처리 수
    #[arg(long, global = true, env = "SITE_RAG_BUILD_CONCURRENCY", default_value_t = 4)]
    pub build_concurrency: usize,

    /// 질문 처리 deadline (초)
    #[arg(long, global = true, env = "SITE_RAG_REQUEST_TIMEOUT_SECS", default_value_t = 120)]
    pub request_timeout_secs: u64,

    /// 질문 처리 방식
    #[arg(long, global = true, env = "SITE_RAG_AGENT_MODE", value_enum, default_value = "graph")]
    pub agent_mode: AgentMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: None,
            embedding_provider: EmbeddingBackend::OpenAi,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimension: None,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            openai_base_url: OPENAI_BASE_URL.to_string(),
            chunk_size: 512,
            chunk_overlap: 50,
            top_k: 5,
            rrf_k: 60.0,
            max_history_messages: 20,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            build_concurrency: 4,
            request_timeout_secs: 120,
            agent_mode: AgentMode::Graph,
        }
    }
}

impl Settings {
    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        self.chunk_config().validate()?;
        if self.top_k == 0 {
            anyhow::bail!("top_k must be greater than zero");
        }
        if self.build_concurrency == 0 {
            anyhow::bail!("build_concurrency must be greater than zero");
        }
        if self.rrf_k.is_nan() || self.rrf_k <= 0.0 {
            anyhow::bail!("rrf_k must be greater than zero");
        }
        if self.embedding_dimension == Some(0) {
            anyhow::bail!("embedding_dimension must be greater than zero");
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(get_data_dir)
    }

    pub fn vector_path(&self) -> PathBuf {
        self.data_dir().join(VECTOR_DIR_NAME)
    }

    pub fn keyword_path(&self) -> PathBuf {
        self.data_dir().join(KEYWORD_DB_NAME)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir().join(HISTORY_DB_NAME)
    }

    /// 프로바이더 기본값을 반영한 임베딩 차원
    pub fn embedding_dimension(&self) -> usize {
        self.embedding_dimension
            .unwrap_or_else(|| self.embedding_provider.default_dimension())
    }

    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            chunk_size: self.chunk_size,
            overlap: self.chunk_overlap,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
