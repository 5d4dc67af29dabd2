//! Service 모듈 - 외부 인터페이스와 의존성 조립
//!
//! - `build(site_url)`: sitemap 크롤 → 인덱스 동기화 → 구조화된 요약
//! - `ask(question, session_id)`: 설정된 에이전트로 한 턴 처리 + 기록 write-back
//! - `new_session()`: 불투명한 세션 id 발급
//!
//! 모든 협력자는 프로세스 진입점에서 한 번 생성되어 주입됩니다.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::agent::{AgentError, AgentMode, AnswerLoop, ToolCallingAgent};
use crate::config::Settings;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::history::{HistoryStore, SqliteHistory};
use crate::knowledge::{
    token_chunker, BuildReport, HybridRetriever, IndexBuilder, IndexGate, KeywordIndex,
    KeywordStats, LanceVectorStore, RetrievedChunk, SearchMode, StoredChunk, VectorIndex,
};
use crate::llm::{ChatMessage, ChatModel, LazyChatModel};
use crate::scraper::{ContentSource, WebScraper};
use crate::tools::{RagSearchTool, ToolRegistry};

// ============================================================================
// Response Types
// ============================================================================

/// 빌드 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Success,
    Error,
}

/// 빌드 요약 (부분 실패에도 항상 반환)
#[derive(Debug, Clone, Serialize)]
pub struct BuildResponse {
    pub status: BuildStatus,
    pub processed: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub failed: usize,
    pub message: String,
}

impl BuildResponse {
    fn error(message: String) -> Self {
        Self {
            status: BuildStatus::Error,
            processed: 0,
            skipped: 0,
            deleted: 0,
            failed: 0,
            message,
        }
    }

    fn success(report: &BuildReport) -> Self {
        let mut message = format!(
            "RAG index build complete. processed: {}, unchanged/skipped: {}, deleted: {}, failed: {}.",
            report.processed, report.skipped, report.deleted, report.failed
        );
        if report.keyword_chunks == 0 {
            message.push_str(" Warning: no chunks indexed, keyword index not rebuilt.");
        }
        Self {
            status: BuildStatus::Success,
            processed: report.processed,
            skipped: report.skipped,
            deleted: report.deleted,
            failed: report.failed,
            message,
        }
    }
}

/// 질문 응답
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
}

/// 세션 발급 결과
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
}

/// 인덱스 상태
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub chunk_count: usize,
    pub page_count: usize,
    pub keyword: KeywordStats,
}

// ============================================================================
// RagService
// ============================================================================

/// 서비스 협력자 묶음
pub struct Collaborators {
    pub vector: Arc<dyn VectorIndex>,
    pub keyword: Arc<KeywordIndex>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub chat: Arc<dyn ChatModel>,
    pub source: Arc<dyn ContentSource>,
    pub history: Arc<dyn HistoryStore>,
}

/// 사이트 RAG 서비스
pub struct RagService {
    settings: Settings,
    vector: Arc<dyn VectorIndex>,
    keyword: Arc<KeywordIndex>,
    source: Arc<dyn ContentSource>,
    history: Arc<dyn HistoryStore>,
    builder: IndexBuilder,
    retriever: Arc<HybridRetriever>,
    answer_loop: AnswerLoop,
    tool_agent: ToolCallingAgent,
}

impl RagService {
    /// 설정으로부터 실제 협력자를 생성하여 조립
    ///
    /// 데이터 디렉토리에 LanceDB / 키워드 번들 / 대화 기록을 열고 API 키를 환경변수에서 읽습니다.
    /// 생성 모델은 첫 질문 시점에 생성되므로 build / search는 `OPENAI_API_KEY` 없이도 동작합니다.
    pub async fn open(settings: Settings) -> Result<Self> {
        settings.validate()?;

        let data_dir = settings.data_dir();
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        }

        let vector = LanceVectorStore::open(&settings.vector_path(), settings.embedding_dimension())
            .await
            .context("Failed to open vector store")?;
        let keyword =
            KeywordIndex::open(&settings.keyword_path()).context("Failed to open keyword index")?;
        let embedder = create_embedder(
            settings.embedding_provider,
            &settings.embedding_model,
            settings.embedding_dimension(),
            &settings.openai_base_url,
        )
        .context("Failed to create embedder")?;
        let chat = LazyChatModel::openai(&settings.chat_model, &settings.openai_base_url);
        let history =
            SqliteHistory::open(&settings.history_path()).context("Failed to open history store")?;
        let source = WebScraper::new().context("WebScraper 생성 실패")?;

        Self::new(
            settings,
            Collaborators {
                vector: Arc::new(vector),
                keyword: Arc::new(keyword),
                embedder,
                chat: Arc::new(chat),
                source: Arc::new(source),
                history: Arc::new(history),
            },
        )
    }

    /// 주입된 협력자로 조립
    pub fn new(settings: Settings, deps: Collaborators) -> Result<Self> {
        settings.validate()?;

        let gate = IndexGate::new();
        let chunker = token_chunker(settings.chunk_config())?;

        let builder = IndexBuilder::new(
            deps.vector.clone(),
            deps.keyword.clone(),
            deps.embedder.clone(),
            Arc::from(chunker),
            deps.source.clone(),
            gate.clone(),
        )
        .with_concurrency(settings.build_concurrency);

        let retriever = Arc::new(
            HybridRetriever::new(
                deps.vector.clone(),
                deps.keyword.clone(),
                deps.embedder.clone(),
                gate,
            )
            .with_rrf_k(settings.rrf_k),
        );

        let search = Arc::new(RagSearchTool::new(retriever.clone(), settings.top_k));
        let mut tools = ToolRegistry::new();
        tools.register(search.clone());

        let answer_loop = AnswerLoop::new(deps.chat.clone(), search, tools.clone())
            .with_max_iterations(settings.max_iterations);
        let tool_agent = ToolCallingAgent::new(deps.chat, tools);

        Ok(Self {
            settings,
            vector: deps.vector,
            keyword: deps.keyword,
            source: deps.source,
            history: deps.history,
            builder,
            retriever,
            answer_loop,
            tool_agent,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// 사이트 크롤 후 인덱스 빌드
    ///
    /// 크롤 가능한 URL이 없거나 인덱스 자체를 읽고 쓸 수 없을 때만 `Error` 상태입니다.
    pub async fn build(&self, site_url: &str) -> BuildResponse {
        let urls = match self.source.fetch_all_urls(site_url).await {
            Ok(urls) => urls,
            Err(e) => {
                tracing::warn!("Error fetching or parsing sitemap: {:#}", e);
                vec![]
            }
        };

        if urls.is_empty() {
            return BuildResponse::error(format!("No pages found at '{}'.", site_url));
        }

        match self.builder.build(&urls).await {
            Ok(report) => BuildResponse::success(&report),
            Err(e) => {
                tracing::error!("Index build failed: {:#}", e);
                BuildResponse::error(format!("Index build failed: {:#}", e))
            }
        }
    }

    /// 질문 한 턴 처리 (요청 deadline 적용)
    pub async fn ask(
        &self,
        question: &str,
        session_id: Option<&str>,
    ) -> Result<AskResponse, AgentError> {
        let deadline = self.settings.request_timeout();
        match tokio::time::timeout(deadline, self.ask_turn(question, session_id)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Question timed out after {:?}", deadline);
                Err(AgentError::Timeout {
                    secs: deadline.as_secs(),
                })
            }
        }
    }

    async fn ask_turn(
        &self,
        question: &str,
        session_id: Option<&str>,
    ) -> Result<AskResponse, AgentError> {
        let history = match session_id {
            Some(id) => {
                self.history
                    .recent_messages(id, self.settings.max_history_messages)
                    .await?
            }
            None => vec![],
        };
        tracing::debug!("Loaded {} history message(s)", history.len());

        let (answer, new_messages) = match self.settings.agent_mode {
            AgentMode::Graph => {
                let outcome = self.answer_loop.run(question, history).await?;
                let messages = vec![
                    ChatMessage::user(question),
                    ChatMessage::assistant(outcome.answer.clone()),
                ];
                (outcome.answer, messages)
            }
            AgentMode::ToolCalling => {
                let outcome = self.tool_agent.run(question, history).await?;
                (outcome.answer, outcome.new_messages)
            }
        };

        if let Some(id) = session_id {
            let count = new_messages.len();
            self.history.append(id, new_messages).await?;
            tracing::debug!("Saved {} message(s) to session {}", count, id);
        }

        Ok(AskResponse { answer })
    }

    /// 새 세션 id 발급
    pub fn new_session(&self) -> SessionInfo {
        SessionInfo {
            session_id: new_session_id(),
        }
    }

    /// 세션 기록 삭제
    pub async fn clear_session(&self, session_id: &str) -> Result<()> {
        self.history.clear(session_id).await
    }

    /// 검색만 수행
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        mode: SearchMode,
    ) -> Result<Vec<RetrievedChunk>> {
        self.retriever.search_with(query, k, mode).await
    }

    /// 인덱스 상태
    pub async fn status(&self) -> Result<IndexStatus> {
        index_status(self.vector.as_ref(), &self.keyword).await
    }

    /// 저장된 청크 샘플
    pub async fn inspect(&self, limit: usize) -> Result<Vec<StoredChunk>> {
        self.vector.sample(limit).await
    }
}

/// 불투명한 세션 id (UUID v4)
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 인덱스 상태 계산
pub async fn index_status(vector: &dyn VectorIndex, keyword: &KeywordIndex) -> Result<IndexStatus> {
    let chunk_count = vector.count().await?;
    let pages: BTreeSet<String> = vector.source_urls().await?;
    Ok(IndexStatus {
        chunk_count,
        page_count: pages.len(),
        keyword: keyword.stats()?,
    })
}

// ============================================================================
// Tests
// ============================================================================
