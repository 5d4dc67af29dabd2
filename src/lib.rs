//! site-rag - 웹사이트 크롤링 기반 하이브리드 RAG 질의응답 엔진
//!
//! 사이트맵으로 수집한 페이지를 LanceDB 벡터 검색 + SQLite FTS5 키워드 검색으로
//! 색인하고, 검색 → 생성 → 평가 → 재작성 루프로 질문에 답합니다.

pub mod agent;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod history;
pub mod http;
pub mod knowledge;
pub mod llm;
pub mod scraper;
pub mod service;
pub mod tools;

#[cfg(test)]
mod testing;

// Re-exports
pub use agent::{AgentError, AgentMode, AnswerLoop, GraphState, ToolCallingAgent, TurnOutcome};
pub use config::Settings;
pub use embedding::{create_embedder, EmbeddingBackend, EmbeddingProvider, GeminiEmbedding, OpenAiEmbedding};
pub use history::{HistoryStore, InMemoryHistory, SqliteHistory};
pub use knowledge::{
    BuildReport, ChunkConfig, Chunker, HybridRetriever, IndexBuilder, IndexGate, KeywordIndex,
    LanceVectorStore, MemoryVectorStore, RetrievedChunk, SearchMethod, SearchMode, VectorIndex,
};
pub use llm::{ChatMessage, ChatModel, Completion, LazyChatModel, Role, ToolInvocation};
pub use scraper::{ContentSource, CrawlFilter, WebScraper};
pub use service::{AskResponse, BuildResponse, BuildStatus, Collaborators, RagService, SessionInfo};
pub use tools::{RagSearchTool, Tool, ToolRegistry};
