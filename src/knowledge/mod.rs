//! Knowledge 모듈 - 하이브리드 검색 인덱스
//!
//! - Hasher: 페이지 텍스트 변경 감지 (SHA-256)
//! - Chunker: 토큰 윈도우 분할 (cl100k_base)
//! - Vector: LanceDB 벡터 인덱스 (코사인 거리)
//! - Keyword: SQLite FTS5 BM25 인덱스
//! - Builder: 크롤 결과와 두 인덱스 동기화
//! - Hybrid: RRF 알고리즘으로 두 검색 결과 통합

mod builder;
mod chunker;
mod gate;
mod hasher;
mod hybrid;
mod keyword;
mod lance;
mod memory;
mod vector;

// Re-exports
pub use builder::{BuildReport, IndexBuilder, DEFAULT_BUILD_CONCURRENCY};
pub use chunker::{token_chunker, token_windows, ChunkConfig, Chunker, TokenChunker};
pub use gate::IndexGate;
pub use hasher::content_hash;
pub use hybrid::{
    format_evidence, rrf_fuse, HybridRetriever, RetrievedChunk, SearchMethod, SearchMode,
    DEFAULT_RRF_K,
};
pub use keyword::{tokenize, KeywordEntry, KeywordHit, KeywordIndex, KeywordStats};
pub use lance::LanceVectorStore;
pub use memory::MemoryVectorStore;
pub use vector::{
    chunk_id, cosine_similarity, ChunkMetadata, ChunkRecord, StoredChunk, VectorHit, VectorIndex,
};
