//! 질의 처리 에러 타입

use thiserror::Error;

/// 한 턴의 질의 처리 실패
#[derive(Debug, Error)]
pub enum AgentError {
    /// 모델이 등록되지 않은 툴을 요청함 (복구 불가)
    #[error("unknown tool requested: {name}")]
    UnknownTool { name: String },

    /// 툴 인자가 스키마와 맞지 않음
    #[error("invalid arguments for tool {tool}: {reason}")]
    InvalidToolArguments { tool: String, reason: String },

    /// 요청 deadline 초과
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// 임베딩/생성/인덱스/기록 등 외부 협력자 실패
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}
