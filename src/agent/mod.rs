//! Agent 모듈 - 질문 한 턴을 처리하는 두 가지 방식
//!
//! - Graph: 검색 → 생성 → 평가 → 재작성 루프 (`AnswerLoop`)
//! - ToolCalling: 모델이 검색 툴 사용을 스스로 결정하는 단발 에이전트

mod error;
mod graph;
mod tool_calling;

use clap::ValueEnum;

pub use error::AgentError;
pub use graph::{
    parse_verdict, should_continue, AnswerLoop, Grade, GraphState, Step, Transition, TurnOutcome,
    DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_TOOL_ROUNDS,
};
pub use tool_calling::{ToolCallingAgent, ToolCallingOutcome};

/// 질문 처리 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AgentMode {
    #[default]
    Graph,
    ToolCalling,
}
