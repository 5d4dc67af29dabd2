//! Answer Loop - 검색 → 생성 → 평가 → 재작성 상태 머신
//!
//! ```text
//! ClassifyTopic → Retrieve → Generate → Grade ─┬─ useful / 상한 초과 → Terminate
//!                    ↑                         └─ not useful → Rewrite ─┐
//!                    └──────────────────────────────────────────────────┘
//! ```
//!
//! `iterations`는 Retrieve마다 1씩 증가하며 `iterations > max_iterations`이면
//! 평가 결과와 무관하게 종료합니다. 기본 상한 3에서 최대 4회 순환합니다.

use std::sync::Arc;

use crate::llm::{ChatMessage, ChatModel, Completion, Role};
use crate::tools::{RagSearchTool, ToolRegistry};

use super::error::AgentError;

/// 기본 반복 상한 (`iterations > 3`이면 종료)
pub const DEFAULT_MAX_ITERATIONS: usize = 3;

/// 한 번의 생성 호출 안에서 허용하는 툴 실행 횟수
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 2;

// ============================================================================
// State
// ============================================================================

/// 답변 평가 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    Useful,
    NotUseful,
}

/// 상태 머신 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ClassifyTopic,
    Retrieve,
    Generate,
    Grade,
    Rewrite,
    Terminate,
}

/// 평가 이후 전이
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Rewrite,
    End,
}

/// 한 턴의 작업 상태 (턴 종료와 함께 폐기)
#[derive(Debug, Clone)]
pub struct GraphState {
    /// 현재 검색/생성 질문 (재작성 시 교체)
    pub question: String,
    /// 사용자의 원래 질문 (평가 기준)
    pub original_question: String,
    /// 이번 턴에 누적된 근거 블록 (Retrieve마다 하나)
    pub documents: Vec<String>,
    pub generation: String,
    pub grade: Grade,
    pub iterations: usize,
    /// 이번 턴의 이전 대화 스냅샷 (읽기 전용)
    pub chat_history: Vec<ChatMessage>,
    pub is_new_topic: bool,
}

impl GraphState {
    pub fn new(question: &str, chat_history: Vec<ChatMessage>) -> Self {
        Self {
            question: question.to_string(),
            original_question: question.to_string(),
            documents: Vec::new(),
            generation: String::new(),
            grade: Grade::NotUseful,
            iterations: 0,
            chat_history,
            is_new_topic: true,
        }
    }

    /// 생성/재작성에 노출할 대화 기록 (새 주제면 비움)
    fn visible_history(&self) -> Vec<ChatMessage> {
        if self.is_new_topic {
            return vec![];
        }
        conversational(&self.chat_history)
    }

    fn joined_documents(&self) -> String {
        self.documents.join("\n\n")
    }
}

/// 턴 결과
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// 마지막 생성 답변 (`grade`가 `Useful`이라는 보장 없음)
    pub answer: String,
    pub grade: Grade,
    pub iterations: usize,
    pub is_new_topic: bool,
    /// 방문한 단계 순서
    pub trace: Vec<Step>,
}

/// 종료 여부 판단
pub fn should_continue(state: &GraphState, max_iterations: usize) -> Transition {
    if state.iterations > max_iterations {
        tracing::info!("Iteration cap reached ({})", state.iterations);
        return Transition::End;
    }
    match state.grade {
        Grade::Useful => Transition::End,
        Grade::NotUseful => Transition::Rewrite,
    }
}

/// 판정 응답에서 첫 번째 독립된 `yes`/`no` 단어
pub fn parse_verdict(reply: &str) -> Option<bool> {
    reply
        .split(|c: char| !c.is_alphanumeric())
        .find_map(|word| match word.to_lowercase().as_str() {
            "yes" => Some(true),
            "no" => Some(false),
            _ => None,
        })
}

/// user/assistant 텍스트 메시지만 남김
pub(crate) fn conversational(history: &[ChatMessage]) -> Vec<ChatMessage> {
    history
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .filter(|m| m.tool_call.is_none() && !m.content.trim().is_empty())
        .cloned()
        .collect()
}

fn history_to_text(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
                Role::Tool => "tool",
            };
            format!("{}: {}", role, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Prompts
// ============================================================================

const CLASSIFY_SYSTEM: &str = "You classify conversation topics. Given the previous conversation \
     and a new question, decide whether the new question continues the previous topic. \
     Reply only with 'yes' (same topic) or 'no' (new topic).";

const GENERATE_SYSTEM: &str = "You are a question-answering assistant. Answer the user's question \
     clearly and concisely based on the provided documents and the previous conversation.";

const GRADE_SYSTEM: &str = "You are a strict answer judge. Check whether the retrieved documents \
     contain the answer to the user question, then decide whether the generated answer correctly \
     provides it based on those documents. Reply 'yes' if the answer clearly contains the correct \
     answer, otherwise (including when it says the information was not found) reply 'no'.";

const REWRITE_SYSTEM: &str = "You turn user questions into better search queries. Keep the core \
     intent of the question and rephrase it so the retrieval system finds more relevant \
     documents. Return only the rewritten query.";

// ============================================================================
// AnswerLoop
// ============================================================================

/// 답변 정제 루프
pub struct AnswerLoop {
    chat: Arc<dyn ChatModel>,
    search: Arc<RagSearchTool>,
    tools: ToolRegistry,
    max_iterations: usize,
    max_tool_rounds: usize,
}

impl AnswerLoop {
    pub fn new(chat: Arc<dyn ChatModel>, search: Arc<RagSearchTool>, tools: ToolRegistry) -> Self {
        Self {
            chat,
            search,
            tools,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// 한 턴 실행
    ///
    /// `history`는 세션의 최근 메시지 suffix입니다. 기록 write-back은 호출자 몫입니다.
    pub async fn run(
        &self,
        question: &str,
        history: Vec<ChatMessage>,
    ) -> Result<TurnOutcome, AgentError> {
        let mut state = GraphState::new(question, history);
        let mut trace = Vec::new();
        let mut step = Step::ClassifyTopic;

        loop {
            trace.push(step);
            step = match step {
                Step::ClassifyTopic => {
                    state.is_new_topic = self.classify_topic(&state).await?;
                    Step::Retrieve
                }
                Step::Retrieve => {
                    let evidence = self.retrieve(&state).await?;
                    state.documents.push(evidence);
                    state.iterations += 1;
                    Step::Generate
                }
                Step::Generate => {
                    state.generation = self.generate(&state).await?;
                    Step::Grade
                }
                Step::Grade => {
                    state.grade = self.grade(&state).await?;
                    match should_continue(&state, self.max_iterations) {
                        Transition::Rewrite => Step::Rewrite,
                        Transition::End => Step::Terminate,
                    }
                }
                Step::Rewrite => {
                    state.question = self.rewrite(&state).await?;
                    Step::Retrieve
                }
                Step::Terminate => break,
            };
        }

        tracing::info!(
            "Answer loop finished after {} iteration(s), grade={:?}",
            state.iterations,
            state.grade
        );

        Ok(TurnOutcome {
            answer: state.generation,
            grade: state.grade,
            iterations: state.iterations,
            is_new_topic: state.is_new_topic,
            trace,
        })
    }

    /// 주제 분류: 새 주제면 `true`
    async fn classify_topic(&self, state: &GraphState) -> Result<bool, AgentError> {
        let history = conversational(&state.chat_history);
        if history.is_empty() {
            tracing::debug!("No previous conversation, treating as new topic");
            return Ok(true);
        }

        let user = format!(
            "## Previous conversation:\n{}\n\n## New question:\n{}\n\n\
             Does the new question continue the topic of the previous conversation? (yes / no)",
            history_to_text(&history),
            state.question
        );
        let reply = self
            .complete_text(vec![ChatMessage::system(CLASSIFY_SYSTEM), ChatMessage::user(user)])
            .await?;

        let is_new_topic = parse_verdict(&reply) == Some(false);
        tracing::info!("Topic classified: new_topic={}", is_new_topic);
        Ok(is_new_topic)
    }

    async fn retrieve(&self, state: &GraphState) -> Result<String, AgentError> {
        tracing::info!(
            "Retrieving for '{}' (attempt {})",
            state.question,
            state.iterations + 1
        );
        let (evidence, count) = self.search.search(&state.question).await?;
        tracing::debug!("Retrieved {} passages", count);
        Ok(evidence)
    }

    async fn generate(&self, state: &GraphState) -> Result<String, AgentError> {
        let mut messages = vec![ChatMessage::system(GENERATE_SYSTEM)];
        messages.extend(state.visible_history());
        messages.push(ChatMessage::user(format!(
            "## Documents:\n\n---\n\n{}\n\n---\n\n## Question:\n{}",
            state.joined_documents(),
            state.question
        )));

        let generation = self.complete_text(messages).await?;
        tracing::debug!("Generated answer ({} chars)", generation.len());
        Ok(generation)
    }

    async fn grade(&self, state: &GraphState) -> Result<Grade, AgentError> {
        let user = format!(
            "## Review\n\n### Retrieved documents:\n{}\n\n### User question:\n{}\n\n\
             ### Generated answer:\n{}\n\n## Verdict\n\n\
             Does the generated answer contain the correct answer to the user question, \
             based on the retrieved documents? (yes / no)",
            state.joined_documents(),
            state.original_question,
            state.generation
        );
        let reply = self
            .complete_text(vec![ChatMessage::system(GRADE_SYSTEM), ChatMessage::user(user)])
            .await?;

        let grade = if parse_verdict(&reply) == Some(true) {
            Grade::Useful
        } else {
            Grade::NotUseful
        };
        tracing::info!("Graded answer: {:?}", grade);
        Ok(grade)
    }

    async fn rewrite(&self, state: &GraphState) -> Result<String, AgentError> {
        let history = state.visible_history();
        let user = if history.is_empty() {
            format!(
                "## Original question:\n{}\n\nRewrite this question so it works better for retrieval.",
                state.question
            )
        } else {
            format!(
                "## Previous conversation:\n{}\n\n## Current question:\n{}\n\n\
                 Using the previous conversation and the current question, rewrite them into \
                 the single best retrieval query.",
                history_to_text(&history),
                state.question
            )
        };

        let rewritten = self
            .complete_text(vec![ChatMessage::system(REWRITE_SYSTEM), ChatMessage::user(user)])
            .await?;
        let rewritten = rewritten.trim();

        if rewritten.is_empty() {
            tracing::warn!("Empty rewrite, keeping previous question");
            return Ok(state.question.clone());
        }
        tracing::info!("Rewritten question: {}", rewritten);
        Ok(rewritten.to_string())
    }

    /// 텍스트 응답이 나올 때까지 생성 (툴 요청은 레지스트리로 실행)
    async fn complete_text(&self, mut messages: Vec<ChatMessage>) -> Result<String, AgentError> {
        for round in 0..=self.max_tool_rounds {
            match self.chat.complete(&messages, &[]).await? {
                Completion::Text(text) => return Ok(text),
                Completion::ToolCall(invocation) => {
                    if round == self.max_tool_rounds {
                        break;
                    }
                    let output = self.tools.dispatch(&invocation).await?;
                    let call_id = invocation.id.clone();
                    messages.push(ChatMessage::tool_request(invocation));
                    messages.push(ChatMessage::tool_result(call_id, output));
                }
            }
        }

        Err(AgentError::Collaborator(anyhow::anyhow!(
            "Model kept requesting tools after {} rounds",
            self.max_tool_rounds
        )))
    }
}

// ============================================================================
// Tests
// ============================================================================
