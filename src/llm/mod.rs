//! LLM 모듈 - 생성 모델 인터페이스
//!
//! 생성 모델은 메시지 목록(+ 선택적 툴 목록)을 받아 최종 텍스트 또는
//! 툴 호출 요청 중 하나를 돌려주는 불투명한 서비스로 취급합니다.
//! 두 결과는 `Completion` 태그드 유니온으로 구분합니다.

mod openai;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use openai::OpenAiChat;

/// 기본 생성 모델
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4-turbo";

// ============================================================================
// Types
// ============================================================================

/// 메시지 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 툴 호출 요청
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// 호출 id (툴 결과 메시지의 `tool_call_id`와 대응)
    pub id: String,
    pub name: String,
    /// JSON 인자 (파싱 불가능한 원문은 문자열 값)
    pub arguments: serde_json::Value,
}

/// 대화 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// `Role::Tool` 메시지가 응답하는 호출 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// `Role::Assistant` 메시지가 요청한 툴 호출
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolInvocation>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_call: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// 툴 호출을 요청한 어시스턴트 메시지
    pub fn tool_request(invocation: ToolInvocation) -> Self {
        Self {
            tool_call: Some(invocation),
            ..Self::new(Role::Assistant, "")
        }
    }

    /// 툴 실행 결과 메시지
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

/// 모델에 제공하는 툴 명세
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema 형태의 파라미터 정의
    pub parameters: serde_json::Value,
}

/// 생성 결과
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// 최종 텍스트
    Text(String),
    /// 툴 호출 요청
    ToolCall(ToolInvocation),
}

// ============================================================================
// ChatModel Trait
// ============================================================================

/// 생성 모델 트레이트
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// 메시지 목록으로 한 번 생성 (`tools`가 비어 있으면 툴 미제공)
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<Completion>;

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Factory Function
// ============================================================================

/// OpenAI 호환 생성 모델 생성 (`OPENAI_API_KEY` 사용)
pub fn create_chat_model(model: &str, base_url: &str) -> Result<Arc<dyn ChatModel>> {
    let api_key = crate::embedding::get_openai_api_key()?;
    let chat = OpenAiChat::new(api_key, base_url, model)?;
    tracing::info!("Using chat model {}", model);
    Ok(Arc::new(chat))
}

type ChatFactory = Box<dyn Fn() -> Result<Arc<dyn ChatModel>> + Send + Sync>;

/// 첫 호출 시점에 생성되는 모델
///
/// 생성 모델을 쓰지 않는 명령(build, search 등)이 API 키 없이도 동작하도록
/// 생성을 미룹니다. 생성 실패는 호출마다 다시 시도합니다.
pub struct LazyChatModel {
    name: String,
    factory: ChatFactory,
    inner: tokio::sync::OnceCell<Arc<dyn ChatModel>>,
}

impl LazyChatModel {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn ChatModel>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Box::new(factory),
            inner: tokio::sync::OnceCell::new(),
        }
    }

    /// 설정된 OpenAI 호환 모델을 지연 생성
    pub fn openai(model: &str, base_url: &str) -> Self {
        let (model, base_url) = (model.to_string(), base_url.to_string());
        Self::new(model.clone(), move || create_chat_model(&model, &base_url))
    }

    /// 모델이 이미 생성되었는지
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized()
    }
}

#[async_trait]
impl ChatModel for LazyChatModel {
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<Completion> {
        let chat = self
            .inner
            .get_or_try_init(|| async { (self.factory)() })
            .await?;
        chat.complete(messages, tools).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_roundtrip_through_json() {
        let msg = ChatMessage::tool_result("call_1", "evidence");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"tool\""));
        assert!(!json.contains("tool_call\""));

        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[tokio::test]
    async fn test_lazy_model_builds_on_first_use_only() {
        use crate::testing::ScriptedChat;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let lazy = LazyChatModel::new("scripted", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(ScriptedChat::texts(&["one", "two"])) as Arc<dyn ChatModel>)
        });
        assert!(!lazy.is_initialized());
        assert_eq!(built.load(Ordering::SeqCst), 0);

        let messages = [ChatMessage::user("hi")];
        assert_eq!(lazy.complete(&messages, &[]).await.unwrap(), Completion::Text("one".into()));
        assert_eq!(lazy.complete(&messages, &[]).await.unwrap(), Completion::Text("two".into()));
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lazy_model_reports_factory_failure_at_call_time() {
        let lazy = LazyChatModel::new("missing", || Err(anyhow::anyhow!("OPENAI_API_KEY not set")));
        let err = lazy.complete(&[ChatMessage::user("hi")], &[]).await.unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
        assert!(!lazy.is_initialized());
    }

    #[test]
    fn test_tool_request_message() {
        let msg = ChatMessage::tool_request(ToolInvocation {
            id: "call_1".to_string(),
            name: "rag_search".to_string(),
            arguments: serde_json::json!({"query": "x"}),
        });
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.content.is_empty());
        assert_eq!(msg.tool_call.map(|c| c.name), Some("rag_search".to_string()));
    }
}
