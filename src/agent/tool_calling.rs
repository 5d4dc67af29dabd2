//! Tool-calling 에이전트 - 모델이 직접 검색 툴 사용 여부를 결정
//!
//! 1차 호출에 등록된 툴을 제공하고, 툴 요청이 오면 실행 결과를 붙여
//! 툴 없이 2차 호출하여 최종 답변을 얻습니다.

use std::sync::Arc;

use crate::llm::{ChatMessage, ChatModel, Completion, Role};
use crate::tools::ToolRegistry;

use super::error::AgentError;

const SYSTEM_PROMPT: &str = "You are a helpful assistant that can use tools to answer questions.";

/// Tool-calling 턴 결과
#[derive(Debug, Clone)]
pub struct ToolCallingOutcome {
    pub answer: String,
    /// 세션에 기록할 메시지 (user, [tool 요청, tool 결과], assistant)
    pub new_messages: Vec<ChatMessage>,
    /// 실행된 툴 이름
    pub tool_used: Option<String>,
}

/// Tool-calling 에이전트
pub struct ToolCallingAgent {
    chat: Arc<dyn ChatModel>,
    tools: ToolRegistry,
}

impl ToolCallingAgent {
    pub fn new(chat: Arc<dyn ChatModel>, tools: ToolRegistry) -> Self {
        Self { chat, tools }
    }

    /// 한 턴 실행
    pub async fn run(
        &self,
        question: &str,
        history: Vec<ChatMessage>,
    ) -> Result<ToolCallingOutcome, AgentError> {
        let user_message = ChatMessage::user(question);

        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
        messages.extend(without_dangling_tool_results(history));
        messages.push(user_message.clone());

        let mut new_messages = vec![user_message];

        let invocation = match self.chat.complete(&messages, &self.tools.specs()).await? {
            Completion::Text(answer) => {
                tracing::info!("Model answered without tools");
                new_messages.push(ChatMessage::assistant(answer.clone()));
                return Ok(ToolCallingOutcome {
                    answer,
                    new_messages,
                    tool_used: None,
                });
            }
            Completion::ToolCall(invocation) => invocation,
        };

        tracing::info!("Model requested tool: {}", invocation.name);
        let output = self.tools.dispatch(&invocation).await?;
        let tool_name = invocation.name.clone();
        let request = ChatMessage::tool_request(invocation);
        let result = ChatMessage::tool_result(
            request
                .tool_call
                .as_ref()
                .map(|c| c.id.clone())
                .unwrap_or_default(),
            output,
        );

        messages.push(request.clone());
        messages.push(result.clone());
        new_messages.push(request);
        new_messages.push(result);

        let answer = match self.chat.complete(&messages, &[]).await? {
            Completion::Text(answer) => answer,
            Completion::ToolCall(extra) => {
                return Err(AgentError::Collaborator(anyhow::anyhow!(
                    "Model requested tool '{}' after receiving tool output",
                    extra.name
                )));
            }
        };

        new_messages.push(ChatMessage::assistant(answer.clone()));
        Ok(ToolCallingOutcome {
            answer,
            new_messages,
            tool_used: Some(tool_name),
        })
    }
}

/// suffix 앞쪽이 잘려 짝 잃은 툴 메시지 제거
///
/// 툴 결과는 바로 앞의 툴 요청과 짝을 이뤄야 하므로, 선두의 툴 결과와
/// 결과 없이 끝나는 툴 요청을 걸러냅니다.
pub(crate) fn without_dangling_tool_results(history: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut cleaned: Vec<ChatMessage> = Vec::with_capacity(history.len());

    for message in history {
        if message.role == Role::Tool {
            let paired = cleaned.last().map_or(false, |prev| {
                prev.tool_call.as_ref().map(|c| Some(&c.id)) == Some(message.tool_call_id.as_ref())
            });
            if !paired {
                continue;
            }
        } else if cleaned.last().map_or(false, |prev| prev.tool_call.is_some()) {
            cleaned.pop();
        }
        cleaned.push(message);
    }

    if cleaned.last().map_or(false, |prev| prev.tool_call.is_some()) {
        cleaned.pop();
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentError;
    use crate::knowledge::{HybridRetriever, IndexGate, KeywordIndex, MemoryVectorStore};
    use crate::llm::ToolInvocation;
    use crate::testing::{HashEmbedder, ScriptedChat};
    use crate::tools::RagSearchTool;
    use serde_json::json;
    use tempfile::TempDir;

    fn agent(dir: &TempDir, chat: Arc<ScriptedChat>) -> ToolCallingAgent {
        let retriever = Arc::new(HybridRetriever::new(
            Arc::new(MemoryVectorStore::new()),
            Arc::new(KeywordIndex::open(&dir.path().join("keyword.db")).unwrap()),
            Arc::new(HashEmbedder::new(8)),
            IndexGate::new(),
        ));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(RagSearchTool::new(retriever, 5)));
        ToolCallingAgent::new(chat, tools)
    }

    fn call(name: &str) -> Completion {
        Completion::ToolCall(ToolInvocation {
            id: "call_7".to_string(),
            name: name.to_string(),
            arguments: json!({"query": "support hours"}),
        })
    }

    #[tokio::test]
    async fn test_direct_answer() {
        let dir = TempDir::new().unwrap();
        let chat = Arc::new(ScriptedChat::texts(&["Hello!"]));
        let outcome = agent(&dir, chat.clone()).run("hi", vec![]).await.unwrap();

        assert_eq!(outcome.answer, "Hello!");
        assert!(outcome.tool_used.is_none());
        assert_eq!(outcome.new_messages.len(), 2);
        assert_eq!(chat.tools_offered(), vec![1]);
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let dir = TempDir::new().unwrap();
        let chat = Arc::new(ScriptedChat::new(vec![
            call("rag_search_tool"),
            Completion::Text("Support runs 24/7.".to_string()),
        ]));
        let outcome = agent(&dir, chat.clone())
            .run("When is support available?", vec![])
            .await
            .unwrap();

        assert_eq!(outcome.answer, "Support runs 24/7.");
        assert_eq!(outcome.tool_used.as_deref(), Some("rag_search_tool"));
        let roles: Vec<Role> = outcome.new_messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(outcome.new_messages[2].tool_call_id.as_deref(), Some("call_7"));
        // 2차 호출에는 툴을 제공하지 않음
        assert_eq!(chat.tools_offered(), vec![1, 0]);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error() {
        let dir = TempDir::new().unwrap();
        let chat = Arc::new(ScriptedChat::new(vec![call("calendar")]));
        let err = agent(&dir, chat).run("q", vec![]).await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool { name } if name == "calendar"));
    }

    #[test]
    fn test_dangling_tool_messages_removed() {
        let request = ChatMessage::tool_request(ToolInvocation {
            id: "c1".to_string(),
            name: "rag_search_tool".to_string(),
            arguments: json!({}),
        });
        let history = vec![
            ChatMessage::tool_result("c0", "orphan"),
            ChatMessage::assistant("a0"),
            ChatMessage::user("q1"),
            request.clone(),
            ChatMessage::tool_result("c1", "evidence"),
            ChatMessage::assistant("a1"),
            ChatMessage::user("q2"),
            request,
        ];

        let cleaned = without_dangling_tool_results(history);
        let contents: Vec<&str> = cleaned.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a0", "q1", "", "evidence", "a1", "q2"]);
    }
}
