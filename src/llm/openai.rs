//! OpenAI Chat Completions 프로바이더 (tools 지원)
//!
//! source: https://platform.openai.com/docs/api-reference/chat/create

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChatMessage, ChatModel, Completion, Role, ToolInvocation, ToolSpec};
use crate::http::send_with_retry;

/// OpenAI (호환) 생성 모델 구현체
#[derive(Debug)]
pub struct OpenAiChat {
    api_key: String,
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(api_key: String, base_url: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            client,
        })
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: Role,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON 문자열
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSpec,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

fn function_type() -> String {
    "function".to_string()
}

fn to_wire(message: &ChatMessage) -> WireMessage {
    WireMessage {
        role: message.role,
        content: message.content.clone(),
        tool_call_id: message.tool_call_id.clone(),
        tool_calls: message.tool_call.as_ref().map(|call| {
            vec![WireToolCall {
                id: call.id.clone(),
                kind: function_type(),
                function: WireFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.to_string(),
                },
            }]
        }),
    }
}

/// 응답 본문을 `Completion`으로 변환
fn parse_completion(body: &str) -> Result<Completion> {
    let response: ChatResponse =
        serde_json::from_str(body).context("Failed to parse chat completion response")?;
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| anyhow::anyhow!("Chat completion returned no choices"))?;

    if let Some(mut calls) = message.tool_calls.filter(|c| !c.is_empty()) {
        if calls.len() > 1 {
            tracing::warn!("Model requested {} tool calls, using the first", calls.len());
        }
        let call = calls.swap_remove(0);
        let arguments = serde_json::from_str(&call.function.arguments)
            .unwrap_or(Value::String(call.function.arguments));
        return Ok(Completion::ToolCall(ToolInvocation {
            id: call.id,
            name: call.function.name,
            arguments,
        }));
    }

    Ok(Completion::Text(message.content.unwrap_or_default()))
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<Completion> {
        let request = ChatRequest {
            model: &self.model,
            messages: messages.iter().map(to_wire).collect(),
            tools: tools
                .iter()
                .map(|spec| WireTool {
                    kind: "function",
                    function: spec,
                })
                .collect(),
            temperature: 0.0,
        };

        let body = send_with_retry("OpenAI chat", || {
            self.client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&request)
        })
        .await?;

        parse_completion(&body)
    }

    fn name(&self) -> &str {
        &self.model
    }
}
