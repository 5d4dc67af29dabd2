//! 툴 모듈 - 에이전트가 호출할 수 있는 기능
//!
//! 각 툴은 이름, 설명, JSON Schema 파라미터, `execute`를 제공하며
//! `ToolRegistry`에 이름으로 등록됩니다.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent::AgentError;
use crate::knowledge::{format_evidence, HybridRetriever};
use crate::llm::{ToolInvocation, ToolSpec};

// ============================================================================
// Tool Trait
// ============================================================================

/// 툴 트레이트
#[async_trait]
pub trait Tool: Send + Sync {
    /// 고유 이름 (모델이 호출 시 사용)
    fn name(&self) -> &str;

    /// 모델이 툴 선택에 참고하는 설명
    fn description(&self) -> &str;

    /// JSON Schema 파라미터 정의
    fn parameters(&self) -> Value;

    /// 실행
    async fn execute(&self, arguments: &Value) -> Result<String, AgentError>;

    /// 모델 제공용 명세
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

// ============================================================================
// ToolRegistry
// ============================================================================

/// 이름 → 툴 조회 테이블
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 툴 등록 (같은 이름은 교체)
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// 등록된 툴 명세 (이름순)
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 툴 호출 요청 실행
    pub async fn dispatch(&self, invocation: &ToolInvocation) -> Result<String, AgentError> {
        let tool = self
            .get(&invocation.name)
            .ok_or_else(|| AgentError::UnknownTool {
                name: invocation.name.clone(),
            })?;

        tracing::info!("Running tool {}({})", invocation.name, invocation.arguments);
        tool.execute(&invocation.arguments).await
    }
}

// ============================================================================
// RagSearchTool
// ============================================================================

/// 사이트 지식베이스 하이브리드 검색 툴
pub struct RagSearchTool {
    retriever: Arc<HybridRetriever>,
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct RagSearchArgs {
    query: String,
}

impl RagSearchTool {
    pub const NAME: &'static str = "rag_search_tool";

    pub fn new(retriever: Arc<HybridRetriever>, top_k: usize) -> Self {
        Self { retriever, top_k }
    }

    /// 검색 후 근거 블록과 결과 수 반환
    pub async fn search(&self, query: &str) -> anyhow::Result<(String, usize)> {
        let hits = self.retriever.search(query, self.top_k).await?;
        Ok((format_evidence(query, &hits), hits.len()))
    }
}

#[async_trait]
impl Tool for RagSearchTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Searches the crawled website knowledge base (services, products, solutions, \
         partners, customer cases, company information, guides). \
         Pass the user's question as the query to retrieve relevant passages."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Question or search terms to look up in the knowledge base"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: &Value) -> Result<String, AgentError> {
        let args: RagSearchArgs =
            serde_json::from_value(arguments.clone()).map_err(|e| {
                AgentError::InvalidToolArguments {
                    tool: Self::NAME.to_string(),
                    reason: e.to_string(),
                }
            })?;

        let (evidence, count) = self.search(&args.query).await?;
        tracing::info!("rag_search_tool returned {} passages", count);
        Ok(evidence)
    }
}

// ============================================================================
// Tests
// ============================================================================
