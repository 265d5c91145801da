//! LLM provider seam.
//!
//! The core does not embed a model; it hands the transcript and the tool
//! specs to whatever provider the host wires in and consumes the reply.

use crate::error::Result;
use crate::session::thread::Thread;
use crate::tools::ToolSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub tool: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmReply {
    /// Final text for the operator, when the model is done with tools.
    pub text: Option<String>,
    /// Tool invocations to run before asking the model again.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn reply(&self, thread: &Thread, tools: &[ToolSpec]) -> Result<LlmReply>;
}
