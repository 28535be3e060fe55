//! Chat model provider trait and wire types
//!
//! The orchestrator only depends on the `complete(messages, tools)`
//! shape; credential and transport details live in the client impls.

use crate::error::AgentError;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

pub mod azure;
pub use azure::AzureOpenAiClient;

//
// ================= Messages =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON argument payload, exactly as the model produced it.
    pub arguments: String,
}

/// A model-requested tool invocation, paired 1:1 with a tool-role
/// response message carrying the same call id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCallRequest {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// One role-tagged message in the conversation exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text("assistant", content)
    }

    /// Assistant turn that requests tool calls instead of answering.
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: None,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Tool result message, tagged with the originating call id.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

//
// ================= Tool Schemas =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

impl ToolDefinition {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Option<Value>,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

//
// ================= Responses =================
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// The model produced a final answer.
    Stop,
    /// The model requested one or more tool calls.
    ToolCalls,
    Other(String),
}

#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub message: Message,
    pub finish_reason: FinishReason,
}

impl ModelResponse {
    pub fn requested_tool_calls(&self) -> bool {
        self.finish_reason == FinishReason::ToolCalls
    }
}

//
// ================= Provider Trait =================
//

/// Trait for the model provider: one completion round-trip.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ModelResponse>;
}

//
// ================= Scripted Model =================
//

/// Deterministic model for tests and the demo binary.
///
/// Pops a queued response per `complete` call and records the message
/// list it was shown, so tests can assert on the exchange protocol.
/// Keeps the loop exercisable without a live deployment.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A response that ends the conversation with plain text.
    pub fn text_response(content: impl Into<String>) -> ModelResponse {
        ModelResponse {
            message: Message::assistant(content),
            finish_reason: FinishReason::Stop,
        }
    }

    /// A response that requests the given tool calls.
    pub fn tool_call_response(tool_calls: Vec<ToolCallRequest>) -> ModelResponse {
        ModelResponse {
            message: Message::assistant_tool_calls(tool_calls),
            finish_reason: FinishReason::ToolCalls,
        }
    }

    /// Message lists received so far, one entry per `complete` call.
    pub fn recorded_calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<ModelResponse> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }

        let mut responses = self
            .responses
            .lock()
            .map_err(|_| AgentError::LlmError("scripted model poisoned".to_string()))?;

        responses
            .pop_front()
            .ok_or_else(|| AgentError::LlmError("scripted model has no responses left".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_message_serialization() {
        let msg = Message::user("list my expenses");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "list my expenses");
        // Empty tool fields must not appear on the wire.
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
    }

    #[test]
    fn test_tool_message_carries_call_id() {
        let msg = Message::tool("call_1", r#"{"success":true}"#);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
    }

    #[test]
    fn test_tool_definition_shape() {
        let def = ToolDefinition::function(
            "submit_expense",
            "Submits an expense for approval",
            Some(json!({
                "type": "object",
                "properties": { "expenseId": { "type": "integer" } },
                "required": ["expenseId"]
            })),
        );
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "submit_expense");
        assert_eq!(json["function"]["parameters"]["required"][0], "expenseId");
    }

    #[tokio::test]
    async fn test_scripted_model_plays_in_order() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::tool_call_response(vec![ToolCallRequest::function(
                "call_1",
                "get_pending_expenses",
                "{}",
            )]),
            ScriptedModel::text_response("done"),
        ]);

        let first = model.complete(&[Message::user("hi")], &[]).await.unwrap();
        assert!(first.requested_tool_calls());

        let second = model.complete(&[Message::user("hi")], &[]).await.unwrap();
        assert_eq!(second.finish_reason, FinishReason::Stop);
        assert_eq!(second.message.content.as_deref(), Some("done"));

        // Script exhausted.
        assert!(model.complete(&[], &[]).await.is_err());
        assert_eq!(model.call_count(), 3);
    }
}
