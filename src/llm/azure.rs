//! Azure OpenAI chat completions client
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::config::ChatConfig;
use crate::error::AgentError;
use crate::llm::{ChatModel, FinishReason, Message, ModelResponse, ToolDefinition};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const API_VERSION: &str = "2024-06-01";

/// Reusable chat completions client (connection-pooled)
pub struct AzureOpenAiClient {
    client: Client,
    endpoint: String,
    deployment: String,
    api_key: Option<String>,
}

impl AzureOpenAiClient {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| AgentError::LlmError("OPENAI_ENDPOINT not configured".to_string()))?;
        let deployment = config
            .deployment
            .clone()
            .ok_or_else(|| AgentError::LlmError("OPENAI_DEPLOYMENT not configured".to_string()))?;

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(AgentError::HttpError)?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            deployment,
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, API_VERSION
        )
    }
}

#[async_trait]
impl ChatModel for AzureOpenAiClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ModelResponse> {
        let request = ChatCompletionRequest { messages, tools };

        debug!(
            message_count = messages.len(),
            tool_count = tools.len(),
            "Calling chat completions"
        );

        let mut builder = self.client.post(self.url()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }

        let response = builder.send().await.map_err(|e| {
            error!("Chat completions request failed: {}", e);
            AgentError::LlmError(format!("Chat completions request failed: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Chat completions error response: {} {}", status, error_text);
            return Err(AgentError::LlmError(format!(
                "Chat completions returned {}: {}",
                status, error_text
            )));
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            error!("Failed to parse chat completions response: {}", e);
            AgentError::LlmError(format!("Chat completions parse error: {}", e))
        })?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::LlmError("No choices in model response".to_string()))?;

        let finish_reason = parse_finish_reason(choice.finish_reason.as_deref(), &choice.message);

        Ok(ModelResponse {
            message: choice.message,
            finish_reason,
        })
    }
}

fn parse_finish_reason(raw: Option<&str>, message: &Message) -> FinishReason {
    match raw {
        Some("stop") => FinishReason::Stop,
        Some("tool_calls") => FinishReason::ToolCalls,
        Some(other) => FinishReason::Other(other.to_string()),
        // Some gateways omit the field; fall back to the message shape.
        None if !message.tool_calls.is_empty() => FinishReason::ToolCalls,
        None => FinishReason::Stop,
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    messages: &'a [Message],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [ToolDefinition],
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let messages = vec![
            Message::system("You are an expense assistant"),
            Message::user("show pending expenses"),
        ];
        let tools = vec![ToolDefinition::function(
            "get_pending_expenses",
            "Gets all expenses waiting for approval",
            None,
        )];

        let request = ChatCompletionRequest {
            messages: &messages,
            tools: &tools,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][1]["content"], "show pending expenses");
        assert_eq!(json["tools"][0]["function"]["name"], "get_pending_expenses");
    }

    #[test]
    fn test_request_omits_empty_tool_list() {
        let messages = vec![Message::user("hello")];
        let request = ChatCompletionRequest {
            messages: &messages,
            tools: &[],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn test_response_parsing_with_tool_calls() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {
                            "name": "submit_expense",
                            "arguments": "{\"expenseId\": 5}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });

        let completion: ChatCompletionResponse = serde_json::from_value(body).unwrap();
        let choice = &completion.choices[0];
        assert_eq!(choice.message.tool_calls.len(), 1);
        assert_eq!(choice.message.tool_calls[0].id, "call_abc");
        assert_eq!(
            parse_finish_reason(choice.finish_reason.as_deref(), &choice.message),
            FinishReason::ToolCalls
        );
    }

    #[test]
    fn test_finish_reason_fallback() {
        let plain = Message::assistant("done");
        assert_eq!(parse_finish_reason(None, &plain), FinishReason::Stop);
        assert_eq!(
            parse_finish_reason(Some("length"), &plain),
            FinishReason::Other("length".to_string())
        );
    }
}
