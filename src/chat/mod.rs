//! Conversation orchestrator
//!
//! Runs the multi-turn exchange with the chat model: presents the tool
//! catalog, dispatches requested tool calls against the expense store,
//! feeds results back, and repeats until the model produces a final
//! answer or the round bound is hit. Stateless between calls; the
//! caller owns the history.

use crate::config::ChatConfig;
use crate::error::AgentError;
use crate::llm::{AzureOpenAiClient, ChatModel, Message, ToolCallRequest};
use crate::models::{ChatRequest, ChatResponse};
use crate::tools::ToolRegistry;
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Maximum model round-trips that may request tools within one
/// `send_message` call. Exceeding it returns an error response to the
/// caller instead of looping indefinitely.
pub const MAX_TOOL_ROUNDS: usize = 8;

const DISABLED_MESSAGE: &str = "GenAI services are not configured. Set GENAI_ENABLED, \
OPENAI_ENDPOINT, and OPENAI_DEPLOYMENT to enable the AI chat feature. Until then, you can \
still use all the expense management features through the API.";

const ROUND_LIMIT_MESSAGE: &str = "The assistant could not finish within the allotted number \
of tool rounds. Any completed actions have been applied; please check the current expense \
list and try a more specific request.";

const SYSTEM_PROMPT: &str = r#"You are an AI assistant for the Expense Management System. You can help users with:
- Viewing expenses and their status
- Creating new expenses
- Submitting expenses for approval
- Approving or rejecting expenses (for managers)
- Getting expense summaries and statistics

You have access to functions that interact with the expense system. Expenses move through a
lifecycle: Draft -> Submitted -> Approved or Rejected. Only Draft expenses can be submitted,
and only Submitted expenses can be approved or rejected.

When listing expenses or data, format the response nicely with:
- Use numbered lists (1., 2., etc.) for listing items
- Use bullet points (- or *) for properties
- Use **bold** for emphasis on important values like amounts and status
- Include relevant details like date, category, amount, and status

Always be helpful and provide clear responses. If you need to perform an action, use the
appropriate function."#;

enum LoopOutcome {
    Answer(String),
    RoundLimitReached,
}

/// The conversation orchestrator over one chat deployment.
pub struct ChatService {
    model: Option<Arc<dyn ChatModel>>,
    registry: Arc<ToolRegistry>,
}

impl ChatService {
    /// Build from configuration: disabled (placeholder responses) when
    /// the model integration is not fully configured.
    pub fn new(config: &ChatConfig, registry: Arc<ToolRegistry>) -> Self {
        let model: Option<Arc<dyn ChatModel>> = if config.is_enabled() {
            match AzureOpenAiClient::new(config) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    warn!("Failed to build chat model client, chat disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self { model, registry }
    }

    /// Build with an explicit model (tests, demo binary).
    pub fn with_model(model: Arc<dyn ChatModel>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            model: Some(model),
            registry,
        }
    }

    /// Build permanently disabled.
    pub fn disabled(registry: Arc<ToolRegistry>) -> Self {
        Self {
            model: None,
            registry,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.model.is_some()
    }

    /// Run one conversation turn. Never fails: every fault is folded
    /// into the response with `is_error` set.
    pub async fn send_message(&self, request: ChatRequest) -> ChatResponse {
        let Some(model) = self.model.clone() else {
            return ChatResponse {
                message: DISABLED_MESSAGE.to_string(),
                is_error: false,
            };
        };

        info!(
            history_len = request.history.len(),
            "Chat: starting conversation turn"
        );

        match self.run_rounds(model.as_ref(), &request).await {
            Ok(LoopOutcome::Answer(text)) => ChatResponse {
                message: text,
                is_error: false,
            },
            Ok(LoopOutcome::RoundLimitReached) => {
                warn!(
                    max_rounds = MAX_TOOL_ROUNDS,
                    "Chat: tool round limit reached without a final answer"
                );
                ChatResponse {
                    message: ROUND_LIMIT_MESSAGE.to_string(),
                    is_error: true,
                }
            }
            Err(e) => {
                error!("Chat: conversation turn failed: {}", e);
                ChatResponse {
                    message: format!("An error occurred: {}", e),
                    is_error: true,
                }
            }
        }
    }

    async fn run_rounds(&self, model: &dyn ChatModel, request: &ChatRequest) -> Result<LoopOutcome> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(Message::system(SYSTEM_PROMPT));

        for turn in &request.history {
            match turn.role.as_str() {
                "user" => messages.push(Message::user(&turn.content)),
                "assistant" => messages.push(Message::assistant(&turn.content)),
                // Tool exchanges are per-turn scaffolding; the caller
                // only persists user/assistant turns.
                _ => {}
            }
        }
        messages.push(Message::user(&request.message));

        let tools = self.registry.definitions();

        let mut response = model.complete(&messages, &tools).await?;
        let mut rounds = 0;

        while response.requested_tool_calls() {
            rounds += 1;
            if rounds > MAX_TOOL_ROUNDS {
                return Ok(LoopOutcome::RoundLimitReached);
            }

            let tool_calls = response.message.tool_calls.clone();
            debug!(
                round = rounds,
                tool_calls = tool_calls.len(),
                "Chat: executing requested tool calls"
            );
            messages.push(response.message);

            // Execute in the order the model requested them; sibling
            // calls in one round see each other's effects only through
            // what the model itself tracks.
            for call in &tool_calls {
                let result = self.dispatch_tool_call(call).await;
                messages.push(Message::tool(call.id.clone(), result));
            }

            response = model.complete(&messages, &tools).await?;
        }

        let answer = response.message.content.ok_or_else(|| {
            AgentError::LlmError("model returned an empty final message".to_string())
        })?;

        Ok(LoopOutcome::Answer(answer))
    }

    /// Execute one tool call, serializing the result or the failure as
    /// the JSON payload fed back to the model. Domain and catalog
    /// failures are conversation content, not faults.
    async fn dispatch_tool_call(&self, call: &ToolCallRequest) -> String {
        match self.execute_tool(call).await {
            Ok(value) => value.to_string(),
            Err(e) => {
                warn!(
                    tool = %call.function.name,
                    error = %e,
                    "Chat: tool execution failed"
                );
                json!({ "error": e.to_string() }).to_string()
            }
        }
    }

    async fn execute_tool(&self, call: &ToolCallRequest) -> Result<Value> {
        let tool = self.registry.get(&call.function.name).ok_or_else(|| {
            AgentError::ToolNotFound(format!("Unknown tool: {}", call.function.name))
        })?;

        let raw = call.function.arguments.trim();
        let args: Value = if raw.is_empty() {
            json!({})
        } else {
            serde_json::from_str(raw).map_err(|e| {
                AgentError::InvalidToolInput(format!("Tool arguments are not valid JSON: {}", e))
            })?
        };

        tool.execute(&args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use crate::models::{ChatMessage, ExpenseState};
    use crate::store::{ExpenseStore, InMemoryExpenseStore};
    use crate::tools::create_default_registry;

    fn sample_setup() -> (Arc<InMemoryExpenseStore>, Arc<ToolRegistry>) {
        let store = Arc::new(InMemoryExpenseStore::with_sample_data());
        let registry = Arc::new(create_default_registry(store.clone()));
        (store, registry)
    }

    fn request(message: &str) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_disabled_mode_returns_placeholder() {
        let (store, registry) = sample_setup();
        let service = ChatService::disabled(registry);

        assert!(!service.is_enabled());

        let response = service.send_message(request("list my expenses")).await;
        assert!(!response.is_error);
        assert_eq!(response.message, DISABLED_MESSAGE);

        // No tool ran: the store still holds exactly the seeded rows.
        assert_eq!(store.list_all().await.unwrap().len(), 4);
        assert_eq!(store.list_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tool_loop_single_round() {
        let (_, registry) = sample_setup();
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedModel::tool_call_response(vec![ToolCallRequest::function(
                "call_1",
                "get_pending_expenses",
                "{}",
            )]),
            ScriptedModel::text_response("You have 1 pending expense."),
        ]));
        let service = ChatService::with_model(model.clone(), registry);

        let response = service.send_message(request("what's pending?")).await;
        assert!(!response.is_error);
        assert_eq!(response.message, "You have 1 pending expense.");
        assert_eq!(model.call_count(), 2);

        // The second model call saw exactly one tool message, paired to
        // the originating call id.
        let calls = model.recorded_calls();
        let tool_messages: Vec<_> = calls[1].iter().filter(|m| m.role == "tool").collect();
        assert_eq!(tool_messages.len(), 1);
        assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("call_1"));
        assert!(tool_messages[0]
            .content
            .as_deref()
            .unwrap()
            .contains("Taxi from airport"));
    }

    #[tokio::test]
    async fn test_sibling_calls_execute_in_order_and_pair_ids() {
        let (store, registry) = sample_setup();
        // Approve then reject the same submitted expense in one round:
        // the first succeeds, the second must come back as an error
        // payload without corrupting the state.
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedModel::tool_call_response(vec![
                ToolCallRequest::function("call_a", "approve_expense", r#"{"expenseId": 1}"#),
                ToolCallRequest::function("call_b", "reject_expense", r#"{"expenseId": 1}"#),
            ]),
            ScriptedModel::text_response("Approved expense 1; it could not also be rejected."),
        ]));
        let service = ChatService::with_model(model.clone(), registry);

        let response = service.send_message(request("approve and reject #1")).await;
        assert!(!response.is_error);

        let expense = store.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(expense.status, ExpenseState::Approved);
        assert_eq!(expense.reviewed_by, Some(2));

        let calls = model.recorded_calls();
        let tool_messages: Vec<_> = calls[1].iter().filter(|m| m.role == "tool").collect();
        assert_eq!(tool_messages.len(), 2);
        assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("call_a"));
        assert_eq!(tool_messages[1].tool_call_id.as_deref(), Some("call_b"));
        assert!(tool_messages[0].content.as_deref().unwrap().contains("success"));
        assert!(tool_messages[1].content.as_deref().unwrap().contains("error"));
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_to_model() {
        let (_, registry) = sample_setup();
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedModel::tool_call_response(vec![ToolCallRequest::function(
                "call_1",
                "get_weather",
                "{}",
            )]),
            ScriptedModel::text_response("I can only help with expenses."),
        ]));
        let service = ChatService::with_model(model.clone(), registry);

        let response = service.send_message(request("what's the weather?")).await;
        assert!(!response.is_error);

        let calls = model.recorded_calls();
        let tool_message = calls[1].iter().find(|m| m.role == "tool").unwrap();
        assert!(tool_message
            .content
            .as_deref()
            .unwrap()
            .contains("Unknown tool: get_weather"));
    }

    #[tokio::test]
    async fn test_malformed_arguments_reported_to_model() {
        let (_, registry) = sample_setup();
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedModel::tool_call_response(vec![ToolCallRequest::function(
                "call_1",
                "submit_expense",
                "{not json",
            )]),
            ScriptedModel::text_response("Something went wrong with that request."),
        ]));
        let service = ChatService::with_model(model.clone(), registry);

        let response = service.send_message(request("submit it")).await;
        assert!(!response.is_error);

        let calls = model.recorded_calls();
        let tool_message = calls[1].iter().find(|m| m.role == "tool").unwrap();
        assert!(tool_message.content.as_deref().unwrap().contains("error"));
    }

    #[tokio::test]
    async fn test_round_limit_is_enforced() {
        let (_, registry) = sample_setup();
        let endless: Vec<_> = (0..=MAX_TOOL_ROUNDS)
            .map(|i| {
                ScriptedModel::tool_call_response(vec![ToolCallRequest::function(
                    format!("call_{}", i),
                    "get_expense_summary",
                    "{}",
                )])
            })
            .collect();
        let model = Arc::new(ScriptedModel::new(endless));
        let service = ChatService::with_model(model.clone(), registry);

        let response = service.send_message(request("loop forever")).await;
        assert!(response.is_error);
        assert_eq!(response.message, ROUND_LIMIT_MESSAGE);
        // One initial call plus one per allowed round.
        assert_eq!(model.call_count(), MAX_TOOL_ROUNDS + 1);
    }

    #[tokio::test]
    async fn test_model_failure_surfaces_as_error_response() {
        let (_, registry) = sample_setup();
        let model = Arc::new(ScriptedModel::new(Vec::new()));
        let service = ChatService::with_model(model, registry);

        let response = service.send_message(request("hello")).await;
        assert!(response.is_error);
        assert!(response.message.starts_with("An error occurred:"));
    }

    #[tokio::test]
    async fn test_history_roles_are_replayed() {
        let (_, registry) = sample_setup();
        let model = Arc::new(ScriptedModel::new(vec![ScriptedModel::text_response(
            "Hello again!",
        )]));
        let service = ChatService::with_model(model.clone(), registry);

        let response = service
            .send_message(ChatRequest {
                message: "and now?".to_string(),
                history: vec![
                    ChatMessage {
                        role: "user".to_string(),
                        content: "hi".to_string(),
                    },
                    ChatMessage {
                        role: "assistant".to_string(),
                        content: "hello".to_string(),
                    },
                    ChatMessage {
                        role: "tool".to_string(),
                        content: "stale scaffolding".to_string(),
                    },
                ],
            })
            .await;
        assert!(!response.is_error);

        let calls = model.recorded_calls();
        let roles: Vec<_> = calls[0].iter().map(|m| m.role.as_str()).collect();
        // System prompt, replayed user/assistant turns, new user turn;
        // the stale tool turn is dropped.
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(calls[0][3].content.as_deref(), Some("and now?"));
    }
}
