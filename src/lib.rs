//! Expense Agent Orchestrator
//!
//! A conversational agent for an expense management system:
//! - Lets a chat model drive the same domain operations the UI exposes
//! - Dispatches model-requested tool calls against the expense store
//! - Enforces the expense lifecycle (Draft → Submitted → Approved/Rejected)
//! - Feeds tool results (and failures) back into the exchange until the
//!   model produces a final answer
//!
//! CONVERSATION LOOP:
//! MESSAGE → MODEL → TOOL CALLS? → EXECUTE → APPEND RESULTS → MODEL → ... → ANSWER

pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod store;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use chat::ChatService;
pub use config::ChatConfig;
pub use models::*;
