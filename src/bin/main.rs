use expense_agent_orchestrator::{
    chat::ChatService,
    llm::{ScriptedModel, ToolCallRequest},
    models::ChatRequest,
    store::{ExpenseStore, InMemoryExpenseStore},
    tools::create_default_registry,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Expense Agent Orchestrator starting");

    // Create components over the seeded in-memory store
    let store = Arc::new(InMemoryExpenseStore::with_sample_data());
    let registry = Arc::new(create_default_registry(store.clone()));

    // A scripted model keeps the demo deterministic and offline: first
    // it asks for the pending list, then it answers.
    let model = Arc::new(ScriptedModel::new(vec![
        ScriptedModel::tool_call_response(vec![ToolCallRequest::function(
            "call_1",
            "get_pending_expenses",
            "{}",
        )]),
        ScriptedModel::text_response(
            "You have 1 pending expense: £120.00 (Travel) — taxi from the airport.",
        ),
    ]));

    let chat = ChatService::with_model(model, registry);

    let request = ChatRequest {
        message: "Which expenses are waiting for approval?".to_string(),
        history: Vec::new(),
    };

    info!(message = %request.message, "Running conversation turn");

    let response = chat.send_message(request).await;

    println!("\n=== CHAT RESPONSE ===");
    println!("Is error: {}", response.is_error);
    println!("Message:  {}", response.message);

    let summary = store.summary().await?;
    println!("\n=== STORE SUMMARY ===");
    println!("Total expenses:    {}", summary.total_expenses);
    println!("Pending approvals: {}", summary.pending_approvals);
    println!("Approved amount:   £{:.2}", summary.approved_amount());

    Ok(())
}
