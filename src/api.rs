//! REST API server for the expense agent
//!
//! Thin HTTP glue over the expense store and the chat orchestrator.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::chat::ChatService;
use crate::error::AgentError;
use crate::models::{to_minor_units, ChatRequest, ExpenseCreate, ExpenseState, ExpenseUpdate};
use crate::store::ExpenseStore;
use crate::tools::{DEFAULT_REVIEWER_ID, DEFAULT_USER_ID};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct CreateExpenseRequest {
    pub user_id: Option<i64>,
    pub category_id: i64,
    /// Major units; converted once on the way in.
    pub amount: f64,
    pub expense_date: NaiveDate,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateExpenseRequest {
    pub category_id: i64,
    pub amount: f64,
    pub expense_date: NaiveDate,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReviewRequest {
    pub reviewer_id: Option<i64>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

fn error_status(error: &AgentError) -> StatusCode {
    match error {
        AgentError::NotFound(_) => StatusCode::NOT_FOUND,
        AgentError::InvalidTransition(_) | AgentError::InvalidToolInput(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(result: crate::Result<T>) -> (StatusCode, Json<ApiResponse>) {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Err(e) => (error_status(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn ExpenseStore>,
    pub chat: Arc<ChatService>,
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn chat_handler(
    State(state): State<ApiState>,
    Json(request): Json<ChatRequest>,
) -> Json<crate::models::ChatResponse> {
    let request_id = uuid::Uuid::new_v4();
    info!(%request_id, history_len = request.history.len(), "Received chat request");

    let response = state.chat.send_message(request).await;
    info!(%request_id, is_error = response.is_error, "Chat request completed");
    Json(response)
}

async fn chat_status(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "enabled": state.chat.is_enabled() }))
}

async fn list_expenses(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    respond(state.store.list_all().await)
}

async fn get_expense(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.store.get_by_id(id).await {
        Ok(Some(expense)) => (StatusCode::OK, Json(ApiResponse::success(expense))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("expense {} does not exist", id))),
        ),
        Err(e) => (error_status(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

async fn list_by_status(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let Some(status) = ExpenseState::from_name(&name) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!("'{}' is not a valid status", name))),
        );
    };
    respond(state.store.list_by_status(status).await)
}

async fn list_by_user(
    State(state): State<ApiState>,
    Path(user_id): Path<i64>,
) -> (StatusCode, Json<ApiResponse>) {
    respond(state.store.list_by_user(user_id).await)
}

async fn list_pending(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    respond(state.store.list_pending().await)
}

async fn summary(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    respond(state.store.summary().await)
}

async fn create_expense(
    State(state): State<ApiState>,
    Json(request): Json<CreateExpenseRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let model = ExpenseCreate {
        user_id: request.user_id.unwrap_or(DEFAULT_USER_ID),
        category_id: request.category_id,
        amount_minor: to_minor_units(request.amount),
        expense_date: request.expense_date,
        description: request.description,
    };

    match state.store.create(model).await {
        Ok(expense_id) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(
                serde_json::json!({ "expense_id": expense_id }),
            )),
        ),
        Err(e) => (error_status(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

async fn update_expense(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateExpenseRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let model = ExpenseUpdate {
        expense_id: id,
        category_id: request.category_id,
        amount_minor: to_minor_units(request.amount),
        expense_date: request.expense_date,
        description: request.description,
    };
    respond(state.store.update(model).await)
}

async fn submit_expense(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<ApiResponse>) {
    respond(state.store.submit(id).await)
}

async fn approve_expense(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    request: Option<Json<ReviewRequest>>,
) -> (StatusCode, Json<ApiResponse>) {
    let reviewer = request
        .and_then(|Json(r)| r.reviewer_id)
        .unwrap_or(DEFAULT_REVIEWER_ID);
    respond(state.store.approve(id, reviewer).await)
}

async fn reject_expense(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    request: Option<Json<ReviewRequest>>,
) -> (StatusCode, Json<ApiResponse>) {
    let reviewer = request
        .and_then(|Json(r)| r.reviewer_id)
        .unwrap_or(DEFAULT_REVIEWER_ID);
    respond(state.store.reject(id, reviewer).await)
}

async fn delete_expense(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<ApiResponse>) {
    respond(state.store.delete(id).await)
}

async fn list_categories(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    respond(state.store.list_categories().await)
}

async fn list_users(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    respond(state.store.list_users().await)
}

/// =============================
/// Router
/// =============================

pub fn create_router(store: Arc<dyn ExpenseStore>, chat: Arc<ChatService>) -> Router {
    let state = ApiState { store, chat };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/status", get(chat_status))
        .route("/api/expenses", get(list_expenses).post(create_expense))
        .route("/api/expenses/pending", get(list_pending))
        .route("/api/expenses/summary", get(summary))
        .route("/api/expenses/status/:name", get(list_by_status))
        .route("/api/expenses/user/:user_id", get(list_by_user))
        .route(
            "/api/expenses/:id",
            get(get_expense).put(update_expense).delete(delete_expense),
        )
        .route("/api/expenses/:id/submit", post(submit_expense))
        .route("/api/expenses/:id/approve", post(approve_expense))
        .route("/api/expenses/:id/reject", post(reject_expense))
        .route("/api/categories", get(list_categories))
        .route("/api/users", get(list_users))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    store: Arc<dyn ExpenseStore>,
    chat: Arc<ChatService>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(store, chat);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
