//! Tool trait and registry
//!
//! Every tool the assistant may call is a domain operation on the
//! expense store. Required arguments are validated here before the
//! store is touched; a missing argument fails the same way a domain
//! error does.

use crate::error::AgentError;
use crate::llm::ToolDefinition;
use crate::models::{major_units, to_minor_units, Expense, ExpenseCreate, ExpenseState};
use crate::store::ExpenseStore;
use crate::Result;
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// User id assumed when `create_expense` omits one (the UI's default user).
pub const DEFAULT_USER_ID: i64 = 1;
/// Reviewer id assumed when approve/reject omit one (the UI's default manager).
pub const DEFAULT_REVIEWER_ID: i64 = 2;

/// Trait for a single assistant-callable tool
#[async_trait::async_trait]
pub trait ExpenseTool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON Schema for the argument payload; None for no-argument tools.
    fn parameters(&self) -> Option<Value> {
        None
    }
    async fn execute(&self, args: &Value) -> Result<Value>;
}

/// Tool registry for looking up and executing tools.
///
/// Built once at startup and shared read-only across conversations.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ExpenseTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn ExpenseTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExpenseTool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Schemas presented to the model, in stable name order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<_> = self.tools.values().collect();
        tools.sort_unstable_by_key(|t| t.name());
        tools
            .iter()
            .map(|t| ToolDefinition::function(t.name(), t.description(), t.parameters()))
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= Argument Helpers =================
//

fn require_i64(args: &Value, key: &str) -> Result<i64> {
    args.get(key).and_then(Value::as_i64).ok_or_else(|| {
        AgentError::InvalidToolInput(format!("Expected integer '{}' in tool arguments", key))
    })
}

fn optional_i64(args: &Value, key: &str, default: i64) -> Result<i64> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value.as_i64().ok_or_else(|| {
            AgentError::InvalidToolInput(format!("'{}' must be an integer", key))
        }),
    }
}

fn require_f64(args: &Value, key: &str) -> Result<f64> {
    args.get(key).and_then(Value::as_f64).ok_or_else(|| {
        AgentError::InvalidToolInput(format!("Expected number '{}' in tool arguments", key))
    })
}

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| {
        AgentError::InvalidToolInput(format!("Expected string '{}' in tool arguments", key))
    })
}

fn optional_str(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        AgentError::InvalidToolInput(format!(
            "'{}' is not a valid date; expected YYYY-MM-DD",
            value
        ))
    })
}

fn format_amount(amount_minor: i64) -> String {
    format!("£{:.2}", major_units(amount_minor))
}

/// Projection of an expense as the model sees it.
fn expense_view(expense: &Expense) -> Value {
    json!({
        "expenseId": expense.expense_id,
        "userName": expense.user_name,
        "categoryName": expense.category_name,
        "amount": format_amount(expense.amount_minor),
        "expenseDate": expense.expense_date.to_string(),
        "status": expense.status.name(),
        "description": expense.description,
    })
}

fn expense_list_view(expenses: &[Expense]) -> Value {
    Value::Array(expenses.iter().map(expense_view).collect())
}

//
// ================= Query Tools =================
//

pub struct GetAllExpensesTool {
    store: Arc<dyn ExpenseStore>,
}

#[async_trait::async_trait]
impl ExpenseTool for GetAllExpensesTool {
    fn name(&self) -> &'static str {
        "get_all_expenses"
    }

    fn description(&self) -> &'static str {
        "Retrieves all expenses from the system with details including amount, category, status, and description"
    }

    async fn execute(&self, _args: &Value) -> Result<Value> {
        let expenses = self.store.list_all().await?;
        Ok(expense_list_view(&expenses))
    }
}

pub struct GetExpensesByStatusTool {
    store: Arc<dyn ExpenseStore>,
}

#[async_trait::async_trait]
impl ExpenseTool for GetExpensesByStatusTool {
    fn name(&self) -> &'static str {
        "get_expenses_by_status"
    }

    fn description(&self) -> &'static str {
        "Gets expenses filtered by status"
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "description": "The status to filter by: Draft, Submitted, Approved, or Rejected",
                    "enum": ["Draft", "Submitted", "Approved", "Rejected"]
                }
            },
            "required": ["status"]
        }))
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let name = require_str(args, "status")?;
        let status = ExpenseState::from_name(name).ok_or_else(|| {
            AgentError::InvalidToolInput(format!(
                "'{}' is not a valid status; expected Draft, Submitted, Approved, or Rejected",
                name
            ))
        })?;

        let expenses = self.store.list_by_status(status).await?;
        Ok(expense_list_view(&expenses))
    }
}

pub struct GetPendingExpensesTool {
    store: Arc<dyn ExpenseStore>,
}

#[async_trait::async_trait]
impl ExpenseTool for GetPendingExpensesTool {
    fn name(&self) -> &'static str {
        "get_pending_expenses"
    }

    fn description(&self) -> &'static str {
        "Gets all expenses that are waiting for approval (status = Submitted)"
    }

    async fn execute(&self, _args: &Value) -> Result<Value> {
        let expenses = self.store.list_pending().await?;
        Ok(expense_list_view(&expenses))
    }
}

pub struct GetExpenseSummaryTool {
    store: Arc<dyn ExpenseStore>,
}

#[async_trait::async_trait]
impl ExpenseTool for GetExpenseSummaryTool {
    fn name(&self) -> &'static str {
        "get_expense_summary"
    }

    fn description(&self) -> &'static str {
        "Gets summary statistics including total expenses, pending approvals, and approved amounts"
    }

    async fn execute(&self, _args: &Value) -> Result<Value> {
        let summary = self.store.summary().await?;
        Ok(json!({
            "totalExpenses": summary.total_expenses,
            "pendingApprovals": summary.pending_approvals,
            "approvedAmount": format_amount(summary.approved_amount_minor),
            "approvedCount": summary.approved_count,
        }))
    }
}

//
// ================= Mutation Tools =================
//

pub struct CreateExpenseTool {
    store: Arc<dyn ExpenseStore>,
}

#[async_trait::async_trait]
impl ExpenseTool for CreateExpenseTool {
    fn name(&self) -> &'static str {
        "create_expense"
    }

    fn description(&self) -> &'static str {
        "Creates a new expense"
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "userId": { "type": "integer", "description": "The user ID creating the expense (default 1)" },
                "categoryId": { "type": "integer", "description": "Category ID: 1=Travel, 2=Meals, 3=Supplies, 4=Accommodation, 5=Other" },
                "amount": { "type": "number", "description": "Amount in GBP (e.g., 25.50)" },
                "expenseDate": { "type": "string", "description": "Date of expense in YYYY-MM-DD format" },
                "description": { "type": "string", "description": "Description of the expense" }
            },
            "required": ["categoryId", "amount", "expenseDate"]
        }))
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let model = ExpenseCreate {
            user_id: optional_i64(args, "userId", DEFAULT_USER_ID)?,
            category_id: require_i64(args, "categoryId")?,
            // Major units on the wire, minor units everywhere past here.
            amount_minor: to_minor_units(require_f64(args, "amount")?),
            expense_date: parse_date(require_str(args, "expenseDate")?)?,
            description: optional_str(args, "description"),
        };

        let expense_id = self.store.create(model).await?;
        Ok(json!({ "success": true, "expenseId": expense_id }))
    }
}

pub struct SubmitExpenseTool {
    store: Arc<dyn ExpenseStore>,
}

#[async_trait::async_trait]
impl ExpenseTool for SubmitExpenseTool {
    fn name(&self) -> &'static str {
        "submit_expense"
    }

    fn description(&self) -> &'static str {
        "Submits an expense for approval"
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "expenseId": { "type": "integer", "description": "The ID of the expense to submit" }
            },
            "required": ["expenseId"]
        }))
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let expense_id = require_i64(args, "expenseId")?;
        self.store.submit(expense_id).await?;
        Ok(json!({ "success": true }))
    }
}

pub struct ApproveExpenseTool {
    store: Arc<dyn ExpenseStore>,
}

#[async_trait::async_trait]
impl ExpenseTool for ApproveExpenseTool {
    fn name(&self) -> &'static str {
        "approve_expense"
    }

    fn description(&self) -> &'static str {
        "Approves an expense (manager action)"
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "expenseId": { "type": "integer", "description": "The ID of the expense to approve" },
                "reviewerId": { "type": "integer", "description": "The manager's user ID (default 2)" }
            },
            "required": ["expenseId"]
        }))
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let expense_id = require_i64(args, "expenseId")?;
        let reviewer_id = optional_i64(args, "reviewerId", DEFAULT_REVIEWER_ID)?;
        self.store.approve(expense_id, reviewer_id).await?;
        Ok(json!({ "success": true }))
    }
}

pub struct RejectExpenseTool {
    store: Arc<dyn ExpenseStore>,
}

#[async_trait::async_trait]
impl ExpenseTool for RejectExpenseTool {
    fn name(&self) -> &'static str {
        "reject_expense"
    }

    fn description(&self) -> &'static str {
        "Rejects an expense (manager action)"
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "expenseId": { "type": "integer", "description": "The ID of the expense to reject" },
                "reviewerId": { "type": "integer", "description": "The manager's user ID (default 2)" }
            },
            "required": ["expenseId"]
        }))
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let expense_id = require_i64(args, "expenseId")?;
        let reviewer_id = optional_i64(args, "reviewerId", DEFAULT_REVIEWER_ID)?;
        self.store.reject(expense_id, reviewer_id).await?;
        Ok(json!({ "success": true }))
    }
}

/// Create the default registry with every expense tool bound to the store.
pub fn create_default_registry(store: Arc<dyn ExpenseStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(GetAllExpensesTool {
        store: store.clone(),
    }));
    registry.register(Arc::new(GetExpensesByStatusTool {
        store: store.clone(),
    }));
    registry.register(Arc::new(GetPendingExpensesTool {
        store: store.clone(),
    }));
    registry.register(Arc::new(GetExpenseSummaryTool {
        store: store.clone(),
    }));
    registry.register(Arc::new(CreateExpenseTool {
        store: store.clone(),
    }));
    registry.register(Arc::new(SubmitExpenseTool {
        store: store.clone(),
    }));
    registry.register(Arc::new(ApproveExpenseTool {
        store: store.clone(),
    }));
    registry.register(Arc::new(RejectExpenseTool { store }));

    registry
}
