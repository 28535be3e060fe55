//! Expense persistence layer
//!
//! The store is the domain operation provider: every lifecycle
//! transition is enforced here, and a failed transition leaves the
//! expense untouched. In-memory by default; Postgres when configured.

use crate::error::AgentError;
use crate::models::{
    major_units, Category, Expense, ExpenseCreate, ExpenseState, ExpenseSummary, ExpenseUpdate,
    User,
};
use crate::Result;
use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod postgres;
pub use postgres::{build_store, PgExpenseStore};

/// Trait for expense persistence and lifecycle transitions
#[async_trait::async_trait]
pub trait ExpenseStore: Send + Sync {
    async fn list_all(&self) -> Result<Vec<Expense>>;
    async fn get_by_id(&self, expense_id: i64) -> Result<Option<Expense>>;
    async fn list_by_status(&self, status: ExpenseState) -> Result<Vec<Expense>>;
    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Expense>>;
    async fn list_pending(&self) -> Result<Vec<Expense>>;
    async fn summary(&self) -> Result<ExpenseSummary>;
    async fn create(&self, expense: ExpenseCreate) -> Result<i64>;
    async fn update(&self, expense: ExpenseUpdate) -> Result<()>;
    async fn submit(&self, expense_id: i64) -> Result<()>;
    async fn approve(&self, expense_id: i64, reviewer_id: i64) -> Result<()>;
    async fn reject(&self, expense_id: i64, reviewer_id: i64) -> Result<()>;
    async fn delete(&self, expense_id: i64) -> Result<()>;
    async fn list_categories(&self) -> Result<Vec<Category>>;
    async fn list_users(&self) -> Result<Vec<User>>;
}

/// In-memory expense store for development and tests
pub struct InMemoryExpenseStore {
    expenses: Arc<RwLock<BTreeMap<i64, Expense>>>,
    categories: Vec<Category>,
    users: Vec<User>,
    next_id: AtomicI64,
}

impl InMemoryExpenseStore {
    pub fn new() -> Self {
        Self {
            expenses: Arc::new(RwLock::new(BTreeMap::new())),
            categories: default_categories(),
            users: default_users(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Store pre-seeded with the demo dataset.
    pub fn with_sample_data() -> Self {
        let now = Utc::now();

        let samples = vec![
            sample_expense(
                1,
                1,
                ExpenseState::Submitted,
                12000,
                now - Duration::days(10),
                "Taxi from airport to client site",
                Some(now - Duration::days(9)),
                None,
            ),
            sample_expense(
                2,
                2,
                ExpenseState::Approved,
                6900,
                now - Duration::days(30),
                "Client lunch meeting",
                Some(now - Duration::days(29)),
                Some((2, now - Duration::days(28))),
            ),
            sample_expense(
                3,
                3,
                ExpenseState::Approved,
                9950,
                now - Duration::days(60),
                "Office stationery",
                Some(now - Duration::days(59)),
                Some((2, now - Duration::days(58))),
            ),
            sample_expense(
                4,
                1,
                ExpenseState::Approved,
                1920,
                now - Duration::days(90),
                "Transport to meeting",
                Some(now - Duration::days(89)),
                Some((2, now - Duration::days(88))),
            ),
        ];

        let mut map = BTreeMap::new();
        for expense in samples {
            map.insert(expense.expense_id, expense);
        }

        Self {
            expenses: Arc::new(RwLock::new(map)),
            categories: default_categories(),
            users: default_users(),
            next_id: AtomicI64::new(5),
        }
    }

    fn category(&self, category_id: i64) -> Result<&Category> {
        self.categories
            .iter()
            .find(|c| c.category_id == category_id)
            .ok_or_else(|| AgentError::NotFound(format!("category {} does not exist", category_id)))
    }

    fn user(&self, user_id: i64) -> Result<&User> {
        self.users
            .iter()
            .find(|u| u.user_id == user_id)
            .ok_or_else(|| AgentError::NotFound(format!("user {} does not exist", user_id)))
    }

    fn user_name(&self, user_id: i64) -> Option<String> {
        self.users
            .iter()
            .find(|u| u.user_id == user_id)
            .map(|u| u.user_name.clone())
    }
}

impl Default for InMemoryExpenseStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ExpenseStore for InMemoryExpenseStore {
    async fn list_all(&self) -> Result<Vec<Expense>> {
        let expenses = self.expenses.read().await;
        Ok(expenses.values().cloned().collect())
    }

    async fn get_by_id(&self, expense_id: i64) -> Result<Option<Expense>> {
        let expenses = self.expenses.read().await;
        Ok(expenses.get(&expense_id).cloned())
    }

    async fn list_by_status(&self, status: ExpenseState) -> Result<Vec<Expense>> {
        let expenses = self.expenses.read().await;
        Ok(expenses
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect())
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Expense>> {
        let expenses = self.expenses.read().await;
        Ok(expenses
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_pending(&self) -> Result<Vec<Expense>> {
        self.list_by_status(ExpenseState::Submitted).await
    }

    async fn summary(&self) -> Result<ExpenseSummary> {
        let expenses = self.expenses.read().await;

        let total_expenses = expenses.len() as i64;
        let pending_approvals = expenses
            .values()
            .filter(|e| e.status == ExpenseState::Submitted)
            .count() as i64;
        let approved: Vec<_> = expenses
            .values()
            .filter(|e| e.status == ExpenseState::Approved)
            .collect();
        let approved_amount_minor = approved.iter().map(|e| e.amount_minor).sum();

        Ok(ExpenseSummary {
            total_expenses,
            pending_approvals,
            approved_amount_minor,
            approved_count: approved.len() as i64,
        })
    }

    async fn create(&self, model: ExpenseCreate) -> Result<i64> {
        let category = self.category(model.category_id)?.clone();
        let user = self.user(model.user_id)?.clone();

        let expense_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let expense = Expense {
            expense_id,
            user_id: user.user_id,
            user_name: user.user_name,
            user_email: user.email,
            category_id: category.category_id,
            category_name: category.category_name,
            status: ExpenseState::Draft,
            amount_minor: model.amount_minor,
            amount: major_units(model.amount_minor),
            currency: "GBP".to_string(),
            expense_date: model.expense_date,
            description: model.description,
            submitted_at: None,
            reviewed_by: None,
            reviewer_name: None,
            reviewed_at: None,
            created_at: Utc::now(),
        };

        let mut expenses = self.expenses.write().await;
        expenses.insert(expense_id, expense);
        Ok(expense_id)
    }

    async fn update(&self, model: ExpenseUpdate) -> Result<()> {
        let category = self.category(model.category_id)?.clone();

        let mut expenses = self.expenses.write().await;
        let expense = expenses.get_mut(&model.expense_id).ok_or_else(|| {
            AgentError::NotFound(format!("expense {} does not exist", model.expense_id))
        })?;

        if !expense.status.is_editable() {
            return Err(AgentError::InvalidTransition(format!(
                "expense {} is {} and can no longer be edited",
                expense.expense_id, expense.status
            )));
        }

        expense.category_id = category.category_id;
        expense.category_name = category.category_name;
        expense.amount_minor = model.amount_minor;
        expense.amount = major_units(model.amount_minor);
        expense.expense_date = model.expense_date;
        expense.description = model.description;
        Ok(())
    }

    async fn submit(&self, expense_id: i64) -> Result<()> {
        let mut expenses = self.expenses.write().await;
        let expense = expenses
            .get_mut(&expense_id)
            .ok_or_else(|| AgentError::NotFound(format!("expense {} does not exist", expense_id)))?;

        if expense.status != ExpenseState::Draft {
            return Err(AgentError::InvalidTransition(format!(
                "expense {} is {} and cannot be submitted",
                expense_id, expense.status
            )));
        }

        expense.status = ExpenseState::Submitted;
        expense.submitted_at = Some(Utc::now());
        Ok(())
    }

    async fn approve(&self, expense_id: i64, reviewer_id: i64) -> Result<()> {
        let reviewer_name = self.user_name(reviewer_id);

        let mut expenses = self.expenses.write().await;
        let expense = expenses
            .get_mut(&expense_id)
            .ok_or_else(|| AgentError::NotFound(format!("expense {} does not exist", expense_id)))?;

        if expense.status != ExpenseState::Submitted {
            return Err(AgentError::InvalidTransition(format!(
                "expense {} is {} and cannot be approved",
                expense_id, expense.status
            )));
        }

        expense.status = ExpenseState::Approved;
        expense.reviewed_by = Some(reviewer_id);
        expense.reviewer_name = reviewer_name;
        expense.reviewed_at = Some(Utc::now());
        Ok(())
    }

    async fn reject(&self, expense_id: i64, reviewer_id: i64) -> Result<()> {
        let reviewer_name = self.user_name(reviewer_id);

        let mut expenses = self.expenses.write().await;
        let expense = expenses
            .get_mut(&expense_id)
            .ok_or_else(|| AgentError::NotFound(format!("expense {} does not exist", expense_id)))?;

        if expense.status != ExpenseState::Submitted {
            return Err(AgentError::InvalidTransition(format!(
                "expense {} is {} and cannot be rejected",
                expense_id, expense.status
            )));
        }

        expense.status = ExpenseState::Rejected;
        expense.reviewed_by = Some(reviewer_id);
        expense.reviewer_name = reviewer_name;
        expense.reviewed_at = Some(Utc::now());
        Ok(())
    }

    async fn delete(&self, expense_id: i64) -> Result<()> {
        // Administrative override, deliberately unconstrained by state.
        let mut expenses = self.expenses.write().await;
        expenses
            .remove(&expense_id)
            .ok_or_else(|| AgentError::NotFound(format!("expense {} does not exist", expense_id)))?;
        Ok(())
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        Ok(self.categories.clone())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.users.clone())
    }
}

fn default_categories() -> Vec<Category> {
    let names = ["Travel", "Meals", "Supplies", "Accommodation", "Other"];
    names
        .iter()
        .enumerate()
        .map(|(i, name)| Category {
            category_id: i as i64 + 1,
            category_name: name.to_string(),
            is_active: true,
        })
        .collect()
}

fn default_users() -> Vec<User> {
    vec![
        User {
            user_id: 1,
            user_name: "Alice Example".to_string(),
            email: "alice@example.co.uk".to_string(),
            role_name: "Employee".to_string(),
            is_active: true,
        },
        User {
            user_id: 2,
            user_name: "Bob Manager".to_string(),
            email: "bob.manager@example.co.uk".to_string(),
            role_name: "Manager".to_string(),
            is_active: true,
        },
    ]
}

#[allow(clippy::too_many_arguments)]
fn sample_expense(
    expense_id: i64,
    category_id: i64,
    status: ExpenseState,
    amount_minor: i64,
    expense_date: chrono::DateTime<Utc>,
    description: &str,
    submitted_at: Option<chrono::DateTime<Utc>>,
    review: Option<(i64, chrono::DateTime<Utc>)>,
) -> Expense {
    let categories = default_categories();
    let category = categories
        .iter()
        .find(|c| c.category_id == category_id)
        .expect("sample data uses seeded categories");

    Expense {
        expense_id,
        user_id: 1,
        user_name: "Alice Example".to_string(),
        user_email: "alice@example.co.uk".to_string(),
        category_id,
        category_name: category.category_name.clone(),
        status,
        amount_minor,
        amount: major_units(amount_minor),
        currency: "GBP".to_string(),
        expense_date: expense_date.date_naive(),
        description: Some(description.to_string()),
        submitted_at,
        reviewed_by: review.map(|(id, _)| id),
        reviewer_name: review.map(|_| "Bob Manager".to_string()),
        reviewed_at: review.map(|(_, at)| at),
        created_at: expense_date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn draft_model() -> ExpenseCreate {
        ExpenseCreate {
            user_id: 1,
            category_id: 2,
            amount_minor: 2550,
            expense_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            description: Some("Team lunch".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_starts_in_draft() {
        let store = InMemoryExpenseStore::new();
        let id = store.create(draft_model()).await.unwrap();

        let expense = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(expense.status, ExpenseState::Draft);
        assert_eq!(expense.amount_minor, 2550);
        assert_eq!(expense.amount, 25.50);
        assert_eq!(expense.category_name, "Meals");
        assert!(expense.submitted_at.is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_category() {
        let store = InMemoryExpenseStore::new();
        let mut model = draft_model();
        model.category_id = 42;

        let result = store.create(model).await;
        assert!(matches!(result, Err(AgentError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_submit_only_from_draft() {
        let store = InMemoryExpenseStore::new();
        let id = store.create(draft_model()).await.unwrap();

        store.submit(id).await.unwrap();
        let expense = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(expense.status, ExpenseState::Submitted);
        assert!(expense.submitted_at.is_some());

        // Second submit fails and changes nothing.
        let submitted_at = expense.submitted_at;
        let result = store.submit(id).await;
        assert!(matches!(result, Err(AgentError::InvalidTransition(_))));
        let unchanged = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, ExpenseState::Submitted);
        assert_eq!(unchanged.submitted_at, submitted_at);
    }

    #[tokio::test]
    async fn test_submit_missing_expense() {
        let store = InMemoryExpenseStore::new();
        let result = store.submit(99).await;
        assert!(matches!(result, Err(AgentError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_approve_only_from_submitted() {
        let store = InMemoryExpenseStore::new();
        let id = store.create(draft_model()).await.unwrap();

        // Draft cannot be approved.
        let result = store.approve(id, 2).await;
        assert!(matches!(result, Err(AgentError::InvalidTransition(_))));

        store.submit(id).await.unwrap();
        store.approve(id, 2).await.unwrap();

        let expense = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(expense.status, ExpenseState::Approved);
        assert_eq!(expense.reviewed_by, Some(2));
        assert_eq!(expense.reviewer_name.as_deref(), Some("Bob Manager"));
        assert!(expense.reviewed_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_states_reject_further_transitions() {
        let store = InMemoryExpenseStore::new();
        let id = store.create(draft_model()).await.unwrap();
        store.submit(id).await.unwrap();
        store.approve(id, 2).await.unwrap();

        let approved = store.get_by_id(id).await.unwrap().unwrap();

        // A second approve fails without touching the review record.
        let result = store.approve(id, 1).await;
        assert!(matches!(result, Err(AgentError::InvalidTransition(_))));
        assert!(store.reject(id, 1).await.is_err());
        assert!(store.submit(id).await.is_err());

        let unchanged = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(unchanged.reviewed_by, approved.reviewed_by);
        assert_eq!(unchanged.reviewed_at, approved.reviewed_at);
    }

    #[tokio::test]
    async fn test_reject_records_reviewer() {
        let store = InMemoryExpenseStore::new();
        let id = store.create(draft_model()).await.unwrap();
        store.submit(id).await.unwrap();
        store.reject(id, 2).await.unwrap();

        let expense = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(expense.status, ExpenseState::Rejected);
        assert_eq!(expense.reviewed_by, Some(2));
    }

    #[tokio::test]
    async fn test_update_only_while_draft() {
        let store = InMemoryExpenseStore::new();
        let id = store.create(draft_model()).await.unwrap();

        store
            .update(ExpenseUpdate {
                expense_id: id,
                category_id: 1,
                amount_minor: 9900,
                expense_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
                description: None,
            })
            .await
            .unwrap();

        let expense = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(expense.category_name, "Travel");
        assert_eq!(expense.amount_minor, 9900);
        assert!(expense.description.is_none());

        store.submit(id).await.unwrap();
        let result = store
            .update(ExpenseUpdate {
                expense_id: id,
                category_id: 1,
                amount_minor: 100,
                expense_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
                description: None,
            })
            .await;
        assert!(matches!(result, Err(AgentError::InvalidTransition(_))));

        let unchanged = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(unchanged.amount_minor, 9900);
    }

    #[tokio::test]
    async fn test_delete_ignores_state() {
        let store = InMemoryExpenseStore::new();
        let id = store.create(draft_model()).await.unwrap();
        store.submit(id).await.unwrap();
        store.approve(id, 2).await.unwrap();

        store.delete(id).await.unwrap();
        assert!(store.get_by_id(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_summary_from_sample_data() {
        let store = InMemoryExpenseStore::with_sample_data();

        let summary = store.summary().await.unwrap();
        assert_eq!(summary.total_expenses, 4);
        assert_eq!(summary.pending_approvals, 1);
        assert_eq!(summary.approved_count, 3);
        assert_eq!(summary.approved_amount_minor, 18770);
        assert_eq!(summary.approved_amount(), 187.70);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let store = InMemoryExpenseStore::with_sample_data();

        assert_eq!(store.list_all().await.unwrap().len(), 4);
        assert_eq!(store.list_pending().await.unwrap().len(), 1);
        assert_eq!(
            store
                .list_by_status(ExpenseState::Approved)
                .await
                .unwrap()
                .len(),
            3
        );
        assert_eq!(store.list_by_user(1).await.unwrap().len(), 4);
        assert!(store.list_by_user(7).await.unwrap().is_empty());
    }
}
