//! Postgres-backed expense store
//!
//! Lifecycle transitions are conditional updates: an illegal transition
//! matches zero rows and the expense is left untouched.

use crate::error::AgentError;
use crate::models::{
    major_units, Category, Expense, ExpenseCreate, ExpenseState, ExpenseSummary, ExpenseUpdate,
    User,
};
use crate::store::{ExpenseStore, InMemoryExpenseStore};
use crate::Result;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::env;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

const EXPENSE_COLUMNS: &str = r#"
    SELECT e.expense_id, e.user_id, u.user_name, u.email AS user_email,
           e.category_id, c.category_name, e.status_id, e.amount_minor,
           e.currency, e.expense_date, e.description, e.submitted_at,
           e.reviewed_by, r.user_name AS reviewer_name, e.reviewed_at,
           e.created_at
    FROM expenses e
    JOIN users u ON u.user_id = e.user_id
    JOIN categories c ON c.category_id = e.category_id
    LEFT JOIN users r ON r.user_id = e.reviewed_by
"#;

pub struct PgExpenseStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgExpenseStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS categories (
                      category_id BIGINT PRIMARY KEY,
                      category_name TEXT NOT NULL,
                      is_active BOOLEAN NOT NULL DEFAULT TRUE
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS users (
                      user_id BIGINT PRIMARY KEY,
                      user_name TEXT NOT NULL,
                      email TEXT NOT NULL,
                      role_name TEXT NOT NULL,
                      is_active BOOLEAN NOT NULL DEFAULT TRUE
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS expenses (
                      expense_id BIGSERIAL PRIMARY KEY,
                      user_id BIGINT NOT NULL REFERENCES users(user_id),
                      category_id BIGINT NOT NULL REFERENCES categories(category_id),
                      status_id BIGINT NOT NULL DEFAULT 1,
                      amount_minor BIGINT NOT NULL,
                      currency TEXT NOT NULL DEFAULT 'GBP',
                      expense_date DATE NOT NULL,
                      description TEXT,
                      submitted_at TIMESTAMPTZ,
                      reviewed_by BIGINT,
                      reviewed_at TIMESTAMPTZ,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                for category in super::default_categories() {
                    sqlx::query(
                        "INSERT INTO categories (category_id, category_name, is_active)
                         VALUES ($1, $2, $3) ON CONFLICT (category_id) DO NOTHING",
                    )
                    .bind(category.category_id)
                    .bind(&category.category_name)
                    .bind(category.is_active)
                    .execute(&self.pool)
                    .await?;
                }

                for user in super::default_users() {
                    sqlx::query(
                        "INSERT INTO users (user_id, user_name, email, role_name, is_active)
                         VALUES ($1, $2, $3, $4, $5) ON CONFLICT (user_id) DO NOTHING",
                    )
                    .bind(user.user_id)
                    .bind(&user.user_name)
                    .bind(&user.email)
                    .bind(&user.role_name)
                    .bind(user.is_active)
                    .execute(&self.pool)
                    .await?;
                }

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AgentError::DatabaseError(format!("Failed to initialize expense schema: {}", e))
            })?;

        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> AgentError {
    AgentError::DatabaseError(e.to_string())
}

fn map_expense(row: &PgRow) -> Result<Expense> {
    let status_id: i64 = row.try_get("status_id").map_err(db_err)?;
    let status = ExpenseState::from_id(status_id)
        .ok_or_else(|| AgentError::StoreError(format!("unknown status id {}", status_id)))?;
    let amount_minor: i64 = row.try_get("amount_minor").map_err(db_err)?;

    Ok(Expense {
        expense_id: row.try_get("expense_id").map_err(db_err)?,
        user_id: row.try_get("user_id").map_err(db_err)?,
        user_name: row.try_get("user_name").map_err(db_err)?,
        user_email: row.try_get("user_email").map_err(db_err)?,
        category_id: row.try_get("category_id").map_err(db_err)?,
        category_name: row.try_get("category_name").map_err(db_err)?,
        status,
        amount_minor,
        amount: major_units(amount_minor),
        currency: row.try_get("currency").map_err(db_err)?,
        expense_date: row.try_get("expense_date").map_err(db_err)?,
        description: row.try_get("description").map_err(db_err)?,
        submitted_at: row.try_get("submitted_at").map_err(db_err)?,
        reviewed_by: row.try_get("reviewed_by").map_err(db_err)?,
        reviewer_name: row.try_get("reviewer_name").map_err(db_err)?,
        reviewed_at: row.try_get("reviewed_at").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

#[async_trait::async_trait]
impl ExpenseStore for PgExpenseStore {
    async fn list_all(&self) -> Result<Vec<Expense>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(&format!("{} ORDER BY e.expense_id", EXPENSE_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(map_expense).collect()
    }

    async fn get_by_id(&self, expense_id: i64) -> Result<Option<Expense>> {
        self.ensure_schema().await?;
        let row = sqlx::query(&format!("{} WHERE e.expense_id = $1", EXPENSE_COLUMNS))
            .bind(expense_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(map_expense).transpose()
    }

    async fn list_by_status(&self, status: ExpenseState) -> Result<Vec<Expense>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(&format!(
            "{} WHERE e.status_id = $1 ORDER BY e.expense_id",
            EXPENSE_COLUMNS
        ))
        .bind(status.status_id())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(map_expense).collect()
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Expense>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(&format!(
            "{} WHERE e.user_id = $1 ORDER BY e.expense_id",
            EXPENSE_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(map_expense).collect()
    }

    async fn list_pending(&self) -> Result<Vec<Expense>> {
        self.list_by_status(ExpenseState::Submitted).await
    }

    async fn summary(&self) -> Result<ExpenseSummary> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            r#"
            SELECT COUNT(*)::BIGINT AS total_expenses,
                   COUNT(*) FILTER (WHERE status_id = 2)::BIGINT AS pending_approvals,
                   COALESCE(SUM(amount_minor) FILTER (WHERE status_id = 3), 0)::BIGINT
                       AS approved_amount_minor,
                   COUNT(*) FILTER (WHERE status_id = 3)::BIGINT AS approved_count
            FROM expenses
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(ExpenseSummary {
            total_expenses: row.try_get("total_expenses").map_err(db_err)?,
            pending_approvals: row.try_get("pending_approvals").map_err(db_err)?,
            approved_amount_minor: row.try_get("approved_amount_minor").map_err(db_err)?,
            approved_count: row.try_get("approved_count").map_err(db_err)?,
        })
    }

    async fn create(&self, model: ExpenseCreate) -> Result<i64> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            r#"
            INSERT INTO expenses (user_id, category_id, amount_minor, expense_date, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING expense_id
            "#,
        )
        .bind(model.user_id)
        .bind(model.category_id)
        .bind(model.amount_minor)
        .bind(model.expense_date)
        .bind(&model.description)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row.try_get("expense_id").map_err(db_err)
    }

    async fn update(&self, model: ExpenseUpdate) -> Result<()> {
        self.ensure_schema().await?;
        let result = sqlx::query(
            r#"
            UPDATE expenses
            SET category_id = $2, amount_minor = $3, expense_date = $4, description = $5
            WHERE expense_id = $1 AND status_id = 1
            "#,
        )
        .bind(model.expense_id)
        .bind(model.category_id)
        .bind(model.amount_minor)
        .bind(model.expense_date)
        .bind(&model.description)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(AgentError::InvalidTransition(format!(
                "expense {} is missing or no longer editable",
                model.expense_id
            )));
        }
        Ok(())
    }

    async fn submit(&self, expense_id: i64) -> Result<()> {
        self.ensure_schema().await?;
        let result = sqlx::query(
            "UPDATE expenses SET status_id = 2, submitted_at = NOW()
             WHERE expense_id = $1 AND status_id = 1",
        )
        .bind(expense_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(AgentError::InvalidTransition(format!(
                "expense {} is missing or not in Draft",
                expense_id
            )));
        }
        Ok(())
    }

    async fn approve(&self, expense_id: i64, reviewer_id: i64) -> Result<()> {
        self.ensure_schema().await?;
        let result = sqlx::query(
            "UPDATE expenses SET status_id = 3, reviewed_by = $2, reviewed_at = NOW()
             WHERE expense_id = $1 AND status_id = 2",
        )
        .bind(expense_id)
        .bind(reviewer_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(AgentError::InvalidTransition(format!(
                "expense {} is missing or not awaiting approval",
                expense_id
            )));
        }
        Ok(())
    }

    async fn reject(&self, expense_id: i64, reviewer_id: i64) -> Result<()> {
        self.ensure_schema().await?;
        let result = sqlx::query(
            "UPDATE expenses SET status_id = 4, reviewed_by = $2, reviewed_at = NOW()
             WHERE expense_id = $1 AND status_id = 2",
        )
        .bind(expense_id)
        .bind(reviewer_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(AgentError::InvalidTransition(format!(
                "expense {} is missing or not awaiting approval",
                expense_id
            )));
        }
        Ok(())
    }

    async fn delete(&self, expense_id: i64) -> Result<()> {
        self.ensure_schema().await?;
        let result = sqlx::query("DELETE FROM expenses WHERE expense_id = $1")
            .bind(expense_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(AgentError::NotFound(format!(
                "expense {} does not exist",
                expense_id
            )));
        }
        Ok(())
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT category_id, category_name, is_active FROM categories ORDER BY category_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                Ok(Category {
                    category_id: row.try_get("category_id").map_err(db_err)?,
                    category_name: row.try_get("category_name").map_err(db_err)?,
                    is_active: row.try_get("is_active").map_err(db_err)?,
                })
            })
            .collect()
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT user_id, user_name, email, role_name, is_active FROM users ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                Ok(User {
                    user_id: row.try_get("user_id").map_err(db_err)?,
                    user_name: row.try_get("user_name").map_err(db_err)?,
                    email: row.try_get("email").map_err(db_err)?,
                    role_name: row.try_get("role_name").map_err(db_err)?,
                    is_active: row.try_get("is_active").map_err(db_err)?,
                })
            })
            .collect()
    }
}

/// Select the store backend: Postgres when a database URL is configured
/// and the pool can be built, else the seeded in-memory store.
pub fn build_store() -> Arc<dyn ExpenseStore> {
    let database_url = env::var("DATABASE_URL")
        .or_else(|_| env::var("POSTGRES_URL"))
        .ok();

    if let Some(url) = database_url {
        match PgPoolOptions::new().max_connections(5).connect_lazy(&url) {
            Ok(pool) => {
                info!("Expense store backend: postgres");
                return Arc::new(PgExpenseStore::new(pool));
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres expense store, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Expense store backend: in-memory (sample data)");
    Arc::new(InMemoryExpenseStore::with_sample_data())
}
