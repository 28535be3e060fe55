//! Core data models for the expense agent

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Lifecycle =================
//

/// Expense lifecycle state, keyed by the small integer codes the
/// status table uses.
///
/// `Draft → Submitted → {Approved, Rejected}`; the two review outcomes
/// are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExpenseState {
    Draft,
    Submitted,
    Approved,
    Rejected,
}

impl ExpenseState {
    pub fn status_id(&self) -> i64 {
        match self {
            ExpenseState::Draft => 1,
            ExpenseState::Submitted => 2,
            ExpenseState::Approved => 3,
            ExpenseState::Rejected => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExpenseState::Draft => "Draft",
            ExpenseState::Submitted => "Submitted",
            ExpenseState::Approved => "Approved",
            ExpenseState::Rejected => "Rejected",
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(ExpenseState::Draft),
            2 => Some(ExpenseState::Submitted),
            3 => Some(ExpenseState::Approved),
            4 => Some(ExpenseState::Rejected),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "draft" => Some(ExpenseState::Draft),
            "submitted" => Some(ExpenseState::Submitted),
            "approved" => Some(ExpenseState::Approved),
            "rejected" => Some(ExpenseState::Rejected),
            _ => None,
        }
    }

    /// Approved and Rejected accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExpenseState::Approved | ExpenseState::Rejected)
    }

    /// Field updates are only legal while in Draft.
    pub fn is_editable(&self) -> bool {
        matches!(self, ExpenseState::Draft)
    }
}

impl fmt::Display for ExpenseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

//
// ================= Money =================
//

/// Convert a major-unit amount (e.g. pounds) into the canonical
/// minor-unit value (pence). This is the single conversion point for
/// monetary tool arguments.
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Derive the major-unit mirror from the canonical minor-unit value.
pub fn major_units(amount_minor: i64) -> f64 {
    amount_minor as f64 / 100.0
}

//
// ================= Expense =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
    pub expense_id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub user_email: String,
    pub category_id: i64,
    pub category_name: String,
    pub status: ExpenseState,
    /// Canonical amount in minor units (pence).
    pub amount_minor: i64,
    /// Major-unit mirror, always amount_minor / 100.
    pub amount: f64,
    pub currency: String,
    pub expense_date: NaiveDate,
    pub description: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<i64>,
    pub reviewer_name: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseCreate {
    pub user_id: i64,
    pub category_id: i64,
    pub amount_minor: i64,
    pub expense_date: NaiveDate,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseUpdate {
    pub expense_id: i64,
    pub category_id: i64,
    pub amount_minor: i64,
    pub expense_date: NaiveDate,
    pub description: Option<String>,
}

//
// ================= Reference Data =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub category_id: i64,
    pub category_name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub user_name: String,
    pub email: String,
    pub role_name: String,
    pub is_active: bool,
}

//
// ================= Summary =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseSummary {
    pub total_expenses: i64,
    pub pending_approvals: i64,
    pub approved_amount_minor: i64,
    pub approved_count: i64,
}

impl ExpenseSummary {
    pub fn approved_amount(&self) -> f64 {
        major_units(self.approved_amount_minor)
    }
}

//
// ================= Chat Surface =================
//

/// One turn of prior conversation, as the caller persists it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
    pub is_error: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes_round_trip() {
        for state in [
            ExpenseState::Draft,
            ExpenseState::Submitted,
            ExpenseState::Approved,
            ExpenseState::Rejected,
        ] {
            assert_eq!(ExpenseState::from_id(state.status_id()), Some(state));
            assert_eq!(ExpenseState::from_name(state.name()), Some(state));
        }
        assert_eq!(ExpenseState::from_id(9), None);
        assert_eq!(ExpenseState::from_name("pending"), None);
    }

    #[test]
    fn test_state_predicates() {
        assert!(ExpenseState::Draft.is_editable());
        assert!(!ExpenseState::Submitted.is_editable());
        assert!(!ExpenseState::Draft.is_terminal());
        assert!(!ExpenseState::Submitted.is_terminal());
        assert!(ExpenseState::Approved.is_terminal());
        assert!(ExpenseState::Rejected.is_terminal());
    }

    #[test]
    fn test_state_name_parsing_is_case_insensitive() {
        assert_eq!(ExpenseState::from_name("draft"), Some(ExpenseState::Draft));
        assert_eq!(
            ExpenseState::from_name("SUBMITTED"),
            Some(ExpenseState::Submitted)
        );
    }

    #[test]
    fn test_minor_unit_conversion() {
        assert_eq!(to_minor_units(25.5), 2550);
        assert_eq!(to_minor_units(19.99), 1999);
        assert_eq!(to_minor_units(0.1), 10);
        assert_eq!(to_minor_units(120.0), 12000);
        // Float artifacts must round to the nearest penny, not truncate.
        assert_eq!(to_minor_units(0.1 + 0.2), 30);
    }

    #[test]
    fn test_major_unit_mirror() {
        assert_eq!(major_units(12000), 120.0);
        assert_eq!(major_units(1999), 19.99);
        let summary = ExpenseSummary {
            total_expenses: 4,
            pending_approvals: 1,
            approved_amount_minor: 18770,
            approved_count: 3,
        };
        assert_eq!(summary.approved_amount(), 187.70);
    }
}
