// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's token account as held in the `profiles` table
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Profile {
    pub id: String,
    pub token_balance: i64,
    pub opening_balance: i64, // balance the profile was created with
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One immutable row of `token_transactions`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TokenTransaction {
    pub id: i64,
    pub user_id: String,
    pub amount: i64,
    pub transaction_type: String, // free text: "debit", "credit", "purchase", ...
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Body of `POST /token-transaction`
#[derive(Debug, Clone, Deserialize)]
pub struct AdjustRequest {
    pub user_id: String,
    pub amount: i64,
    pub transaction_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct AdjustResponse {
    pub success: bool,
    pub balance: i64,
}

#[derive(Debug, Serialize)]
pub struct BalanceView {
    pub user_id: String,
    pub balance: i64,
}

/// Balance compared against the sum of the user's ledger rows
#[derive(Debug, Serialize, PartialEq)]
pub struct Reconciliation {
    pub user_id: String,
    pub balance: i64,
    pub opening_balance: i64,
    pub ledger_total: i128,
    pub drift: i128, // i128: opening balance and ledger sum can each span the full i64 range
    pub consistent: bool,
}

impl Reconciliation {
    pub fn new(profile: &Profile, ledger_total: i128) -> Self {
        let drift = i128::from(profile.token_balance)
            - i128::from(profile.opening_balance)
            - ledger_total;
        Self {
            user_id: profile.id.clone(),
            balance: profile.token_balance,
            opening_balance: profile.opening_balance,
            ledger_total,
            drift,
            consistent: drift == 0,
        }
    }
}
