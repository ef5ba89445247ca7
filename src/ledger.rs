// src/ledger.rs
use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Mutex},
};

use rusqlite::Connection;
use tokio::task;
use tracing::{debug, error, info};

use crate::db;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{AdjustRequest, Reconciliation, TokenTransaction};

/// How the balance update and the ledger insert are committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// Two independent store calls. A failed insert leaves the balance changed.
    #[default]
    TwoStep,
    /// Both writes in one store transaction
    Atomic,
}

impl FromStr for CommitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "two-step" | "two_step" | "twostep" => Ok(CommitMode::TwoStep),
            "atomic" => Ok(CommitMode::Atomic),
            other => Err(format!("unknown commit mode '{other}'")),
        }
    }
}

impl fmt::Display for CommitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitMode::TwoStep => f.write_str("two-step"),
            CommitMode::Atomic => f.write_str("atomic"),
        }
    }
}

/// Token balance bookkeeping over a shared SQLite connection
pub struct Ledger {
    conn: Arc<Mutex<Connection>>,
    mode: CommitMode,
}

impl Ledger {
    pub fn new(conn: Arc<Mutex<Connection>>, mode: CommitMode) -> Self {
        Self { conn, mode }
    }

    pub fn mode(&self) -> CommitMode {
        self.mode
    }

    // ---------- connection access (spawn_blocking) ----------

    async fn with_conn<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut Connection) -> LedgerResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let mut db = conn
                .lock()
                .map_err(|_| LedgerError::Unavailable("connection lock poisoned".into()))?;
            f(&mut db)
        })
        .await
        .map_err(|e| LedgerError::Unavailable(format!("store task failed: {e}")))?
    }

    /// Apply `req.amount` to the user's balance and record it in the ledger.
    /// Returns the balance after the update.
    pub async fn adjust(&self, req: AdjustRequest) -> LedgerResult<i64> {
        debug!(
            "Adjusting {} by {} ({}, mode {})",
            req.user_id, req.amount, req.transaction_type, self.mode
        );

        let balance = match self.mode {
            CommitMode::TwoStep => self.adjust_two_step(req.clone()).await?,
            CommitMode::Atomic => self.adjust_atomic(req.clone()).await?,
        };

        info!(
            "{} {} tokens for {} => balance {}",
            req.transaction_type, req.amount, req.user_id, balance
        );
        Ok(balance)
    }

    async fn adjust_two_step(&self, req: AdjustRequest) -> LedgerResult<i64> {
        let user_id = req.user_id.clone();
        let amount = req.amount;

        let profile = self
            .with_conn({
                let user_id = user_id.clone();
                move |db| {
                    db::add_to_balance(db, &user_id, amount)
                        .map_err(LedgerError::BalanceUpdate)?
                        .ok_or(LedgerError::ProfileNotFound(user_id))
                }
            })
            .await?;

        let inserted = self
            .with_conn(move |db| {
                db::insert_transaction(db, &req).map_err(LedgerError::TransactionInsert)
            })
            .await;

        if let Err(e) = inserted {
            error!(
                "Orphaned balance change: user {} moved by {} to {} with no ledger entry: {}",
                user_id, amount, profile.token_balance, e
            );
            return Err(e);
        }

        Ok(profile.token_balance)
    }

    async fn adjust_atomic(&self, req: AdjustRequest) -> LedgerResult<i64> {
        self.with_conn(move |db| {
            let tx = db.transaction()?;

            let profile = db::add_to_balance(&tx, &req.user_id, req.amount)
                .map_err(LedgerError::BalanceUpdate)?
                .ok_or_else(|| LedgerError::ProfileNotFound(req.user_id.clone()))?;
            db::insert_transaction(&tx, &req).map_err(LedgerError::TransactionInsert)?;

            tx.commit()?;
            Ok(profile.token_balance)
        })
        .await
    }

    pub async fn balance(&self, user_id: &str) -> LedgerResult<i64> {
        let user_id = user_id.to_string();
        self.with_conn(move |db| {
            db::get_profile(db, &user_id)?
                .map(|p| p.token_balance)
                .ok_or(LedgerError::ProfileNotFound(user_id))
        })
        .await
    }

    pub async fn history(&self, user_id: &str, limit: u32) -> LedgerResult<Vec<TokenTransaction>> {
        let user_id = user_id.to_string();
        self.with_conn(move |db| Ok(db::list_transactions(db, &user_id, limit)?))
            .await
    }

    /// Compare the stored balance with the ledger rows behind it
    pub async fn reconcile(&self, user_id: &str) -> LedgerResult<Reconciliation> {
        let user_id = user_id.to_string();
        let report = self
            .with_conn(move |db| {
                let profile = db::get_profile(db, &user_id)?
                    .ok_or_else(|| LedgerError::ProfileNotFound(user_id.clone()))?;
                let total = db::ledger_total(db, &user_id)?;
                Ok(Reconciliation::new(&profile, total))
            })
            .await?;

        if !report.consistent {
            error!(
                "Ledger drift for {}: balance {} vs opening {} + ledger {} (drift {})",
                report.user_id, report.balance, report.opening_balance, report.ledger_total, report.drift
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REJECT_INSERTS: &str = "
        CREATE TRIGGER reject_ledger_inserts BEFORE INSERT ON token_transactions
        BEGIN SELECT RAISE(ABORT, 'ledger offline'); END;";

    fn setup(mode: CommitMode) -> (Arc<Mutex<Connection>>, Ledger) {
        let conn = db::connect(":memory:").unwrap();
        db::run_migrations(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let ledger = Ledger::new(Arc::clone(&conn), mode);
        (conn, ledger)
    }

    fn seed(conn: &Arc<Mutex<Connection>>, user_id: &str, balance: i64) {
        db::create_profile(&conn.lock().unwrap(), user_id, balance).unwrap();
    }

    fn request(user_id: &str, amount: i64, kind: &str, description: &str) -> AdjustRequest {
        AdjustRequest {
            user_id: user_id.to_string(),
            amount,
            transaction_type: kind.to_string(),
            description: description.to_string(),
        }
    }

    fn row_count(conn: &Arc<Mutex<Connection>>) -> i64 {
        conn.lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM token_transactions", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn commit_mode_parses() {
        assert_eq!("two-step".parse::<CommitMode>().unwrap(), CommitMode::TwoStep);
        assert_eq!("TWO_STEP".parse::<CommitMode>().unwrap(), CommitMode::TwoStep);
        assert_eq!(" atomic ".parse::<CommitMode>().unwrap(), CommitMode::Atomic);
        assert!("eventually".parse::<CommitMode>().is_err());
        assert_eq!(CommitMode::default(), CommitMode::TwoStep);
    }

    #[tokio::test]
    async fn purchase_updates_balance_and_appends_row() {
        for mode in [CommitMode::TwoStep, CommitMode::Atomic] {
            let (conn, ledger) = setup(mode);
            seed(&conn, "u1", 100);

            let balance = ledger
                .adjust(request("u1", 25, "purchase", "Bought pack"))
                .await
                .unwrap();
            assert_eq!(balance, 125);

            let history = ledger.history("u1", 10).await.unwrap();
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].amount, 25);
            assert_eq!(history[0].transaction_type, "purchase");
            assert_eq!(history[0].description, "Bought pack");
            assert_eq!(ledger.balance("u1").await.unwrap(), 125);
        }
    }

    #[tokio::test]
    async fn unknown_user_writes_nothing() {
        for mode in [CommitMode::TwoStep, CommitMode::Atomic] {
            let (conn, ledger) = setup(mode);

            let err = ledger
                .adjust(request("ghost", 5, "credit", ""))
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::ProfileNotFound(ref id) if id == "ghost"));
            assert_eq!(row_count(&conn), 0);
        }
    }

    #[tokio::test]
    async fn two_step_insert_failure_leaves_balance_moved() {
        let (conn, ledger) = setup(CommitMode::TwoStep);
        seed(&conn, "u1", 100);
        conn.lock().unwrap().execute_batch(REJECT_INSERTS).unwrap();

        let err = ledger
            .adjust(request("u1", -30, "debit", "Quiz generation"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::TransactionInsert(_)));

        assert_eq!(ledger.balance("u1").await.unwrap(), 70);
        assert_eq!(row_count(&conn), 0);

        let report = ledger.reconcile("u1").await.unwrap();
        assert!(!report.consistent);
        assert_eq!(report.drift, -30);
    }

    #[tokio::test]
    async fn atomic_insert_failure_rolls_back_balance() {
        let (conn, ledger) = setup(CommitMode::Atomic);
        seed(&conn, "u1", 100);
        conn.lock().unwrap().execute_batch(REJECT_INSERTS).unwrap();

        let err = ledger
            .adjust(request("u1", -30, "debit", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::TransactionInsert(_)));

        assert_eq!(ledger.balance("u1").await.unwrap(), 100);
        assert!(ledger.reconcile("u1").await.unwrap().consistent);
    }

    #[tokio::test]
    async fn concurrent_adjustments_apply_exactly_once() {
        let (conn, ledger) = setup(CommitMode::TwoStep);
        seed(&conn, "u1", 100);

        let (a, b) = tokio::join!(
            ledger.adjust(request("u1", 10, "credit", "")),
            ledger.adjust(request("u1", -3, "debit", "")),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(ledger.balance("u1").await.unwrap(), 107);
        assert_eq!(row_count(&conn), 2);
        assert!(ledger.reconcile("u1").await.unwrap().consistent);
    }

    #[tokio::test]
    async fn reconcile_accounts_for_opening_balance() {
        let (conn, ledger) = setup(CommitMode::Atomic);
        seed(&conn, "u1", 50);
        ledger.adjust(request("u1", 7, "credit", "")).await.unwrap();
        ledger.adjust(request("u1", -2, "debit", "")).await.unwrap();

        let report = ledger.reconcile("u1").await.unwrap();
        assert_eq!(
            report,
            Reconciliation {
                user_id: "u1".into(),
                balance: 55,
                opening_balance: 50,
                ledger_total: 5,
                drift: 0,
                consistent: true,
            }
        );
    }

    #[tokio::test]
    async fn reconcile_handles_ledger_sum_beyond_i64() {
        let (conn, ledger) = setup(CommitMode::TwoStep);
        seed(&conn, "u1", -10);

        let big = i64::MAX - 5;
        assert_eq!(
            ledger.adjust(request("u1", big, "credit", "")).await.unwrap(),
            big - 10
        );
        ledger.adjust(request("u1", 10, "credit", "")).await.unwrap();

        let report = ledger.reconcile("u1").await.unwrap();
        assert_eq!(report.balance, i64::MAX - 5);
        assert_eq!(report.ledger_total, i128::from(big) + 10);
        assert_eq!(report.drift, 0);
        assert!(report.consistent);
    }

    #[tokio::test]
    async fn reconcile_unknown_user_is_an_error() {
        let (_conn, ledger) = setup(CommitMode::Atomic);
        assert!(matches!(
            ledger.reconcile("nobody").await,
            Err(LedgerError::ProfileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn balance_of_unknown_user_is_an_error() {
        let (_conn, ledger) = setup(CommitMode::TwoStep);
        assert!(matches!(
            ledger.balance("nobody").await,
            Err(LedgerError::ProfileNotFound(_))
        ));
        assert!(ledger.history("nobody", 10).await.unwrap().is_empty());
    }
}
