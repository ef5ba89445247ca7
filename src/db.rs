use chrono::Utc;
use eyre::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{AdjustRequest, Profile, TokenTransaction};

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
  id              TEXT PRIMARY KEY NOT NULL,
  token_balance   INTEGER NOT NULL DEFAULT 0 CHECK (typeof(token_balance) = 'integer'),
  opening_balance INTEGER NOT NULL DEFAULT 0,
  created_at      TEXT NOT NULL,
  updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS token_transactions (
  id               INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id          TEXT NOT NULL REFERENCES profiles(id),
  amount           INTEGER NOT NULL,
  transaction_type TEXT NOT NULL,
  description      TEXT NOT NULL DEFAULT '',
  created_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS token_transactions_user
  ON token_transactions (user_id, id);
"#;

const PROFILE_COLUMNS: &str = "id, token_balance, opening_balance, created_at, updated_at";
const TRANSACTION_COLUMNS: &str =
    "id, user_id, amount, transaction_type, description, created_at";

/// Connect to SQLite (WAL for file databases, foreign keys on)
pub fn connect(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    if path != ":memory:" {
        conn.pragma_update(None, "journal_mode", "WAL")?;
    }
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Run schema migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(INIT_SQL)?;
    Ok(())
}

fn profile_from_row(r: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: r.get(0)?,
        token_balance: r.get(1)?,
        opening_balance: r.get(2)?,
        created_at: r.get(3)?,
        updated_at: r.get(4)?,
    })
}

fn transaction_from_row(r: &Row<'_>) -> rusqlite::Result<TokenTransaction> {
    Ok(TokenTransaction {
        id: r.get(0)?,
        user_id: r.get(1)?,
        amount: r.get(2)?,
        transaction_type: r.get(3)?,
        description: r.get(4)?,
        created_at: r.get(5)?,
    })
}

/// Create a profile holding `opening_balance` tokens. Fails if the id exists.
pub fn create_profile(
    conn: &Connection,
    user_id: &str,
    opening_balance: i64,
) -> rusqlite::Result<Profile> {
    let now = Utc::now();
    conn.query_row(
        &format!(
            "INSERT INTO profiles (id, token_balance, opening_balance, created_at, updated_at)
             VALUES (?1, ?2, ?2, ?3, ?3)
             RETURNING {PROFILE_COLUMNS}"
        ),
        params![user_id, opening_balance, now],
        profile_from_row,
    )
}

pub fn get_profile(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<Profile>> {
    conn.query_row(
        &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
        [user_id],
        profile_from_row,
    )
    .optional()
}

/// Add `amount` to the stored balance in a single statement.
/// Returns `None` when no profile has this id.
pub fn add_to_balance(
    conn: &Connection,
    user_id: &str,
    amount: i64,
) -> rusqlite::Result<Option<Profile>> {
    conn.query_row(
        &format!(
            "UPDATE profiles
             SET token_balance = token_balance + ?2,
                 updated_at    = ?3
             WHERE id = ?1
             RETURNING {PROFILE_COLUMNS}"
        ),
        params![user_id, amount, Utc::now()],
        profile_from_row,
    )
    .optional()
}

/// Append a ledger row for an adjustment
pub fn insert_transaction(
    conn: &Connection,
    req: &AdjustRequest,
) -> rusqlite::Result<TokenTransaction> {
    conn.query_row(
        &format!(
            "INSERT INTO token_transactions (user_id, amount, transaction_type, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING {TRANSACTION_COLUMNS}"
        ),
        params![
            req.user_id,
            req.amount,
            req.transaction_type,
            req.description,
            Utc::now()
        ],
        transaction_from_row,
    )
}

/// Most recent transactions first
pub fn list_transactions(
    conn: &Connection,
    user_id: &str,
    limit: u32,
) -> rusqlite::Result<Vec<TokenTransaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRANSACTION_COLUMNS}
         FROM token_transactions
         WHERE user_id = ?1
         ORDER BY id DESC
         LIMIT ?2"
    ))?;

    let rows = stmt.query_map(params![user_id, limit as i64], transaction_from_row)?;
    rows.collect()
}

/// Sum of every ledger amount recorded for the user.
/// Summed here rather than with SQL `SUM`, which errors once it leaves i64.
pub fn ledger_total(conn: &Connection, user_id: &str) -> rusqlite::Result<i128> {
    let mut stmt = conn.prepare("SELECT amount FROM token_transactions WHERE user_id = ?1")?;
    let mut rows = stmt.query([user_id])?;

    let mut total: i128 = 0;
    while let Some(row) = rows.next()? {
        total += i128::from(row.get::<_, i64>(0)?);
    }
    Ok(total)
}
