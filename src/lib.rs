pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod models;

pub use error::{LedgerError, LedgerResult};
pub use ledger::{CommitMode, Ledger};
