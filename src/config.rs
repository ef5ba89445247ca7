use dotenvy::dotenv;
use eyre::Result;
use std::{env, net::IpAddr};
use tracing::{info, warn};

use crate::ledger::CommitMode;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub bind_addr: IpAddr,
    pub port: u16,
    pub commit_mode: CommitMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "ledger.db".to_string(),
            bind_addr: IpAddr::from([127, 0, 0, 1]),
            port: 8080,
            commit_mode: CommitMode::TwoStep,
        }
    }
}

/// Parse an env var, keeping the default (with a warning) when it is malformed
fn parse_var<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("Ignoring invalid {}={:?}: {}", key, raw, e);
            default
        }),
        Err(_) => default,
    }
}

pub fn load() -> Result<Config> {
    dotenv().ok(); // .env is optional

    let defaults = Config::default();

    let db_path = env::var("DATABASE_URL").unwrap_or(defaults.db_path);
    let bind_addr = parse_var("BIND_ADDR", defaults.bind_addr);
    let port = parse_var("PORT", defaults.port);
    let commit_mode = parse_var("LEDGER_COMMIT_MODE", defaults.commit_mode);

    let cfg = Config {
        db_path,
        bind_addr,
        port,
        commit_mode,
    };

    info!("Loaded config: {:?}", cfg);

    Ok(cfg)
}
