use std::env;
use token_ledger::{config::Config, db};

const USAGE: &str = "usage: seed_profile <user_id> [opening_balance]";

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut args = env::args().skip(1);
    let user_id = args.next().ok_or_else(|| anyhow::anyhow!(USAGE))?;
    let opening_balance: i64 = match args.next() {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid opening balance {:?}: {}", raw, e))?,
        None => 0,
    };

    let db_path = env::var("DATABASE_URL").unwrap_or(Config::default().db_path);
    let conn = db::connect(&db_path).map_err(|e| anyhow::anyhow!("{e}"))?;
    db::run_migrations(&conn).map_err(|e| anyhow::anyhow!("{e}"))?;

    let profile = db::create_profile(&conn, &user_id, opening_balance)?;
    println!("{}", serde_json::to_string_pretty(&profile)?);

    Ok(())
}
