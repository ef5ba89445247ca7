use std::sync::{Arc, Mutex};
use token_ledger::{api, config, db, Ledger};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();

    info!("Token ledger starting...");

    let cfg = config::load()?;
    info!("  DB Path: {}", cfg.db_path);
    info!("  Listen: {}:{}", cfg.bind_addr, cfg.port);
    info!("  Commit mode: {}", cfg.commit_mode);

    let conn = db::connect(&cfg.db_path)?;
    db::run_migrations(&conn)?;

    let ledger = Arc::new(Ledger::new(Arc::new(Mutex::new(conn)), cfg.commit_mode));

    let api_handle = tokio::spawn({
        let cfg = cfg.clone();
        let ledger = Arc::clone(&ledger);
        async move { api::serve(cfg, ledger).await }
    });

    tokio::select! {
        res = api_handle => match res {
            Ok(Ok(_)) => info!("API exited cleanly"),
            Ok(Err(e)) => error!("API error: {:?}", e),
            Err(e) => error!("API task panicked: {:?}", e),
        },
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    info!("Token ledger stopped.");
    Ok(())
}
