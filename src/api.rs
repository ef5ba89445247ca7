use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::config::Config;
use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::models::{AdjustRequest, AdjustResponse, BalanceView, Reconciliation, TokenTransaction};

/// Request headers browsers may send cross-origin
pub const ALLOWED_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

const DEFAULT_HISTORY_LIMIT: u32 = 10;
const MAX_HISTORY_LIMIT: u32 = 100;

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>, // defaults to 10
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        error!("Request failed: {}", self);
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// OPTIONS on any route is answered by the CORS layer with an empty 200.
/// Allowed request headers come only from `ALLOWED_HEADERS`, set on every response.
pub fn router(ledger: Arc<Ledger>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

    Router::new()
        .route("/", get(|| async { "Token ledger API running" }))
        .route("/token-transaction", post(adjust_balance))
        .route("/profiles/:user_id/balance", get(get_balance))
        .route("/profiles/:user_id/transactions", get(get_transactions))
        .route("/profiles/:user_id/reconcile", get(get_reconciliation))
        .with_state(ledger)
        .layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        ))
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(cfg: Config, ledger: Arc<Ledger>) -> eyre::Result<()> {
    let addr = SocketAddr::new(cfg.bind_addr, cfg.port);
    info!("API listening on http://{} ({} commits)", addr, ledger.mode());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(ledger).into_make_service()).await?;

    Ok(())
}

// ---------- handlers ----------

async fn adjust_balance(
    State(ledger): State<Arc<Ledger>>,
    payload: Result<Json<AdjustRequest>, JsonRejection>,
) -> Result<Json<AdjustResponse>, LedgerError> {
    let Json(req) = payload.map_err(|e| LedgerError::InvalidRequest(e.body_text()))?;
    let balance = ledger.adjust(req).await?;
    Ok(Json(AdjustResponse {
        success: true,
        balance,
    }))
}

async fn get_balance(
    State(ledger): State<Arc<Ledger>>,
    Path(user_id): Path<String>,
) -> Result<Json<BalanceView>, LedgerError> {
    let balance = ledger.balance(&user_id).await?;
    Ok(Json(BalanceView { user_id, balance }))
}

async fn get_transactions(
    State(ledger): State<Arc<Ledger>>,
    Path(user_id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<TokenTransaction>>, LedgerError> {
    let Query(q) = query.map_err(|e| LedgerError::InvalidRequest(e.body_text()))?;
    let limit = q
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    Ok(Json(ledger.history(&user_id, limit).await?))
}

async fn get_reconciliation(
    State(ledger): State<Arc<Ledger>>,
    Path(user_id): Path<String>,
) -> Result<Json<Reconciliation>, LedgerError> {
    Ok(Json(ledger.reconcile(&user_id).await?))
}
