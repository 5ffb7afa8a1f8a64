use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{MonthlyRewardSummary, NodeStatus, SortOrder, Transaction};
use crate::resolver_stats::ResolverSnapshot;
use crate::service::MonitoringService;

mod error;

pub use error::{ApiError, ApiResult};

const MAX_PER_PAGE: u32 = 1_000;
const MAX_BLOCK_TIME_HEIGHTS: usize = 1_000;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MonitoringService>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct HeightResponse {
    height: u64,
}

#[derive(Deserialize)]
struct AddressRequest {
    address: String,
}

#[derive(Deserialize)]
struct TransactionRequest {
    hash: String,
}

#[derive(Deserialize)]
struct AccountTransactionsRequest {
    address: String,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_per_page")]
    per_page: u32,
    #[serde(default)]
    sort: SortOrder,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    50
}

#[derive(Deserialize)]
struct BlockTimesRequest {
    heights: Vec<u64>,
}

#[derive(Deserialize)]
struct ParamsRequest {
    #[serde(default)]
    height: u64,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn height(State(state): State<AppState>) -> ApiResult<Json<HeightResponse>> {
    let height = state.service.height().await?;
    Ok(Json(HeightResponse { height }))
}

async fn params(
    State(state): State<AppState>,
    Json(req): Json<ParamsRequest>,
) -> ApiResult<Json<Value>> {
    Ok(Json(state.service.params(req.height).await?))
}

async fn node(
    State(state): State<AppState>,
    Json(req): Json<AddressRequest>,
) -> ApiResult<Json<NodeStatus>> {
    let address = require("address", &req.address)?;
    Ok(Json(state.service.node(address).await?))
}

async fn transaction(
    State(state): State<AppState>,
    Json(req): Json<TransactionRequest>,
) -> ApiResult<Json<Transaction>> {
    let hash = require("hash", &req.hash)?;
    Ok(Json(state.service.transaction(hash).await?))
}

async fn account_transactions(
    State(state): State<AppState>,
    Json(req): Json<AccountTransactionsRequest>,
) -> ApiResult<Json<Vec<Transaction>>> {
    let address = require("address", &req.address)?;
    if req.page == 0 {
        return Err(ApiError::BadRequest("page starts at 1".to_string()));
    }
    if req.per_page == 0 || req.per_page > MAX_PER_PAGE {
        return Err(ApiError::BadRequest(format!(
            "per_page must be between 1 and {}",
            MAX_PER_PAGE
        )));
    }

    let txs = state
        .service
        .account_transactions(address, req.page, req.per_page, req.sort)
        .await?;
    Ok(Json(txs))
}

async fn block_times(
    State(state): State<AppState>,
    Json(req): Json<BlockTimesRequest>,
) -> ApiResult<Json<BTreeMap<u64, DateTime<Utc>>>> {
    if req.heights.len() > MAX_BLOCK_TIME_HEIGHTS {
        return Err(ApiError::BadRequest(format!(
            "at most {} heights per request",
            MAX_BLOCK_TIME_HEIGHTS
        )));
    }
    Ok(Json(state.service.block_times(&req.heights).await?))
}

async fn monthly_rewards(
    State(state): State<AppState>,
    Json(req): Json<AddressRequest>,
) -> ApiResult<Json<Vec<MonthlyRewardSummary>>> {
    let address = require("address", &req.address)?;
    Ok(Json(state.service.monthly_rewards(address).await?))
}

async fn resolver_stats(State(state): State<AppState>) -> Json<ResolverSnapshot> {
    Json(state.service.resolver_stats())
}

fn require<'a>(field: &str, value: &'a str) -> ApiResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest(format!("missing required param '{}'", field)));
    }
    Ok(trimmed)
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/height", get(height))
        .route("/params", post(params))
        .route("/node", post(node))
        .route("/transaction", post(transaction))
        .route("/account-transactions", post(account_transactions))
        .route("/block-times", post(block_times))
        .route("/monthly-rewards", post(monthly_rewards))
        .route("/stats/block-times", get(resolver_stats))
        .with_state(state)
}

pub async fn run_http_server(addr: &str, state: AppState) -> Result<()> {
    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
