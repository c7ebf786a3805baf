//! HTTP API for deposits, withdrawals and vault views

use crate::config::ApiConfig;
use crate::error::{VaultError, VaultResult};
use crate::types::PoolId;
use crate::vault::{DepositReceipt, VaultOrchestrator, WithdrawReceipt};

use alloy_primitives::{Address, U256};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub vault: Arc<VaultOrchestrator>,
}

/// Build the API router
pub fn router(vault: Arc<VaultOrchestrator>) -> Router {
    let state = AppState { vault };

    Router::new()
        .route("/health", get(health_check))
        .route("/pools/:pool_id/deposit", post(deposit))
        .route("/pools/:pool_id/withdraw", post(withdraw))
        .route("/pools/:pool_id/shares/:user", get(get_user_shares))
        .route("/pools/:pool_id/quote", get(quote))
        .route("/pools/:pool_id/liquidity", get(get_liquidity))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, vault: Arc<VaultOrchestrator>) -> VaultResult<()> {
    let app = router(vault);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| VaultError::Internal(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| VaultError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn deposit(
    State(state): State<AppState>,
    Path(pool_id): Path<String>,
    Json(request): Json<DepositRequest>,
) -> Result<Json<DepositResponse>, ApiError> {
    let pool_id = parse_pool(&pool_id)?;
    let user = parse_address(&request.user)?;
    let amount = parse_amount(&request.amount)?;

    let receipt = state
        .vault
        .deposit(user, pool_id, amount, request.slippage_bps)
        .await?;
    Ok(Json(receipt.into()))
}

async fn withdraw(
    State(state): State<AppState>,
    Path(pool_id): Path<String>,
    Json(request): Json<WithdrawRequest>,
) -> Result<Json<WithdrawResponse>, ApiError> {
    let pool_id = parse_pool(&pool_id)?;
    let user = parse_address(&request.user)?;
    let shares = parse_amount(&request.shares)?;

    let receipt = state
        .vault
        .withdraw(user, pool_id, shares, request.slippage_bps)
        .await?;
    Ok(Json(receipt.into()))
}

async fn get_user_shares(
    State(state): State<AppState>,
    Path((pool_id, user)): Path<(String, String)>,
) -> Result<Json<SharesResponse>, ApiError> {
    let pool_id = parse_pool(&pool_id)?;
    let user = parse_address(&user)?;
    let shares = state.vault.get_user_shares(&user, &pool_id);

    Ok(Json(SharesResponse {
        pool_id: pool_id.to_string(),
        user: user.to_string(),
        shares: shares.to_string(),
    }))
}

async fn quote(
    State(state): State<AppState>,
    Path(pool_id): Path<String>,
    Query(params): Query<QuoteParams>,
) -> Result<Json<QuoteResponse>, ApiError> {
    let pool_id = parse_pool(&pool_id)?;
    let amount = parse_amount(&params.amount)?;
    let shares = state.vault.calculate_shares(&pool_id, amount).await?;

    Ok(Json(QuoteResponse {
        pool_id: pool_id.to_string(),
        amount: amount.to_string(),
        shares: shares.to_string(),
    }))
}

async fn get_liquidity(
    State(state): State<AppState>,
    Path(pool_id): Path<String>,
) -> Result<Json<LiquidityResponse>, ApiError> {
    let pool_id = parse_pool(&pool_id)?;
    let custodial_lp = state.vault.get_total_lp_in_pool(&pool_id).await?;
    let totals = state.vault.pool_totals(&pool_id);

    Ok(Json(LiquidityResponse {
        pool_id: pool_id.to_string(),
        custodial_lp: custodial_lp.to_string(),
        total_shares: totals.total_shares.to_string(),
        total_liquidity: totals.total_liquidity.to_string(),
    }))
}

fn parse_pool(raw: &str) -> Result<PoolId, ApiError> {
    let hex_part = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(hex_part)
        .map_err(|e| ApiError::BadRequest(format!("Invalid pool id {}: {}", raw, e)))?;
    Ok(PoolId::from_short(&bytes)?)
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    Address::from_str(raw).map_err(|e| ApiError::BadRequest(format!("Invalid address {}: {}", raw, e)))
}

fn parse_amount(raw: &str) -> Result<U256, ApiError> {
    U256::from_str(raw).map_err(|e| ApiError::BadRequest(format!("Invalid amount {}: {}", raw, e)))
}

/// Error returned by API handlers
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Vault(VaultError),
}

impl From<VaultError> for ApiError {
    fn from(e: VaultError) -> Self {
        ApiError::Vault(e)
    }
}

fn status_for(error: &VaultError) -> StatusCode {
    match error {
        VaultError::ZeroLiquidity
        | VaultError::ZeroShares
        | VaultError::InsufficientShares { .. }
        | VaultError::UnmappedToken { .. }
        | VaultError::InvalidSlippage { .. }
        | VaultError::AmountOutOfRange { .. }
        | VaultError::MathOverflow { .. }
        | VaultError::Config(_) => StatusCode::BAD_REQUEST,
        VaultError::PoolNotFound { .. } => StatusCode::NOT_FOUND,
        VaultError::TransferFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        VaultError::CrossLedgerExecution(_) => StatusCode::BAD_GATEWAY,
        VaultError::LiquidityDesync { .. }
        | VaultError::InvalidStateTransition { .. }
        | VaultError::CompensationShortfall { .. }
        | VaultError::RollbackIncomplete { .. }
        | VaultError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: "bad_request".to_string(),
                    message,
                    retryable: false,
                },
            ),
            ApiError::Vault(e) => (
                status_for(&e),
                ErrorResponse {
                    error: e.kind().to_string(),
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

// Request types

#[derive(Debug, Deserialize)]
struct DepositRequest {
    user: String,
    amount: String,
    slippage_bps: u64,
}

#[derive(Debug, Deserialize)]
struct WithdrawRequest {
    user: String,
    shares: String,
    slippage_bps: u64,
}

#[derive(Debug, Deserialize)]
struct QuoteParams {
    amount: String,
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct DepositResponse {
    call_id: String,
    pool_id: String,
    user: String,
    amount: String,
    shares_minted: String,
    lp_added: u64,
}

impl From<DepositReceipt> for DepositResponse {
    fn from(r: DepositReceipt) -> Self {
        Self {
            call_id: r.call_id.to_string(),
            pool_id: r.pool_id.to_string(),
            user: r.user.to_string(),
            amount: r.amount.to_string(),
            shares_minted: r.shares_minted.to_string(),
            lp_added: r.lp_added,
        }
    }
}

#[derive(Serialize)]
struct WithdrawResponse {
    call_id: String,
    pool_id: String,
    user: String,
    shares_burned: String,
    lp_removed: u64,
    amount_returned: String,
}

impl From<WithdrawReceipt> for WithdrawResponse {
    fn from(r: WithdrawReceipt) -> Self {
        Self {
            call_id: r.call_id.to_string(),
            pool_id: r.pool_id.to_string(),
            user: r.user.to_string(),
            shares_burned: r.shares_burned.to_string(),
            lp_removed: r.lp_removed,
            amount_returned: r.amount_returned.to_string(),
        }
    }
}

#[derive(Serialize)]
struct SharesResponse {
    pool_id: String,
    user: String,
    shares: String,
}

#[derive(Serialize)]
struct QuoteResponse {
    pool_id: String,
    amount: String,
    shares: String,
}

#[derive(Serialize)]
struct LiquidityResponse {
    pool_id: String,
    custodial_lp: String,
    total_shares: String,
    total_liquidity: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    retryable: bool,
}
