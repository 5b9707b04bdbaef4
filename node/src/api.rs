//! # REST API
//!
//! Builds the axum router that exposes the coordinator's HTTP interface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                 | Description                              |
//! |--------|----------------------|------------------------------------------|
//! | GET    | `/health`            | Liveness check                           |
//! | GET    | `/status`            | Engine summary                           |
//! | POST   | `/commands`          | Submit a signed command                  |
//! | GET    | `/vaults/active`     | Active vault record                      |
//! | GET    | `/vaults/retiring`   | Retiring vault record                    |
//! | GET    | `/vaults/:key`       | Vault record by key                      |
//! | GET    | `/epochs/:epoch`     | Key and record of an epoch               |
//! | GET    | `/migration`         | Per-chain handover progress              |
//! | GET    | `/tokens/:token`     | Token balances per chain                 |
//! | GET    | `/fees/:chain`       | Latest agreed network fee                |
//! | GET    | `/proposals/:id`     | Proposal tally                           |
//! | GET    | `/outbound`          | Outbound orders awaiting confirmation    |
//! | GET    | `/slash/:member`     | Slash points of a member                 |
//! | GET    | `/journal/:sequence` | Applied command at a journal position    |

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use vaultkeeper_contracts::events::OutboundOrder;
use vaultkeeper_contracts::vault::{ChainMigration, VaultRecord};
use vaultkeeper_contracts::{Core, ErrorClass, Receipt};
use vaultkeeper_protocol::{Address, BlockNumber, ChainId, Epoch, Hash256, TokenId};

use crate::service::{Service, ServiceError, SignedCommand};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone; everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub service: Arc<Service>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/commands", post(submit_handler))
        .route("/vaults/active", get(active_vault_handler))
        .route("/vaults/retiring", get(retiring_vault_handler))
        .route("/vaults/:key", get(vault_handler))
        .route("/epochs/:epoch", get(epoch_handler))
        .route("/migration", get(migration_handler))
        .route("/tokens/:token", get(token_handler))
        .route("/fees/:chain", get(fee_handler))
        .route("/proposals/:id", get(proposal_handler))
        .route("/outbound", get(outbound_handler))
        .route("/slash/:member", get(slash_handler))
        .route("/journal/:sequence", get(journal_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    /// Block of the last applied command.
    pub block: BlockNumber,
    /// Number of commands applied so far.
    pub sequence: u64,
    pub active_vault: Option<Hash256>,
    pub retiring_vault: Option<Hash256>,
    pub outbound_pending: usize,
    pub open_proposals: usize,
    pub uptime_secs: i64,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Response payload for `GET /epochs/:epoch`.
#[derive(Debug, Serialize, Deserialize)]
pub struct EpochResponse {
    pub epoch: Epoch,
    /// Vault key, or the pending sentinel while key generation runs.
    pub key: Hash256,
    pub pending: bool,
    pub record: Option<VaultRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChainProgress {
    pub chain: ChainId,
    pub status: ChainMigration,
}

/// Response payload for `GET /migration`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MigrationResponse {
    pub active: Option<Hash256>,
    pub retiring: Option<Hash256>,
    pub chains: Vec<ChainProgress>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SlashResponse {
    pub member: Address,
    pub points: u64,
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Rejection class for engine errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<ErrorClass>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
    Service(ServiceError),
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError::Service(e)
    }
}

fn class_status(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Access => StatusCode::FORBIDDEN,
        ErrorClass::Conflict => StatusCode::CONFLICT,
        ErrorClass::Validation => StatusCode::BAD_REQUEST,
        ErrorClass::Invariant => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorClass::Expiry => StatusCode::GONE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, class) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::Internal(msg) => {
                tracing::error!("request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg, None)
            }
            ApiError::Service(ServiceError::Engine(e)) => {
                (class_status(e.class()), e.to_string(), Some(e.class()))
            }
            ApiError::Service(e @ ServiceError::Signature(_)) => {
                (StatusCode::UNAUTHORIZED, e.to_string(), None)
            }
            ApiError::Service(e) => {
                tracing::error!("request failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None)
            }
        };
        (status, Json(ErrorResponse { error, class })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse<T: std::str::FromStr>(what: &str, raw: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid {what}: {raw}")))
}

fn found<T>(value: Option<T>, what: impl FnOnce() -> String) -> ApiResult<T> {
    value.map(Json).ok_or_else(|| ApiError::NotFound(what()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// Runs `f` against the engine on the blocking pool. The engine lock is
/// held for the whole of a command apply, so waiting on it here would stall
/// an async worker.
async fn read_blocking<R, F>(state: &AppState, f: F) -> Result<R, ApiError>
where
    R: Send + 'static,
    F: FnOnce(&Core) -> R + Send + 'static,
{
    let service = Arc::clone(&state.service);
    tokio::task::spawn_blocking(move || service.read(f))
        .await
        .map_err(|e| ApiError::Internal(format!("read task failed: {e}")))
}

async fn status_handler(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    let version = state.version.clone();
    let started_at = state.started_at;
    let resp = read_blocking(&state, move |core| {
        let now = chrono::Utc::now();
        let engine = core.state();
        StatusResponse {
            version,
            block: engine.block(),
            sequence: engine.sequence(),
            active_vault: engine.vaults().active().map(|v| v.key),
            retiring_vault: engine.vaults().retiring().map(|v| v.key),
            outbound_pending: engine.outbound().count(),
            open_proposals: engine.proposals().len(),
            uptime_secs: (now - started_at).num_seconds(),
            timestamp: now.to_rfc3339(),
        }
    })
    .await?;
    Ok(Json(resp))
}

/// `POST /commands`: authenticates, applies and persists one command.
async fn submit_handler(
    State(state): State<AppState>,
    Json(signed): Json<SignedCommand>,
) -> ApiResult<Receipt> {
    let service = Arc::clone(&state.service);
    // Applying takes the engine lock and writes to sled; keep it off the
    // async workers.
    let receipt = tokio::task::spawn_blocking(move || service.submit(signed))
        .await
        .map_err(|e| ApiError::Internal(format!("command task failed: {e}")))??;
    Ok(Json(receipt))
}

async fn active_vault_handler(State(state): State<AppState>) -> ApiResult<VaultRecord> {
    let record = read_blocking(&state, |core| core.state().vaults().active().cloned()).await?;
    found(record, || "no active vault".into())
}

async fn retiring_vault_handler(State(state): State<AppState>) -> ApiResult<VaultRecord> {
    let record = read_blocking(&state, |core| core.state().vaults().retiring().cloned()).await?;
    found(record, || "no retiring vault".into())
}

async fn vault_handler(
    Path(key): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<VaultRecord> {
    let key: Hash256 = parse("vault key", &key)?;
    let record = read_blocking(&state, move |core| {
        core.state().vaults().vault(&key).cloned()
    })
    .await?;
    found(record, || format!("vault not found: {key}"))
}

async fn epoch_handler(
    Path(epoch): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<EpochResponse> {
    let epoch: Epoch = parse("epoch", &epoch)?;
    let resp = read_blocking(&state, move |core| {
        let vaults = core.state().vaults();
        vaults.epoch_key(epoch).map(|key| EpochResponse {
            epoch,
            key,
            pending: key == vaultkeeper_protocol::config::ELECTION_PENDING_KEY,
            record: vaults.epoch_record(epoch).cloned(),
        })
    })
    .await?;
    found(resp, || format!("epoch {epoch} has no election"))
}

async fn migration_handler(State(state): State<AppState>) -> ApiResult<MigrationResponse> {
    let resp = read_blocking(&state, |core| {
        let vaults = core.state().vaults();
        MigrationResponse {
            active: vaults.active().map(|v| v.key),
            retiring: vaults.retiring().map(|v| v.key),
            chains: vaults
                .migration_progress()
                .into_iter()
                .map(|(chain, status)| ChainProgress { chain, status })
                .collect(),
        }
    })
    .await?;
    Ok(Json(resp))
}

async fn token_handler(
    Path(token): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<serde_json::Value> {
    let token: TokenId = parse("token", &token)?;
    let value = read_blocking(&state, move |core| {
        core.state()
            .ledger()
            .token(&token)
            .map(serde_json::to_value)
    })
    .await?;
    match value {
        Some(Ok(json)) => Ok(Json(json)),
        Some(Err(e)) => Err(ApiError::Internal(format!("token encoding failed: {e}"))),
        None => Err(ApiError::NotFound(format!("token not configured: {token}"))),
    }
}

async fn fee_handler(
    Path(chain): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<vaultkeeper_contracts::events::NetworkFee> {
    let chain: ChainId = parse("chain", &chain)?;
    let fee = read_blocking(&state, move |core| core.state().network_fee(chain).copied()).await?;
    found(fee, || format!("no network fee for chain {chain}"))
}

async fn proposal_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<vaultkeeper_contracts::proposal::Proposal> {
    let id: Hash256 = parse("proposal id", &id)?;
    let proposal = read_blocking(&state, move |core| {
        core.state().proposals().get(&id).cloned()
    })
    .await?;
    found(proposal, || format!("proposal not found: {id}"))
}

async fn outbound_handler(State(state): State<AppState>) -> ApiResult<Vec<OutboundOrder>> {
    let orders: Vec<OutboundOrder> =
        read_blocking(&state, |core| core.state().outbound().cloned().collect()).await?;
    Ok(Json(orders))
}

async fn slash_handler(
    Path(member): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<SlashResponse> {
    let member: Address = parse("address", &member)?;
    let points = read_blocking(&state, move |core| core.slash_points(&member)).await?;
    Ok(Json(SlashResponse { member, points }))
}

async fn journal_handler(
    Path(sequence): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<vaultkeeper_contracts::Envelope> {
    let sequence: u64 = parse("sequence", &sequence)?;
    let service = Arc::clone(&state.service);
    let entry = tokio::task::spawn_blocking(move || service.journal_entry(sequence))
        .await
        .map_err(|e| ApiError::Internal(format!("journal task failed: {e}")))??;
    found(entry, || format!("no journal entry at {sequence}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
