//! Threshold-signature session service
//!
//! HTTP surface over the session state machine and the commit-reveal
//! bootstrap store. The service holds no protocol logic of its own: every
//! request is parsed, handed to the core, and the typed core error mapped
//! onto an HTTP status.

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use session_store::{BootstrapStore, SessionRepository};
use tss_core::session::{RoundOutput, RoundPayload, SessionMachine};
use tss_core::types::{ApiName, OperationType, SessionId, SessionState};
use tss_core::Error;

/// TSS service CLI arguments
#[derive(Parser, Debug)]
#[command(name = "tss-svc")]
#[command(about = "Threshold-signature session service")]
struct Args {
    /// Listen address
    #[arg(short, long, env = "TSS_SVC_LISTEN", default_value = "0.0.0.0:8080")]
    listen: String,

    /// Expired-record sweep interval in seconds
    #[arg(long, env = "TSS_SVC_CLEANUP_INTERVAL", default_value = "60")]
    cleanup_interval: u64,
}

/// Application state
struct AppState {
    machine: SessionMachine<SessionRepository>,
    bootstrap: BootstrapStore,
}

/// Request to open a session
#[derive(Debug, Serialize, Deserialize)]
struct CreateSessionRequest {
    operation_type: String,
    wallet_id: String,
    identity: String,
}

/// Session view returned to callers; round material never leaves the core
#[derive(Debug, Serialize, Deserialize)]
struct SessionResponse {
    session_id: SessionId,
    operation_type: OperationType,
    state: SessionState,
    version: u64,
    expires_at: chrono::DateTime<chrono::Utc>,
}

/// Request to advance a session by one round
#[derive(Serialize, Deserialize)]
struct AdvanceRequest {
    identity: String,
    wallet_id: String,
    api: String,
    payload: RoundPayload,
}

/// Request to abort a session
#[derive(Debug, Serialize, Deserialize)]
struct AbortRequest {
    identity: String,
    wallet_id: String,
}

/// Bootstrap commit request; binary fields are hex encoded
#[derive(Debug, Serialize, Deserialize)]
struct CommitRequest {
    operation_type: String,
    client_ephemeral_pubkey: String,
    token_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CommitResponse {
    session_id: SessionId,
    expires_at: chrono::DateTime<chrono::Utc>,
}

/// Bootstrap reveal request; the token is hex encoded
#[derive(Debug, Serialize, Deserialize)]
struct RevealRequest {
    session_id: SessionId,
    token: String,
}

/// Core error carried out to an HTTP response
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Error::OwnershipMismatch | Error::AuthenticationFailed => StatusCode::FORBIDDEN,
            Error::SessionTerminal | Error::ProtocolViolation(_) => StatusCode::CONFLICT,
            Error::Expired => StatusCode::GONE,
            Error::InsufficientShares { .. } | Error::Serialization(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Error::Crypto(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({
            "error": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        }));
        (status, body).into_response()
    }
}

fn parse_hex32(field: &str, value: &str) -> Result<[u8; 32], ApiError> {
    let bytes = hex::decode(value)
        .map_err(|e| Error::Serialization(format!("Invalid hex in {field}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::Serialization(format!("{field} must be 32 bytes")).into())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!(
        listen = %args.listen,
        cleanup_interval = args.cleanup_interval,
        "Starting TSS session service"
    );

    let repository = SessionRepository::new();
    let bootstrap = BootstrapStore::new();
    let state = Arc::new(AppState {
        machine: SessionMachine::new(repository.clone()),
        bootstrap: bootstrap.clone(),
    });

    // Spawn cleanup task
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(args.cleanup_interval));
        loop {
            interval.tick().await;
            let now = chrono::Utc::now();
            repository.cleanup(now);
            bootstrap.cleanup(now);
        }
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/:id/advance", post(advance_session))
        .route("/v1/sessions/:id/abort", post(abort_session))
        .route("/v1/bootstrap/commit", post(bootstrap_commit))
        .route("/v1/bootstrap/reveal", post(bootstrap_reveal))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(address = %args.listen, "Listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tss-svc",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Open a new session
async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let operation_type: OperationType = req.operation_type.parse()?;
    let session = state
        .machine
        .create(operation_type, req.wallet_id, req.identity)
        .await?;

    Ok(Json(SessionResponse {
        session_id: session.session_id,
        operation_type: session.operation_type,
        state: session.state,
        version: session.version,
        expires_at: session.expires_at,
    }))
}

/// Advance a session by one round
async fn advance_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
    Json(req): Json<AdvanceRequest>,
) -> Result<Json<RoundOutput>, ApiError> {
    let api: ApiName = req.api.parse()?;
    let output = state
        .machine
        .advance(&id, &req.identity, &req.wallet_id, api, req.payload)
        .await?;
    Ok(Json(output))
}

/// Abort a session
async fn abort_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
    Json(req): Json<AbortRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .machine
        .abort(&id, &req.identity, &req.wallet_id)
        .await?;
    Ok(Json(serde_json::json!({ "status": "aborted" })))
}

/// Record a bootstrap commit
async fn bootstrap_commit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CommitRequest>,
) -> Result<Json<CommitResponse>, ApiError> {
    let operation_type: OperationType = req.operation_type.parse()?;
    let pubkey = parse_hex32("client_ephemeral_pubkey", &req.client_ephemeral_pubkey)?;
    let token_hash = parse_hex32("token_hash", &req.token_hash)?;

    let session = state
        .bootstrap
        .commit(operation_type, pubkey, token_hash, chrono::Utc::now());

    Ok(Json(CommitResponse {
        session_id: session.session_id,
        expires_at: session.expires_at,
    }))
}

/// Check a bootstrap reveal against its commit
async fn bootstrap_reveal(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RevealRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token = hex::decode(&req.token)
        .map_err(|e| Error::Serialization(format!("Invalid hex in token: {e}")))?;

    let session = state
        .bootstrap
        .reveal(&req.session_id, &token, chrono::Utc::now())?;

    info!(session_id = %session.session_id, "Bootstrap reveal accepted");
    Ok(Json(serde_json::json!({ "status": "revealed" })))
}
