//! HTTP API for the verification service.
//!
//! This module provides an HTTP server that:
//! - Opens verification sessions for integrating sites (site-key header)
//! - Accepts final channel scores and mints verification tokens
//! - Issues, refreshes, and revokes long-lived human tokens
//! - Creates and authorizes agent delegations
//! - Serves the audit trail and aggregate stats (secret-key auth)
//!
//! # Architecture
//!
//! ```text
//! Browser widget ──→ POST /v1/sessions ──→ humansig ──→ token / delegation
//! Agent platform ──→ POST /v1/delegations/{id}/verify ──→ allow / deny
//! ```

use crate::store::{
    AuditFilter, ConstraintRequest, DelegationScope, Store, TokenVerification,
};
use crate::signal::ChannelScores;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Extra CORS origins; empty means any origin
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(port: u16, allowed_origins: Vec<String>) -> Self {
        Self {
            port,
            allowed_origins,
        }
    }
}

/// Shared server state
pub struct ServerState {
    /// All verification state, behind one async lock
    store: RwLock<Store>,
}

impl ServerState {
    /// Create new server state with a fresh store
    pub fn new() -> Self {
        Self {
            store: RwLock::new(Store::new()),
        }
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            code: code.to_string(),
        }),
    )
}

/// Client IP, preferring the forwarding header a reverse proxy sets.
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Resolve the Bearer secret key to an API key, or deny.
async fn require_secret_key(
    state: &ServerState,
    headers: &HeaderMap,
) -> Result<crate::store::ApiKey, ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            api_error(
                StatusCode::UNAUTHORIZED,
                "MISSING_AUTH",
                "Missing Authorization header",
            )
        })?;

    state
        .store
        .read()
        .await
        .api_key_by_secret_key(token)
        .ok_or_else(|| {
            api_error(
                StatusCode::UNAUTHORIZED,
                "INVALID_SECRET_KEY",
                "Unknown secret key",
            )
        })
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ===== API keys =====

#[derive(Deserialize)]
struct CreateKeyRequest {
    name: String,
    domain: String,
}

/// POST /v1/keys
async fn create_key(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<CreateKeyRequest>,
) -> Json<crate::store::ApiKey> {
    let key = state.store.write().await.create_api_key(&req.name, &req.domain);
    tracing::info!(key_id = %key.id, domain = %req.domain, "API key created");
    Json(key)
}

/// GET /v1/keys
async fn list_keys(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<crate::store::ApiKey>>, ApiError> {
    require_secret_key(&state, &headers).await?;
    let store = state.store.read().await;
    Ok(Json(store.list_api_keys()))
}

// ===== Sessions =====

/// POST /v1/sessions
///
/// Opens a pending session for the site key in `x-site-key`. 402 when the
/// key's monthly quota is spent.
async fn create_session(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Json<crate::store::Session>, ApiError> {
    let site_key = headers
        .get("x-site-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                "MISSING_SITE_KEY",
                "Missing x-site-key header",
            )
        })?;

    let ip = client_ip(&headers);
    let ua = user_agent(&headers);
    let mut store = state.store.write().await;

    if store.api_key_by_site_key(site_key).is_none() {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "INVALID_SITE_KEY",
            "Unknown site key",
        ));
    }

    let session = store.create_session(site_key, &ip, &ua).ok_or_else(|| {
        api_error(
            StatusCode::PAYMENT_REQUIRED,
            "QUOTA_EXCEEDED",
            "Monthly session quota exceeded",
        )
    })?;

    tracing::debug!(session_id = %session.id, "session opened");
    Ok(Json(session))
}

/// GET /v1/sessions/{id}
async fn get_session(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<crate::store::Session>, ApiError> {
    state
        .store
        .read()
        .await
        .session(&id)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", "Unknown session"))
}

#[derive(Deserialize)]
struct CompleteSessionRequest {
    score: f64,
    #[serde(default)]
    channels: ChannelScores,
}

/// POST /v1/sessions/{id}/complete
async fn complete_session(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(req): Json<CompleteSessionRequest>,
) -> Result<Json<crate::store::Session>, ApiError> {
    if !(0.0..=1.0).contains(&req.score) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_SCORE",
            "Score must be between 0 and 1",
        ));
    }

    let session = state
        .store
        .write()
        .await
        .complete_session(&id, req.score, req.channels)
        .ok_or_else(|| {
            api_error(StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", "Unknown session")
        })?;

    tracing::info!(
        session_id = %id,
        score = req.score,
        is_human = session.is_human,
        "session completed"
    );
    Ok(Json(session))
}

#[derive(Deserialize)]
struct VerifyTokenRequest {
    token: String,
}

/// POST /v1/verify
///
/// Server-to-server token check; requires the secret key.
async fn verify_token(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(req): Json<VerifyTokenRequest>,
) -> Result<Json<TokenVerification>, ApiError> {
    require_secret_key(&state, &headers).await?;
    let verification = state.store.write().await.verify_token(&req.token);
    Ok(Json(verification))
}

// ===== Human tokens =====

#[derive(Deserialize)]
struct IssueTokenRequest {
    session_id: String,
    user_id: String,
    #[serde(default)]
    device_fingerprint: String,
}

/// POST /v1/tokens
async fn issue_token(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<IssueTokenRequest>,
) -> Result<Json<crate::store::HumanToken>, ApiError> {
    let token = state
        .store
        .write()
        .await
        .issue_token(&req.session_id, &req.user_id, &req.device_fingerprint)
        .ok_or_else(|| {
            api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "NOT_HUMAN_VERIFIED",
                "Session missing or not verified as human",
            )
        })?;

    tracing::info!(token_id = %token.id, "human token issued");
    Ok(Json(token))
}

/// GET /v1/tokens/{id}
async fn get_token(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<crate::store::HumanToken>, ApiError> {
    state
        .store
        .write()
        .await
        .token(&id)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "TOKEN_NOT_FOUND", "Unknown token"))
}

/// POST /v1/tokens/{id}/refresh
async fn refresh_token(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<crate::store::HumanToken>, ApiError> {
    state
        .store
        .write()
        .await
        .refresh_token(&id)
        .map(Json)
        .ok_or_else(|| {
            api_error(
                StatusCode::CONFLICT,
                "TOKEN_NOT_ACTIVE",
                "Token is missing or not active",
            )
        })
}

#[derive(Serialize)]
struct RevokeTokenResponse {
    revoked: bool,
    revoked_delegations: usize,
}

/// DELETE /v1/tokens/{id}
async fn revoke_token(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<RevokeTokenResponse>, ApiError> {
    let cascade = state
        .store
        .write()
        .await
        .revoke_token(&id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "TOKEN_NOT_FOUND", "Unknown token"))?;

    tracing::info!(token_id = %id, revoked_delegations = cascade, "token revoked");
    Ok(Json(RevokeTokenResponse {
        revoked: true,
        revoked_delegations: cascade,
    }))
}

// ===== Delegations =====

#[derive(Deserialize)]
struct CreateDelegationRequest {
    human_token_id: String,
    agent_id: String,
    agent_name: String,
    #[serde(default)]
    agent_platform: String,
    scopes: Vec<DelegationScope>,
    #[serde(default)]
    constraints: ConstraintRequest,
}

/// POST /v1/delegations
async fn create_delegation(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<CreateDelegationRequest>,
) -> Result<Json<crate::store::Delegation>, ApiError> {
    let delegation = state
        .store
        .write()
        .await
        .create_delegation(
            &req.human_token_id,
            &req.agent_id,
            &req.agent_name,
            &req.agent_platform,
            req.scopes,
            req.constraints,
        )
        .ok_or_else(|| {
            api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "TOKEN_NOT_ACTIVE",
                "Human token is missing or not active",
            )
        })?;

    tracing::info!(
        delegation_id = %delegation.id,
        agent_id = %delegation.agent_id,
        "delegation created"
    );
    Ok(Json(delegation))
}

#[derive(Deserialize)]
struct ListDelegationsQuery {
    human_token_id: Option<String>,
}

/// GET /v1/delegations
async fn list_delegations(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListDelegationsQuery>,
) -> Json<Vec<crate::store::Delegation>> {
    let store = state.store.read().await;
    Json(store.list_delegations(query.human_token_id.as_deref()))
}

/// GET /v1/delegations/{id}
async fn get_delegation(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<crate::store::Delegation>, ApiError> {
    state
        .store
        .write()
        .await
        .delegation(&id)
        .map(Json)
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                "DELEGATION_NOT_FOUND",
                "Unknown delegation",
            )
        })
}

#[derive(Deserialize)]
struct VerifyDelegationRequest {
    action: String,
    domain: Option<String>,
    amount: Option<f64>,
}

/// POST /v1/delegations/{id}/verify
///
/// Always 200; the decision body carries authorized/denied and the reason.
async fn verify_delegation(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(req): Json<VerifyDelegationRequest>,
) -> Json<crate::store::DelegationDecision> {
    let decision = state.store.write().await.verify_delegation(
        &id,
        &req.action,
        req.domain.as_deref(),
        req.amount,
    );
    if !decision.authorized {
        tracing::debug!(
            delegation_id = %id,
            reason = decision.reason.as_deref().unwrap_or(""),
            "agent action denied"
        );
    }
    Json(decision)
}

#[derive(Serialize)]
struct RevokeDelegationResponse {
    revoked: bool,
}

/// DELETE /v1/delegations/{id}
async fn revoke_delegation(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<RevokeDelegationResponse>, ApiError> {
    if state.store.write().await.revoke_delegation(&id) {
        Ok(Json(RevokeDelegationResponse { revoked: true }))
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            "DELEGATION_NOT_FOUND",
            "Unknown delegation",
        ))
    }
}

// ===== Audit and stats =====

/// GET /v1/audit
async fn get_audit(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<Vec<crate::store::AuditEntry>>, ApiError> {
    require_secret_key(&state, &headers).await?;
    let store = state.store.read().await;
    Ok(Json(store.audit_entries(&filter)))
}

/// GET /v1/stats
async fn get_stats(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Json<crate::store::StoreStats>, ApiError> {
    require_secret_key(&state, &headers).await?;
    let store = state.store.read().await;
    Ok(Json(store.stats()))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        // The widget runs on arbitrary customer sites
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Build the full route tree over shared state.
pub fn router(state: Arc<ServerState>, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/keys", post(create_key).get(list_keys))
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/:id", get(get_session))
        .route("/v1/sessions/:id/complete", post(complete_session))
        .route("/v1/verify", post(verify_token))
        .route("/v1/tokens", post(issue_token))
        .route("/v1/tokens/:id", get(get_token).delete(revoke_token))
        .route("/v1/tokens/:id/refresh", post(refresh_token))
        .route(
            "/v1/delegations",
            post(create_delegation).get(list_delegations),
        )
        .route(
            "/v1/delegations/:id",
            get(get_delegation).delete(revoke_delegation),
        )
        .route("/v1/delegations/:id/verify", post(verify_delegation))
        .route("/v1/audit", get(get_audit))
        .route("/v1/stats", get(get_stats))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState::new());
    let app = router(state, &config.allowed_origins);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("humansig server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
