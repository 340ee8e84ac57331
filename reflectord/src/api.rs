//! REST status API
//!
//! - `GET /api/status`: every running reflector
//! - `GET /api/reflectors/{protocol}`: one reflector
//! - `POST /api/reflectors/{protocol}/unlink`: force-unlink a client,
//!   requires the `X-Api-Password` header

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use dv_protocol::Protocol;
use dv_reflector::{ReflectorContext, ReflectorError, ReflectorSnapshot};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

pub const PASSWORD_HEADER: &str = "x-api-password";

type ApiError = (StatusCode, String);

#[derive(Clone)]
pub struct ApiState {
    pub context: ReflectorContext,
    pub password: Arc<str>,
}

impl ApiState {
    pub fn new(context: ReflectorContext, password: &str) -> Self {
        Self {
            context,
            password: Arc::from(password),
        }
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let supplied = headers
            .get(PASSWORD_HEADER)
            .and_then(|value| value.to_str().ok());
        match supplied {
            Some(password) if !self.password.is_empty() && password == &*self.password => Ok(()),
            _ => Err((StatusCode::UNAUTHORIZED, "invalid password".to_string())),
        }
    }
}

fn parse_protocol(name: &str) -> Result<Protocol, ApiError> {
    Protocol::from_name(name).ok_or((StatusCode::NOT_FOUND, format!("unknown protocol {name}")))
}

fn error_response(e: ReflectorError) -> ApiError {
    let status = match e {
        ReflectorError::UnknownSession(_) | ReflectorError::ActorClosed(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub reflectors: Vec<ReflectorSnapshot>,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        reflectors: state.context.snapshots().await,
    })
}

// ── /reflectors/{protocol} ───────────────────────────────────────────────────

pub async fn handle_reflector(
    State(state): State<ApiState>,
    Path(protocol): Path<String>,
) -> Result<Json<ReflectorSnapshot>, ApiError> {
    let protocol = parse_protocol(&protocol)?;
    state
        .context
        .snapshot(protocol)
        .await
        .map(Json)
        .map_err(error_response)
}

// ── /reflectors/{protocol}/unlink ────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct UnlinkRequest {
    pub address: SocketAddr,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnlinkResponse {
    pub protocol: Protocol,
    pub address: SocketAddr,
    pub unlinked: bool,
}

pub async fn handle_unlink(
    State(state): State<ApiState>,
    Path(protocol): Path<String>,
    headers: HeaderMap,
    Json(request): Json<UnlinkRequest>,
) -> Result<Json<UnlinkResponse>, ApiError> {
    state.authorize(&headers)?;
    let protocol = parse_protocol(&protocol)?;

    state
        .context
        .force_unlink(protocol, request.address)
        .await
        .map_err(error_response)?;
    info!(protocol = %protocol, addr = %request.address, "Client unlinked via API");

    Ok(Json(UnlinkResponse {
        protocol,
        address: request.address,
        unlinked: true,
    }))
}

pub fn router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/status", get(handle_status))
        .route("/reflectors/{protocol}", get(handle_reflector))
        .route("/reflectors/{protocol}/unlink", post(handle_unlink))
        .with_state(state);

    Router::new().nest("/api", api_routes)
}

/// Serve the API until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
