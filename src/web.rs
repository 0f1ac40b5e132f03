//! HTTP surface the host mail gateway calls for every connection phase.
//!
//! The engine is agnostic to SMTP status codes: responses only distinguish
//! "allow", "deny this transaction" and "deny and drop the connection", each
//! with a human-readable reason the host can relay.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::CredentialVerifier;
use crate::rules::engine;
use crate::rules::registry::SnapshotRegistry;
use crate::rules::types::{Decision, Identity, RcptAddress};
use crate::settings::Settings;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SnapshotRegistry>,
    pub verifier: Arc<CredentialVerifier>,
}

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub login: String,
    pub secret: String,
    /// Whether the client session is TLS-protected; gates the offered
    /// AUTH methods.
    #[serde(default)]
    pub tls: bool,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    /// `null` means the credentials were denied.
    pub identity: Option<Identity>,
    pub methods: Option<&'static [&'static str]>,
}

#[derive(Debug, Deserialize)]
pub struct SenderRequest {
    pub identity: Identity,
    pub mail_from: String,
}

#[derive(Debug, Deserialize)]
pub struct RecipientRequest {
    pub identity: Identity,
    pub rcpt: RcptAddress,
}

#[derive(Debug, Deserialize)]
pub struct SizeRequest {
    pub identity: Identity,
    pub bytes: u64,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    loaded_at: chrono::DateTime<chrono::Utc>,
    profiles: usize,
    users: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/auth", post(handle_auth))
        .route("/v1/mail", post(handle_mail))
        .route("/v1/rcpt", post(handle_rcpt))
        .route("/v1/data", post(handle_data))
        .route("/healthz", get(health))
        .with_state(state)
}

async fn handle_auth(
    State(state): State<AppState>,
    Json(req): Json<AuthRequest>,
) -> impl IntoResponse {
    let snapshot = state.registry.current();
    let identity = state.verifier.verify(&snapshot, &req.login, &req.secret);
    Json(AuthResponse {
        identity,
        methods: engine::offered_auth_methods(req.tls),
    })
}

async fn handle_mail(
    State(state): State<AppState>,
    Json(req): Json<SenderRequest>,
) -> Json<Decision> {
    let snapshot = state.registry.current();
    Json(engine::authorize_sender(&snapshot, &req.identity, &req.mail_from))
}

async fn handle_rcpt(
    State(state): State<AppState>,
    Json(req): Json<RecipientRequest>,
) -> Json<Decision> {
    let snapshot = state.registry.current();
    Json(engine::authorize_recipient(&snapshot, &req.identity, &req.rcpt))
}

async fn handle_data(
    State(state): State<AppState>,
    Json(req): Json<SizeRequest>,
) -> Json<Decision> {
    let snapshot = state.registry.current();
    Json(engine::check_message_size(&snapshot, &req.identity, req.bytes))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.registry.current();
    (
        StatusCode::OK,
        Json(Health {
            status: "ok",
            loaded_at: snapshot.loaded_at,
            profiles: snapshot.profiles.len(),
            users: snapshot.users.len(),
        }),
    )
}

pub async fn serve(settings: &Settings, state: AppState) -> miette::Result<()> {
    use miette::IntoDiagnostic;

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .into_diagnostic()?;
    tracing::info!(%addr, "Serving authorization decisions");
    axum::serve(listener, router(state)).await.into_diagnostic()?;
    Ok(())
}
