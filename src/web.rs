//! HTTP API.
//!
//! Operator routes act on behalf of the principal asserted by the gateway headers and
//! always go through [`tenant::resolve`]. Agent routes are called by devices, which
//! prove themselves by possession of a pairing code or a device id within an active
//! organization.
use crate::admin_graphql::{self, AdminSchema};
use crate::commands::{self, CommandKind, CommandStatus, EnqueueRequest, ResultReport};
use crate::devices::{self, DeviceUpdate};
use crate::errors::TetherError;
use crate::pairing::{self, DeviceDescriptor, RegistrationStatus};
use crate::presence::{self, Telemetry};
use crate::principal::Principal;
use crate::settings::Settings;
use crate::tenant::{self, TenantContext, TenantScoped};
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const DEFAULT_LIST_LIMIT: u64 = 50;
const MAX_LIST_LIMIT: u64 = 500;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DatabaseConnection,
}

/// Resolved tenant context of the calling operator.
pub struct Operator(pub TenantContext);

impl FromRequestParts<AppState> for Operator {
    type Rejection = TetherError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let principal = Principal::from_headers(&parts.headers)
            .ok_or_else(|| TetherError::Unauthorized("missing principal".to_string()))?;
        let ctx = tenant::resolve(&state.db, &principal).await?;
        Ok(Operator(ctx))
    }
}

/// Build the public router. Split out from [`serve`] so tests can drive it directly.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/me", get(me))
        // Pairing
        .route("/api/pairing/codes", post(issue_code))
        .route("/api/pairing/registrations", get(list_registrations))
        .route("/api/pairing/registrations/{id}", get(get_registration))
        .route("/api/pairing/registrations/{id}/approve", post(approve_registration))
        .route("/api/pairing/registrations/{id}/reject", post(reject_registration))
        // Devices
        .route("/api/devices", get(list_devices))
        .route(
            "/api/devices/{id}",
            get(get_device).patch(update_device).delete(retire_device),
        )
        .route("/api/devices/{id}/maintenance", post(set_maintenance))
        .route("/api/devices/{id}/status", get(device_status))
        .route("/api/devices/{id}/heartbeats", get(device_heartbeats))
        // Commands
        .route(
            "/api/devices/{id}/commands",
            get(list_device_commands).post(enqueue_command),
        )
        .route("/api/commands/{id}", get(get_command))
        .route("/api/commands/{id}/attempts", get(command_attempts))
        .route("/api/commands/{id}/cancel", post(cancel_command))
        // Device agent
        .route("/api/agent/pair", post(agent_pair))
        .route("/api/agent/pair/{registration_id}", get(agent_pair_state))
        .route("/api/agent/heartbeat", post(agent_heartbeat))
        .route("/api/agent/commands/result", post(agent_command_result))
        .route("/api/agent/push-token", post(agent_push_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(settings: Settings, db: DatabaseConnection, admin_schema: AdminSchema) -> miette::Result<()> {
    let state = AppState {
        settings: Arc::new(settings),
        db,
    };

    let public_addr: SocketAddr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    )
    .parse()
    .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    // Start admin GraphQL server on separate port
    let admin_addr: SocketAddr = format!("{}:{}", state.settings.server.host, state.settings.admin_port())
        .parse()
        .map_err(|e| miette::miette!("bad admin addr: {e}"))?;

    let admin_router = admin_graphql::router(admin_schema);
    let admin_listener = tokio::net::TcpListener::bind(admin_addr)
        .await
        .into_diagnostic()?;
    tracing::info!(%admin_addr, "Admin GraphQL API listening");
    tracing::info!(
        "GraphQL Playground available at http://{}/admin/playground",
        admin_addr
    );

    tokio::spawn(async move {
        if let Err(e) = axum::serve(admin_listener, admin_router).await {
            tracing::error!(error = %e, "Admin server failed");
        }
    });

    tracing::info!(%public_addr, "Public API listening");
    let listener = tokio::net::TcpListener::bind(public_addr)
        .await
        .into_diagnostic()?;
    axum::serve(listener, app(state)).await.into_diagnostic()?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<u64>,
}

impl LimitQuery {
    fn limit(&self) -> u64 {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn me(Operator(ctx): Operator) -> impl IntoResponse {
    Json(json!({
        "subject": ctx.subject,
        "organization": ctx.organization,
        "role": ctx.role,
        "permissions": ctx.permissions,
    }))
}

// Pairing

#[derive(Debug, Default, Deserialize)]
struct IssueCodeRequest {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    validity_secs: Option<i64>,
    /// Operator-chosen code; generated when absent
    #[serde(default)]
    pairing_code: Option<String>,
}

async fn issue_code(
    State(state): State<AppState>,
    Operator(ctx): Operator,
    body: Option<Json<IssueCodeRequest>>,
) -> Result<impl IntoResponse, TetherError> {
    let Json(req) = body.unwrap_or_default();
    let cfg = &state.settings.pairing;
    let issued = match req.pairing_code.as_deref() {
        Some(code) => {
            pairing::issue_preset_code(&state.db, &ctx, cfg, code, req.description, req.validity_secs)
                .await?
        }
        None => pairing::issue_code(&state.db, &ctx, cfg, req.description, req.validity_secs).await?,
    };
    Ok((StatusCode::CREATED, Json(issued)))
}

#[derive(Debug, Deserialize)]
struct RegistrationQuery {
    status: Option<RegistrationStatus>,
}

async fn list_registrations(
    State(state): State<AppState>,
    Operator(ctx): Operator,
    Query(query): Query<RegistrationQuery>,
) -> Result<impl IntoResponse, TetherError> {
    let registrations = pairing::list_registrations(&state.db, &ctx, query.status).await?;
    Ok(Json(registrations))
}

async fn get_registration(
    State(state): State<AppState>,
    Operator(ctx): Operator,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, TetherError> {
    Ok(Json(pairing::get_registration(&state.db, &ctx, &id).await?))
}

async fn approve_registration(
    State(state): State<AppState>,
    Operator(ctx): Operator,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, TetherError> {
    let device = pairing::approve(&state.db, &ctx, &state.settings.presence, &id).await?;
    Ok((StatusCode::CREATED, Json(device)))
}

#[derive(Debug, Default, Deserialize)]
struct RejectRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn reject_registration(
    State(state): State<AppState>,
    Operator(ctx): Operator,
    Path(id): Path<String>,
    body: Option<Json<RejectRequest>>,
) -> Result<impl IntoResponse, TetherError> {
    let Json(req) = body.unwrap_or_default();
    Ok(Json(pairing::reject(&state.db, &ctx, &id, req.reason).await?))
}

// Devices

async fn list_devices(
    State(state): State<AppState>,
    Operator(ctx): Operator,
) -> Result<impl IntoResponse, TetherError> {
    Ok(Json(
        devices::list_devices(&state.db, &ctx, &state.settings.presence).await?,
    ))
}

async fn get_device(
    State(state): State<AppState>,
    Operator(ctx): Operator,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, TetherError> {
    Ok(Json(
        devices::get_device(&state.db, &ctx, &state.settings.presence, &id).await?,
    ))
}

async fn update_device(
    State(state): State<AppState>,
    Operator(ctx): Operator,
    Path(id): Path<String>,
    Json(update): Json<DeviceUpdate>,
) -> Result<impl IntoResponse, TetherError> {
    Ok(Json(
        devices::update_device(&state.db, &ctx, &state.settings.presence, &id, update).await?,
    ))
}

async fn retire_device(
    State(state): State<AppState>,
    Operator(ctx): Operator,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, TetherError> {
    devices::retire_device(&state.db, &ctx, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct MaintenanceRequest {
    enabled: bool,
}

async fn set_maintenance(
    State(state): State<AppState>,
    Operator(ctx): Operator,
    Path(id): Path<String>,
    Json(req): Json<MaintenanceRequest>,
) -> Result<impl IntoResponse, TetherError> {
    Ok(Json(
        devices::set_maintenance(&state.db, &ctx, &state.settings.presence, &id, req.enabled)
            .await?,
    ))
}

async fn device_status(
    State(state): State<AppState>,
    Operator(ctx): Operator,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, TetherError> {
    Ok(Json(
        presence::get_status(&state.db, &ctx, &state.settings.presence, &id).await?,
    ))
}

async fn device_heartbeats(
    State(state): State<AppState>,
    Operator(ctx): Operator,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, TetherError> {
    Ok(Json(
        presence::recent_heartbeats(&state.db, &ctx, &id, query.limit()).await?,
    ))
}

// Commands

#[derive(Debug, Deserialize)]
struct EnqueueBody {
    #[serde(rename = "type")]
    command_type: String,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    timeout_secs: Option<i64>,
    #[serde(default)]
    max_attempts: Option<i64>,
}

async fn enqueue_command(
    State(state): State<AppState>,
    Operator(ctx): Operator,
    Path(device_id): Path<String>,
    Json(body): Json<EnqueueBody>,
) -> Result<impl IntoResponse, TetherError> {
    let request = EnqueueRequest {
        kind: CommandKind::from_parts(&body.command_type, body.payload)?,
        timeout_secs: body.timeout_secs,
        max_attempts: body.max_attempts,
    };
    let command =
        commands::enqueue(&state.db, &ctx, &state.settings.dispatch, &device_id, request).await?;
    // Delivery is asynchronous; poll the command for progress
    Ok((StatusCode::ACCEPTED, Json(command)))
}

async fn list_device_commands(
    State(state): State<AppState>,
    Operator(ctx): Operator,
    Path(device_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, TetherError> {
    Ok(Json(
        commands::list_device_commands(&state.db, &ctx, &device_id, query.limit()).await?,
    ))
}

async fn get_command(
    State(state): State<AppState>,
    Operator(ctx): Operator,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, TetherError> {
    Ok(Json(commands::get_command(&state.db, &ctx, &id).await?))
}

async fn command_attempts(
    State(state): State<AppState>,
    Operator(ctx): Operator,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, TetherError> {
    Ok(Json(commands::list_attempts(&state.db, &ctx, &id).await?))
}

async fn cancel_command(
    State(state): State<AppState>,
    Operator(ctx): Operator,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, TetherError> {
    Ok(Json(commands::cancel(&state.db, &ctx, &id).await?))
}

// Device agent

#[derive(Debug, Deserialize)]
struct PairRequest {
    pairing_code: String,
    device: DeviceDescriptor,
}

async fn agent_pair(
    State(state): State<AppState>,
    Json(req): Json<PairRequest>,
) -> Result<impl IntoResponse, TetherError> {
    let submission = pairing::submit_registration(&state.db, &req.pairing_code, req.device).await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

async fn agent_pair_state(
    State(state): State<AppState>,
    Path(registration_id): Path<String>,
) -> Result<impl IntoResponse, TetherError> {
    Ok(Json(pairing::pairing_state(&state.db, &registration_id).await?))
}

#[derive(Debug, Deserialize)]
struct HeartbeatRequest {
    device_id: String,
    organization_id: Option<String>,
    #[serde(flatten)]
    telemetry: Telemetry,
}

async fn agent_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse, TetherError> {
    let scope = tenant::resolve_organization(&state.db, req.organization_id.as_deref()).await?;
    let snapshot = presence::record_heartbeat(
        &state.db,
        &scope,
        &state.settings.presence,
        &req.device_id,
        req.telemetry,
    )
    .await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
struct CommandResultRequest {
    organization_id: Option<String>,
    #[serde(flatten)]
    report: ResultReport,
}

#[derive(Debug, Serialize)]
struct CommandResultResponse {
    command_id: String,
    status: CommandStatus,
}

async fn agent_command_result(
    State(state): State<AppState>,
    Json(req): Json<CommandResultRequest>,
) -> Result<impl IntoResponse, TetherError> {
    let scope = tenant::resolve_organization(&state.db, req.organization_id.as_deref()).await?;
    let command = commands::report_result(&state.db, &scope, req.report).await?;
    Ok(Json(CommandResultResponse {
        command_id: command.id,
        status: command.status,
    }))
}

#[derive(Debug, Deserialize)]
struct PushTokenRequest {
    device_id: String,
    organization_id: Option<String>,
    push_token: String,
}

async fn agent_push_token(
    State(state): State<AppState>,
    Json(req): Json<PushTokenRequest>,
) -> Result<impl IntoResponse, TetherError> {
    let scope = tenant::resolve_organization(&state.db, req.organization_id.as_deref()).await?;
    devices::update_push_address(&state.db, &scope, &req.device_id, &req.push_token).await?;
    tracing::debug!(organization_id = scope.organization_id(), "Push token updated");
    Ok(StatusCode::NO_CONTENT)
}
