use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_stream::stream;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use trailgate_audit::{filter_by_type, slice_by_range};
use trailgate_bridge::{KillSwitchOptions, KillSwitchResult};
use trailgate_kernel::{
    AgentMemoryBinding, ExecuteRequest, GatedExecution, Gateway, GatewayBuilder, MemoryScope,
    RevokeOptions,
};
use trailgate_policy::PolicyOutcome;
use trailgate_protocol::{
    AgentId, AuditEventType, AuditRecord, AuditTimelineEvent, ConsentToken, ContextDescriptor,
    ContextEventKind, ContractId, ContractTemplate, ExecutionContract, ExecutionRequest,
    GatedAction, GatewayError, OsIntent, RouteResult, TimelineStats,
};

#[derive(Debug, Parser)]
#[command(name = "trailgate-api")]
#[command(about = "trailgate gateway API")]
struct Cli {
    #[arg(long, default_value = ".trailgate")]
    root: PathBuf,
    #[arg(long, default_value = "127.0.0.1:8787")]
    listen: SocketAddr,
    #[arg(long, default_value_t = 50)]
    latency_ms: u64,
    #[arg(long)]
    json_logs: bool,
}

#[derive(Clone)]
struct AppState {
    gateway: Gateway,
}

#[derive(Debug, Deserialize)]
struct RouteRequest {
    request: ExecutionRequest,
    #[serde(default)]
    consent: Option<ConsentToken>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutePayload {
    route: RouteResult,
    intent: OsIntent,
    #[serde(flatten)]
    request: ExecuteRequest,
}

#[derive(Debug, Deserialize, Default)]
struct RevokeContractRequest {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemoryRevokeRequest {
    scope: Option<MemoryScope>,
    agent_id: Option<AgentId>,
    #[serde(default)]
    bindings: Vec<AgentMemoryBinding>,
    initiator: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TimelineQuery {
    types: Option<String>,
    from: Option<i64>,
    to: Option<i64>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: error.to_string(),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        let status = match &error {
            GatewayError::ContractNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::InvalidTimeBounds { .. } | GatewayError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("info")
            .compact()
            .init();
    }

    let gateway = GatewayBuilder::new()
        .audit_root(&cli.root)
        .simulated_latency(Duration::from_millis(cli.latency_ms))
        .build();
    let state = AppState { gateway };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/contexts", get(list_contexts))
        .route("/contracts", post(issue_contract))
        .route("/contracts/{contract_id}/revoke", post(revoke_contract))
        .route("/route", post(route))
        .route("/execute", post(execute))
        .route("/policy/evaluate", post(evaluate_policy))
        .route("/kill-switch/engage", post(engage_kill_switch))
        .route("/kill-switch/reset", post(reset_kill_switch))
        .route("/audit/timeline", get(audit_timeline))
        .route("/audit/summary", get(audit_summary))
        .route("/audit/stream", get(audit_stream))
        .route("/memory/revoke", post(revoke_memory))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(listen = %cli.listen, root = %cli.root.display(), "trailgate-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "trailgate-api",
        "killSwitchEngaged": state.gateway.is_kill_switch_engaged(),
    }))
}

async fn list_contexts(State(state): State<AppState>) -> Json<Vec<ContextDescriptor>> {
    Json(state.gateway.list_contexts().to_vec())
}

async fn issue_contract(
    State(state): State<AppState>,
    Json(template): Json<ContractTemplate>,
) -> ApiResult<Json<ExecutionContract>> {
    Ok(Json(state.gateway.issue_contract(template)?))
}

async fn revoke_contract(
    Path(contract_id): Path<String>,
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<ExecutionContract>> {
    let request: RevokeContractRequest = if body.is_empty() {
        RevokeContractRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|error| ApiError::bad_request(format!("invalid revoke body: {error}")))?
    };
    let contract = state
        .gateway
        .revoke_contract(&ContractId::from(contract_id), request.reason)
        .await?;
    Ok(Json(contract))
}

async fn route(
    State(state): State<AppState>,
    Json(payload): Json<RouteRequest>,
) -> Json<RouteResult> {
    Json(
        state
            .gateway
            .route(&payload.request, payload.consent.as_ref())
            .await,
    )
}

async fn execute(
    State(state): State<AppState>,
    Json(payload): Json<ExecutePayload>,
) -> Json<GatedExecution> {
    let route = authenticate_route(&state.gateway, payload.route);
    Json(
        state
            .gateway
            .execute_gated(&route, &payload.intent, &payload.request)
            .await,
    )
}

async fn evaluate_policy(
    State(state): State<AppState>,
    Json(action): Json<GatedAction>,
) -> Json<PolicyOutcome> {
    Json(state.gateway.evaluate(&action).await)
}

async fn engage_kill_switch(
    State(state): State<AppState>,
    Json(options): Json<KillSwitchOptions>,
) -> Json<KillSwitchResult> {
    Json(state.gateway.engage_kill_switch(options).await)
}

async fn reset_kill_switch(
    State(state): State<AppState>,
    Json(options): Json<KillSwitchOptions>,
) -> Json<KillSwitchResult> {
    Json(state.gateway.reset_kill_switch(options).await)
}

async fn audit_timeline(
    Query(query): Query<TimelineQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<AuditTimelineEvent>>> {
    let mut events = state.gateway.timeline();
    if let Some(raw) = query.types.as_deref() {
        events = filter_by_type(&events, &parse_types(raw)?);
    }
    if query.from.is_some() || query.to.is_some() {
        events = slice_by_range(
            &events,
            query.from.unwrap_or(i64::MIN),
            query.to.unwrap_or(i64::MAX),
        );
    }
    Ok(Json(events))
}

async fn audit_summary(State(state): State<AppState>) -> Json<TimelineStats> {
    Json(state.gateway.summary())
}

async fn audit_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut records = state.gateway.journal().subscribe_stream();
    let stream = stream! {
        while let Some(next) = records.next().await {
            match next {
                Ok(record) => yield Ok(as_sse_event(&record)),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    let lag_payload = json!({ "skipped": skipped }).to_string();
                    yield Ok(Event::default().event("stream.lagged").data(lag_payload));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

async fn revoke_memory(
    State(state): State<AppState>,
    Json(request): Json<MemoryRevokeRequest>,
) -> ApiResult<Json<Value>> {
    let options = RevokeOptions {
        initiator: request.initiator,
        now: None,
    };
    let result = match (request.scope, request.agent_id) {
        (Some(scope), None) => {
            let result = state
                .gateway
                .revoke_memory_by_scope(scope, &request.bindings, options)
                .await;
            serde_json::to_value(result).map_err(ApiError::internal)?
        }
        (None, Some(agent_id)) => {
            let result = state
                .gateway
                .revoke_memory_by_agent(&agent_id, &request.bindings, options)
                .await;
            serde_json::to_value(result).map_err(ApiError::internal)?
        }
        _ => {
            return Err(ApiError::bad_request(
                "exactly one of `scope` or `agentId` is required",
            ));
        }
    };
    Ok(Json(result))
}

/// Clients hand routes back to us. Only a route whose audit record this
/// gateway wrote as accepted, for the same context, keeps `accepted`.
fn authenticate_route(gateway: &Gateway, mut route: RouteResult) -> RouteResult {
    if !route.accepted {
        return route;
    }
    let recorded = gateway
        .journal()
        .find_context_event(&route.audit.id)
        .is_some_and(|event| {
            event.event == ContextEventKind::RouteAccepted && event.context_id == route.context_id
        });
    if !recorded {
        warn!(audit_id = %route.audit.id, "route not issued by this gateway");
        route.accepted = false;
    }
    route
}

fn parse_types(raw: &str) -> ApiResult<Vec<AuditEventType>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<AuditEventType>().map_err(ApiError::from))
        .collect()
}

fn as_sse_event(record: &AuditRecord) -> Event {
    let name = match record {
        AuditRecord::Context(_) => "audit.context",
        AuditRecord::Execution(_) => "audit.execution",
        AuditRecord::Decision(_) => "audit.decision",
        AuditRecord::Memory(_) => "audit.memory",
    };
    let payload = serde_json::to_string(record)
        .unwrap_or_else(|error| json!({ "error": error.to_string() }).to_string());
    Event::default().event(name).data(payload)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    tracing::error!(%error, "failed to install SIGTERM handler");
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
