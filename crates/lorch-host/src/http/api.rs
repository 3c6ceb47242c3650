use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use lorch_store::MappingStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::config::ProvisionedConfig;
use crate::error::OrchestratorError;
use crate::factory::RetryPolicy;
use crate::http::HttpState;
use crate::model::Submission;

pub fn health_router() -> Router<HttpState> {
    Router::new().route("/health", get(health))
}

pub fn router() -> Router<HttpState> {
    Router::new()
        .route("/start-linera-node", post(start_node))
        .route("/open-and-create", post(open_and_create))
        .route("/open-match-chain", post(open_match_chain))
        .route("/create-xfighter-app", post(create_app))
        .route("/start-linera-service", post(start_service))
        .route("/stop-linera-service", post(stop_service))
        .route("/linera-service-status", get(service_status).post(service_status))
        .route("/linera-config", get(provisioned_config))
        .route("/submit-match-result", post(submit_match_result))
        .route("/get-leaderboard-data", post(leaderboard))
        .route("/match-mapping/all", get(all_mappings))
        .route("/match-mapping/{match_id}", get(one_mapping))
}

#[derive(OpenApi)]
#[openapi(
    info(title = "lorch", description = "Ledger orchestrator for match sessions"),
    paths(
        health,
        start_node,
        provisioned_config,
        open_and_create,
        open_match_chain,
        create_app,
        start_service,
        stop_service,
        service_status,
        submit_match_result,
        leaderboard,
        all_mappings,
        one_mapping,
    ),
    tags((name = "linera", description = "Node lifecycle, match allocation and result submission"))
)]
struct ApiDoc;

pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[derive(Debug)]
enum ApiError {
    Orchestrator(OrchestratorError),
    Invalid(String),
    NotFound(String),
}

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::Invalid(msg.into())
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError::Orchestrator(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        ApiError::Invalid(err.body_text())
    }
}

/// Body of every failed request.
#[derive(Debug, Serialize, ToSchema)]
struct ErrorBody {
    success: bool,
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Orchestrator(err) => {
                let status = match &err {
                    OrchestratorError::InvalidInput(_)
                    | OrchestratorError::DuplicateSubmission(_)
                    | OrchestratorError::Resolution(_) => StatusCode::BAD_REQUEST,
                    OrchestratorError::GateTimeout => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::warn!(code = err.code(), "request failed: {err}");
                }
                (status, err.code(), err.to_string())
            }
            ApiError::Invalid(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
        };
        let body = ErrorBody {
            success: false,
            code,
            message,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize, ToSchema)]
struct HealthBody {
    ok: bool,
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Process is up", body = HealthBody))
)]
async fn health() -> Json<HealthBody> {
    Json(HealthBody { ok: true })
}

/// Provisioned environment; field names are what existing game clients read.
#[derive(Debug, Serialize, ToSchema)]
struct ConfigBody {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    linera_wallet: Option<String>,
    linera_storage: Option<String>,
    linera_keystore: Option<String>,
    xfighter_module_id: Option<String>,
    xfighter_app_id: Option<String>,
    leaderboard_app_id: Option<String>,
    #[serde(rename = "isReady")]
    is_ready: bool,
}

impl ConfigBody {
    fn new(cfg: ProvisionedConfig, message: Option<&str>) -> Self {
        Self {
            success: true,
            message: message.map(str::to_string),
            is_ready: cfg.is_ready(),
            linera_wallet: cfg.wallet,
            linera_storage: cfg.storage,
            linera_keystore: cfg.keystore,
            xfighter_module_id: cfg.module_id,
            xfighter_app_id: cfg.session_app_id,
            leaderboard_app_id: cfg.leaderboard_app_id,
        }
    }
}

#[utoipa::path(
    post,
    path = "/linera/start-linera-node",
    tag = "linera",
    responses(
        (status = 200, description = "Node started, applications published, service running", body = ConfigBody),
        (status = 500, description = "A bootstrap step failed", body = ErrorBody),
    )
)]
async fn start_node(State(state): State<HttpState>) -> ApiResult<ConfigBody> {
    let cfg = state.orchestrator.start_node().await?;
    Ok(Json(ConfigBody::new(
        cfg,
        Some("ledger node started and environment exported"),
    )))
}

#[utoipa::path(
    get,
    path = "/linera/linera-config",
    tag = "linera",
    responses((status = 200, description = "Current provisioned environment", body = ConfigBody))
)]
async fn provisioned_config(State(state): State<HttpState>) -> ApiResult<ConfigBody> {
    let cfg = state.orchestrator.config().await;
    Ok(Json(ConfigBody::new(cfg, None)))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct OpenAndCreateRequest {
    module_id: Option<String>,
    leaderboard_app_id: Option<String>,
    /// Echoed back; the mapping itself is keyed by the new chain id.
    match_id: Option<String>,
    max_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct CreateAppRequest {
    module_id: Option<String>,
    chain_id: Option<String>,
    leaderboard_app_id: Option<String>,
    max_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct AllocationBody {
    success: bool,
    chain_id: String,
    app_id: String,
    match_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct NewChainBody {
    success: bool,
    new_chain_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct AppBody {
    success: bool,
    app_id: String,
    chain_id: String,
}

fn required(field: &str, value: Option<String>) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("{field} is required in the request body")))
}

fn retry_policy(default: RetryPolicy, max_retries: Option<u32>, delay_ms: Option<u64>) -> RetryPolicy {
    RetryPolicy {
        max_retries: max_retries.unwrap_or(default.max_retries),
        retry_delay: delay_ms.map(Duration::from_millis).unwrap_or(default.retry_delay),
    }
}

#[utoipa::path(
    post,
    path = "/linera/open-and-create",
    tag = "linera",
    request_body = OpenAndCreateRequest,
    responses(
        (status = 200, description = "Chain opened and session application created", body = AllocationBody),
        (status = 400, description = "Missing module or leaderboard id", body = ErrorBody),
        (status = 503, description = "Another allocation holds the gate", body = ErrorBody),
        (status = 500, description = "Ledger CLI failed", body = ErrorBody),
    )
)]
async fn open_and_create(
    State(state): State<HttpState>,
    body: Result<Json<OpenAndCreateRequest>, JsonRejection>,
) -> ApiResult<AllocationBody> {
    let Json(req) = body?;
    let module_id = required("moduleId", req.module_id)?;
    let leaderboard_app_id = required("leaderboardAppId", req.leaderboard_app_id)?;
    let orch = &state.orchestrator;
    let retry = retry_policy(orch.default_retry(), req.max_retries, req.retry_delay_ms);
    let allocated = orch
        .open_and_create(&module_id, &leaderboard_app_id, req.match_id.as_deref(), &retry)
        .await?;
    Ok(Json(AllocationBody {
        success: true,
        chain_id: allocated.chain_id,
        app_id: allocated.app_id,
        match_id: allocated.match_id,
    }))
}

#[utoipa::path(
    post,
    path = "/linera/open-match-chain",
    tag = "linera",
    responses(
        (status = 200, description = "Chain opened", body = NewChainBody),
        (status = 500, description = "Ledger CLI failed", body = ErrorBody),
    )
)]
async fn open_match_chain(State(state): State<HttpState>) -> ApiResult<NewChainBody> {
    let chain_id = state.orchestrator.open_chain().await?;
    Ok(Json(NewChainBody {
        success: true,
        new_chain_id: chain_id,
    }))
}

#[utoipa::path(
    post,
    path = "/linera/create-xfighter-app",
    tag = "linera",
    request_body = CreateAppRequest,
    responses(
        (status = 200, description = "Session application created", body = AppBody),
        (status = 400, description = "Missing fields", body = ErrorBody),
        (status = 500, description = "Retries exhausted", body = ErrorBody),
    )
)]
async fn create_app(
    State(state): State<HttpState>,
    body: Result<Json<CreateAppRequest>, JsonRejection>,
) -> ApiResult<AppBody> {
    let Json(req) = body?;
    let module_id = required("moduleId", req.module_id)?;
    let chain_id = required("chainId", req.chain_id)?;
    let leaderboard_app_id = required("leaderboardAppId", req.leaderboard_app_id)?;
    let orch = &state.orchestrator;
    // debugging endpoint: fewer retries than open-and-create
    let default = RetryPolicy {
        max_retries: 3,
        ..orch.default_retry()
    };
    let retry = retry_policy(default, req.max_retries, req.retry_delay_ms);
    let app_id = orch
        .create_app(&module_id, &chain_id, &leaderboard_app_id, &retry)
        .await?;
    Ok(Json(AppBody {
        success: true,
        app_id,
        chain_id,
    }))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct PortQuery {
    /// Must equal the configured service port when given.
    port: Option<u16>,
}

#[derive(Debug, Serialize, ToSchema)]
struct PidBody {
    success: bool,
    pid: u32,
}

#[derive(Debug, Serialize, ToSchema)]
struct SuccessBody {
    success: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct ServiceStatusBody {
    success: bool,
    is_running: bool,
    pid: Option<u32>,
}

#[utoipa::path(
    post,
    path = "/linera/start-linera-service",
    tag = "linera",
    params(PortQuery),
    responses(
        (status = 200, description = "Service running", body = PidBody),
        (status = 400, description = "Port differs from configuration", body = ErrorBody),
        (status = 500, description = "Service failed to start", body = ErrorBody),
    )
)]
async fn start_service(
    State(state): State<HttpState>,
    Query(query): Query<PortQuery>,
) -> ApiResult<PidBody> {
    let configured = state.orchestrator.settings().service.port;
    if let Some(port) = query.port.filter(|p| *p != configured) {
        return Err(ApiError::bad_request(format!(
            "service port is fixed at {configured}; got {port}"
        )));
    }
    let pid = state.orchestrator.start_service().await?;
    Ok(Json(PidBody { success: true, pid }))
}

#[utoipa::path(
    post,
    path = "/linera/stop-linera-service",
    tag = "linera",
    responses((status = 200, description = "Service stopped or was not running", body = SuccessBody))
)]
async fn stop_service(State(state): State<HttpState>) -> ApiResult<SuccessBody> {
    state.orchestrator.stop_service().await;
    Ok(Json(SuccessBody { success: true }))
}

#[utoipa::path(
    method(get, post),
    path = "/linera/linera-service-status",
    tag = "linera",
    responses((status = 200, description = "Whether the service daemon runs", body = ServiceStatusBody))
)]
async fn service_status(State(state): State<HttpState>) -> ApiResult<ServiceStatusBody> {
    let status = state.orchestrator.service_status().await;
    Ok(Json(ServiceStatusBody {
        success: true,
        is_running: status.is_running,
        pid: status.pid,
    }))
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct SubmitBody {
    success: bool,
    match_id: String,
    /// Ledger response, parsed when it is JSON.
    #[schema(value_type = Object)]
    body: Value,
}

#[utoipa::path(
    post,
    path = "/linera/submit-match-result",
    tag = "linera",
    request_body(
        content = Object,
        description = "`{chainId?, appId?, matchResult}` or the flat legacy shape"
    ),
    responses(
        (status = 200, description = "Result accepted by the ledger", body = SubmitBody),
        (status = 400, description = "Invalid payload, unknown match or already submitted", body = ErrorBody),
        (status = 500, description = "Ledger or persistence failure; the match may be resubmitted", body = ErrorBody),
    )
)]
async fn submit_match_result(
    State(state): State<HttpState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<SubmitBody> {
    let Json(payload) = body?;
    let submission = Submission::from_payload(&payload)?;
    let raw = state.orchestrator.submit_match_result(&submission).await?;
    Ok(Json(SubmitBody {
        success: true,
        match_id: submission.match_result.match_id,
        body: raw_body(raw),
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct LeaderboardRequest {
    #[serde(default)]
    chain_id: String,
    #[serde(default)]
    app_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
struct LeaderboardBody {
    success: bool,
    #[schema(value_type = Object)]
    body: Value,
}

#[utoipa::path(
    post,
    path = "/linera/get-leaderboard-data",
    tag = "linera",
    request_body = LeaderboardRequest,
    responses(
        (status = 200, description = "Leaderboard query response", body = LeaderboardBody),
        (status = 400, description = "Missing chain or app id", body = ErrorBody),
        (status = 500, description = "Query failed", body = ErrorBody),
    )
)]
async fn leaderboard(
    State(state): State<HttpState>,
    body: Result<Json<LeaderboardRequest>, JsonRejection>,
) -> ApiResult<LeaderboardBody> {
    let Json(req) = body?;
    let raw = state.orchestrator.leaderboard(&req.chain_id, &req.app_id).await?;
    Ok(Json(LeaderboardBody {
        success: true,
        body: raw_body(raw),
    }))
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct MappingSummary {
    match_id: String,
    chain_id: String,
    app_id: String,
    #[schema(value_type = String, example = "created")]
    status: MappingStatus,
}

#[derive(Debug, Serialize, ToSchema)]
struct MappingsBody {
    success: bool,
    count: usize,
    mappings: Vec<MappingSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct MappingBody {
    success: bool,
    match_id: String,
    chain_id: String,
    app_id: String,
    #[schema(value_type = String, example = "submitted")]
    status: MappingStatus,
    submitted_op_id: Option<String>,
    #[schema(value_type = Option<String>)]
    submitted_at: Option<DateTime<Utc>>,
}

#[utoipa::path(
    get,
    path = "/linera/match-mapping/all",
    tag = "linera",
    responses((status = 200, description = "Every recorded match", body = MappingsBody))
)]
async fn all_mappings(State(state): State<HttpState>) -> ApiResult<MappingsBody> {
    let mappings: Vec<MappingSummary> = state
        .orchestrator
        .mappings()
        .into_iter()
        .map(|(match_id, m)| MappingSummary {
            match_id,
            chain_id: m.chain_id,
            app_id: m.app_id,
            status: m.status,
        })
        .collect();
    Ok(Json(MappingsBody {
        success: true,
        count: mappings.len(),
        mappings,
    }))
}

#[utoipa::path(
    get,
    path = "/linera/match-mapping/{match_id}",
    tag = "linera",
    params(("match_id" = String, Path, description = "Match id; for allocated matches the chain id")),
    responses(
        (status = 200, description = "Mapping and submission state", body = MappingBody),
        (status = 404, description = "No mapping for this match", body = ErrorBody),
    )
)]
async fn one_mapping(
    State(state): State<HttpState>,
    Path(match_id): Path<String>,
) -> ApiResult<MappingBody> {
    if match_id.trim().is_empty() {
        return Err(ApiError::bad_request("matchId is required"));
    }
    let mapping = state
        .orchestrator
        .mapping(&match_id)
        .ok_or_else(|| ApiError::NotFound(format!("no mapping found for matchId={match_id}")))?;
    Ok(Json(MappingBody {
        success: true,
        match_id,
        chain_id: mapping.chain_id,
        app_id: mapping.app_id,
        status: mapping.status,
        submitted_op_id: mapping.submitted_op_id,
        submitted_at: mapping.submitted_at,
    }))
}

/// Ledger responses are JSON; anything else is passed through as a string.
fn raw_body(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}
