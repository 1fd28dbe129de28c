// Workflow HTTP routes

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use lifecycle_durable::{
    ExecutorError, ResumeReport, Workflow, WorkflowError, WorkflowExecutor, WorkflowInstance,
};
use lifecycle_onboarding::OnboardingWorkflow;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinError;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<WorkflowExecutor>,
}

impl AppState {
    pub fn new(executor: Arc<WorkflowExecutor>) -> Self {
        Self { executor }
    }
}

/// Signup payload accepted by the onboarding endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingRequest {
    #[schema(example = "ann@example.com")]
    pub email: String,
    #[schema(example = "Ann Example")]
    pub full_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub instance_id: Uuid,
}

/// Persisted failure of an instance
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FailureView {
    pub message: String,
    #[schema(example = "STEP_FAILED")]
    pub code: Option<String>,
}

impl From<WorkflowError> for FailureView {
    fn from(err: WorkflowError) -> Self {
        Self {
            message: err.message,
            code: err.code,
        }
    }
}

/// Read-only view of a workflow instance
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowView {
    pub id: Uuid,
    #[schema(example = "onboarding")]
    pub workflow_type: String,
    pub input: Value,
    #[schema(example = "sleeping")]
    pub status: String,
    pub wake_at: Option<DateTime<Utc>>,
    pub sleep_name: Option<String>,
    pub error: Option<FailureView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WorkflowInstance> for WorkflowView {
    fn from(instance: WorkflowInstance) -> Self {
        Self {
            id: instance.id,
            workflow_type: instance.workflow_type,
            input: instance.input,
            status: instance.status.to_string(),
            wake_at: instance.wake_at,
            sleep_name: instance.sleep_name,
            error: instance.error.map(FailureView::from),
            created_at: instance.created_at,
            updated_at: instance.updated_at,
        }
    }
}

/// Outcome of a resume
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResumeResponse {
    pub instance_id: Uuid,
    pub status: String,
    pub wake_at: Option<DateTime<Utc>>,
    pub sleep_name: Option<String>,
    pub error: Option<FailureView>,
    /// Step and sleep names reached, in order
    pub visited: Vec<String>,
    pub steps_executed: u32,
    pub steps_replayed: u32,
}

impl From<ResumeReport> for ResumeResponse {
    fn from(report: ResumeReport) -> Self {
        Self {
            instance_id: report.instance_id,
            status: report.status.to_string(),
            wake_at: report.wake_at,
            sleep_name: report.sleep_name,
            error: report.error.map(FailureView::from),
            visited: report.visited,
            steps_executed: report.steps_executed,
            steps_replayed: report.steps_replayed,
        }
    }
}

/// Standard error response for API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message describing what went wrong.
    pub error: String,
}

/// Error rendered as an HTTP response
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// The resume task panicked or was aborted
    #[error("resume task failed: {0}")]
    Task(#[from] JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Executor(err) => match err {
                ExecutorError::Validation(_) => StatusCode::BAD_REQUEST,
                ExecutorError::WorkflowNotFound(_) => StatusCode::NOT_FOUND,
                ExecutorError::InstanceBusy(_) | ExecutorError::LeaseLost(_) => {
                    StatusCode::CONFLICT
                }
                ExecutorError::Registry(_)
                | ExecutorError::TooManyOperations(..)
                | ExecutorError::Store(_)
                | ExecutorError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Resume on a task of its own
///
/// Dropping the request future (a client disconnect) detaches the task
/// instead of cancelling the resume between a side effect and its record.
async fn resume_detached(
    executor: &Arc<WorkflowExecutor>,
    instance_id: Uuid,
) -> Result<ResumeReport, ApiError> {
    let executor = executor.clone();
    let report = tokio::spawn(async move { executor.resume(instance_id).await }).await??;
    Ok(report)
}

/// Create workflow routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/workflows/onboarding", post(submit_onboarding))
        .route("/v1/workflows/:instance_id", get(get_workflow))
        .route("/v1/workflows/:instance_id/resume", post(resume_workflow))
        .route("/v1/workflows/:instance_id/cancel", post(cancel_workflow))
        .with_state(state)
}

/// POST /api/workflows/onboarding - Start onboarding for a new signup
#[utoipa::path(
    post,
    path = "/api/workflows/onboarding",
    request_body = OnboardingRequest,
    responses(
        (status = 201, description = "Onboarding started", body = SubmitResponse),
        (status = 400, description = "Invalid payload", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn submit_onboarding(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let instance_id = state
        .executor
        .submit(OnboardingWorkflow::TYPE, payload)
        .await?;

    // Sends the welcome email now. The instance is durable either way, so a
    // failure here is left to the scheduler's stale sweep.
    if let Err(e) = resume_detached(&state.executor, instance_id).await {
        tracing::warn!(%instance_id, error = %e, "initial resume failed");
    }

    Ok((StatusCode::CREATED, Json(SubmitResponse { instance_id })))
}

/// GET /v1/workflows/{instance_id} - Get a workflow instance
#[utoipa::path(
    get,
    path = "/v1/workflows/{instance_id}",
    params(("instance_id" = Uuid, Path, description = "Workflow instance ID")),
    responses(
        (status = 200, description = "Workflow instance", body = WorkflowView),
        (status = 404, description = "Unknown instance", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(instance_id): Path<Uuid>,
) -> Result<Json<WorkflowView>, ApiError> {
    let instance = state.executor.get_instance(instance_id).await?;
    Ok(Json(instance.into()))
}

/// POST /v1/workflows/{instance_id}/resume - Resume a workflow instance
#[utoipa::path(
    post,
    path = "/v1/workflows/{instance_id}/resume",
    params(("instance_id" = Uuid, Path, description = "Workflow instance ID")),
    responses(
        (status = 200, description = "Resume finished", body = ResumeResponse),
        (status = 404, description = "Unknown instance", body = ErrorResponse),
        (status = 409, description = "Another resume holds the instance", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn resume_workflow(
    State(state): State<AppState>,
    Path(instance_id): Path<Uuid>,
) -> Result<Json<ResumeResponse>, ApiError> {
    let report = resume_detached(&state.executor, instance_id).await?;
    Ok(Json(report.into()))
}

/// POST /v1/workflows/{instance_id}/cancel - Cancel a workflow instance
#[utoipa::path(
    post,
    path = "/v1/workflows/{instance_id}/cancel",
    params(("instance_id" = Uuid, Path, description = "Workflow instance ID")),
    responses(
        (status = 204, description = "Instance cancelled"),
        (status = 404, description = "Unknown instance", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(instance_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.executor.cancel(instance_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health - Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Server is up", body = HealthResponse)),
    tag = "health"
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        submit_onboarding,
        get_workflow,
        resume_workflow,
        cancel_workflow,
        health,
    ),
    components(schemas(
        OnboardingRequest,
        SubmitResponse,
        WorkflowView,
        ResumeResponse,
        FailureView,
        ErrorResponse,
        HealthResponse,
    )),
    tags(
        (name = "workflows", description = "Durable workflow endpoints"),
        (name = "health", description = "Liveness")
    ),
    info(
        title = "Lifecycle API",
        description = "Durable onboarding notification workflows",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Health and OpenAPI routes
pub fn meta_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api-doc/openapi.json", get(openapi_json))
}
