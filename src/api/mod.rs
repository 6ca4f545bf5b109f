//! HTTP API for running and killing jobs.
//!
//! | Method | Path           | Body / query               | Response                 |
//! |--------|----------------|----------------------------|--------------------------|
//! | POST   | `/jobs/run`    | [`RunRequest`]             | [`RunResponse`]          |
//! | POST   | `/jobs/kill`   | [`KillRequest`]            | `{}`                     |
//! | GET    | `/jobs/status` | `jobName`, `runId`         | `{ "running": bool }`    |
//! | GET    | `/jobs/runs`   | optional `jobName`         | list of [`ActiveRun`]    |

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::RunnerError;
use crate::notify::TracingNotifier;
use crate::runs::{ActiveRun, KillRequest, RunCoordinator, RunRequest, RunResponse};

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<RunCoordinator>,
}

impl ApiState {
    pub fn new(coordinator: RunCoordinator) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KillResponse {}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusQuery {
    job_name: String,
    run_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunsQuery {
    job_name: Option<String>,
}

pub fn status_code(err: &RunnerError) -> StatusCode {
    match err {
        RunnerError::Conflict { .. } => StatusCode::CONFLICT,
        RunnerError::JobNotFound(_) | RunnerError::SourceNotFound(_) => StatusCode::NOT_FOUND,
        RunnerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        RunnerError::Misconfiguration(_)
        | RunnerError::SpawnFailure(_)
        | RunnerError::StreamFailure(_)
        | RunnerError::PidFile { .. }
        | RunnerError::InvalidPidFile { .. }
        | RunnerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for RunnerError {
    fn into_response(self) -> Response {
        let status = status_code(&self);
        if !self.is_client_error() {
            tracing::error!(error = %self, "Job request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/jobs/run", post(run_job_handler))
        .route("/jobs/kill", post(kill_job_handler))
        .route("/jobs/status", get(job_status_handler))
        .route("/jobs/runs", get(list_runs_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled. In-flight runs are awaited
/// before returning.
pub async fn run_api(
    addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting job API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn run_job_handler(
    State(state): State<ApiState>,
    Json(payload): Json<RunRequest>,
) -> Result<Json<RunResponse>, RunnerError> {
    let coordinator = state.coordinator.clone();

    // A dropped connection must not abandon the run halfway through launch
    let handle = tokio::spawn(async move {
        let launched = coordinator.launch(payload).await?;
        let notifier = TracingNotifier::new(&launched.job_name, &launched.run_id);
        let exit_code = launched.wait(&notifier).await?;
        Ok::<_, RunnerError>(RunResponse { exit_code })
    });

    match handle.await {
        Ok(result) => result.map(Json),
        Err(e) => Err(RunnerError::Io(std::io::Error::other(format!(
            "job run task failed: {}",
            e
        )))),
    }
}

async fn kill_job_handler(
    State(state): State<ApiState>,
    Json(payload): Json<KillRequest>,
) -> Result<Json<KillResponse>, RunnerError> {
    state
        .coordinator
        .kill(&payload.job_name, &payload.run_id)
        .await?;
    Ok(Json(KillResponse {}))
}

async fn job_status_handler(
    State(state): State<ApiState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, RunnerError> {
    let running = state
        .coordinator
        .is_running(&query.job_name, &query.run_id)
        .await?;
    Ok(Json(StatusResponse { running }))
}

async fn list_runs_handler(
    State(state): State<ApiState>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<ActiveRun>>, RunnerError> {
    let runs = state
        .coordinator
        .active_runs(query.job_name.as_deref())
        .await?;
    Ok(Json(runs))
}
