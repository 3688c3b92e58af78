//! HTTP surface for the gate.
//!
//! | Method | Path | Body / Query | Response |
//! |--------|------|--------------|----------|
//! | POST | `/execute` | [`ExecuteRequest`] | [`ExecuteResponse`] or [`ErrorResponse`] |
//! | POST | `/validate` | [`ValidateRequest`] | [`ValidateResponse`] |
//! | GET | `/audit` | `?limit=N` | [`AuditResponse`] |
//! | GET | `/runs` | - | [`RunListResponse`] |
//! | POST | `/runs/:id/cancel` | - | [`CancelResponse`] |
//! | GET | `/health` | - | [`HealthResponse`] |
//!
//! When an API key is configured every route except `/health` requires a
//! matching `X-API-Key` header; otherwise the check is skipped.

use std::sync::Arc;

use poem::http::StatusCode;
use poem::web::{Data, Json, Path, Query};
use poem::{
    Endpoint, EndpointExt, IntoResponse, Middleware, Request, Response, Route, get, handler, post,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::audit::AuditLog;
use super::coordinator::ExecutionCoordinator;
use super::error::PipelineError;
use super::types::{
    AuditResponse, CancelResponse, ErrorResponse, ExecuteRequest, ExecuteResponse, HealthResponse,
    RunListResponse, ValidateRequest, ValidateResponse,
};

/// Header carrying the shared secret.
pub const API_KEY_HEADER: &str = "X-API-Key";

const DEFAULT_AUDIT_LIMIT: usize = 50;

/// Shared state behind every handler.
pub struct AppState {
    pub coordinator: ExecutionCoordinator,
    pub audit: Arc<AuditLog>,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Unauthorized {
    error: String,
    detail: String,
}

/// Build the routed application.
pub fn app(state: Arc<AppState>) -> impl Endpoint {
    let api_key = state.api_key.clone();
    Route::new()
        .at("/execute", post(execute))
        .at("/validate", post(validate))
        .at("/audit", get(audit))
        .at("/runs", get(list_runs))
        .at("/runs/:id/cancel", post(cancel_run))
        .at("/health", get(health))
        .with(ApiKeyAuth::new(api_key))
        .data(state)
}

/// HTTP status for a failed run.
pub fn status_for(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::PolicyRejection { .. } => StatusCode::FORBIDDEN,
        PipelineError::Configuration(_) | PipelineError::Persist(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        PipelineError::Connection(_) | PipelineError::Execution { .. } => StatusCode::BAD_GATEWAY,
        PipelineError::Cancelled(_) => StatusCode::CONFLICT,
    }
}

#[handler]
async fn execute(state: Data<&Arc<AppState>>, Json(req): Json<ExecuteRequest>) -> Response {
    let cancel = CancellationToken::new();
    match state
        .coordinator
        .run(&req.command, req.query.as_deref(), cancel)
        .await
    {
        Ok(bundle) => Json(ExecuteResponse::from(&bundle)).into_response(),
        Err(error) => Json(ErrorResponse::from(&error))
            .with_status(status_for(&error))
            .into_response(),
    }
}

#[handler]
async fn validate(
    state: Data<&Arc<AppState>>,
    Json(req): Json<ValidateRequest>,
) -> Json<ValidateResponse> {
    Json(state.coordinator.validate(&req.command))
}

#[handler]
async fn audit(state: Data<&Arc<AppState>>, Query(query): Query<AuditQuery>) -> Json<AuditResponse> {
    let events = state
        .audit
        .recent(query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT))
        .await;
    Json(AuditResponse {
        count: events.len(),
        events,
    })
}

#[handler]
async fn list_runs(state: Data<&Arc<AppState>>) -> Json<RunListResponse> {
    let runs = state.coordinator.runs().list();
    Json(RunListResponse {
        count: runs.len(),
        runs,
    })
}

#[handler]
async fn cancel_run(state: Data<&Arc<AppState>>, Path(run_id): Path<String>) -> Response {
    if state.coordinator.runs().cancel(&run_id) {
        Json(CancelResponse {
            message: format!("Cancellation requested for run {}", run_id),
            run_id,
            cancelled: true,
        })
        .into_response()
    } else {
        Json(CancelResponse {
            message: format!("No active run with id {}", run_id),
            run_id,
            cancelled: false,
        })
        .with_status(StatusCode::NOT_FOUND)
        .into_response()
    }
}

#[handler]
async fn health(state: Data<&Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_runs: state.coordinator.runs().count(),
        auth_enabled: state.api_key.is_some(),
    })
}

/// Middleware enforcing the `X-API-Key` header.
pub struct ApiKeyAuth {
    key: Option<String>,
}

impl ApiKeyAuth {
    pub fn new(key: Option<String>) -> Self {
        Self { key }
    }
}

impl<E: Endpoint> Middleware<E> for ApiKeyAuth {
    type Output = ApiKeyAuthEndpoint<E>;

    fn transform(&self, ep: E) -> Self::Output {
        ApiKeyAuthEndpoint {
            ep,
            key: self.key.clone(),
        }
    }
}

pub struct ApiKeyAuthEndpoint<E> {
    ep: E,
    key: Option<String>,
}

impl<E: Endpoint> Endpoint for ApiKeyAuthEndpoint<E> {
    type Output = Response;

    async fn call(&self, req: Request) -> poem::Result<Self::Output> {
        let Some(expected) = &self.key else {
            debug!("API key not configured; {} allowed without authentication", req.uri().path());
            return self.ep.call(req).await.map(IntoResponse::into_response);
        };

        if req.uri().path() != "/health" {
            let detail = match req.header(API_KEY_HEADER) {
                None => Some("missing X-API-Key header"),
                Some(provided) if !constant_time_eq(provided, expected) => Some("invalid API key"),
                Some(_) => None,
            };
            if let Some(detail) = detail {
                warn!("Rejected request to {}: {}", req.uri().path(), detail);
                return Ok(Json(Unauthorized {
                    error: "unauthorized".to_string(),
                    detail: detail.to_string(),
                })
                .with_status(StatusCode::UNAUTHORIZED)
                .into_response());
            }
        }

        self.ep.call(req).await.map(IntoResponse::into_response)
    }
}

/// Key comparison whose timing does not depend on where the inputs differ.
fn constant_time_eq(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
