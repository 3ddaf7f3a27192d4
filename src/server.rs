//! Web server module for dbsnap.
//!
//! Health probes, the manual reload trigger, the registry view, summary
//! listing for dashboards and report artifact serving.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use chrono::{Local, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::orchestrator::{InstanceRegistry, ReloadTrigger};
use crate::report::{ARTIFACT_SUFFIX, FsArtifactWriter, ReportError};
use crate::storage::{CREATE_TIME_FORMAT, CentralStore, Instance};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: CentralStore,
    pub registry: Arc<InstanceRegistry>,
    pub reload: ReloadTrigger,
    pub artifacts: FsArtifactWriter,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Registry view.
#[derive(Serialize)]
struct InstancesResponse {
    loaded: bool,
    count: usize,
    instances: Vec<Instance>,
}

/// Query parameters for the summary listing.
#[derive(Debug, Deserialize)]
pub struct SnapshotQueryParams {
    pub inst_id: Option<i64>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/api/reload", get(reload_handler).post(reload_handler))
        .route("/api/instances", get(instances_handler))
        .route("/api/snapshots", get(snapshots_handler))
        .route("/data/:inst_id/:month/:file", get(artifact_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

fn bad_request(error: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        db: None,
    })
}

/// Readiness probe that pings the central store.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.ping().await {
        Ok(()) => Json(HealthResponse {
            status: "ok".to_string(),
            db: Some("ready".to_string()),
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "not_ready".to_string(),
                    db: Some(err.to_string()),
                }),
            )
                .into_response()
        }
    }
}

/// Queue a registry reload.
async fn reload_handler(State(state): State<Arc<AppState>>) -> Response {
    if state.reload.request() {
        tracing::info!("Manual reload requested");
        (StatusCode::ACCEPTED, Json(StatusResponse { status: "accepted" })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(StatusResponse { status: "dropped" }),
        )
            .into_response()
    }
}

/// Instances of the current snapshot.
async fn instances_handler(State(state): State<Arc<AppState>>) -> Json<InstancesResponse> {
    let snapshot = state.registry.current();
    let instances: Vec<Instance> = snapshot
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|i| i.as_ref().clone())
        .collect();

    Json(InstancesResponse {
        loaded: snapshot.is_some(),
        count: instances.len(),
        instances,
    })
}

fn parse_time(field: &str, value: Option<&str>, default: NaiveDateTime) -> Result<String, Response> {
    let time = match value {
        None => default,
        Some(raw) => NaiveDateTime::parse_from_str(raw.trim(), CREATE_TIME_FORMAT)
            .map_err(|_| bad_request(format!("{field} must look like 2024-05-01 10:00:00")))?,
    };
    Ok(time.format(CREATE_TIME_FORMAT).to_string())
}

/// Summaries of one instance, defaulting to the last 24 hours.
async fn snapshots_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SnapshotQueryParams>,
) -> Response {
    let Some(inst_id) = params.inst_id.filter(|id| *id > 0) else {
        return bad_request("inst_id must be a positive integer");
    };

    let now = Local::now().naive_local();
    let start = match parse_time("start_time", params.start_time.as_deref(), now - TimeDelta::hours(24)) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let end = match parse_time("end_time", params.end_time.as_deref(), now) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match state.store.list_summaries(inst_id, &start, &end).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            tracing::error!(inst_id, error = %e, "Failed to list summaries");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

fn accepts_brotli(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|enc| enc.trim().split(';').next() == Some("br"))
}

fn artifact_error(key: &str, err: ReportError) -> Response {
    match err {
        ReportError::InvalidKey(_) => (StatusCode::NOT_FOUND, "File not found").into_response(),
        ReportError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "File not found").into_response()
        }
        other => {
            tracing::error!(key, error = %other, "Failed to read report");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serve one report: raw brotli when accepted, decompressed otherwise.
async fn artifact_handler(
    State(state): State<Arc<AppState>>,
    Path((inst_id, month, file)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    let stamp = file
        .strip_suffix(ARTIFACT_SUFFIX)
        .or_else(|| file.strip_suffix(".html"))
        .unwrap_or(&file);
    let key = format!("{inst_id}/{month}/{stamp}");

    if accepts_brotli(&headers) {
        match state.artifacts.read_compressed(&key).await {
            Ok(bytes) => (
                [
                    (header::CONTENT_TYPE, "text/html; charset=utf-8"),
                    (header::CONTENT_ENCODING, "br"),
                    (header::CACHE_CONTROL, "public, max-age=60"),
                ],
                bytes,
            )
                .into_response(),
            Err(e) => artifact_error(&key, e),
        }
    } else {
        match state.artifacts.read_html(&key).await {
            Ok(html) => Html(html).into_response(),
            Err(e) => artifact_error(&key, e),
        }
    }
}
