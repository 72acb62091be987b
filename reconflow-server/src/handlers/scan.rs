//! Scan control endpoints and their JSON bodies.

use std::path::PathBuf;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use reconflow_core::{RunningScan, ScanId, ScanSnapshot, Target, TargetKind};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};

/// Body of `POST /api/scan/run`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunScanRequest {
    /// `domain` or `domainList`.
    pub target_type: TargetKind,
    /// Domain, or path to a domain list on the server.
    pub target: String,
    /// Defaults to the configured engine output root.
    #[serde(default)]
    pub output_root: Option<PathBuf>,
}

/// Reply to `POST /api/scan/run`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunScanResponse {
    /// Id to poll and stop the new scan with.
    pub scan_id: ScanId,
}

/// Body of `POST /api/scan/stop`.
#[derive(Debug, Default, Deserialize)]
pub struct StopScanRequest {
    /// Scan to stop. `None` stops every live scan.
    #[serde(default)]
    pub scan_id: Option<ScanId>,
}

/// Reply to `POST /api/scan/stop`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StopScanResponse {
    /// Scans that received a new stop request.
    pub stopped_count: usize,
}

/// Live scans, for `GET /api/scan/running`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunningScansResponse {
    /// In submission order.
    pub scans: Vec<RunningScan>,
}

/// Every retained scan, for `GET /api/scan/history`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScanHistoryResponse {
    /// Newest first.
    pub scans: Vec<ScanSnapshot>,
    /// Length of `scans`.
    pub count: usize,
}

/// Query string of `GET /api/scan/logs/{scan_id}`.
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    /// Return only the newest `tail` lines.
    pub tail: Option<usize>,
}

/// Reply to `GET /api/scan/logs/{scan_id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScanLogsResponse {
    /// Scan the lines belong to.
    pub scan_id: ScanId,
    /// Retained log lines, oldest first.
    pub lines: Vec<String>,
}

/// Validates the target and starts a scan. Answers `201` with its id.
pub async fn run_scan_handler(
    State(state): State<AppState>,
    Json(request): Json<RunScanRequest>,
) -> AppResult<(StatusCode, Json<RunScanResponse>)> {
    let target = Target::parse(request.target_type, &request.target)?;
    let output_root = request
        .output_root
        .unwrap_or_else(|| state.registry.config().output_root.clone());

    let scan_id = state.registry.submit(target, &output_root).await?;
    info!(scan_id = %scan_id, "scan accepted");
    Ok((StatusCode::CREATED, Json(RunScanResponse { scan_id })))
}

/// Snapshot of one scan, `404` if unknown.
pub async fn scan_status_handler(
    State(state): State<AppState>,
    Path(scan_id): Path<ScanId>,
) -> AppResult<Json<ScanSnapshot>> {
    Ok(Json(state.registry.get_status(scan_id).await?))
}

/// Scans currently in `running` state.
pub async fn running_scans_handler(State(state): State<AppState>) -> Json<RunningScansResponse> {
    Json(RunningScansResponse {
        scans: state.registry.list_running().await,
    })
}

/// Every retained scan, live or finished.
pub async fn scan_history_handler(State(state): State<AppState>) -> Json<ScanHistoryResponse> {
    let scans = state.registry.list().await;
    Json(ScanHistoryResponse {
        count: scans.len(),
        scans,
    })
}

/// A missing body stops every live scan.
pub async fn stop_scan_handler(
    State(state): State<AppState>,
    request: Option<Json<StopScanRequest>>,
) -> Json<StopScanResponse> {
    let scan_id = request.and_then(|Json(request)| request.scan_id);
    let stopped_count = state.registry.cancel(scan_id).await;
    Json(StopScanResponse { stopped_count })
}

/// Log lines of one scan, optionally only the tail.
pub async fn scan_logs_handler(
    State(state): State<AppState>,
    Path(scan_id): Path<ScanId>,
    Query(query): Query<LogsQuery>,
) -> AppResult<Json<ScanLogsResponse>> {
    let lines = state.registry.logs(scan_id, query.tail).await?;
    Ok(Json(ScanLogsResponse { scan_id, lines }))
}

/// Forgets a finished scan. Live scans answer `409`.
pub async fn evict_scan_handler(
    State(state): State<AppState>,
    Path(scan_id): Path<ScanId>,
) -> AppResult<StatusCode> {
    if state.registry.evict(scan_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::conflict(format!("scan {scan_id} is still active")))
    }
}
