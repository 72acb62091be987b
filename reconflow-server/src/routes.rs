//! Route table of the HTTP API.

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{self, scan, tools};
use crate::infra::app_state::AppState;

/// Route paths.
pub mod v1 {
    /// `GET`
    pub const HEALTH: &str = "/health";
    /// `GET`
    pub const TOOLS: &str = "/api/tools";

    /// Scan control paths.
    pub mod scan {
        /// `POST`
        pub const RUN: &str = "/api/scan/run";
        /// `POST`
        pub const STOP: &str = "/api/scan/stop";
        /// `GET`
        pub const RUNNING: &str = "/api/scan/running";
        /// `GET`
        pub const HISTORY: &str = "/api/scan/history";
        /// `GET`
        pub const STATUS: &str = "/api/scan/status/{scan_id}";
        /// `GET`, optional `?tail=n`
        pub const LOGS: &str = "/api/scan/logs/{scan_id}";
        /// `DELETE`
        pub const ENTRY: &str = "/api/scan/{scan_id}";
    }
}

/// Mounts every route with tracing and permissive CORS.
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route(v1::HEALTH, get(handlers::health_handler))
        .route(v1::TOOLS, get(tools::tools_handler))
        .route(v1::scan::RUN, post(scan::run_scan_handler))
        .route(v1::scan::STOP, post(scan::stop_scan_handler))
        .route(v1::scan::RUNNING, get(scan::running_scans_handler))
        .route(v1::scan::HISTORY, get(scan::scan_history_handler))
        .route(v1::scan::STATUS, get(scan::scan_status_handler))
        .route(v1::scan::LOGS, get(scan::scan_logs_handler))
        .route(v1::scan::ENTRY, delete(scan::evict_scan_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
