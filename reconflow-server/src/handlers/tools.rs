//! Tool availability endpoint.

use std::path::PathBuf;

use axum::{Json, extract::State};
use reconflow_core::ToolKind;
use reconflow_core::tools::{ToolAvailability, availability};
use serde::{Deserialize, Serialize};

use crate::infra::app_state::AppState;

/// One entry of `GET /api/tools`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ToolStatus {
    /// Tool name as used in configuration.
    pub name: ToolKind,
    /// Binary looked up on `PATH`.
    pub program: String,
    /// Runs in the configured scan mode.
    pub enabled: bool,
    /// Whether `path` resolved.
    pub installed: bool,
    /// Resolved binary location.
    pub path: Option<PathBuf>,
}

impl From<ToolAvailability> for ToolStatus {
    fn from(tool: ToolAvailability) -> Self {
        Self {
            installed: tool.installed(),
            name: tool.tool,
            program: tool.program,
            enabled: tool.enabled,
            path: tool.path,
        }
    }
}

/// Which tools the configured pipeline would run and whether they are on
/// `PATH`.
pub async fn tools_handler(State(state): State<AppState>) -> Json<Vec<ToolStatus>> {
    let settings = state.config.pipeline.resolve();
    Json(
        availability(&settings)
            .into_iter()
            .map(ToolStatus::from)
            .collect(),
    )
}
