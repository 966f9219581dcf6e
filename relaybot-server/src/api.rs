use crate::metrics::MetricsReport;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use relaybot_core::config::normalize_project;
use relaybot_core::{ProjectStatus, RunSnapshot, StartOutcome, StopOutcome};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthReport {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    timestamp: DateTime<Utc>,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.metrics.uptime_secs(),
        timestamp: Utc::now(),
    })
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsReport> {
    let running = state.supervisor.list_running().len();
    Json(state.metrics.report(running))
}

pub async fn list_runs(State(state): State<AppState>) -> Json<Vec<RunSnapshot>> {
    Json(state.supervisor.snapshot())
}

fn supported(state: &AppState, raw: &str) -> Result<String, StatusCode> {
    let project = normalize_project(raw);
    if state.config.is_supported(&project) {
        Ok(project)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Result<Json<ProjectStatus>, StatusCode> {
    let project = supported(&state, &project)?;
    Ok(Json(ProjectStatus {
        running: state.supervisor.running(&project),
        last_exit: state.supervisor.last_exit(&project),
        project,
    }))
}

pub async fn start_run(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Result<(StatusCode, Json<StartOutcome>), StatusCode> {
    let project = supported(&state, &project)?;
    let Some(command) = state.config.command_for(&project) else {
        return Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(StartOutcome::failed(format!(
                "No launch command configured for project {}",
                project
            ))),
        ));
    };

    let outcome = state.supervisor.start(&project, command).await;
    state.metrics.record_start(&outcome);
    Ok((StatusCode::OK, Json(outcome)))
}

pub async fn stop_run(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Result<Json<StopOutcome>, StatusCode> {
    let project = supported(&state, &project)?;
    let outcome = state.supervisor.stop(&project).await;
    state.metrics.record_stop(&outcome);
    Ok(Json(outcome))
}
