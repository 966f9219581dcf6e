//! Slack slash-command handlers.
//!
//! Slack expects an answer within three seconds, so anything that can take
//! longer is acknowledged right away and finished in a spawned task that
//! relays its outcome to the channel.

use crate::messages;
use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
pub struct SlashCommand {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user_name: Option<String>,
    // Older deploy hooks send the image in its own field.
    #[serde(default)]
    pub image: Option<String>,
}

fn ephemeral(text: impl Into<String>) -> Response {
    Json(json!({
        "response_type": "ephemeral",
        "text": text.into(),
    }))
    .into_response()
}

pub async fn help(State(state): State<AppState>) -> StatusCode {
    state.relay(&messages::help_text(&state.config)).await;
    StatusCode::OK
}

pub async fn run(State(state): State<AppState>, Form(cmd): Form<SlashCommand>) -> Response {
    let project = match state.config.validate_project(&cmd.text) {
        Ok(project) => project,
        Err(msg) => return ephemeral(msg),
    };
    let Some(command) = state.config.command_for(&project).map(str::to_string) else {
        return ephemeral(format!("No launch command configured for project {}", project));
    };

    info!(project = %project, user = ?cmd.user_name, "Run requested");
    state.relay(&format!("Starting project {}...", project)).await;

    tokio::spawn(async move {
        let outcome = state.supervisor.start(&project, &command).await;
        state.metrics.record_start(&outcome);
        state.relay(&outcome.message).await;
    });

    StatusCode::OK.into_response()
}

pub async fn stop(State(state): State<AppState>, Form(cmd): Form<SlashCommand>) -> Response {
    let project = match state.config.validate_project(&cmd.text) {
        Ok(project) => project,
        Err(msg) => return ephemeral(msg),
    };

    info!(project = %project, user = ?cmd.user_name, "Stop requested");

    tokio::spawn(async move {
        let containers = state.containers.stop_matching(&project).await;
        let process = state.supervisor.stop(&project).await;
        state.metrics.record_stop(&process);

        let mut lines = Vec::new();
        if containers.success {
            lines.push(containers.message.clone());
        }
        if process.stopped {
            lines.push(process.message.clone());
        }
        if lines.is_empty() {
            lines.push(format!("Failed to stop project {}", project));
            lines.push(containers.message);
            lines.push(process.message);
        }
        state.relay(&lines.join("\n")).await;
    });

    StatusCode::OK.into_response()
}

pub async fn deploy(State(state): State<AppState>, Form(cmd): Form<SlashCommand>) -> Response {
    let image = match cmd.text.trim() {
        "" => cmd.image.as_deref().unwrap_or_default().trim().to_string(),
        text => text.to_string(),
    };
    if image.is_empty() {
        return ephemeral("Image name cannot be empty");
    }

    info!(image = %image, user = ?cmd.user_name, "Deploy requested");
    state.relay(&format!("Pulling image {}...", image)).await;

    tokio::spawn(async move {
        let outcome = state.containers.pull_image(&image).await;
        state.relay(&outcome.message).await;
    });

    StatusCode::OK.into_response()
}

pub async fn report(State(state): State<AppState>, Form(cmd): Form<SlashCommand>) -> Response {
    let project = match state.config.validate_project(&cmd.text) {
        Ok(project) => project,
        Err(msg) => return ephemeral(msg),
    };

    let url = state.config.report_url_for(&project);
    state
        .relay(&messages::report_message(&project, url.as_deref()))
        .await;
    StatusCode::OK.into_response()
}

pub async fn status(State(state): State<AppState>) -> Response {
    let running = state.supervisor.list_running();
    Json(json!({
        "status": "ok",
        "message": messages::running_summary(&running),
        "running": running,
    }))
    .into_response()
}
