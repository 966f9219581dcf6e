use axum::{
    routing::{get, post},
    Router,
};
use relaybot_core::Config;
use relaybot_runner::{ContainerEngine, Supervisor};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod api;
mod commands;
mod messages;
mod metrics;
mod slack;

use metrics::Metrics;
use slack::ChatRelay;

#[derive(Clone)]
pub(crate) struct AppState {
    config: Arc<Config>,
    supervisor: Supervisor,
    containers: ContainerEngine,
    chat: Arc<dyn ChatRelay>,
    metrics: Arc<Metrics>,
}

impl AppState {
    fn new(config: Config, chat: Arc<dyn ChatRelay>) -> Self {
        let supervisor = Supervisor::builder()
            .grace_period(config.stop_grace)
            .duplicate_policy(config.duplicate_policy)
            .build();

        Self {
            containers: ContainerEngine::new(config.container_engine.clone()),
            config: Arc::new(config),
            supervisor,
            chat,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Send a message to the chat channel. Failures are logged and counted,
    /// never returned to the webhook caller.
    async fn relay(&self, text: &str) {
        let text = messages::truncate_for_chat(text);
        match self.chat.send(&text).await {
            Ok(()) => self.metrics.record_relay(true),
            Err(e) => {
                warn!(error = %e, "Failed to relay chat message");
                self.metrics.record_relay(false);
            }
        }
    }
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health_check))
        .route("/metrics", get(api::metrics))
        .route("/bot-slack/help", post(commands::help))
        .route("/bot-slack/run", post(commands::run))
        .route("/bot-slack/stop", post(commands::stop))
        .route("/bot-slack/deploy", post(commands::deploy))
        .route("/bot-slack/report", post(commands::report))
        .route("/bot-slack/status", get(commands::status).post(commands::status))
        .route("/api/v1/runs", get(api::list_runs))
        .route("/api/v1/runs/:project", get(api::get_run))
        .route("/api/v1/runs/:project/start", post(api::start_run))
        .route("/api/v1/runs/:project/stop", post(api::stop_run))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Announce runs that finish on their own.
fn spawn_exit_relay(state: AppState) -> tokio::task::JoinHandle<()> {
    let mut exits = state.supervisor.subscribe();
    tokio::spawn(async move {
        loop {
            match exits.recv().await {
                Ok(exit) => {
                    state.metrics.record_exit(&exit);
                    if let Some(message) = messages::exit_announcement(&exit) {
                        state.relay(&message).await;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Exit relay fell behind, some run exits were not announced");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let chat = slack::relay_from_config(&config)?;
    let addr = format!("{}:{}", config.host, config.port);
    info!(
        projects = ?config.supported_projects,
        grace_secs = config.stop_grace.as_secs(),
        duplicate_start = %config.duplicate_policy,
        "Configuration loaded"
    );

    let state = AppState::new(config, chat);
    spawn_exit_relay(state.clone());
    state.relay("Relay bot started").await;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down, stopping running projects");
    for (project, outcome) in state.supervisor.shutdown().await {
        info!(project = %project, stopped = outcome.stopped, "{}", outcome.message);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use relaybot_core::{ProjectStatus, RunSnapshot, StartOutcome, StopOutcome};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use tower::ServiceExt;

    #[derive(Default)]
    struct RecordingRelay {
        messages: Mutex<Vec<String>>,
    }

    impl RecordingRelay {
        fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }

        async fn wait_for(&self, needle: &str) -> bool {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if self.messages().iter().any(|m| m.contains(needle)) {
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            false
        }
    }

    #[async_trait]
    impl ChatRelay for RecordingRelay {
        async fn send(&self, text: &str) -> relaybot_core::Result<()> {
            self.messages.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn test_state() -> (AppState, Arc<RecordingRelay>) {
        let config = Config::from_vars(vec![
            ("SUPPORTED_PROJECTS".to_string(), "mlm,vkyc".to_string()),
            ("RUN_MLM_CMD".to_string(), "sleep 30".to_string()),
            ("DEFAULT_URL_REPORT".to_string(), "http://reports".to_string()),
            ("CONTAINER_ENGINE".to_string(), "relaybot-no-such-engine".to_string()),
            ("STOP_GRACE_SECS".to_string(), "2".to_string()),
        ])
        .unwrap();
        let relay = Arc::new(RecordingRelay::default());
        (AppState::new(config, relay.clone()), relay)
    }

    fn form(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = test_state();
        let response = app(state).oneshot(empty("GET", "/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert!(body["uptime_secs"].is_u64());
    }

    #[tokio::test]
    async fn test_run_rejects_unknown_project() {
        let (state, relay) = test_state();
        let response = app(state)
            .oneshot(form("/bot-slack/run", "text=unknown"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = json_body(response).await;
        assert_eq!(body["response_type"], "ephemeral");
        assert_eq!(
            body["text"],
            "Project 'unknown' not supported. Supported: mlm, vkyc"
        );
        assert!(relay.messages().is_empty());
    }

    #[tokio::test]
    async fn test_run_requires_configured_command() {
        let (state, _) = test_state();
        let response = app(state)
            .oneshot(form("/bot-slack/run", "text=VKYC"))
            .await
            .unwrap();

        let body: serde_json::Value = json_body(response).await;
        assert_eq!(body["text"], "No launch command configured for project vkyc");
    }

    #[tokio::test]
    async fn test_help_is_relayed() {
        let (state, relay) = test_state();
        let response = app(state)
            .oneshot(form("/bot-slack/help", "text="))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(relay.messages()[0].contains("Supported projects: mlm, vkyc"));
    }

    #[tokio::test]
    async fn test_report_relays_link() {
        let (state, relay) = test_state();
        app(state)
            .oneshot(form("/bot-slack/report", "text=mlm"))
            .await
            .unwrap();
        assert_eq!(
            relay.messages(),
            vec!["Latest report for MLM: http://reports/mlm/"]
        );
    }

    #[tokio::test]
    async fn test_deploy_requires_image() {
        let (state, relay) = test_state();
        let response = app(state)
            .oneshot(form("/bot-slack/deploy", "text=+"))
            .await
            .unwrap();

        let body: serde_json::Value = json_body(response).await;
        assert_eq!(body["text"], "Image name cannot be empty");
        assert!(relay.messages().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_relays_engine_failure() {
        let (state, relay) = test_state();
        app(state)
            .oneshot(form("/bot-slack/deploy", "text=alpine%3Alatest"))
            .await
            .unwrap();

        assert!(relay.wait_for("Pulling image alpine:latest").await);
        assert!(relay.wait_for("Failed to pull image alpine:latest").await);
    }

    #[tokio::test]
    async fn test_unknown_project_api_is_not_found() {
        let (state, _) = test_state();
        let response = app(state)
            .oneshot(empty("GET", "/api/v1/runs/unknown"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_api_start_without_command_is_unprocessable() {
        let (state, _) = test_state();
        let response = app(state)
            .oneshot(empty("POST", "/api/v1/runs/vkyc/start"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let outcome: StartOutcome = json_body(response).await;
        assert!(!outcome.started);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_api_start_status_stop() {
        let (state, _) = test_state();
        let router = app(state.clone());

        let response = router
            .clone()
            .oneshot(empty("POST", "/api/v1/runs/mlm/start"))
            .await
            .unwrap();
        let outcome: StartOutcome = json_body(response).await;
        assert!(outcome.started, "{}", outcome.message);

        let response = router
            .clone()
            .oneshot(empty("GET", "/api/v1/runs"))
            .await
            .unwrap();
        let runs: Vec<RunSnapshot> = json_body(response).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].command, "sleep 30");

        let response = router
            .clone()
            .oneshot(empty("GET", "/bot-slack/status"))
            .await
            .unwrap();
        let body: serde_json::Value = json_body(response).await;
        assert_eq!(body["message"], "Running projects: mlm");

        let response = router
            .clone()
            .oneshot(empty("POST", "/api/v1/runs/mlm/stop"))
            .await
            .unwrap();
        let outcome: StopOutcome = json_body(response).await;
        assert!(outcome.stopped);

        let response = router
            .clone()
            .oneshot(empty("GET", "/api/v1/runs/mlm"))
            .await
            .unwrap();
        let status: ProjectStatus = json_body(response).await;
        assert!(status.running.is_none());

        let response = router.oneshot(empty("GET", "/metrics")).await.unwrap();
        let body: serde_json::Value = json_body(response).await;
        assert_eq!(body["runs_started"], 1);
        assert_eq!(body["runs_stopped"], 1);
        assert_eq!(body["running_processes"], 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slash_run_then_stop() {
        let (state, relay) = test_state();
        let router = app(state.clone());

        router
            .clone()
            .oneshot(form("/bot-slack/run", "text=mlm&user_name=tester"))
            .await
            .unwrap();
        assert!(relay.wait_for("Starting project mlm...").await);
        assert!(relay.wait_for("Started project mlm").await);
        assert!(state.supervisor.list_running().contains("mlm"));

        router
            .oneshot(form("/bot-slack/stop", "text=mlm"))
            .await
            .unwrap();
        assert!(relay.wait_for("Stopped project mlm").await);
        assert!(state.supervisor.list_running().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_relay_announces_finished_runs() {
        let (state, relay) = test_state();
        spawn_exit_relay(state.clone());

        state.supervisor.start("vkyc", "exit 4").await;
        assert!(relay.wait_for("Project vkyc finished with exit code 4").await);
    }
}
