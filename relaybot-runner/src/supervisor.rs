use crate::output::{self, SharedTail};
use crate::process::{shell_command, ProcessConfig};
use crate::terminate::{force_kill, terminate_gracefully};
use chrono::{DateTime, Utc};
use relaybot_core::{
    DuplicatePolicy, ExitReason, RelayError, Result, RunExit, RunSnapshot, StartOutcome,
    StopOutcome,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Time a process gets to exit after a termination request
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

// Upper bound on waiting for exit once SIGKILL has been sent.
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(2);
// Output readers may outlive the child when grandchildren hold the pipes.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
const EXIT_CHANNEL_CAPACITY: usize = 64;

/// `None` while running, `Some(code)` once the monitor has reaped the child
type ExitState = Option<Option<i32>>;

/// One tracked run. Clones share the exit watch and the stop flag.
#[derive(Clone)]
struct ProjectRun {
    project: String,
    run_id: Uuid,
    pid: Option<u32>,
    command: String,
    started_at: DateTime<Utc>,
    exited: watch::Receiver<ExitState>,
    stop_requested: Arc<AtomicBool>,
}

impl ProjectRun {
    fn has_exited(&self) -> bool {
        self.exited.borrow().is_some()
    }

    /// Resolves once the monitor reports exit, or the monitor is gone.
    async fn wait_exit(&self) {
        let mut rx = self.exited.clone();
        let _ = rx.wait_for(|state| state.is_some()).await;
    }

    fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            project: self.project.clone(),
            run_id: self.run_id,
            pid: self.pid,
            command: self.command.clone(),
            started_at: self.started_at,
        }
    }
}

enum StopKind {
    AlreadyExited,
    Graceful,
    Forced,
}

struct Inner {
    runs: Mutex<HashMap<String, ProjectRun>>,
    last_exits: Mutex<HashMap<String, RunExit>>,
    // Serializes start/stop/shutdown. Never taken by monitors or listings.
    operations: tokio::sync::Mutex<()>,
    grace_period: Duration,
    policy: DuplicatePolicy,
    process_config: ProcessConfig,
    exits: broadcast::Sender<RunExit>,
}

impl Inner {
    fn runs(&self) -> MutexGuard<'_, HashMap<String, ProjectRun>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current(&self, project: &str) -> Option<ProjectRun> {
        self.runs().get(project).cloned()
    }

    /// Remove the entry for `project` if it still belongs to `run_id`.
    fn forget(&self, project: &str, run_id: Uuid) -> bool {
        let mut runs = self.runs();
        if runs.get(project).map(|r| r.run_id) == Some(run_id) {
            runs.remove(project);
            true
        } else {
            false
        }
    }

    fn record_exit(&self, exit: RunExit) {
        self.last_exits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(exit.project.clone(), exit.clone());
        // No subscribers is fine.
        let _ = self.exits.send(exit);
    }

    async fn stop_run(&self, run: &ProjectRun) -> Result<StopKind> {
        if run.has_exited() {
            self.forget(&run.project, run.run_id);
            return Ok(StopKind::AlreadyExited);
        }

        let Some(pid) = run.pid else {
            // Reaped before its pid could be read; only the monitor is left.
            run.wait_exit().await;
            self.forget(&run.project, run.run_id);
            return Ok(StopKind::AlreadyExited);
        };

        run.stop_requested.store(true, Ordering::SeqCst);
        if let Err(e) = terminate_gracefully(pid) {
            run.stop_requested.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let kind = match tokio::time::timeout(self.grace_period, run.wait_exit()).await {
            Ok(()) => {
                info!(project = %run.project, pid, "Process terminated gracefully");
                StopKind::Graceful
            }
            Err(_) => {
                warn!(
                    project = %run.project,
                    pid,
                    grace_secs = self.grace_period.as_secs_f64(),
                    "Process ignored termination request, killing"
                );
                force_kill(pid)?;
                if tokio::time::timeout(KILL_CONFIRM_TIMEOUT, run.wait_exit())
                    .await
                    .is_err()
                {
                    warn!(project = %run.project, pid, "Exit not observed after kill");
                }
                StopKind::Forced
            }
        };

        self.forget(&run.project, run.run_id);
        Ok(kind)
    }

    /// Track a run with no monitor behind it. The returned sender stands in
    /// for the monitor's exit report.
    #[cfg(test)]
    fn track(&self, project: &str, pid: u32) -> (ProjectRun, watch::Sender<ExitState>) {
        let (exit_tx, exit_rx) = watch::channel(None);
        let run = ProjectRun {
            project: project.to_string(),
            run_id: Uuid::new_v4(),
            pid: Some(pid),
            command: "sleep 30".to_string(),
            started_at: Utc::now(),
            exited: exit_rx,
            stop_requested: Arc::new(AtomicBool::new(false)),
        };
        self.runs().insert(project.to_string(), run.clone());
        (run, exit_tx)
    }
}

/// Owns at most one live process per project name.
///
/// Cheap to clone; clones share the same tracking map. Separate supervisors
/// never see each other's runs.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::default()
    }

    /// Launch `command` for `project`, replacing (or, under the reject
    /// policy, refusing to replace) a run that is already tracked.
    pub async fn start(&self, project: &str, command: &str) -> StartOutcome {
        if command.trim().is_empty() {
            return StartOutcome::failed(format!(
                "No launch command configured for project {}",
                project
            ));
        }

        let _operation = self.inner.operations.lock().await;

        if let Some(existing) = self.inner.current(project) {
            if self.inner.policy == DuplicatePolicy::Reject && !existing.has_exited() {
                info!(project, "Rejecting start, project already running");
                return StartOutcome::failed(format!("Project {} is already running", project));
            }

            info!(project, run_id = %existing.run_id, "Stopping previous run before restart");
            if let Err(e) = self.inner.stop_run(&existing).await {
                error!(project, error = %e, "Failed to stop previous run");
                return StartOutcome::failed(format!(
                    "Could not stop the running instance of project {}: {}",
                    project, e
                ));
            }
        }

        let mut child = match shell_command(command, &self.inner.process_config).spawn() {
            Ok(child) => child,
            Err(e) => {
                let e = RelayError::Launch(e.to_string());
                error!(project, command, error = %e, "Failed to launch project");
                return StartOutcome::failed(format!("Failed to start project {}: {}", project, e));
            }
        };

        let (exit_tx, exit_rx) = watch::channel(None);
        let run = ProjectRun {
            project: project.to_string(),
            run_id: Uuid::new_v4(),
            pid: child.id(),
            command: command.to_string(),
            started_at: Utc::now(),
            exited: exit_rx,
            stop_requested: Arc::new(AtomicBool::new(false)),
        };

        let tail = output::shared_tail();
        let readers = [
            child
                .stdout
                .take()
                .map(|s| output::spawn_reader(project.to_string(), s, tail.clone())),
            child
                .stderr
                .take()
                .map(|s| output::spawn_reader(project.to_string(), s, tail.clone())),
        ];

        self.inner.runs().insert(project.to_string(), run.clone());
        info!(project, run_id = %run.run_id, pid = ?run.pid, command, "Started project");

        self.spawn_monitor(run.clone(), child, exit_tx, tail, readers);

        match run.pid {
            Some(pid) => StartOutcome::started(format!("Started project {} (pid {})", project, pid)),
            None => StartOutcome::started(format!("Started project {}", project)),
        }
    }

    /// Terminate the tracked run for `project`, killing it after the grace
    /// period. Stopping a project that is not running succeeds.
    pub async fn stop(&self, project: &str) -> StopOutcome {
        let _operation = self.inner.operations.lock().await;

        let Some(run) = self.inner.current(project) else {
            return StopOutcome::stopped(format!("Project {} is not running", project));
        };

        match self.inner.stop_run(&run).await {
            Ok(StopKind::Graceful) => StopOutcome::stopped(format!("Stopped project {}", project)),
            Ok(StopKind::Forced) => StopOutcome::stopped(format!(
                "Project {} did not exit within {}s and was killed",
                project,
                self.inner.grace_period.as_secs_f64()
            )),
            Ok(StopKind::AlreadyExited) => {
                StopOutcome::stopped(format!("Project {} had already exited", project))
            }
            Err(e) => {
                error!(project, error = %e, "Failed to stop project");
                StopOutcome::failed(format!("Failed to stop project {}: {}", project, e))
            }
        }
    }

    /// Names of the projects currently tracked.
    pub fn list_running(&self) -> BTreeSet<String> {
        self.inner.runs().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<RunSnapshot> {
        let mut runs: Vec<RunSnapshot> = self.inner.runs().values().map(ProjectRun::snapshot).collect();
        runs.sort_by(|a, b| a.project.cmp(&b.project));
        runs
    }

    pub fn running(&self, project: &str) -> Option<RunSnapshot> {
        self.inner.current(project).map(|r| r.snapshot())
    }

    pub fn last_exit(&self, project: &str) -> Option<RunExit> {
        self.inner
            .last_exits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(project)
            .cloned()
    }

    /// Receive a record for every run that finishes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RunExit> {
        self.inner.exits.subscribe()
    }

    /// Stop every tracked run.
    pub async fn shutdown(&self) -> Vec<(String, StopOutcome)> {
        let _operation = self.inner.operations.lock().await;

        let runs: Vec<ProjectRun> = self.inner.runs().values().cloned().collect();
        let mut outcomes = Vec::with_capacity(runs.len());
        for run in runs {
            let outcome = match self.inner.stop_run(&run).await {
                Ok(_) => StopOutcome::stopped(format!("Stopped project {}", run.project)),
                Err(e) => StopOutcome::failed(format!("Failed to stop project {}: {}", run.project, e)),
            };
            outcomes.push((run.project, outcome));
        }
        outcomes
    }

    fn spawn_monitor(
        &self,
        run: ProjectRun,
        child: Child,
        exit_tx: watch::Sender<ExitState>,
        tail: SharedTail,
        readers: [Option<tokio::task::JoinHandle<()>>; 2],
    ) {
        let inner = self.inner.clone();
        let project = run.project.clone();
        let run_id = run.run_id;

        let monitor = tokio::spawn(watch_run(inner.clone(), run, child, exit_tx, tail, readers));

        // A panicking monitor must not leave a stale entry behind.
        tokio::spawn(async move {
            if let Err(e) = monitor.await {
                error!(project = %project, run_id = %run_id, error = %e, "Monitor task failed");
                inner.forget(&project, run_id);
                inner.record_exit(RunExit {
                    project,
                    run_id,
                    exit_code: None,
                    reason: ExitReason::MonitorFailed,
                    output_tail: vec![],
                    finished_at: Utc::now(),
                });
            }
        });
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

async fn watch_run(
    inner: Arc<Inner>,
    run: ProjectRun,
    mut child: Child,
    exit_tx: watch::Sender<ExitState>,
    tail: SharedTail,
    readers: [Option<tokio::task::JoinHandle<()>>; 2],
) {
    let waited = child.wait().await;
    let exit_code = waited.as_ref().ok().and_then(|status| status.code());
    exit_tx.send_replace(Some(exit_code));

    for reader in readers.into_iter().flatten() {
        let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await;
    }

    inner.forget(&run.project, run.run_id);

    let reason = match &waited {
        Err(e) => {
            error!(project = %run.project, error = %e, "Failed waiting for process exit");
            ExitReason::MonitorFailed
        }
        Ok(_) if run.stop_requested.load(Ordering::SeqCst) => ExitReason::Stopped,
        Ok(_) => ExitReason::Exited,
    };

    match (reason, exit_code) {
        (ExitReason::Exited, Some(0)) => {
            info!(project = %run.project, run_id = %run.run_id, "Project completed successfully")
        }
        (ExitReason::Exited, code) => {
            warn!(project = %run.project, run_id = %run.run_id, exit_code = ?code, "Project completed with failure")
        }
        (ExitReason::Stopped, code) => {
            info!(project = %run.project, run_id = %run.run_id, exit_code = ?code, "Project stopped")
        }
        (ExitReason::MonitorFailed, _) => {}
    }

    inner.record_exit(RunExit {
        project: run.project,
        run_id: run.run_id,
        exit_code,
        reason,
        output_tail: output::snapshot(&tail),
        finished_at: Utc::now(),
    });
}

/// Configures a [`Supervisor`]
#[derive(Default)]
pub struct SupervisorBuilder {
    grace_period: Option<Duration>,
    policy: DuplicatePolicy,
    process_config: ProcessConfig,
}

impl SupervisorBuilder {
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = Some(grace_period);
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn process_config(mut self, config: ProcessConfig) -> Self {
        self.process_config = config;
        self
    }

    pub fn build(self) -> Supervisor {
        let (exits, _) = broadcast::channel(EXIT_CHANNEL_CAPACITY);
        Supervisor {
            inner: Arc::new(Inner {
                runs: Mutex::new(HashMap::new()),
                last_exits: Mutex::new(HashMap::new()),
                operations: tokio::sync::Mutex::new(()),
                grace_period: self.grace_period.unwrap_or(DEFAULT_GRACE_PERIOD),
                policy: self.policy,
                process_config: self.process_config,
                exits,
            }),
        }
    }
}
