use chrono::{DateTime, Utc};
use relaybot_core::{RunExit, StartOutcome, StopOutcome};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// In-process counters served by `/metrics`
pub struct Metrics {
    started: Instant,
    booted_at: DateTime<Utc>,
    runs_started: AtomicU64,
    start_failures: AtomicU64,
    runs_stopped: AtomicU64,
    stop_failures: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    messages_relayed: AtomicU64,
    relay_failures: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct MetricsReport {
    pub version: &'static str,
    pub booted_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub running_processes: usize,
    pub runs_started: u64,
    pub start_failures: u64,
    pub runs_stopped: u64,
    pub stop_failures: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub messages_relayed: u64,
    pub relay_failures: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            booted_at: Utc::now(),
            runs_started: AtomicU64::new(0),
            start_failures: AtomicU64::new(0),
            runs_stopped: AtomicU64::new(0),
            stop_failures: AtomicU64::new(0),
            runs_succeeded: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            messages_relayed: AtomicU64::new(0),
            relay_failures: AtomicU64::new(0),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn record_start(&self, outcome: &StartOutcome) {
        bump(if outcome.started {
            &self.runs_started
        } else {
            &self.start_failures
        });
    }

    pub fn record_stop(&self, outcome: &StopOutcome) {
        bump(if outcome.stopped {
            &self.runs_stopped
        } else {
            &self.stop_failures
        });
    }

    pub fn record_exit(&self, exit: &RunExit) {
        if exit.succeeded() {
            bump(&self.runs_succeeded);
        } else if exit.reason != relaybot_core::ExitReason::Stopped {
            bump(&self.runs_failed);
        }
    }

    pub fn record_relay(&self, delivered: bool) {
        bump(if delivered {
            &self.messages_relayed
        } else {
            &self.relay_failures
        });
    }

    pub fn report(&self, running_processes: usize) -> MetricsReport {
        MetricsReport {
            version: env!("CARGO_PKG_VERSION"),
            booted_at: self.booted_at,
            uptime_secs: self.uptime_secs(),
            running_processes,
            runs_started: read(&self.runs_started),
            start_failures: read(&self.start_failures),
            runs_stopped: read(&self.runs_stopped),
            stop_failures: read(&self.stop_failures),
            runs_succeeded: read(&self.runs_succeeded),
            runs_failed: read(&self.runs_failed),
            messages_relayed: read(&self.messages_relayed),
            relay_failures: read(&self.relay_failures),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}
