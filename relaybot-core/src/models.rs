use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Result of asking the supervisor to start a project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartOutcome {
    pub started: bool,
    pub message: String,
}

impl StartOutcome {
    pub fn started(message: impl Into<String>) -> Self {
        Self {
            started: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            started: false,
            message: message.into(),
        }
    }
}

/// Result of asking the supervisor to stop a project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StopOutcome {
    pub stopped: bool,
    pub message: String,
}

impl StopOutcome {
    pub fn stopped(message: impl Into<String>) -> Self {
        Self {
            stopped: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            stopped: false,
            message: message.into(),
        }
    }
}

/// Generic outcome for one-shot operations (container pulls and stops)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Point-in-time copy of a tracked run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSnapshot {
    pub project: String,
    pub run_id: Uuid,
    pub pid: Option<u32>,
    pub command: String,
    pub started_at: DateTime<Utc>,
}

/// Why a run left the tracking map
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// The process finished on its own
    Exited,
    /// The process ended after a stop request
    Stopped,
    /// Waiting on the process failed
    MonitorFailed,
}

/// Record of a finished run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunExit {
    pub project: String,
    pub run_id: Uuid,
    pub exit_code: Option<i32>,
    pub reason: ExitReason,
    pub output_tail: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

impl RunExit {
    pub fn succeeded(&self) -> bool {
        self.reason == ExitReason::Exited && self.exit_code == Some(0)
    }
}

/// Status of a single project as reported by the API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectStatus {
    pub project: String,
    pub running: Option<RunSnapshot>,
    pub last_exit: Option<RunExit>,
}

/// What to do when a start arrives for a project that is still running
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Stop the running process, then start the new one
    #[default]
    Replace,
    /// Refuse the new start
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(DuplicatePolicy::Replace),
            "reject" => Ok(DuplicatePolicy::Reject),
            other => Err(format!(
                "unknown duplicate start policy '{}' (expected 'replace' or 'reject')",
                other
            )),
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicatePolicy::Replace => write!(f, "replace"),
            DuplicatePolicy::Reject => write!(f, "reject"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exit(reason: ExitReason, exit_code: Option<i32>) -> RunExit {
        RunExit {
            project: "mlm".to_string(),
            run_id: Uuid::new_v4(),
            exit_code,
            reason,
            output_tail: vec![],
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_run_exit_succeeded() {
        assert!(exit(ExitReason::Exited, Some(0)).succeeded());
        assert!(!exit(ExitReason::Exited, Some(2)).succeeded());
        assert!(!exit(ExitReason::Stopped, Some(0)).succeeded());
        assert!(!exit(ExitReason::MonitorFailed, None).succeeded());
    }

    #[test]
    fn test_duplicate_policy_parse() {
        assert_eq!("replace".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Replace));
        assert_eq!(" Reject ".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Reject));
        assert!("ignore".parse::<DuplicatePolicy>().is_err());
        assert_eq!(DuplicatePolicy::default(), DuplicatePolicy::Replace);
    }

    #[test]
    fn test_outcome_serializes_with_flag_and_message() {
        let value = serde_json::to_value(StopOutcome::stopped("done")).unwrap();
        assert_eq!(value["stopped"], true);
        assert_eq!(value["message"], "done");

        let value = serde_json::to_value(exit(ExitReason::MonitorFailed, None)).unwrap();
        assert_eq!(value["reason"], "monitor_failed");
    }
}
