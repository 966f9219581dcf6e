// Chat-facing text

use relaybot_core::{Config, ExitReason, RunExit};
use std::collections::BTreeSet;

/// Slack rejects longer `text` fields.
pub const MAX_CHAT_MESSAGE_CHARS: usize = 4000;
const TRUNCATION_MARKER: &str = "\n... (truncated)";

pub fn help_text(config: &Config) -> String {
    format!(
        "*Relay bot commands*\n\
         • `/run <project>` - start a project's test run\n\
         • `/stop <project>` - stop a project's run and its containers\n\
         • `/report <project>` - link to the latest report\n\
         • `/deploy <image>` - pull a container image\n\
         • `/help` - show this message\n\
         Supported projects: {}",
        config.supported_projects.join(", ")
    )
}

pub fn running_summary(running: &BTreeSet<String>) -> String {
    if running.is_empty() {
        "No project is running".to_string()
    } else {
        let names: Vec<&str> = running.iter().map(String::as_str).collect();
        format!("Running projects: {}", names.join(", "))
    }
}

pub fn report_message(project: &str, url: Option<&str>) -> String {
    match url {
        Some(url) => format!("Latest report for {}: {}", project.to_uppercase(), url),
        None => format!("No report link configured for project {}", project),
    }
}

/// Chat line announcing a finished run; stopped runs were already answered
/// by the stop command.
pub fn exit_announcement(exit: &RunExit) -> Option<String> {
    let mut message = match (exit.reason, exit.exit_code) {
        (ExitReason::Stopped, _) => return None,
        (ExitReason::MonitorFailed, _) => {
            format!("Lost track of project {}; its final status is unknown", exit.project)
        }
        (ExitReason::Exited, Some(0)) => {
            return Some(format!("Project {} finished successfully", exit.project))
        }
        (ExitReason::Exited, Some(code)) => {
            format!("Project {} finished with exit code {}", exit.project, code)
        }
        (ExitReason::Exited, None) => {
            format!("Project {} was terminated by a signal", exit.project)
        }
    };

    if !exit.output_tail.is_empty() {
        message.push_str("\n```\n");
        message.push_str(&exit.output_tail.join("\n"));
        message.push_str("\n```");
    }
    Some(message)
}

pub fn truncate_for_chat(text: &str) -> String {
    if text.chars().count() <= MAX_CHAT_MESSAGE_CHARS {
        return text.to_string();
    }
    let keep = MAX_CHAT_MESSAGE_CHARS - TRUNCATION_MARKER.chars().count();
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn exit(reason: ExitReason, exit_code: Option<i32>, tail: &[&str]) -> RunExit {
        RunExit {
            project: "mlm".to_string(),
            run_id: Default::default(),
            exit_code,
            reason,
            output_tail: tail.iter().map(|l| l.to_string()).collect(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_exit_announcement() {
        assert_eq!(
            exit_announcement(&exit(ExitReason::Exited, Some(0), &["ok"])).as_deref(),
            Some("Project mlm finished successfully")
        );
        assert_eq!(
            exit_announcement(&exit(ExitReason::Exited, Some(2), &["boom", "bang"])).as_deref(),
            Some("Project mlm finished with exit code 2\n```\nboom\nbang\n```")
        );
        assert!(exit_announcement(&exit(ExitReason::Stopped, None, &[])).is_none());
        assert!(exit_announcement(&exit(ExitReason::MonitorFailed, None, &[]))
            .unwrap()
            .contains("Lost track"));
    }

    #[test]
    fn test_running_summary() {
        assert_eq!(running_summary(&BTreeSet::new()), "No project is running");
        let running = BTreeSet::from(["vkyc".to_string(), "mlm".to_string()]);
        assert_eq!(running_summary(&running), "Running projects: mlm, vkyc");
    }

    #[test]
    fn test_truncate_for_chat() {
        assert_eq!(truncate_for_chat("short"), "short");

        let long = "é".repeat(MAX_CHAT_MESSAGE_CHARS + 10);
        let truncated = truncate_for_chat(&long);
        assert_eq!(truncated.chars().count(), MAX_CHAT_MESSAGE_CHARS);
        assert!(truncated.ends_with("(truncated)"));
    }

    #[test]
    fn test_help_lists_projects() {
        let help = help_text(&Config::default());
        assert!(help.contains("/run <project>"));
        assert!(help.contains("mlm, vkyc, edpadmin, edpdob"));
    }
}
