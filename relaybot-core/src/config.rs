//! Environment driven configuration.
//!
//! Values come from the process environment (after loading an optional `.env`
//! file), optionally overlaid with a TOML projects file named by
//! `RELAY_PROJECTS_FILE`.

use crate::{DuplicatePolicy, RelayError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_PROJECTS: &[&str] = &["mlm", "vkyc", "edpadmin", "edpdob"];
pub const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api";
pub const DEFAULT_CONTAINER_ENGINE: &str = "docker";
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Slack credentials; present only when a token is configured
#[derive(Debug, Clone, PartialEq)]
pub struct SlackConfig {
    pub token: String,
    pub channel: Option<String>,
    pub api_url: String,
}

/// Per-project settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub report_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectsFile {
    #[serde(default)]
    projects: HashMap<String, ProjectConfig>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub slack: Option<SlackConfig>,
    /// Allow-list of project names, lower-cased, in configured order
    pub supported_projects: Vec<String>,
    pub projects: HashMap<String, ProjectConfig>,
    pub default_report_url: Option<String>,
    pub container_engine: String,
    pub stop_grace: Duration,
    pub duplicate_policy: DuplicatePolicy,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            slack: None,
            supported_projects: DEFAULT_PROJECTS.iter().map(|p| p.to_string()).collect(),
            projects: HashMap::new(),
            default_report_url: None,
            container_engine: DEFAULT_CONTAINER_ENGINE.to_string(),
            stop_grace: DEFAULT_STOP_GRACE,
            duplicate_policy: DuplicatePolicy::Replace,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Load `.env`, read the environment, merge the projects file and validate.
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            info!(path = %path.display(), "Loaded environment file");
        }

        let mut config = Self::from_vars(std::env::vars())?;
        if let Ok(path) = std::env::var("RELAY_PROJECTS_FILE") {
            config.merge_projects_file(&path)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from `KEY=value` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        let get = |key: &str| vars.get(key).map(|v| v.trim().to_string());

        let mut errors = Vec::new();
        let mut config = Config::default();

        if let Some(host) = get("RELAY_HOST") {
            config.host = host;
        }
        if let Some(port) = get("PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => errors.push(format!("PORT must be a port number, got '{}'", port)),
            }
        }

        if let Some(token) = get("TOKEN_SLACK") {
            config.slack = Some(SlackConfig {
                token,
                channel: get("GROUP_ID_SLACK"),
                api_url: get("SLACK_API_URL")
                    .unwrap_or_else(|| DEFAULT_SLACK_API_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
            });
        }

        if let Some(list) = get("SUPPORTED_PROJECTS") {
            config.supported_projects = parse_project_list(&list);
        }

        for (key, value) in &vars {
            if let Some(name) = key
                .strip_prefix("RUN_")
                .and_then(|rest| rest.strip_suffix("_CMD"))
            {
                config.project_mut(&project_from_env_key(name)).command = Some(value.trim().to_string());
            } else if let Some(name) = key.strip_prefix("REPORT_URL_") {
                config.project_mut(&project_from_env_key(name)).report_url = Some(value.trim().to_string());
            }
        }
        config.default_report_url = get("DEFAULT_URL_REPORT").map(|u| u.trim_end_matches('/').to_string());

        if let Some(engine) = get("CONTAINER_ENGINE") {
            config.container_engine = engine;
        }
        if let Some(secs) = get("STOP_GRACE_SECS") {
            match secs.parse::<u64>() {
                Ok(secs) => config.stop_grace = Duration::from_secs(secs),
                Err(_) => errors.push(format!("STOP_GRACE_SECS must be a whole number, got '{}'", secs)),
            }
        }
        if let Some(policy) = get("DUPLICATE_START") {
            match policy.parse() {
                Ok(policy) => config.duplicate_policy = policy,
                Err(e) => errors.push(e),
            }
        }
        if let Some(level) = get("LOG_LEVEL") {
            config.log_level = level.to_ascii_lowercase();
        }

        if errors.is_empty() {
            Ok(config)
        } else {
            Err(RelayError::Config(errors.join("\n")))
        }
    }

    /// Overlay project settings from a TOML file of `[projects.<name>]` tables.
    pub fn merge_projects_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("Failed to read projects file {}: {}", path.display(), e))
        })?;
        self.merge_projects_toml(&content)?;
        info!(path = %path.display(), "Merged projects file");
        Ok(())
    }

    pub fn merge_projects_toml(&mut self, content: &str) -> Result<()> {
        let file: ProjectsFile = toml::from_str(content)
            .map_err(|e| RelayError::Config(format!("Invalid projects file: {}", e)))?;

        for (name, overlay) in file.projects {
            let entry = self.project_mut(&normalize_project(&name));
            if overlay.command.is_some() {
                entry.command = overlay.command;
            }
            if overlay.report_url.is_some() {
                entry.report_url = overlay.report_url;
            }
        }
        Ok(())
    }

    /// Check cross-field rules, reporting every problem at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if let Some(slack) = &self.slack {
            if slack.channel.is_none() {
                errors.push("GROUP_ID_SLACK is required when TOKEN_SLACK is set".to_string());
            }
        }
        if self.supported_projects.is_empty() {
            errors.push("SUPPORTED_PROJECTS must name at least one project".to_string());
        }
        if self.stop_grace.is_zero() {
            errors.push("STOP_GRACE_SECS must be greater than zero".to_string());
        }

        let mut unknown: Vec<&String> = self
            .projects
            .keys()
            .filter(|name| !self.is_supported(name))
            .collect();
        unknown.sort();
        for name in unknown {
            errors.push(format!("Project '{}' is configured but not in SUPPORTED_PROJECTS", name));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RelayError::Config(errors.join("\n")))
        }
    }

    pub fn is_supported(&self, project: &str) -> bool {
        self.supported_projects.iter().any(|p| p == project)
    }

    pub fn command_for(&self, project: &str) -> Option<&str> {
        self.projects
            .get(project)
            .and_then(|p| p.command.as_deref())
            .filter(|c| !c.trim().is_empty())
    }

    /// Explicit report link, falling back to `<DEFAULT_URL_REPORT>/<project>/`.
    pub fn report_url_for(&self, project: &str) -> Option<String> {
        self.projects
            .get(project)
            .and_then(|p| p.report_url.clone())
            .or_else(|| {
                self.default_report_url
                    .as_ref()
                    .map(|base| format!("{}/{}/", base, project))
            })
    }

    /// Validate a raw slash-command argument and return the normalized name.
    pub fn validate_project(&self, raw: &str) -> std::result::Result<String, String> {
        let project = normalize_project(raw);
        if project.is_empty() {
            return Err("Project name cannot be empty".to_string());
        }
        if !self.is_supported(&project) {
            return Err(format!(
                "Project '{}' not supported. Supported: {}",
                project,
                self.supported_projects.join(", ")
            ));
        }
        Ok(project)
    }

    fn project_mut(&mut self, name: &str) -> &mut ProjectConfig {
        self.projects.entry(name.to_string()).or_default()
    }
}

pub fn normalize_project(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn parse_project_list(list: &str) -> Vec<String> {
    let mut projects: Vec<String> = Vec::new();
    for name in list.split(',').map(normalize_project).filter(|p| !p.is_empty()) {
        if !projects.contains(&name) {
            projects.push(name);
        }
    }
    projects
}

fn project_from_env_key(key: &str) -> String {
    key.to_lowercase().replace('_', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(vec![]).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.supported_projects, vec!["mlm", "vkyc", "edpadmin", "edpdob"]);
        assert_eq!(config.stop_grace, Duration::from_secs(5));
        assert_eq!(config.container_engine, "docker");
        assert!(config.slack.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_project_commands_from_env() {
        let config = Config::from_vars(vars(&[
            ("SUPPORTED_PROJECTS", "MLM, vkyc,,mlm"),
            ("RUN_MLM_CMD", "./run_mlm.sh"),
            ("RUN_VKYC_CMD", "   "),
            ("REPORT_URL_MLM", "http://reports/mlm/summary.html"),
            ("DEFAULT_URL_REPORT", "http://reports/"),
        ]))
        .unwrap();

        assert_eq!(config.supported_projects, vec!["mlm", "vkyc"]);
        assert_eq!(config.command_for("mlm"), Some("./run_mlm.sh"));
        assert_eq!(config.command_for("vkyc"), None);
        assert_eq!(
            config.report_url_for("mlm").as_deref(),
            Some("http://reports/mlm/summary.html")
        );
        assert_eq!(config.report_url_for("vkyc").as_deref(), Some("http://reports/vkyc/"));
    }

    #[test]
    fn test_invalid_values_are_collected() {
        let err = Config::from_vars(vars(&[
            ("PORT", "http"),
            ("STOP_GRACE_SECS", "soon"),
            ("DUPLICATE_START", "ignore"),
        ]))
        .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("PORT"));
        assert!(msg.contains("STOP_GRACE_SECS"));
        assert!(msg.contains("duplicate start policy"));
    }

    #[test]
    fn test_validate_reports_all_problems() {
        let config = Config::from_vars(vars(&[
            ("TOKEN_SLACK", "xoxb-test"),
            ("STOP_GRACE_SECS", "0"),
            ("SUPPORTED_PROJECTS", "mlm"),
            ("RUN_OTHER_CMD", "echo hi"),
        ]))
        .unwrap();

        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("GROUP_ID_SLACK"));
        assert!(msg.contains("STOP_GRACE_SECS"));
        assert!(msg.contains("'other'"));
    }

    #[test]
    fn test_slack_config() {
        let config = Config::from_vars(vars(&[
            ("TOKEN_SLACK", "xoxb-test"),
            ("GROUP_ID_SLACK", "C123"),
            ("SLACK_API_URL", "http://localhost:9999/api/"),
        ]))
        .unwrap();

        let slack = config.slack.unwrap();
        assert_eq!(slack.token, "xoxb-test");
        assert_eq!(slack.channel.as_deref(), Some("C123"));
        assert_eq!(slack.api_url, "http://localhost:9999/api");
    }

    #[test]
    fn test_merge_projects_toml_overrides_env() {
        let mut config = Config::from_vars(vars(&[("RUN_MLM_CMD", "old.sh")])).unwrap();
        config
            .merge_projects_toml(
                r#"
[projects.mlm]
command = "new.sh"

[projects.vkyc]
report_url = "http://reports/vkyc"
"#,
            )
            .unwrap();

        assert_eq!(config.command_for("mlm"), Some("new.sh"));
        assert_eq!(config.report_url_for("vkyc").as_deref(), Some("http://reports/vkyc"));
        assert!(config.merge_projects_toml("projects = 3").is_err());
    }

    #[test]
    fn test_validate_project() {
        let config = Config::default();
        assert_eq!(config.validate_project("  MLM "), Ok("mlm".to_string()));
        assert_eq!(
            config.validate_project(""),
            Err("Project name cannot be empty".to_string())
        );
        let err = config.validate_project("foo").unwrap_err();
        assert_eq!(
            err,
            "Project 'foo' not supported. Supported: mlm, vkyc, edpadmin, edpdob"
        );
    }
}
