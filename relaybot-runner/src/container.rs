//! One-shot wrappers around a container-engine CLI.
//!
//! Nothing is tracked between calls: every operation lists or pulls through
//! the engine binary and reports an [`Outcome`].

use relaybot_core::{Outcome, RelayError, Result};
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info};

const LIST_TIMEOUT: Duration = Duration::from_secs(30);
const STOP_TIMEOUT: Duration = Duration::from_secs(30);
const PULL_TIMEOUT: Duration = Duration::from_secs(300);

/// A running container as reported by `ps`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ContainerEngine {
    binary: String,
}

impl ContainerEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Pull `image`, reporting the engine's stderr on failure.
    pub async fn pull_image(&self, image: &str) -> Outcome {
        let image = image.trim();
        if image.is_empty() {
            return Outcome::failed("Image name cannot be empty");
        }

        match self.run(&["pull", image], PULL_TIMEOUT).await {
            Ok(output) if output.status.success() => {
                info!(image, "Pulled image");
                Outcome::ok(format!("Pulled image {}", image))
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                error!(image, stderr = %stderr, "Image pull failed");
                Outcome::failed(format!("Failed to pull image {}: {}", image, stderr))
            }
            Err(e) => {
                error!(image, error = %e, "Image pull failed");
                Outcome::failed(format!("Failed to pull image {}: {}", image, e))
            }
        }
    }

    /// Stop every running container whose name contains `keyword`,
    /// ignoring case.
    pub async fn stop_matching(&self, keyword: &str) -> Outcome {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Outcome::failed("Container name filter cannot be empty");
        }

        let containers = match self.list().await {
            Ok(containers) => containers,
            Err(e) => {
                error!(error = %e, "Failed to list containers");
                return Outcome::failed(format!("Could not list containers: {}", e));
            }
        };

        let mut stopped = Vec::new();
        let mut errors = Vec::new();
        for container in matching(&containers, keyword) {
            match self.run(&["stop", container.id.as_str()], STOP_TIMEOUT).await {
                Ok(output) if output.status.success() => {
                    info!(container = %container.name, "Stopped container");
                    stopped.push(container.name.clone());
                }
                Ok(output) => {
                    let msg = format!(
                        "Failed to stop {}: {}",
                        container.name,
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                    error!("{}", msg);
                    errors.push(msg);
                }
                Err(e) => {
                    let msg = format!("Failed to stop {}: {}", container.name, e);
                    error!("{}", msg);
                    errors.push(msg);
                }
            }
        }

        summarize_stop(keyword, &stopped, &errors)
    }

    pub async fn list(&self) -> Result<Vec<ContainerEntry>> {
        let output = self
            .run(&["ps", "--format", "{{.ID}} {{.Names}}"], LIST_TIMEOUT)
            .await?;
        if !output.status.success() {
            return Err(RelayError::ContainerEngine(format!(
                "{} ps exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_container_list(&String::from_utf8_lossy(&output.stdout)))
    }

    fn resolve(&self) -> Result<PathBuf> {
        which::which(&self.binary).map_err(|e| {
            RelayError::ContainerEngine(format!("{} not found in PATH: {}", self.binary, e))
        })
    }

    async fn run(&self, args: &[&str], limit: Duration) -> Result<Output> {
        let binary = self.resolve()?;
        let output = Command::new(binary)
            .args(args)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(limit, output).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(RelayError::ContainerEngine(format!(
                "{} {} timed out after {}s",
                self.binary,
                args.first().copied().unwrap_or_default(),
                limit.as_secs()
            ))),
        }
    }
}

impl Default for ContainerEngine {
    fn default() -> Self {
        Self::new("docker")
    }
}

/// Parse `ps --format "{{.ID}} {{.Names}}"` output, skipping blank and
/// malformed lines.
pub fn parse_container_list(stdout: &str) -> Vec<ContainerEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.trim().splitn(2, char::is_whitespace);
            let id = parts.next()?.trim();
            let name = parts.next()?.trim();
            if id.is_empty() || name.is_empty() {
                return None;
            }
            Some(ContainerEntry {
                id: id.to_string(),
                name: name.to_string(),
            })
        })
        .collect()
}

fn matching<'a>(
    containers: &'a [ContainerEntry],
    keyword: &str,
) -> impl Iterator<Item = &'a ContainerEntry> {
    let keyword = keyword.to_lowercase();
    containers
        .iter()
        .filter(move |c| c.name.to_lowercase().contains(&keyword))
}

/// Combine per-container results into one chat message.
pub fn summarize_stop(keyword: &str, stopped: &[String], errors: &[String]) -> Outcome {
    match (stopped.is_empty(), errors.is_empty()) {
        (true, true) => Outcome::ok(format!("No running container matches '{}'", keyword)),
        (false, true) => Outcome::ok(format!("Stopped containers: {}", stopped.join(", "))),
        (false, false) => Outcome::ok(format!(
            "Stopped containers: {}\n{}",
            stopped.join(", "),
            errors.join("\n")
        )),
        (true, false) => Outcome::failed(errors.join("\n")),
    }
}
