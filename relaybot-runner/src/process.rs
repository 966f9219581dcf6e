// Shell launch of project commands

use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Launch settings shared by every run of a supervisor
#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    pub env: Vec<(String, String)>,
    pub working_directory: Option<PathBuf>,
}

impl ProcessConfig {
    pub fn with_working_directory<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Build a platform shell invocation of `line` with both output streams piped.
///
/// On Unix the child leads its own process group so that termination signals
/// reach everything the shell spawned.
pub fn shell_command(line: &str, config: &ProcessConfig) -> Command {
    let mut command = if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(line);
        c
    };

    if let Some(dir) = &config.working_directory {
        command.current_dir(dir);
    }
    for (key, value) in &config.env {
        command.env(key, value);
    }

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

    #[cfg(unix)]
    command.process_group(0);

    command
}
