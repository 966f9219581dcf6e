//! Process termination primitives.
//!
//! On Unix the supervised child leads its own process group, so both calls
//! signal the whole group. A group that no longer exists counts as success.

use relaybot_core::{RelayError, Result};

/// Ask a process tree to exit (SIGTERM on Unix, `taskkill /T` on Windows).
pub fn terminate_gracefully(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        signal_group(pid, nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(windows)]
    {
        // Console programs usually refuse a non-forced taskkill; the caller
        // escalates after the grace period either way.
        if let Err(e) = taskkill(pid, false) {
            tracing::debug!(pid, error = %e, "Graceful taskkill refused");
        }
        Ok(())
    }
}

/// Kill a process tree (SIGKILL on Unix, `taskkill /F /T` on Windows).
pub fn force_kill(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        signal_group(pid, nix::sys::signal::Signal::SIGKILL)
    }

    #[cfg(windows)]
    {
        taskkill(pid, true)
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| RelayError::Signal(format!("pid {} out of range", pid)))?;

    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(RelayError::Signal(format!(
            "failed to send {} to process group {}: {}",
            signal, pid, e
        ))),
    }
}

#[cfg(windows)]
fn taskkill(pid: u32, force: bool) -> Result<()> {
    let pid_arg = pid.to_string();
    let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
    if force {
        args.push("/F");
    }

    let output = std::process::Command::new("taskkill").args(&args).output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(RelayError::Signal(format!(
            "taskkill failed for pid {}: {}",
            pid,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
