//! Proxy process lifecycle: pid file bookkeeping and graceful reloads.
use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::core::error::{ControlError, ControlResult};

/// Outcome of [`ReloadOrchestrator::set_pid`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidFileStatus {
    /// No pid file existed, this is a first boot
    Created,
    /// A pid file was left by an earlier run
    Existing,
}

/// Starts the proxy, handing listening sockets over from the previous process
#[derive(Debug, Clone)]
pub struct ReloadOrchestrator {
    binary: PathBuf,
    config_file: PathBuf,
    pid_file: PathBuf,
}

impl ReloadOrchestrator {
    pub fn new(
        binary: impl Into<PathBuf>,
        config_file: impl Into<PathBuf>,
        pid_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            binary: binary.into(),
            config_file: config_file.into(),
            pid_file: pid_file.into(),
        }
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Create an empty pid file unless one is already present.
    pub async fn set_pid(&self) -> ControlResult<PidFileStatus> {
        if tokio::fs::try_exists(&self.pid_file).await.unwrap_or(false) {
            tracing::debug!("Pid file {} already present", self.pid_file.display());
            return Ok(PidFileStatus::Existing);
        }
        tokio::fs::write(&self.pid_file, b"").await.map_err(|e| {
            ControlError::ReloadFailure(format!(
                "cannot create pid file {}: {e}",
                self.pid_file.display()
            ))
        })?;
        tracing::info!("Created pid file {}", self.pid_file.display());
        Ok(PidFileStatus::Created)
    }

    /// Arguments for the proxy binary, with a takeover flag when old pids are given.
    pub fn command_args(&self, old_pids: &[u32]) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            self.config_file.display().to_string(),
            "-p".to_string(),
            self.pid_file.display().to_string(),
            "-D".to_string(),
        ];
        if !old_pids.is_empty() {
            args.push("-sf".to_string());
            args.extend(old_pids.iter().map(u32::to_string));
        }
        args
    }

    /// Pids recorded in the pid file that still belong to a live process.
    pub async fn running_pids(&self) -> ControlResult<Vec<u32>> {
        let raw = match tokio::fs::read_to_string(&self.pid_file).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ControlError::ReloadFailure(format!(
                    "cannot read pid file {}: {e}",
                    self.pid_file.display()
                )));
            }
        };

        let mut pids = Vec::new();
        for token in raw.split_whitespace() {
            match token.parse::<u32>() {
                Ok(pid) if is_running(pid) => pids.push(pid),
                Ok(pid) => tracing::warn!("Ignoring stale pid {} in {}", pid, self.pid_file.display()),
                Err(_) => tracing::warn!(
                    "Ignoring malformed pid '{}' in {}",
                    token,
                    self.pid_file.display()
                ),
            }
        }
        Ok(pids)
    }

    /// Start a new proxy process on the current config file.
    ///
    /// Blocks until the binary exits (it daemonizes with `-D`); a spawn error
    /// or a non-zero exit status is a [`ControlError::ReloadFailure`].
    pub async fn reload(&self) -> ControlResult<()> {
        let old_pids = self.running_pids().await?;
        let args = self.command_args(&old_pids);
        tracing::info!(
            "Reloading proxy: {} {}",
            self.binary.display(),
            args.join(" ")
        );

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                ControlError::ReloadFailure(format!(
                    "cannot start {}: {e}",
                    self.binary.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ControlError::ReloadFailure(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr.trim()
            )));
        }

        if old_pids.is_empty() {
            tracing::info!("Proxy started");
        } else {
            tracing::info!("Proxy reloaded, taking over from {:?}", old_pids);
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn is_running(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn is_running(pid: u32) -> bool {
    pid > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator(dir: &Path, binary: &str) -> ReloadOrchestrator {
        ReloadOrchestrator::new(binary, dir.join("haproxy.cfg"), dir.join("haproxy.pid"))
    }

    #[tokio::test]
    async fn test_set_pid_distinguishes_first_boot() {
        let tmp = tempfile::tempdir().unwrap();
        let reload = orchestrator(tmp.path(), "true");
        assert_eq!(reload.set_pid().await.unwrap(), PidFileStatus::Created);
        assert_eq!(reload.set_pid().await.unwrap(), PidFileStatus::Existing);
        assert!(reload.running_pids().await.unwrap().is_empty());
    }

    #[test]
    fn test_command_args() {
        let reload = ReloadOrchestrator::new("haproxy", "/w/haproxy.cfg", "/w/haproxy.pid");
        assert_eq!(
            reload.command_args(&[]),
            ["-f", "/w/haproxy.cfg", "-p", "/w/haproxy.pid", "-D"]
        );
        assert_eq!(
            reload.command_args(&[10, 11]),
            ["-f", "/w/haproxy.cfg", "-p", "/w/haproxy.pid", "-D", "-sf", "10", "11"]
        );
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_running_pids_skips_stale() {
        let tmp = tempfile::tempdir().unwrap();
        let reload = orchestrator(tmp.path(), "true");
        let me = std::process::id();
        tokio::fs::write(reload.pid_file(), format!("{me}\n4194304\nabc\n"))
            .await
            .unwrap();
        assert_eq!(reload.running_pids().await.unwrap(), [me]);
    }

    #[tokio::test]
    async fn test_reload_success() {
        let tmp = tempfile::tempdir().unwrap();
        let reload = orchestrator(tmp.path(), "true");
        reload.set_pid().await.unwrap();
        reload.reload().await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_nonzero_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let reload = orchestrator(tmp.path(), "false");
        reload.set_pid().await.unwrap();
        assert!(matches!(
            reload.reload().await,
            Err(ControlError::ReloadFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_reload_missing_binary() {
        let tmp = tempfile::tempdir().unwrap();
        let reload = orchestrator(tmp.path(), "/nonexistent/haproxy");
        assert!(matches!(
            reload.reload().await,
            Err(ControlError::ReloadFailure(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reload_passes_takeover_flag() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("fake-proxy.sh");
        let record = tmp.path().join("args.txt");
        tokio::fs::write(
            &script,
            format!("#!/bin/sh\necho \"$@\" > {}\n", record.display()),
        )
        .await
        .unwrap();
        tokio::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .await
            .unwrap();

        let reload = orchestrator(tmp.path(), script.to_str().unwrap());
        let me = std::process::id();
        tokio::fs::write(reload.pid_file(), format!("{me}\n"))
            .await
            .unwrap();
        reload.reload().await.unwrap();

        let args = tokio::fs::read_to_string(&record).await.unwrap();
        assert!(args.trim_end().ends_with(&format!("-D -sf {me}")));
    }
}
