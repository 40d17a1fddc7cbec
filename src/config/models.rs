//! Application settings for hactl.
//!
//! These types map to TOML (also JSON / YAML) settings files and to
//! `HACTL__...` environment variables. Every field has a default so an empty
//! or missing file yields a working setup.
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Top-level settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    /// Address of the management API
    pub listen_addr: String,
    /// Directory holding rendered files, snapshots and service sockets
    pub work_dir: PathBuf,
    pub proxy: ProxySettings,
    pub stats: StatsSettings,
    pub api: ApiSettings,
    pub logging: LoggingSettings,
}

/// How to drive the managed proxy process
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProxySettings {
    /// Proxy executable, looked up on `PATH` when not absolute
    pub binary: String,
    /// Configuration template, relative to the process working directory
    pub template_path: PathBuf,
    /// Rendered proxy configuration, relative to `work_dir`
    pub config_file: PathBuf,
    /// JSON snapshot of the configuration store, relative to `work_dir`
    pub snapshot_file: PathBuf,
    /// PID-tracking file, relative to `work_dir`
    pub pid_file: PathBuf,
    /// Runtime control socket, relative to `work_dir`
    pub control_socket: PathBuf,
    /// Per-command timeout on the control socket (e.g. "2s")
    pub control_timeout: String,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            binary: "haproxy".to_string(),
            template_path: PathBuf::from("resources/haproxy.cfg.j2"),
            config_file: PathBuf::from("haproxy.cfg"),
            snapshot_file: PathBuf::from("haproxy.json"),
            pid_file: PathBuf::from("haproxy.pid"),
            control_socket: PathBuf::from("haproxy.sock"),
            control_timeout: "2s".to_string(),
        }
    }
}

impl ProxySettings {
    pub fn control_timeout(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.control_timeout)
    }
}

/// Stats polling and streaming
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StatsSettings {
    pub enabled: bool,
    pub poll_interval: String,
    /// How often the emitted-metrics counter is logged and reset
    pub heartbeat_interval: String,
    /// Undelivered metrics kept per subscriber before dropping
    pub subscriber_buffer: usize,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: "1s".to_string(),
            heartbeat_interval: "60s".to_string(),
            subscriber_buffer: 1024,
        }
    }
}

impl StatsSettings {
    pub fn poll_interval(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.poll_interval)
    }

    pub fn heartbeat_interval(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.heartbeat_interval)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ApiSettings {
    /// Deadline for acquiring the configuration write lock
    pub write_lock_timeout: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            write_lock_timeout: "10s".to_string(),
        }
    }
}

impl ApiSettings {
    pub fn write_lock_timeout(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.write_lock_timeout)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:10001".to_string(),
            work_dir: PathBuf::from(".hactl"),
            proxy: ProxySettings::default(),
            stats: StatsSettings::default(),
            api: ApiSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    /// Control socket path; `work_dir` applies unless the path is absolute.
    pub fn control_socket(&self) -> PathBuf {
        self.work_dir.join(&self.proxy.control_socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.listen_addr, "0.0.0.0:10001");
        assert_eq!(settings.control_socket(), PathBuf::from(".hactl/haproxy.sock"));
        assert_eq!(
            settings.proxy.control_timeout().unwrap(),
            Duration::from_secs(2)
        );
        assert_eq!(
            settings.stats.heartbeat_interval().unwrap(),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_absolute_paths_kept() {
        let mut settings = Settings::default();
        settings.proxy.control_socket = PathBuf::from("/run/haproxy/admin.sock");
        assert_eq!(
            settings.control_socket(),
            PathBuf::from("/run/haproxy/admin.sock")
        );
    }
}
