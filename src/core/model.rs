//! Data model for the proxy configuration.
//!
//! These types serialize to the persisted JSON snapshot and are handed
//! verbatim to the configuration template, so field names use the
//! camelCase wire names of the snapshot format.
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::{
    error::{ControlError, ControlResult},
    filters::validate_filter,
};

/// Names are written verbatim into the rendered config and runtime commands
static PROXY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_.:\-]+$").expect("valid regex"));

pub fn is_valid_name(name: &str) -> bool {
    PROXY_NAME.is_match(name)
}

/// Reject names outside `[a-zA-Z0-9_.:-]`.
pub fn validate_name(kind: &str, name: &str) -> ControlResult<()> {
    if is_valid_name(name) {
        return Ok(());
    }
    Err(ControlError::bad_request(format!(
        "{kind} name '{name}' must be non-empty and contain only letters, digits, '_', '.', ':' or '-'"
    )))
}

/// Reject values that would split a config line or a runtime command.
pub fn validate_token(kind: &str, value: &str) -> ControlResult<()> {
    if value.contains(|c: char| c.is_whitespace() || c.is_control() || c == ';') {
        return Err(ControlError::bad_request(format!(
            "{kind} '{}' must not contain whitespace, control characters or ';'",
            value.escape_debug()
        )));
    }
    Ok(())
}

fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_max_conn() -> u32 {
    1000
}

fn default_check_interval() -> u32 {
    10
}

/// Proxy mode of a frontend or backend
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Http,
    Tcp,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Http => write!(f, "http"),
            Mode::Tcp => write!(f, "tcp"),
        }
    }
}

/// Optional proxy flags rendered as `option ...` lines
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ProxyOptions {
    pub abort_on_close: bool,
    pub all_backups: bool,
    pub check_cache: bool,
    pub forward_for: bool,
    pub http_close: bool,
    pub http_check: bool,
    pub ssl_hello_check: bool,
    pub tcp_keep_alive: bool,
    pub tcp_log: bool,
    pub tcp_smart_accept: bool,
    pub tcp_smart_connect: bool,
}

/// Connection rate limiting for a frontend
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Quota {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<u32>,
}

impl Quota {
    pub fn validate(&self) -> ControlResult<()> {
        for time in [&self.sample_time, &self.expiry_time].into_iter().flatten() {
            validate_token("quota time", time)?;
        }
        Ok(())
    }
}

/// A named condition routing matching traffic to a destination backend
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Filter {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub destination: String,
}

impl Filter {
    pub fn new(
        name: impl Into<String>,
        condition: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            condition: condition.into(),
            destination: destination.into(),
        }
    }
}

/// A listening endpoint of the proxy
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Frontend {
    pub name: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub bind_port: Option<u16>,
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unix_sock: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sock_protocol: Option<String>,
    #[serde(default)]
    pub options: ProxyOptions,
    pub default_backend: String,
    #[serde(default, alias = "acls")]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub http_quota: Quota,
    #[serde(default)]
    pub tcp_quota: Quota,
}

impl Frontend {
    /// Frontend bound to an IP and port on all interfaces
    pub fn bound_to_port(
        name: impl Into<String>,
        mode: Mode,
        port: u16,
        default_backend: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            mode,
            bind_port: Some(port),
            bind_ip: default_bind_ip(),
            unix_sock: None,
            sock_protocol: None,
            options: ProxyOptions::default(),
            default_backend: default_backend.into(),
            filters: Vec::new(),
            http_quota: Quota::default(),
            tcp_quota: Quota::default(),
        }
    }

    /// Frontend listening on a local socket, accepting the PROXY protocol
    pub fn bound_to_socket(
        name: impl Into<String>,
        mode: Mode,
        socket: impl Into<String>,
        default_backend: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            mode,
            bind_port: None,
            bind_ip: default_bind_ip(),
            unix_sock: Some(socket.into()),
            sock_protocol: Some("accept-proxy".to_string()),
            options: ProxyOptions::default(),
            default_backend: default_backend.into(),
            filters: Vec::new(),
            http_quota: Quota::default(),
            tcp_quota: Quota::default(),
        }
    }

    pub fn validate(&self) -> ControlResult<()> {
        if self.name.trim().is_empty() {
            return Err(ControlError::bad_request("frontend name is required"));
        }
        validate_name("frontend", &self.name)?;
        if self.default_backend.trim().is_empty() {
            return Err(ControlError::bad_request(format!(
                "frontend '{}' requires a default backend",
                self.name
            )));
        }
        validate_name("backend", &self.default_backend)?;
        validate_token("bind ip", &self.bind_ip)?;
        for value in [&self.unix_sock, &self.sock_protocol].into_iter().flatten() {
            validate_token("socket", value)?;
        }
        for filter in &self.filters {
            validate_filter(filter)?;
        }
        self.http_quota.validate()?;
        self.tcp_quota.validate()?;
        match (self.bind_port, &self.unix_sock) {
            (Some(_), Some(_)) => Err(ControlError::bad_request(format!(
                "frontend '{}' cannot bind both a port and a socket",
                self.name
            ))),
            (None, None) => Err(ControlError::bad_request(format!(
                "frontend '{}' requires a bind port or a socket",
                self.name
            ))),
            _ => Ok(()),
        }
    }
}

/// A member of a backend pool
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unix_sock: Option<String>,
    #[serde(default)]
    pub weight: u32,
    #[serde(default = "default_max_conn")]
    pub max_conn: u32,
    #[serde(default)]
    pub check: bool,
    #[serde(default = "default_check_interval")]
    pub check_interval: u32,
}

impl Server {
    pub fn network(name: impl Into<String>, host: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            name: name.into(),
            host: Some(host.into()),
            port: Some(port),
            unix_sock: None,
            weight,
            max_conn: default_max_conn(),
            check: false,
            check_interval: default_check_interval(),
        }
    }

    pub fn socket(name: impl Into<String>, socket: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            host: None,
            port: None,
            unix_sock: Some(socket.into()),
            weight,
            max_conn: default_max_conn(),
            check: false,
            check_interval: default_check_interval(),
        }
    }

    /// A server targets either `host:port` or a local socket, never both.
    pub fn validate(&self) -> ControlResult<()> {
        if self.name.trim().is_empty() {
            return Err(ControlError::bad_request("server name is required"));
        }
        validate_name("server", &self.name)?;
        for value in [&self.host, &self.unix_sock].into_iter().flatten() {
            validate_token("server address", value)?;
        }
        let has_network = self.host.as_deref().is_some_and(|h| !h.is_empty()) && self.port.is_some();
        let has_socket = self.unix_sock.as_deref().is_some_and(|s| !s.is_empty());
        match (has_network, has_socket) {
            (true, false) | (false, true) => Ok(()),
            (true, true) => Err(ControlError::bad_request(format!(
                "server '{}' cannot target both host:port and a socket",
                self.name
            ))),
            (false, false) => Err(ControlError::bad_request(format!(
                "server '{}' requires host and port, or a socket",
                self.name
            ))),
        }
    }
}

/// A named pool of servers
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub name: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub servers: Vec<Server>,
    #[serde(default)]
    pub options: ProxyOptions,
    /// Marks backends that only fan traffic out over local sockets
    #[serde(default)]
    pub proxy_mode: bool,
}

impl Backend {
    pub fn new(name: impl Into<String>, mode: Mode, proxy_mode: bool, servers: Vec<Server>) -> Self {
        Self {
            name: name.into(),
            mode,
            servers,
            options: ProxyOptions::default(),
            proxy_mode,
        }
    }

    pub fn validate(&self) -> ControlResult<()> {
        if self.name.trim().is_empty() {
            return Err(ControlError::bad_request("backend name is required"));
        }
        validate_name("backend", &self.name)?;
        for (i, server) in self.servers.iter().enumerate() {
            server.validate()?;
            if self.servers[..i].iter().any(|s| s.name == server.name) {
                return Err(ControlError::bad_request(format!(
                    "backend '{}' lists server '{}' twice",
                    self.name, server.name
                )));
            }
        }
        Ok(())
    }
}

/// A logical endpoint of a service, compiled into a backend server
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServiceServer {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl ServiceServer {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }
}

/// A weighted slice of a route's traffic, e.g. one deployed version
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub servers: Vec<ServiceServer>,
}

impl Service {
    pub fn new(name: impl Into<String>, weight: u32, servers: Vec<ServiceServer>) -> Self {
        Self {
            name: name.into(),
            weight,
            servers,
        }
    }
}

/// The user-facing routing unit
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub name: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub protocol: Mode,
    #[serde(default)]
    pub http_quota: Quota,
    #[serde(default)]
    pub tcp_quota: Quota,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default, alias = "groups")]
    pub services: Vec<Service>,
}

impl Route {
    pub fn new(name: impl Into<String>, port: u16, protocol: Mode, services: Vec<Service>) -> Self {
        Self {
            name: name.into(),
            port,
            protocol,
            http_quota: Quota::default(),
            tcp_quota: Quota::default(),
            filters: Vec::new(),
            services,
        }
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// The complete configuration graph.
///
/// Collections keep insertion order so rendering is stable; names are
/// unique within each collection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub frontends: Vec<Frontend>,
    #[serde(default)]
    pub backends: Vec<Backend>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_requires_exactly_one_address() {
        assert!(Server::network("a", "10.0.0.1", 80, 100).validate().is_ok());
        assert!(Server::socket("b", "/tmp/b.sock", 100).validate().is_ok());

        let mut both = Server::network("c", "10.0.0.1", 80, 100);
        both.unix_sock = Some("/tmp/c.sock".to_string());
        assert!(matches!(both.validate(), Err(ControlError::BadRequest(_))));

        let mut neither = Server::network("d", "10.0.0.1", 80, 100);
        neither.host = None;
        assert!(matches!(neither.validate(), Err(ControlError::BadRequest(_))));
    }

    #[test]
    fn test_frontend_bind_validation() {
        let fe = Frontend::bound_to_port("web", Mode::Http, 8080, "web");
        assert!(fe.validate().is_ok());

        let mut both = fe.clone();
        both.unix_sock = Some("/tmp/web.sock".to_string());
        assert!(both.validate().is_err());

        let mut no_backend = fe;
        no_backend.default_backend.clear();
        assert!(no_backend.validate().is_err());
    }

    #[test]
    fn test_names_cannot_break_rendered_config() {
        let mut fe = Frontend::bound_to_port("web", Mode::Http, 8080, "web");
        fe.name = "web\n  bind :9999".to_string();
        assert!(matches!(fe.validate(), Err(ControlError::BadRequest(_))));

        let mut fe = Frontend::bound_to_port("web", Mode::Http, 8080, "web");
        fe.default_backend = "web;x".to_string();
        assert!(fe.validate().is_err());

        let mut fe = Frontend::bound_to_port("web", Mode::Http, 8080, "web");
        fe.filters.push(Filter::new("f", "path_beg /a\nuse_backend x", "web"));
        assert!(fe.validate().is_err());

        assert!(Backend::new("web 2", Mode::Http, false, vec![]).validate().is_err());
        assert!(Server::network("s 1", "10.0.0.1", 80, 100).validate().is_err());
        assert!(Server::network("s1", "10.0.0.1 check", 80, 100).validate().is_err());
        assert!(Server::socket("s1", "/tmp/a.sock\n", 100).validate().is_err());

        assert!(Backend::new("shop.v1", Mode::Http, false, vec![]).validate().is_ok());
        assert!(is_valid_name("test_be_1:a-b"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn test_route_accepts_groups_alias() {
        let json = r#"{
            "name": "web",
            "port": 8080,
            "protocol": "http",
            "groups": [
                { "name": "v1", "weight": 100, "servers": [{ "name": "s1", "host": "10.0.0.1", "port": 80 }] }
            ]
        }"#;
        let route: Route = serde_json::from_str(json).unwrap();
        assert_eq!(route.services.len(), 1);
        assert_eq!(route.services[0].servers[0].port, 80);
    }

    #[test]
    fn test_frontend_wire_names() {
        let fe = Frontend::bound_to_socket("web.v1", Mode::Tcp, "/tmp/x.sock", "web.v1");
        let value = serde_json::to_value(&fe).unwrap();
        assert_eq!(value["defaultBackend"], "web.v1");
        assert_eq!(value["unixSock"], "/tmp/x.sock");
        assert_eq!(value["sockProtocol"], "accept-proxy");
        assert_eq!(value["mode"], "tcp");
    }
}
