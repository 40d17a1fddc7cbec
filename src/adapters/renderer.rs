//! Proxy configuration rendering and JSON snapshot persistence.
use std::path::{Path, PathBuf};

use minijinja::Environment;
use serde::Serialize;

use crate::core::{
    error::{ControlError, ControlResult},
    model::Config,
};

/// Snapshot loaded when no persisted one is available
const BUNDLED_EXAMPLE: &str = include_str!("../../resources/example.json");

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderContext<'a> {
    #[serde(flatten)]
    config: &'a Config,
    control_socket: &'a str,
}

/// Writes the proxy configuration file and the JSON snapshot
#[derive(Debug, Clone)]
pub struct Renderer {
    template_path: PathBuf,
    config_file: PathBuf,
    snapshot_file: PathBuf,
    control_socket: String,
}

impl Renderer {
    pub fn new(
        template_path: impl Into<PathBuf>,
        config_file: impl Into<PathBuf>,
        snapshot_file: impl Into<PathBuf>,
        control_socket: impl Into<String>,
    ) -> Self {
        Self {
            template_path: template_path.into(),
            config_file: config_file.into(),
            snapshot_file: snapshot_file.into(),
            control_socket: control_socket.into(),
        }
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn snapshot_file(&self) -> &Path {
        &self.snapshot_file
    }

    /// Render the template into the proxy configuration text.
    pub async fn render_to_string(&self, config: &Config) -> ControlResult<String> {
        let dangling = config.dangling_references();
        if !dangling.is_empty() {
            return Err(ControlError::RenderFailure(format!(
                "missing backend for {}",
                dangling.join(", ")
            )));
        }

        let template = tokio::fs::read_to_string(&self.template_path)
            .await
            .map_err(|e| {
                ControlError::RenderFailure(format!(
                    "cannot read template {}: {e}",
                    self.template_path.display()
                ))
            })?;

        let context = RenderContext {
            config,
            control_socket: &self.control_socket,
        };
        Environment::new()
            .render_str(&template, &context)
            .map_err(|e| ControlError::RenderFailure(format!("template error: {e}")))
    }

    /// Render and overwrite the proxy configuration file.
    pub async fn render(&self, config: &Config) -> ControlResult<()> {
        let text = self.render_to_string(config).await?;
        tokio::fs::write(&self.config_file, text).await.map_err(|e| {
            ControlError::RenderFailure(format!(
                "cannot write {}: {e}",
                self.config_file.display()
            ))
        })?;
        tracing::debug!("Rendered proxy configuration to {}", self.config_file.display());
        Ok(())
    }

    /// Write the JSON snapshot, replacing the previous one atomically.
    pub async fn persist(&self, config: &Config) -> ControlResult<()> {
        let json = serde_json::to_string_pretty(config)
            .map_err(|e| ControlError::RenderFailure(format!("cannot serialize snapshot: {e}")))?;

        let mut tmp = self.snapshot_file.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let io_failure = |e: std::io::Error| {
            ControlError::RenderFailure(format!(
                "cannot write snapshot {}: {e}",
                self.snapshot_file.display()
            ))
        };
        tokio::fs::write(&tmp, json).await.map_err(io_failure)?;
        tokio::fs::rename(&tmp, &self.snapshot_file)
            .await
            .map_err(io_failure)?;
        tracing::debug!("Persisted snapshot to {}", self.snapshot_file.display());
        Ok(())
    }

    /// Both steps must succeed for the change to count as durable.
    pub async fn render_and_persist(&self, config: &Config) -> ControlResult<()> {
        self.render(config).await?;
        self.persist(config).await
    }

    /// Load the snapshot this renderer persists to, or the bundled example.
    pub async fn load_or_example(&self) -> Config {
        match load_from_disk(&self.snapshot_file).await {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", self.snapshot_file.display());
                config
            }
            Err(e) => {
                tracing::warn!("{}, falling back to the bundled example configuration", e);
                bundled_example()
            }
        }
    }
}

/// Read a persisted snapshot.
pub async fn load_from_disk(path: impl AsRef<Path>) -> ControlResult<Config> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        ControlError::Internal(format!("cannot read snapshot {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        ControlError::bad_request(format!("invalid snapshot {}: {e}", path.display()))
    })
}

/// The example configuration shipped with the binary.
pub fn bundled_example() -> Config {
    serde_json::from_str(BUNDLED_EXAMPLE).unwrap_or_else(|e| {
        tracing::error!("Bundled example configuration is invalid: {}", e);
        Config::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        model::{Backend, Filter, Frontend, Mode, Route, Server, Service, ServiceServer},
        topology::{SocketNamer, TopologyCompiler},
    };

    const TEMPLATE: &str = include_str!("../../resources/haproxy.cfg.j2");

    struct Fixture {
        _dir: tempfile::TempDir,
        renderer: Renderer,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("haproxy.cfg.j2");
        tokio::fs::write(&template, TEMPLATE).await.unwrap();
        let renderer = Renderer::new(
            template,
            dir.path().join("haproxy.cfg"),
            dir.path().join("snapshot.json"),
            "/tmp/haproxy.stats.sock",
        );
        Fixture { _dir: dir, renderer }
    }

    fn compiled() -> Config {
        let mut config = Config::default();
        let sockets = SocketNamer::new("/tmp/hactl/sockets");
        let mut route = Route::new(
            "shop",
            8080,
            Mode::Http,
            vec![
                Service::new("v1", 90, vec![ServiceServer::new("a", "10.0.0.1", 80)]),
                Service::new("v2", 10, vec![ServiceServer::new("b", "10.0.0.2", 80)]),
            ],
        );
        route.filters = vec![Filter::new("android", "user-agent=Android", "v2")];
        TopologyCompiler::new(&mut config, &sockets)
            .add_route(route)
            .unwrap();
        config
    }

    #[tokio::test]
    async fn test_render_compiled_route() {
        let fx = fixture().await;
        let config = compiled();
        fx.renderer.render(&config).await.unwrap();

        let text = tokio::fs::read_to_string(fx.renderer.config_file()).await.unwrap();
        assert!(text.contains("stats socket /tmp/haproxy.stats.sock"));
        assert!(text.contains("frontend shop\n    mode http\n    bind 0.0.0.0:8080"));
        assert!(text.contains("    acl android hdr_sub(user-agent) Android"));
        assert!(text.contains("    use_backend shop.v2 if android"));
        assert!(text.contains("    default_backend shop\n"));
        assert!(text.contains("backend shop.v1"));
        assert!(text.contains("    server a 10.0.0.1:80 weight 100 maxconn 1000"));

        let socket = config.frontend("shop.v1").unwrap().unix_sock.clone().unwrap();
        assert!(text.contains(&format!("    bind unix@{socket} accept-proxy")));
        assert!(text.contains(&format!(
            "    server shop.v1 unix@{socket} send-proxy weight 90 maxconn 1000"
        )));
    }

    #[tokio::test]
    async fn test_render_truncates_previous_content() {
        let fx = fixture().await;
        tokio::fs::write(fx.renderer.config_file(), "x".repeat(100_000))
            .await
            .unwrap();
        fx.renderer.render(&Config::default()).await.unwrap();
        let text = tokio::fs::read_to_string(fx.renderer.config_file()).await.unwrap();
        assert!(!text.contains("xxx"));
    }

    #[tokio::test]
    async fn test_render_rejects_dangling_backend() {
        let fx = fixture().await;
        let mut config = Config::default();
        config
            .frontends
            .push(Frontend::bound_to_port("web", Mode::Http, 80, "missing"));
        let err = fx.renderer.render(&config).await.unwrap_err();
        assert!(matches!(err, ControlError::RenderFailure(_)));
    }

    #[tokio::test]
    async fn test_missing_template_is_render_failure() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Renderer::new(
            dir.path().join("absent.j2"),
            dir.path().join("haproxy.cfg"),
            dir.path().join("snapshot.json"),
            "/tmp/s.sock",
        );
        assert!(matches!(
            renderer.render(&Config::default()).await,
            Err(ControlError::RenderFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_persist_load_round_trip() {
        let fx = fixture().await;
        let mut config = compiled();
        config
            .add_backend(Backend::new(
                "plain",
                Mode::Tcp,
                false,
                vec![Server::network("p1", "10.9.9.9", 5432, 7)],
            ))
            .unwrap();
        config.frontends[0].http_quota.rate = Some(100);

        fx.renderer.render_and_persist(&config).await.unwrap();
        let loaded = load_from_disk(fx.renderer.snapshot_file()).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_render_and_persist_fails_when_persist_fails() {
        let fx = fixture().await;
        let renderer = Renderer::new(
            fx.renderer.template_path.clone(),
            fx.renderer.config_file.clone(),
            fx.renderer.config_file.with_file_name("no-such-dir").join("snapshot.json"),
            "/tmp/s.sock",
        );
        assert!(matches!(
            renderer.render_and_persist(&Config::default()).await,
            Err(ControlError::RenderFailure(_))
        ));
        // the render step itself went through
        assert!(renderer.config_file().exists());
    }

    #[tokio::test]
    async fn test_load_or_example_falls_back() {
        let fx = fixture().await;
        let config = fx.renderer.load_or_example().await;
        assert_eq!(config, bundled_example());
        assert!(!config.frontends.is_empty());
        assert!(config.dangling_references().is_empty());

        tokio::fs::write(fx.renderer.snapshot_file(), "{ not json")
            .await
            .unwrap();
        assert_eq!(fx.renderer.load_or_example().await, bundled_example());
    }

    #[tokio::test]
    async fn test_bundled_example_renders() {
        let fx = fixture().await;
        let text = fx.renderer.render_to_string(&bundled_example()).await.unwrap();
        assert!(text.contains("frontend test_fe_1"));
        assert!(text.contains("http-request deny if { sc_http_req_rate(0) gt 10000 }"));
        assert!(text.contains("    option httpchk"));
        assert!(text.contains("check inter 10s"));
    }
}
