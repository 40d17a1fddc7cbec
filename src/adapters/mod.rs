pub mod http_api;
pub mod reload;
pub mod renderer;
pub mod runtime;
pub mod unix_control;

/// Re-export commonly used types from adapters
pub use http_api::router;
pub use reload::{PidFileStatus, ReloadOrchestrator};
pub use renderer::Renderer;
pub use runtime::{ProxyInfo, ProxyRuntime, StatsEntry, StatsKind};
pub use unix_control::UnixControlSocket;
