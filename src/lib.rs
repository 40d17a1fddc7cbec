//! hactl - a control plane for HAProxy.
//!
//! hactl keeps a declarative model of the proxy's frontends, backends and
//! servers, compiles higher-level *routes* (an external port split across
//! weighted *services*) into those primitives, renders the model into the
//! proxy's configuration file and drives the live process: seamless reloads,
//! runtime weight changes and a polled statistics stream.
//!
//! # Architecture
//! The crate follows a hexagonal layout. `core` holds the model, the
//! transactional [`ConfigStore`](core::ConfigStore) and the route compiler
//! and does no I/O. `ports` declares the traits the core needs from the
//! outside world, `adapters` implements them (control socket, renderer,
//! reload, management API) and [`ControlPlane`] wires everything together.
//!
//! # Quick Example
//! ```no_run
//! use hactl::core::{ConfigStore, Config, Mode, Route, Service, ServiceServer, SocketNamer};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let store = ConfigStore::new(Config::default(), SocketNamer::new("/var/lib/hactl/sockets"));
//! let mut txn = store.write().await;
//! txn.topology().add_route(Route::new(
//!     "shop",
//!     8080,
//!     Mode::Http,
//!     vec![Service::new("v1", 100, vec![ServiceServer::new("a", "10.0.0.1", 80)])],
//! ))?;
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Domain operations return [`ControlResult`](core::ControlResult); the
//! binary and settings loader use `eyre::Result` with context attached.
pub mod config;
pub mod control_plane;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{ProxyRuntime, ReloadOrchestrator, Renderer, UnixControlSocket},
    control_plane::ControlPlane,
    core::{ConfigStore, ControlError, ControlResult, SocketNamer},
    metrics::StatsStreamer,
    utils::{GracefulShutdown, WorkDir},
};
