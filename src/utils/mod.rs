pub mod graceful_shutdown;
pub mod wire;
pub mod workdir;

pub use graceful_shutdown::{GracefulShutdown, ShutdownReason, ShutdownToken};
pub use workdir::WorkDir;
