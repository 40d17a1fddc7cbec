pub mod error;
pub mod filters;
pub mod model;
pub mod store;
pub mod topology;

pub use error::{ControlError, ControlResult};
pub use filters::{resolve_filters, translate_condition};
pub use model::*;
pub use store::{ConfigStore, ReadTransaction, WriteTransaction};
pub use topology::{SocketNamer, TopologyCompiler, compiled_name};
