pub mod loader;
pub mod models;
pub mod validation;

pub use loader::load_settings;
pub use models::*;
pub use validation::{SettingsValidator, ValidationError, ValidationResult};
