use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::Settings;

/// Environment variable prefix, e.g. `HACTL__PROXY__BINARY`
pub const ENV_PREFIX: &str = "HACTL";

/// Load settings from an optional file layered under `HACTL__*` variables.
///
/// A missing file is not an error; defaults and the environment still apply.
pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();

    // Determine file format based on extension
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    };
    let name = path
        .to_str()
        .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?;

    let settings = Config::builder()
        .add_source(File::new(name, format).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to build settings from {}", path.display()))?;

    settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize settings from {}", path.display()))
}
