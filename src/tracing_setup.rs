use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging from settings.
///
/// `RUST_LOG` wins over `level` when set. `json` selects JSON lines over the
/// pretty console format.
pub fn init_tracing_with_config(level: &str, json_format: bool) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))?
        }
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json_format {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    }

    tracing::info!(
        "hactl logging initialized (level: {}, json: {})",
        level,
        json_format
    );
    Ok(())
}

/// Configure tracing for specific service components
pub fn configure_component_tracing(component: &str) -> tracing::Span {
    tracing::info_span!("component", name = component)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_rejected() {
        // RUST_LOG would take precedence over the level under test
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(init_tracing_with_config("hactl=loud", false).is_err());
        }
    }

    #[test]
    fn test_configure_component_tracing() {
        let span = configure_component_tracing("stats_streamer");
        assert_eq!(span.metadata().map(|m| m.name()), Some("component"));
    }
}
