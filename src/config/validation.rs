use std::net::SocketAddr;

use crate::{config::models::Settings, core::topology::MAX_SOCKET_PATH_LENGTH};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Settings validator
pub struct SettingsValidator;

impl SettingsValidator {
    /// Validate all settings, reporting every problem at once
    pub fn validate(settings: &Settings) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&settings.listen_addr) {
            errors.push(e);
        }

        if settings.proxy.binary.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "proxy.binary".to_string(),
            });
        }

        let durations = [
            ("proxy.control_timeout", &settings.proxy.control_timeout),
            ("stats.poll_interval", &settings.stats.poll_interval),
            ("stats.heartbeat_interval", &settings.stats.heartbeat_interval),
            ("api.write_lock_timeout", &settings.api.write_lock_timeout),
        ];
        for (field, value) in durations {
            if let Err(e) = Self::validate_duration(field, value) {
                errors.push(e);
            }
        }

        let control_socket = settings.control_socket();
        if control_socket.as_os_str().len() > MAX_SOCKET_PATH_LENGTH {
            errors.push(ValidationError::InvalidField {
                field: "proxy.control_socket".to_string(),
                message: format!(
                    "'{}' exceeds {} bytes",
                    control_socket.display(),
                    MAX_SOCKET_PATH_LENGTH
                ),
            });
        }

        if settings.stats.subscriber_buffer == 0 {
            errors.push(ValidationError::InvalidField {
                field: "stats.subscriber_buffer".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:10001')".to_string(),
            });
        }
        Ok(())
    }

    fn validate_duration(field: &str, value: &str) -> ValidationResult<()> {
        match humantime::parse_duration(value) {
            Ok(d) if d.is_zero() => Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: "must be greater than zero".to_string(),
            }),
            Ok(_) => Ok(()),
            Err(e) => Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("'{value}' is not a duration: {e}"),
            }),
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }
        let mut message = format!("{} problems found:", errors.len());
        for (i, e) in errors.iter().enumerate() {
            message.push_str(&format!("\n  {}. {}", i + 1, e));
        }
        message
    }
}
