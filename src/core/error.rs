use thiserror::Error;

/// Errors produced by the control plane.
///
/// Every operation on the configuration store, the topology compiler, the
/// renderer, the reload orchestrator and the runtime channel reports one of
/// these kinds. The management API translates them with [`ControlError::status_code`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ControlError {
    /// The named entity does not exist
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// Duplicate name, or a delete blocked by a live reference
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed input or failed validation
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The proxy control socket could not be reached
    #[error("Proxy runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Template or file I/O failure while rendering or persisting
    #[error("Render failure: {0}")]
    RenderFailure(String),

    /// The proxy process could not be (re)started
    #[error("Reload failure: {0}")]
    ReloadFailure(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for control plane operations
pub type ControlResult<T> = Result<T, ControlError>;

impl ControlError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// HTTP status used by the management API for this error kind.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Conflict(_) => 409,
            Self::BadRequest(_) => 400,
            Self::RuntimeUnavailable(_) => 503,
            Self::RenderFailure(_) | Self::ReloadFailure(_) | Self::Internal(_) => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
