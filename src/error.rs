//! Error type shared by the gate, the dispatcher, the transport and the
//! session driver.
//!
//! Only `Configuration` and `Connection` are fatal to the process. Everything
//! raised while executing a resource command ends up as the message of a
//! failure envelope.

#[derive(Debug, thiserror::Error)]
pub(crate) enum ClientError {
    /// Required runtime configuration is missing or unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A path or environment variable lies outside the allowlist.
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("unsupported command: {resource}.{command}")]
    UnsupportedCommand { resource: String, command: String },

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The websocket could not be opened.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The websocket failed after it was opened.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl ClientError {
    pub(crate) fn configuration(message: &str) -> Self {
        Self::Configuration(message.to_string())
    }

    pub(crate) fn access_denied(message: &str) -> Self {
        Self::AccessDenied(message.to_string())
    }

    pub(crate) fn unsupported(resource: &str, command: &str) -> Self {
        Self::UnsupportedCommand {
            resource: resource.to_string(),
            command: command.to_string(),
        }
    }

    pub(crate) fn invalid_params(message: &str) -> Self {
        Self::InvalidParameters(message.to_string())
    }
}
