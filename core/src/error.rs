use thiserror::Error;

/// Ember error types
#[derive(Error, Debug)]
pub enum EmberError {
    /// Malformed or missing input to document assembly
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The external network-state normalization step failed
    #[error("network state error: {0}")]
    NetworkState(String),

    /// The underlying base image file is missing or cannot be stat'ed
    #[error("base image not available")]
    BaseImageUnavailable(#[source] std::io::Error),

    /// Unknown exposed name or network-state source
    #[error("'{0}' not found")]
    NotFound(String),

    /// The stream-composition capability failed
    #[error("image composition failed: {0}")]
    Composition(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EmberError {
    fn from(err: serde_json::Error) -> Self {
        EmberError::Serialization(err.to_string())
    }
}

impl EmberError {
    /// True for errors that indicate bad input to document assembly
    /// (both builder validation and network-state normalization).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EmberError::Configuration(_) | EmberError::NetworkState(_)
        )
    }
}

/// Result type alias for ember operations
pub type Result<T> = std::result::Result<T, EmberError>;
