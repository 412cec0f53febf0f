use thiserror::Error;

/// Workspace-wide error taxonomy.
///
/// Subsystem crates define their own error enums and convert into this type
/// at the orchestrator/gateway boundary, where the classification drives the
/// terminal task status and the error string pushed over WebSocket.
#[derive(Debug, Error)]
pub enum QceError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network-level or rate-limit failure from the bridge. Retried with
    /// backoff; escalates to `UpstreamFatal` once retries are exhausted.
    #[error("Upstream transient error: {0}")]
    UpstreamTransient(String),

    #[error("Upstream fatal error: {0}")]
    UpstreamFatal(String),

    /// A media download failed. Recorded on the resource, never fatal to the
    /// task itself.
    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("canceled")]
    Canceled,

    #[error("circuit-open")]
    CircuitOpen,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QceError {
    /// Short error code string carried in HTTP/WS error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            QceError::Validation(_) => "VALIDATION",
            QceError::UpstreamTransient(_) => "UPSTREAM_TRANSIENT",
            QceError::UpstreamFatal(_) => "UPSTREAM_FATAL",
            QceError::Resource(_) => "RESOURCE",
            QceError::Storage(_) => "STORAGE",
            QceError::NotFound { .. } => "NOT_FOUND",
            QceError::Canceled => "CANCELED",
            QceError::CircuitOpen => "CIRCUIT_OPEN",
            QceError::Serialization(_) => "SERIALIZATION",
            QceError::Io(_) => "IO",
            QceError::Internal(_) => "INTERNAL",
        }
    }

    /// True when the failure is worth another attempt against the bridge.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QceError::UpstreamTransient(_))
    }
}

pub type Result<T> = std::result::Result<T, QceError>;
