use thiserror::Error;

/// Classified failures from the bridge RPC layer.
///
/// The classification is what drives retry policy upstream: only
/// `TransientNetwork` and `RateLimited` are worth another attempt.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Rate limited (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl BridgeError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::TransientNetwork(_) | BridgeError::RateLimited { .. }
        )
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BridgeError::Protocol(e.to_string())
        } else {
            BridgeError::TransientNetwork(e.to_string())
        }
    }
}

impl From<BridgeError> for qce_core::QceError {
    fn from(e: BridgeError) -> Self {
        if e.is_retryable() {
            qce_core::QceError::UpstreamTransient(e.to_string())
        } else {
            qce_core::QceError::UpstreamFatal(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
