use thiserror::Error;

use qce_bridge::BridgeError;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// The RPC did not answer within the configured deadline.
    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    /// Cooperative cancellation observed. The fetcher maps this to a clean
    /// end-of-iteration, never to a failed task.
    #[error("canceled")]
    Canceled,
}

impl From<FetchError> for qce_core::QceError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Bridge(b) => b.into(),
            FetchError::Timeout { ms } => {
                qce_core::QceError::UpstreamTransient(format!("timeout after {ms}ms"))
            }
            FetchError::Canceled => qce_core::QceError::Canceled,
        }
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
