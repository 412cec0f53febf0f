use thiserror::Error;

use qce_bridge::BridgeError;

/// Download failure classifications. The short form of each lands in
/// `ResourceInfo.last_error`, so it is part of the observable surface.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("circuit-open")]
    CircuitOpen,

    /// The bridge reported success but returned no usable path.
    #[error("empty-path")]
    EmptyPath,

    /// A file materialised but with zero bytes.
    #[error("empty-file")]
    EmptyFile,

    /// The bridge claimed a path that does not exist on disk.
    #[error("not-at-expected-location")]
    NotAtExpectedLocation,

    #[error("timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("hash mismatch: expected {expected}")]
    HashMismatch { expected: String },

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResourceError {
    /// Short classification string recorded on the resource.
    pub fn classify(&self) -> String {
        match self {
            ResourceError::CircuitOpen => "circuit-open".to_string(),
            ResourceError::EmptyPath => "empty-path".to_string(),
            ResourceError::EmptyFile => "empty-file".to_string(),
            ResourceError::NotAtExpectedLocation => "not-at-expected-location".to_string(),
            ResourceError::Timeout { ms } => format!("timeout after {ms}ms"),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ResourceError>;
