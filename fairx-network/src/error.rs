use std::time::Duration;
use thiserror::Error;

/// transport level failures
///
/// These are usually wrapped in an [`anyhow::Error`] with some context,
/// use [`Error::find`] to retrieve them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot connect to {address} after {attempts} attempt(s)")]
    Connection { address: String, attempts: u32 },

    #[error("{0}")]
    Protocol(String),

    #[error("Incomplete file transfer: {transferred}/{expected} bytes")]
    Transfer { expected: u64, transferred: u64 },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Remote(String),
}

impl Error {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// look for a transport error in the chain of `error`
    pub fn find(error: &anyhow::Error) -> Option<&Self> {
        error
            .downcast_ref::<Self>()
            .or_else(|| error.chain().find_map(|cause| cause.downcast_ref::<Self>()))
    }
}
