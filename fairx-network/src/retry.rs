use crate::Error;
use anyhow::Result;
use std::{future::Future, time::Duration};

/// how many times an outbound connection is attempted and how long to
/// wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// run `attempt` until it succeeds, at most `self.attempts` times
    ///
    /// The attempt number (starting at 1) is given to `attempt`. When all
    /// attempts failed the last error is returned wrapped in an
    /// [`Error::Connection`].
    pub async fn run<F, Fut, T>(&self, address: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut last_error = None;

        for number in 1..=attempts {
            match attempt(number).await {
                Ok(value) => {
                    tracing::debug!(address, attempt = number, "connected");
                    return Ok(value);
                }
                Err(error) => {
                    tracing::warn!(
                        address,
                        attempt = number,
                        max_attempts = attempts,
                        reason = %format!("{:#}", error),
                        "connection attempt failed"
                    );
                    last_error = Some(error);
                    if number < attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }

        let connection = Error::Connection {
            address: address.to_owned(),
            attempts,
        };
        Err(match last_error {
            Some(error) => error.context(connection),
            None => connection.into(),
        })
    }
}
