//! Bounded retry while the page's execution context is being replaced.

use orbit_common::error::ProtocolError;
use orbit_engine::config::schema::ReattachConfig;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// The page context is unavailable, typically because a navigation is in flight.
pub fn is_context_error(err: &str) -> bool {
    err.contains("Cannot find context")
        || err.contains("Execution context was destroyed")
        || err.contains("Cannot find default execution context")
}

#[derive(Debug, Clone, Copy)]
pub struct ReattachPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl From<&ReattachConfig> for ReattachPolicy {
    fn from(config: &ReattachConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_millis(config.delay_ms),
        }
    }
}

impl Default for ReattachPolicy {
    fn default() -> Self {
        Self::from(&ReattachConfig::default())
    }
}

impl ReattachPolicy {
    /// Run `operation`, retrying only on context errors. Other errors map
    /// through `on_error` immediately; exhausting the attempts yields
    /// [`ProtocolError::ContextLost`].
    pub async fn run<T, E, F, Fut>(
        &self,
        operation_name: &str,
        mut operation: F,
        on_error: impl Fn(String) -> ProtocolError,
    ) -> Result<T, ProtocolError>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let message = e.to_string();
                    if !is_context_error(&message) {
                        return Err(on_error(message));
                    }
                    tracing::debug!(
                        "{} context error (attempt {}/{}), retrying...",
                        operation_name,
                        attempt,
                        self.max_attempts
                    );
                    last_error = message;
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
        Err(ProtocolError::ContextLost {
            attempts: self.max_attempts,
            message: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn policy(max_attempts: u32) -> ReattachPolicy {
        ReattachPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_context_errors_then_succeeds() {
        let calls = Cell::new(0);
        let result = policy(5)
            .run(
                "eval",
                || {
                    calls.set(calls.get() + 1);
                    let n = calls.get();
                    async move {
                        if n < 3 {
                            Err("Execution context was destroyed.")
                        } else {
                            Ok(n)
                        }
                    }
                },
                ProtocolError::Other,
            )
            .await
            .unwrap();
        assert_eq!(result, 3);
    }

    #[tokio::test]
    async fn gives_up_with_context_lost() {
        let err = policy(2)
            .run(
                "eval",
                || async { Err::<(), _>("Cannot find context with specified id") },
                ProtocolError::Other,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ContextLost { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = Cell::new(0);
        let err = policy(5)
            .run(
                "eval",
                || {
                    calls.set(calls.get() + 1);
                    async { Err::<(), _>("'Foo.bar' wasn't found") }
                },
                ProtocolError::Other,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Other(_)));
        assert_eq!(calls.get(), 1);
    }
}
