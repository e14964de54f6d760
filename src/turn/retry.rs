//! Bounded retry of whole turn attempts.

use std::time::Duration;

use tracing::warn;

use crate::error::RelayError;

/// Retry budget for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Pause before re-opening the stream.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::ZERO,
        }
    }
}

/// Where a turn stands after an attempt finishes.
#[derive(Debug)]
pub enum AttemptState {
    /// Run attempt `n` (1-based).
    Attempting(u32),
    Done,
    /// Stop and surface the error.
    Fatal(RelayError),
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Transition after attempt `attempt` failed with `error`.
    ///
    /// Only truncated tool-call arguments are retried. Everything else,
    /// cancellation included, is fatal as-is.
    pub fn on_failure(&self, attempt: u32, error: RelayError) -> AttemptState {
        if !error.is_incomplete_arguments() {
            return AttemptState::Fatal(error);
        }
        warn!(
            attempt,
            max_attempts = self.max_attempts,
            error = %error,
            "model returned incomplete tool-call arguments"
        );
        if attempt < self.max_attempts {
            AttemptState::Attempting(attempt + 1)
        } else {
            AttemptState::Fatal(RelayError::IncompleteResponse { attempts: attempt })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArgumentsError;

    fn incomplete() -> RelayError {
        let err = serde_json::from_str::<serde_json::Value>(r#"{"a": "#)
            .expect_err("fixture should not parse");
        ArgumentsError::from_json(0, "add", &err).into()
    }

    #[test]
    fn incomplete_arguments_retry_until_budget_is_spent() {
        let policy = RetryPolicy::default();
        assert!(matches!(policy.on_failure(1, incomplete()), AttemptState::Attempting(2)));
        assert!(matches!(policy.on_failure(2, incomplete()), AttemptState::Attempting(3)));
        assert!(matches!(
            policy.on_failure(3, incomplete()),
            AttemptState::Fatal(RelayError::IncompleteResponse { attempts: 3 })
        ));
    }

    #[test]
    fn other_errors_are_fatal_immediately() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.on_failure(1, RelayError::Canceled),
            AttemptState::Fatal(RelayError::Canceled)
        ));
        assert!(matches!(
            policy.on_failure(1, RelayError::Stream("reset".into())),
            AttemptState::Fatal(RelayError::Stream(_))
        ));
    }

    #[test]
    fn single_attempt_policy_never_retries() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.max_attempts, 1);
        assert!(matches!(
            policy.on_failure(1, incomplete()),
            AttemptState::Fatal(RelayError::IncompleteResponse { attempts: 1 })
        ));
    }
}
