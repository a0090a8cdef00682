//! Retry state machine for a single remote request.
//!
//! The fetcher drives the machine explicitly:
//!
//! ```text
//! Attempt { 1 } --fail(transient)--> Wait { 1, backoff } --resume--> Attempt { 2 } ...
//!       \--fail(other) or last attempt--> GiveUp { attempts, last_error }
//! ```
//!
//! Sleeping is left to the caller so it can race the backoff against
//! cancellation.

use std::time::Duration;

use commitscope_core::{FetchConfig, FetchError};

/// Attempt budget and backoff curve.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use commitscope_fetch::retry::RetryPolicy;
///
/// let policy = RetryPolicy {
///     max_attempts: 4,
///     base_delay: Duration::from_secs(2),
///     max_delay: Duration::from_secs(5),
/// };
/// assert_eq!(policy.backoff_for(1), Duration::from_secs(2));
/// assert_eq!(policy.backoff_for(2), Duration::from_secs(4));
/// assert_eq!(policy.backoff_for(3), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up, including the first one.
    pub max_attempts: u32,
    /// Backoff after the first failure.
    pub base_delay: Duration,
    /// Upper bound for any single backoff.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Build the policy from the `[fetch]` section.
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts.max(1),
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
        }
    }

    /// `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

/// Where a request currently is in its retry lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryState {
    /// Issue attempt number `attempt` (1-based).
    Attempt {
        /// Current attempt number.
        attempt: u32,
        /// Total backoff slept so far.
        waited: Duration,
    },
    /// Sleep for `backoff`, then [`Retry::resume`].
    Wait {
        /// The attempt that just failed.
        attempt: u32,
        /// How long to sleep before the next attempt.
        backoff: Duration,
        /// Total backoff slept so far, excluding `backoff`.
        waited: Duration,
    },
    /// No further attempts.
    GiveUp {
        /// Attempts made.
        attempts: u32,
        /// Total backoff slept.
        waited: Duration,
        /// Error of the final attempt.
        last_error: FetchError,
    },
}

/// One request's retry machine.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use commitscope_core::FetchError;
/// use commitscope_fetch::retry::{Retry, RetryPolicy, RetryState};
///
/// let mut retry = Retry::new(RetryPolicy {
///     max_attempts: 2,
///     base_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(1),
/// });
///
/// retry.fail(FetchError::Transient("502".into()));
/// assert!(matches!(retry.state(), RetryState::Wait { attempt: 1, .. }));
///
/// retry.resume();
/// assert_eq!(retry.attempt(), 2);
///
/// retry.fail(FetchError::Transient("502".into()));
/// assert!(matches!(retry.state(), RetryState::GiveUp { attempts: 2, .. }));
/// ```
#[derive(Debug, Clone)]
pub struct Retry {
    policy: RetryPolicy,
    state: RetryState,
}

impl Retry {
    /// Start at the first attempt.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Attempt {
                attempt: 1,
                waited: Duration::ZERO,
            },
        }
    }

    /// Current state.
    pub fn state(&self) -> &RetryState {
        &self.state
    }

    /// The attempt in progress, or the number made once given up.
    pub fn attempt(&self) -> u32 {
        match self.state {
            RetryState::Attempt { attempt, .. } | RetryState::Wait { attempt, .. } => attempt,
            RetryState::GiveUp { attempts, .. } => attempts,
        }
    }

    /// Record a failed attempt.
    ///
    /// Retryable errors move to [`RetryState::Wait`] while attempts remain;
    /// anything else, or the last attempt, moves to [`RetryState::GiveUp`].
    /// Ignored outside [`RetryState::Attempt`].
    pub fn fail(&mut self, error: FetchError) -> &RetryState {
        if let RetryState::Attempt { attempt, waited } = self.state {
            self.state = if error.is_retryable() && attempt < self.policy.max_attempts {
                RetryState::Wait {
                    attempt,
                    backoff: self.policy.backoff_for(attempt),
                    waited,
                }
            } else {
                RetryState::GiveUp {
                    attempts: attempt,
                    waited,
                    last_error: error,
                }
            };
        }
        &self.state
    }

    /// Leave [`RetryState::Wait`] for the next attempt. Ignored in any
    /// other state.
    pub fn resume(&mut self) -> &RetryState {
        if let RetryState::Wait {
            attempt,
            backoff,
            waited,
        } = self.state
        {
            self.state = RetryState::Attempt {
                attempt: attempt + 1,
                waited: waited + backoff,
            };
        }
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        }
    }

    fn transient() -> FetchError {
        FetchError::Transient("connection reset".into())
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy(10);
        let delays: Vec<_> = (1..=5).map(|a| p.backoff_for(a).as_millis()).collect();
        assert_eq!(delays, [500, 1000, 2000, 3000, 3000]);
        assert_eq!(p.backoff_for(200), Duration::from_secs(3));
    }

    #[test]
    fn transient_failures_walk_through_wait_states() {
        let mut retry = Retry::new(policy(3));
        assert_eq!(
            retry.fail(transient()),
            &RetryState::Wait {
                attempt: 1,
                backoff: Duration::from_millis(500),
                waited: Duration::ZERO,
            }
        );
        retry.resume();
        retry.fail(transient());
        retry.resume();
        assert_eq!(
            retry.state(),
            &RetryState::Attempt {
                attempt: 3,
                waited: Duration::from_millis(1500),
            }
        );
        match retry.fail(transient()) {
            RetryState::GiveUp {
                attempts,
                waited,
                last_error,
            } => {
                assert_eq!(*attempts, 3);
                assert_eq!(*waited, Duration::from_millis(1500));
                assert_eq!(*last_error, transient());
            }
            other => panic!("expected give up, got {other:?}"),
        }
    }

    #[test]
    fn non_retryable_error_gives_up_immediately() {
        let mut retry = Retry::new(policy(5));
        let state = retry.fail(FetchError::Malformed("not json".into()));
        assert!(matches!(state, RetryState::GiveUp { attempts: 1, .. }));
    }

    #[test]
    fn single_attempt_policy_never_waits() {
        let mut retry = Retry::new(policy(1));
        assert!(matches!(
            retry.fail(transient()),
            RetryState::GiveUp { attempts: 1, .. }
        ));
    }

    #[test]
    fn out_of_order_calls_are_ignored() {
        let mut retry = Retry::new(policy(3));
        retry.resume();
        assert_eq!(retry.attempt(), 1);

        retry.fail(transient());
        retry.fail(transient());
        assert!(matches!(retry.state(), RetryState::Wait { attempt: 1, .. }));
    }
}
