//! Shared request budget for the remote API.
//!
//! One [`RateLimiter`] is created per run and injected into every fetch
//! worker as `Arc<RateLimiter>`. All reservations and provider updates go
//! through a single async mutex, so concurrent workers can never jointly
//! spend more than the provider reported.

use std::time::Duration;

use chrono::{DateTime, Utc};
use commitscope_core::FetchError;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Provider-reported budget snapshot.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use commitscope_fetch::ratelimit::Quota;
///
/// let quota = Quota { remaining: 4999, reset_at: Utc::now() };
/// assert_eq!(quota.remaining, 4999);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Requests left in the current window.
    pub remaining: u64,
    /// When the window resets.
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug)]
struct State {
    /// `None` until the provider has reported, or after a reset passed.
    remaining: Option<u64>,
    reset: Option<Instant>,
    reset_at: Option<DateTime<Utc>>,
}

/// Gate in front of every remote request.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use commitscope_fetch::ratelimit::RateLimiter;
///
/// # #[tokio::main]
/// # async fn main() {
/// let limiter = RateLimiter::new(10, Utc::now() + Duration::hours(1));
/// limiter.reserve(1).await.unwrap();
/// assert_eq!(limiter.snapshot().await.unwrap().remaining, 9);
/// # }
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<State>,
    notify: Notify,
    max_wait: Duration,
}

/// Longest wait for a reset unless overridden with [`RateLimiter::with_max_wait`].
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(3600);

/// Minimum pause after the provider reports an exhausted budget whose
/// reset time has already passed.
const EXHAUSTED_FLOOR: Duration = Duration::from_secs(1);

impl RateLimiter {
    /// Start from a known provider snapshot.
    pub fn new(remaining: u64, reset_at: DateTime<Utc>) -> Self {
        let mut state = State {
            remaining: None,
            reset: None,
            reset_at: None,
        };
        apply_snapshot(&mut state, remaining, reset_at);
        Self {
            state: Mutex::new(state),
            notify: Notify::new(),
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    /// Start without a snapshot: requests are granted until the provider
    /// first reports its budget.
    pub fn unknown() -> Self {
        Self {
            state: Mutex::new(State {
                remaining: None,
                reset: None,
                reset_at: None,
            }),
            notify: Notify::new(),
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    /// Longest a caller may be suspended waiting for a reset. A reset
    /// further away than this fails the reservation instead.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Wait until `cost` requests may be issued, then spend them.
    ///
    /// Returns immediately while the estimate covers `cost`. Otherwise the
    /// caller is suspended until [`update`](Self::update) reports budget or
    /// the reset instant passes. Nothing is granted before that instant.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::RateLimited`] without waiting when the reset
    /// is further away than the maximum wait.
    pub async fn reserve(&self, cost: u64) -> Result<(), FetchError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wait = {
                let mut state = self.state.lock().await;
                match state.remaining {
                    None => return Ok(()),
                    Some(remaining) if remaining >= cost => {
                        state.remaining = Some(remaining - cost);
                        return Ok(());
                    }
                    Some(remaining) => {
                        let now = Instant::now();
                        match (state.reset, state.reset_at) {
                            (Some(reset), Some(reset_at)) if reset > now => {
                                let wait = reset - now;
                                if wait > self.max_wait {
                                    warn!(
                                        %reset_at,
                                        max_wait_secs = self.max_wait.as_secs(),
                                        "rate limit resets after the maximum wait"
                                    );
                                    return Err(FetchError::RateLimited { reset_at });
                                }
                                debug!(
                                    remaining,
                                    cost,
                                    wait_ms = wait.as_millis() as u64,
                                    "rate limit budget exhausted, waiting for reset"
                                );
                                wait
                            }
                            _ => {
                                // The reset passed; the new budget is unknown
                                // until the next response reports it.
                                state.remaining = None;
                                state.reset = None;
                                return Ok(());
                            }
                        }
                    }
                }
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Replace the estimate with the provider's latest snapshot and wake
    /// suspended callers.
    pub async fn update(&self, remaining: u64, reset_at: DateTime<Utc>) {
        {
            let mut state = self.state.lock().await;
            apply_snapshot(&mut state, remaining, reset_at);
        }
        self.notify.notify_waiters();
    }

    /// Current estimate, if the provider has reported one.
    pub async fn snapshot(&self) -> Option<Quota> {
        let state = self.state.lock().await;
        match (state.remaining, state.reset_at) {
            (Some(remaining), Some(reset_at)) => Some(Quota {
                remaining,
                reset_at,
            }),
            _ => None,
        }
    }
}

fn apply_snapshot(state: &mut State, remaining: u64, reset_at: DateTime<Utc>) {
    let mut wait = (reset_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    if remaining == 0 && wait.is_zero() {
        wait = EXHAUSTED_FLOOR;
    }
    state.remaining = Some(remaining);
    state.reset = Some(Instant::now() + wait);
    state.reset_at = Some(reset_at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn in_secs(secs: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(secs)
    }

    #[tokio::test]
    async fn unknown_budget_grants_immediately() {
        let limiter = RateLimiter::unknown();
        limiter.reserve(5).await.unwrap();
        assert!(limiter.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn reserve_spends_the_estimate() {
        let limiter = RateLimiter::new(3, in_secs(3600));
        limiter.reserve(1).await.unwrap();
        limiter.reserve(2).await.unwrap();
        assert_eq!(limiter.snapshot().await.unwrap().remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_blocks_until_reset() {
        let limiter = RateLimiter::new(0, in_secs(2));
        let start = Instant::now();

        let early = tokio::time::timeout(Duration::from_millis(1500), limiter.reserve(1)).await;
        assert!(early.is_err(), "must not grant before the reset");

        limiter.reserve(1).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1900));
    }

    #[tokio::test(start_paused = true)]
    async fn update_with_budget_releases_waiters() {
        let limiter = Arc::new(RateLimiter::new(0, in_secs(600)));
        let start = Instant::now();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.reserve(1).await })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!waiter.is_finished());

        limiter.update(10, in_secs(600)).await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be released by the update")
            .unwrap()
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(600));
        assert_eq!(limiter.snapshot().await.unwrap().remaining, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_snapshot_overrides_estimate() {
        let limiter = RateLimiter::new(100, in_secs(600));
        limiter.update(0, in_secs(5)).await;
        let blocked = tokio::time::timeout(Duration::from_secs(1), limiter.reserve(1)).await;
        assert!(blocked.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_beyond_max_wait_fails_without_granting() {
        let limiter = RateLimiter::unknown().with_max_wait(Duration::from_secs(5));
        let reset_at = in_secs(600);
        limiter.update(0, reset_at).await;
        let start = Instant::now();

        let err = limiter.reserve(1).await.unwrap_err();
        assert_eq!(err, FetchError::RateLimited { reset_at });
        assert!(start.elapsed() < Duration::from_secs(1));

        // Still refused later: the provider's budget is untouched.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(limiter.reserve(1).await.is_err());
        assert_eq!(limiter.snapshot().await.unwrap().remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_within_max_wait_lasts_until_reset() {
        let limiter = RateLimiter::unknown().with_max_wait(Duration::from_secs(60));
        limiter.update(0, in_secs(40)).await;
        let start = Instant::now();

        let early = tokio::time::timeout(Duration::from_secs(35), limiter.reserve(1)).await;
        assert!(early.is_err(), "must not grant before the reset");

        limiter.reserve(1).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(39));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_with_past_reset_still_pauses() {
        let limiter = RateLimiter::unknown();
        limiter.update(0, in_secs(-30)).await;
        let start = Instant::now();
        limiter.reserve(1).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(900));
    }
}
