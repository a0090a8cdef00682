//! Run cancellation.
//!
//! A [`CancelHandle`] is held by the caller; every fetch worker holds a
//! cloned [`CancelToken`] and checks it before each request and while
//! sleeping.

use tokio::sync::watch;

/// Create a linked handle / token pair.
///
/// # Examples
///
/// ```
/// use commitscope_fetch::cancel::cancellation;
///
/// let (handle, token) = cancellation();
/// assert!(!token.is_cancelled());
/// handle.cancel();
/// assert!(token.is_cancelled());
/// ```
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Caller side: cancels every token created from it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Another token observing this handle.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Worker side: observes cancellation.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_, token) = cancellation();
        token
    }

    /// Returns `true` once the handle has cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the handle cancels. Never resolves if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let (handle, token) = cancellation();
        let waiter = tokio::spawn(async move { token.cancelled().await });
        tokio::task::yield_now().await;
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn never_token_does_not_resolve() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
        let result = tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(result.is_err());
    }

    #[test]
    fn subscribed_tokens_see_cancellation() {
        let (handle, first) = cancellation();
        let second = handle.token();
        handle.cancel();
        handle.cancel();
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
    }
}
