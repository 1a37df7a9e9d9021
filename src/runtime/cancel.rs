use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// The cancelling side of a cancellation pair.
///
/// One source lives per server; every connection clones a [`CancelToken`]
/// from it. `cancel()` flips the shared flag and wakes every waiter, after
/// which all in-flight I/O completes with a cancelled error.
#[derive(Debug, Clone, Default)]
pub struct CancelSource {
    inner: Arc<Inner>,
}

/// The observing side: a shared flag plus a notification channel.
///
/// Awaiting operations race their I/O against [`CancelToken::cancelled`]
/// and complete with `IoErrorKind::Cancelled` when the source fires.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelSource {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// A token observing this source.
    #[inline]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            inner: self.inner.clone(),
        }
    }

    /// Cancels: sets the flag, then wakes every current and future waiter.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }
}

impl CancelToken {
    /// A token that never fires. Useful as a default before a connection
    /// is linked to its server.
    #[inline]
    pub fn unlinked() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// Resolves once the source cancels. Returns immediately if it
    /// already has.
    pub async fn cancelled(&self) {
        // Register interest before re-checking the flag so a cancel that
        // lands between the check and the await is not lost.
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let source = CancelSource::new();
        let token = source.token();

        let waiter = tokio::spawn(async move {
            token.cancelled().await;
            true
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        source.cancel();

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn already_cancelled_returns_immediately() {
        let source = CancelSource::new();
        source.cancel();

        let token = source.token();
        assert!(token.is_cancelled());
        token.cancelled().await;
    }

    #[tokio::test]
    async fn tokens_share_one_source() {
        let source = CancelSource::new();
        let a = source.token();
        let b = a.clone();

        assert!(!a.is_cancelled());
        source.cancel();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[test]
    fn unlinked_token_never_fires() {
        assert!(!CancelToken::unlinked().is_cancelled());
    }
}
