use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shared cancellation flag for one run. Cloning shares the flag.
///
/// Every suspension point of the pipeline goes through [`Cancel::sleep`] or
/// [`Cancel::run`] so a timeout or an operator interrupt takes effect at the
/// next await instead of after a long wait.
#[derive(Debug, Clone)]
pub struct Cancel {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Cancel {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancel {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is set.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleep for `duration`. Returns false if cancelled first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }
        tokio::select! {
            _ = self.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Drive `fut` to completion unless cancelled first.
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        if self.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Cancel automatically once `timeout` elapses.
    pub fn cancel_after(&self, timeout: Duration) -> JoinHandle<()> {
        let cancel = self.clone();
        tokio::spawn(async move {
            if cancel.sleep(timeout).await {
                tracing::warn!(timeout_secs = timeout.as_secs(), "Session timeout reached, cancelling");
                cancel.cancel();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_completes_when_not_cancelled() {
        let cancel = Cancel::new();
        assert!(cancel.sleep(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn cancel_wakes_long_sleep() {
        let cancel = Cancel::new();
        let other = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            other.cancel();
        });

        let completed = cancel.sleep(Duration::from_secs(600)).await;
        assert!(!completed);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn run_returns_none_once_cancelled() {
        let cancel = Cancel::new();
        assert_eq!(cancel.run(async { 7 }).await, Some(7));

        cancel.cancel();
        assert_eq!(cancel.run(async { 7 }).await, None);
    }

    #[tokio::test]
    async fn cancel_after_fires_on_timeout() {
        let cancel = Cancel::new();
        let handle = cancel.cancel_after(Duration::from_millis(5));
        handle.await.unwrap();
        assert!(cancel.is_cancelled());
    }
}
