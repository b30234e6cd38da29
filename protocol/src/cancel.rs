//! Cooperative cancellation for the lifecycle pipeline.
//!
//! Built on a `tokio::sync::watch` channel carrying a single `bool`, the same
//! shape the node's long-running loops use for shutdown. Flipping it to
//! `true` stops index polling and ends the lifecycle stream with a
//! `Cancelled` event. It cannot unsend a ledger write; nothing can.
//!
//! Dropping the [`CancelHandle`] without calling [`CancelHandle::cancel`]
//! does *not* cancel. Callers that have no abort semantics just drop it.

use tokio::sync::watch;

/// The sending half. Held by whoever can abort the operation (a request
/// handler, a UI navigation hook).
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// The observing half, cloned into every stage of the pipeline.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: Option<watch::Receiver<bool>>,
}

/// Create a connected handle/signal pair.
pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancellation { rx: Some(rx) })
}

impl Cancellation {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Non-blocking check.
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves once cancellation is requested. Never resolves for
    /// [`Cancellation::never`] or when the handle is dropped un-fired.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling.
                return std::future::pending().await;
            }
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn never_is_never_cancelled() {
        assert!(!Cancellation::never().is_cancelled());
    }

    #[test]
    fn cancel_is_visible_to_all_clones() {
        let (handle, signal) = cancellation();
        let other = signal.clone();
        assert!(!signal.is_cancelled());

        handle.cancel();
        handle.cancel();

        assert!(handle.is_cancelled());
        assert!(signal.is_cancelled());
        assert!(other.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_future_wakes_on_cancel() {
        let (handle, signal) = cancellation();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            handle.cancel();
        });

        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .expect("cancellation should fire");
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_does_not_cancel() {
        let (handle, signal) = cancellation();
        drop(handle);

        let waited = tokio::time::timeout(Duration::from_secs(1), signal.cancelled()).await;
        assert!(waited.is_err());
        assert!(!signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_resolves_immediately() {
        let (handle, signal) = cancellation();
        handle.cancel();
        drop(handle);

        tokio::time::timeout(Duration::from_millis(1), signal.cancelled())
            .await
            .expect("pre-fired cancellation resolves without waiting");
    }
}
