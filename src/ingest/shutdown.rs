//! Cooperative cancellation.

use tokio::sync::watch;

/// Cloneable cancellation handle.
///
/// [`Shutdown::child`] creates a scope that is cancelled together with its
/// parent but can also be cancelled alone, leaving the parent untouched.
#[derive(Clone, Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancelled (immediately if already cancelled)
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // An Err means every sender is gone, which can't happen while we hold one
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Derived scope that follows this one's cancellation.
    ///
    /// The forwarding task ends when the parent fires or when every handle
    /// to the child has been dropped.
    pub fn child(&self) -> Shutdown {
        let child = Shutdown::new();
        if self.is_cancelled() {
            child.cancel();
            return child;
        }

        let parent = self.clone();
        let tx = child.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => {
                    tx.send_replace(true);
                }
                _ = tx.closed() => {}
            }
        });

        child
    }
}
