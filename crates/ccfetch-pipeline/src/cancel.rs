//! Run-wide cancellation signal.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable cancellation handle backed by a `watch` channel.
///
/// Cancelling is sticky: once set it stays set for every clone and every
/// receiver obtained through [`CancelToken::subscribe`].
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Receiver that observes the flag; handed to fetchers.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.subscribe();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
