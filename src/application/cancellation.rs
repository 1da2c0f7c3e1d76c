use tokio::sync::watch;

/// Cooperative cancellation signal threaded through every suspension point
/// in a JobRunner attempt (§5): rate-limiter sleeps, gateway calls,
/// repository retries. Cancellation is a non-fatal outcome, not an error
/// surfaced to the job row.
#[derive(Clone)]
pub struct CancellationToken {
    receiver: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if *receiver.borrow() {
            return;
        }
        let _ = receiver.changed().await;
    }
}

/// Owns the cancel signal; `request()` is typically called on a
/// graceful-shutdown signal from the Scheduler.
pub struct CancellationSource {
    sender: watch::Sender<bool>,
}

impl CancellationSource {
    pub fn new() -> (Self, CancellationToken) {
        let (sender, receiver) = watch::channel(false);
        (Self { sender }, CancellationToken { receiver })
    }

    pub fn request(&self) {
        let _ = self.sender.send(true);
    }
}
