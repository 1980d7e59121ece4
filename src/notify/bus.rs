//! Coalescing change signal and the dispatcher task that drains it.

use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tokio::task::JoinHandle;

/// Single-slot "something changed" signal.
///
/// The buffer holds at most one pending signal and further signals are
/// dropped while it is full. Any number of deliveries arriving between two
/// reconciliation passes therefore collapse into one pass, and that pass
/// reads only the latest merged state. Consumers must not rely on seeing
/// every intermediate snapshot.
pub struct ChangeBus {
    tx: Sender<()>,
}

impl ChangeBus {
    /// Create a bus and the receiving end for its dispatcher.
    pub fn new() -> (Self, Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Signal a change without blocking.
    ///
    /// Returns `false` if the signal coalesced into one already pending or the
    /// dispatcher is gone.
    pub fn signal(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                tracing::debug!("change signal coalesced into pending pass");
                false
            }
            Err(TrySendError::Closed(())) => {
                tracing::debug!("change signal dropped, dispatcher stopped");
                false
            }
        }
    }
}

/// Spawn the dispatcher: one `pass` per received signal, run on the blocking
/// pool. The task ends once every [`ChangeBus`] sender is dropped.
pub fn spawn_dispatcher<F>(mut rx: Receiver<()>, pass: F) -> JoinHandle<()>
where
    F: Fn() + Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            let pass = pass.clone();
            if let Err(e) = tokio::task::spawn_blocking(pass).await {
                tracing::error!(error = %e, "reconciliation pass aborted");
            }
        }
        tracing::debug!("change dispatcher stopped");
    })
}
