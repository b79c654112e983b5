//! Bounded hand-off between intake and the executor.

use cmdexec_core::types::DbId;
use tokio::sync::mpsc;

/// Receiving side of the dispatch queue, owned by the executor.
pub type DispatchReceiver = mpsc::Receiver<DbId>;

/// The consumer is gone, so the id was not forwarded.
#[derive(Debug, thiserror::Error)]
#[error("dispatch queue closed; command {0} was not forwarded")]
pub struct DispatchError(pub DbId);

/// Sending side of the dispatch queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<DbId>,
}

impl Dispatcher {
    /// Forward a committed command id to the executor.
    ///
    /// Waits while the queue is full; fails only when the receiver was
    /// dropped.
    pub async fn dispatch(&self, id: DbId) -> Result<(), DispatchError> {
        self.tx.send(id).await.map_err(|e| DispatchError(e.0))
    }
}

/// Create a dispatch queue holding at most `capacity` pending ids.
///
/// A capacity of zero is raised to one.
pub fn dispatch_queue(capacity: usize) -> (Dispatcher, DispatchReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Dispatcher { tx }, rx)
}
