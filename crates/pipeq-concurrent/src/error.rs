use std::fmt;
use thiserror::Error;

/// Returned by the blocking `pop` once the queue has been shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("queue is shutting down")]
pub struct QueueShutDown;

/// Returned by the blocking `push` once the queue has been shut down.
///
/// Carries the rejected item so ownership goes back to the caller.
#[derive(Clone, Copy, PartialEq, Eq, Error)]
#[error("queue is shutting down")]
pub struct PushShutDown<T>(pub T);

impl<T> PushShutDown<T> {
    /// Recover the item that was not enqueued.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for PushShutDown<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PushShutDown(..)")
    }
}

impl<T> From<PushShutDown<T>> for QueueShutDown {
    fn from(_: PushShutDown<T>) -> Self {
        QueueShutDown
    }
}
