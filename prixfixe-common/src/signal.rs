//! A single cancellation signal shared between the server and every session
//! task, checked at every suspension point rather than coordinated through
//! per-connection message passing.

use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}

/// Creates a fresh shutdown broadcast channel. The sender is retained by the
/// `Server`; each spawned session holds a `resubscribe()`d receiver.
#[must_use]
pub fn channel() -> (broadcast::Sender<Signal>, broadcast::Receiver<Signal>) {
    broadcast::channel(1)
}
