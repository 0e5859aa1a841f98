//! A cancellation primitive shared by every protocol's event loop.

use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast;

/// A close signal that can be cloned and shared between a protocol's event
/// loop, its application-facing handle, and its timers.
///
/// Closing transitions the owning FSM onto its teardown path: pending
/// application sends fail with [`ConnectionClosed`](CloseReason::Closed)
/// and per-operation waits fail with the same reason rather than hanging
/// forever.
#[derive(Debug, Clone)]
pub struct CloseSignal {
    reason: Arc<OnceLock<CloseReason>>,
    notify: broadcast::Sender<()>,
}

impl CloseSignal {
    /// Creates a new, unsignalled close signal.
    pub fn new() -> Self {
        let (notify, _recv) = broadcast::channel(1);
        Self {
            reason: Arc::new(OnceLock::new()),
            notify,
        }
    }

    /// Signals an application-initiated close. A no-op if already closed.
    pub fn close(&self) {
        self.close_with_reason(CloseReason::Closed);
    }

    /// Signals closure with a specific reason. A no-op if already closed.
    pub fn close_with_reason(&self, reason: CloseReason) {
        let _ = self.reason.set(reason);
        let _ = self.notify.send(());
    }

    /// The close reason, if closure has already been signalled.
    pub fn reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }

    /// Whether closure has been signalled.
    pub fn is_closed(&self) -> bool {
        self.reason().is_some()
    }

    /// Waits until closure is signalled, returning the reason.
    pub async fn closed(&self) -> CloseReason {
        let mut recv = self.notify.subscribe();
        loop {
            if let Some(reason) = self.reason() {
                return reason;
            }
            let _ = recv.recv().await;
        }
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a connection or protocol instance closed.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CloseReason {
    /// The local application called `close()`.
    Closed,
    /// The remote peer reset the connection, or a retransmission cap was
    /// exceeded.
    Reset,
}
