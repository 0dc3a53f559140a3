//! Logout signal observed by the navigation layer.

use tokio::sync::broadcast;
use tracing::info;

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// The user signed out.
    SignedOut,
    /// Both tokens had expired before the request was sent.
    SessionExpired,
    /// The refresh mutation failed.
    RefreshFailed,
    /// The request was still rejected after a successful refresh.
    RejectedAfterRefresh,
}

/// Emitted once each time a session is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogoutEvent {
    pub reason: LogoutReason,
}

/// Broadcast channel for [`LogoutEvent`]s.
#[derive(Debug, Clone)]
pub struct LogoutSignal {
    tx: broadcast::Sender<LogoutEvent>,
}

impl LogoutSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Subscribe to logout events.
    pub fn subscribe(&self) -> broadcast::Receiver<LogoutEvent> {
        self.tx.subscribe()
    }

    /// Emit a logout event. Silently drops if no subscribers.
    pub fn emit(&self, reason: LogoutReason) {
        info!(?reason, "Session ended");
        let _ = self.tx.send(LogoutEvent { reason });
    }
}

impl Default for LogoutSignal {
    fn default() -> Self {
        Self::new()
    }
}
