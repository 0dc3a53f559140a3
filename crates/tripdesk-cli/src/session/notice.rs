//! Prints a notice when the executor ends the session mid-command.

use std::time::Duration;

use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use tripdesk_core::{Executor, LogoutReason};

/// How long to wait for pending notices after the command finishes.
const FLUSH_TIMEOUT: Duration = Duration::from_millis(200);

pub struct LogoutNotice {
    handle: JoinHandle<()>,
}

impl LogoutNotice {
    /// Start listening to `executor`'s logout signal.
    pub fn spawn(executor: &Executor) -> Self {
        let mut rx = executor.subscribe_logout();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Some(message) = describe(event.reason) {
                            eprintln!(
                                "{} Session ended: {}. Run `tripdesk login` to sign in again.",
                                "!".yellow(),
                                message
                            );
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Self { handle }
    }

    /// Drain pending notices. Call after the executor has been dropped.
    pub async fn finish(self) {
        let _ = tokio::time::timeout(FLUSH_TIMEOUT, self.handle).await;
    }
}

fn describe(reason: LogoutReason) -> Option<&'static str> {
    match reason {
        // `logout` reports this itself.
        LogoutReason::SignedOut => None,
        LogoutReason::SessionExpired => Some("the session has expired"),
        LogoutReason::RefreshFailed => Some("the session could not be refreshed"),
        LogoutReason::RejectedAfterRefresh => Some("the server rejected the refreshed session"),
    }
}
