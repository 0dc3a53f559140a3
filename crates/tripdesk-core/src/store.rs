//! Process-wide credential store.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::credential::{Credential, SessionStatus};
use crate::error::StorageError;
use crate::traits::CredentialStorage;

/// Fixed key the credential is persisted under.
pub const CREDENTIAL_KEY: &str = "tripdesk.session";

/// Single owner of the current [`Credential`].
///
/// Reads are synchronous snapshots. Writes replace the whole credential,
/// persist it, and notify every [`SessionWatcher`]. Each write that changes
/// the state bumps a generation counter that [`set_if_generation`] checks,
/// so a refresh that raced a logout cannot resurrect the session.
///
/// Cheap to clone; clones share the same state.
///
/// [`set_if_generation`]: CredentialStore::set_if_generation
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    storage: Box<dyn CredentialStorage>,
    state: watch::Sender<Option<Credential>>,
    /// Serializes writes and holds the current generation.
    generation: Mutex<u64>,
}

impl CredentialStore {
    /// Build a store, loading any persisted credential from `storage`.
    ///
    /// Unreadable or structurally corrupt payloads are treated as absent.
    pub fn init(storage: impl CredentialStorage + 'static) -> Self {
        let credential = match storage.load() {
            Ok(Some(payload)) => decode(&payload),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted credential, starting signed out");
                None
            }
        };

        debug!(present = credential.is_some(), "Credential store initialized");

        let (state, _) = watch::channel(credential);
        Self {
            inner: Arc::new(StoreInner {
                storage: Box::new(storage),
                state,
                generation: Mutex::new(0),
            }),
        }
    }

    /// Snapshot of the current credential.
    pub fn get(&self) -> Option<Credential> {
        self.inner.state.borrow().clone()
    }

    /// Current write generation.
    pub fn generation(&self) -> u64 {
        *self.lock()
    }

    /// Session status right now.
    pub fn status(&self) -> SessionStatus {
        self.status_at(Utc::now())
    }

    /// Session status at `now`.
    pub fn status_at(&self, now: DateTime<Utc>) -> SessionStatus {
        SessionStatus::of(self.inner.state.borrow().as_ref(), now)
    }

    /// Replace the credential and persist it.
    ///
    /// The in-memory credential is replaced even when persisting fails; the
    /// error only reports that the session will not survive a restart.
    pub fn set(&self, credential: Credential) -> Result<(), StorageError> {
        let mut generation = self.lock();
        self.replace(&mut generation, credential)
    }

    /// Like [`set`](Self::set), but only if no write happened since
    /// `expected` was read. Returns whether the credential was stored.
    pub fn set_if_generation(
        &self,
        credential: Credential,
        expected: u64,
    ) -> Result<bool, StorageError> {
        let mut generation = self.lock();
        if *generation != expected {
            debug!(
                expected,
                current = *generation,
                "Dropping stale credential write"
            );
            return Ok(false);
        }
        self.replace(&mut generation, credential)?;
        Ok(true)
    }

    /// Remove the credential from memory and durable storage.
    ///
    /// Idempotent. Returns whether a credential was actually removed.
    pub fn clear(&self) -> Result<bool, StorageError> {
        let mut generation = self.lock();
        let removed = self
            .inner
            .state
            .send_if_modified(|credential| credential.take().is_some());
        if removed {
            *generation += 1;
            debug!(generation = *generation, "Credential cleared");
        }
        self.inner.storage.remove()?;
        Ok(removed)
    }

    /// Watch the session for changes.
    pub fn subscribe(&self) -> SessionWatcher {
        SessionWatcher {
            rx: self.inner.state.subscribe(),
        }
    }

    fn replace(&self, generation: &mut u64, credential: Credential) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&credential)?;
        self.inner.state.send_replace(Some(credential));
        *generation += 1;
        debug!(generation = *generation, "Credential stored");
        self.inner.storage.save(&payload)
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        // The guarded value is a plain counter; poisoning cannot leave it torn.
        self.inner.generation.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("status", &self.status())
            .field("generation", &self.generation())
            .finish()
    }
}

fn decode(payload: &str) -> Option<Credential> {
    match serde_json::from_str::<Credential>(payload) {
        Ok(credential) if credential.is_well_formed() => Some(credential),
        Ok(_) => {
            warn!("Persisted credential has empty tokens, ignoring it");
            None
        }
        Err(e) => {
            warn!(error = %e, "Persisted credential is corrupt, ignoring it");
            None
        }
    }
}

/// Read-only view of the session for listeners such as navigation guards.
#[derive(Debug, Clone)]
pub struct SessionWatcher {
    rx: watch::Receiver<Option<Credential>>,
}

impl SessionWatcher {
    /// Session status right now.
    pub fn status(&self) -> SessionStatus {
        SessionStatus::of(self.rx.borrow().as_ref(), Utc::now())
    }

    /// Snapshot of the credential as last observed.
    pub fn credential(&self) -> Option<Credential> {
        self.rx.borrow().clone()
    }

    /// Wait for the next credential write and return the new status.
    ///
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<SessionStatus> {
        self.rx.changed().await.ok()?;
        let credential = self.rx.borrow_and_update().clone();
        Some(SessionStatus::of(credential.as_ref(), Utc::now()))
    }
}
