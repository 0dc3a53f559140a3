//! Authenticated GraphQL executor.
//!
//! Every operation goes through [`Executor::execute`]. A request rejected
//! for authorization is retried once after a silent refresh; concurrent
//! rejections share one in-flight refresh. The refresh runs on its own task
//! and finishes even if every waiter goes away, since the backend has
//! already rotated the tokens by then. When the refresh itself fails the
//! session is cleared and the logout signal fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::credential::{Credential, SessionStatus, TokenPayload};
use crate::error::{ExecutorError, RefreshError, StorageError, TransportError};
use crate::operation::{
    GraphqlResponse, Operation, REFRESH_FIELD, REFRESH_MUTATION, SIGN_IN_FIELD, SIGN_IN_MUTATION,
};
use crate::signal::{LogoutEvent, LogoutReason, LogoutSignal};
use crate::store::CredentialStore;
use crate::tokens::{AccessToken, RefreshToken};
use crate::traits::Transport;

type RefreshFuture = Shared<BoxFuture<'static, Result<Credential, RefreshError>>>;

/// Cancellation handle for one caller.
///
/// A UI surface that goes away cancels its scope; the executor then stops
/// before any refresh, retry or logout on that caller's behalf and returns
/// [`ExecutorError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CallerScope {
    cancelled: Arc<AtomicBool>,
}

impl CallerScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ExecutorError> {
        if self.is_cancelled() {
            debug!("Caller scope cancelled, abandoning request");
            Err(ExecutorError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Where a request is in its retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    /// Sent with the credential found in the store.
    First,
    /// Sent with a credential obtained by this request's one refresh.
    AfterRefresh,
}

/// Classified transport outcome.
enum Reply {
    Data(Value),
    Failed(ExecutorError),
    /// Authorization was refused. Carries the error to surface when no
    /// credential was attached.
    Rejected(ExecutorError),
}

impl Reply {
    fn classify(result: Result<GraphqlResponse, TransportError>) -> Self {
        match result {
            Err(TransportError::Unauthorized) => {
                Reply::Rejected(ExecutorError::Transport(TransportError::Unauthorized))
            }
            Err(e) => Reply::Failed(e.into()),
            Ok(response) if response.is_auth_failure() => Reply::Rejected(ExecutorError::GraphQl {
                data: response.data,
                errors: response.errors,
            }),
            Ok(response) if !response.errors.is_empty() => Reply::Failed(ExecutorError::GraphQl {
                data: response.data,
                errors: response.errors,
            }),
            Ok(response) => Reply::Data(response.data.unwrap_or(Value::Null)),
        }
    }
}

/// Executes GraphQL operations with the stored credential.
///
/// Cheap to clone; clones share the store, the logout signal and the
/// in-flight refresh.
///
/// # Example
///
/// ```no_run
/// use tripdesk_core::{CredentialStore, Executor, MemoryStorage, Operation, Transport};
///
/// # async fn example(transport: impl Transport + 'static) -> Result<(), tripdesk_core::ExecutorError> {
/// let store = CredentialStore::init(MemoryStorage::new());
/// let executor = Executor::new(transport, store);
///
/// executor.sign_in("agent@example.com", "secret").await?;
/// let data = executor
///     .execute(&Operation::new("{ proposals { id title } }"))
///     .await?;
/// println!("{data}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    transport: Box<dyn Transport>,
    store: CredentialStore,
    logout: LogoutSignal,
    refresh_slot: Mutex<Option<RefreshFuture>>,
}

impl Executor {
    pub fn new(transport: impl Transport + 'static, store: CredentialStore) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                transport: Box::new(transport),
                store,
                logout: LogoutSignal::new(),
                refresh_slot: Mutex::new(None),
            }),
        }
    }

    /// The credential store this executor reads and writes.
    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    /// Subscribe to logout events.
    pub fn subscribe_logout(&self) -> broadcast::Receiver<LogoutEvent> {
        self.inner.logout.subscribe()
    }

    /// Execute an operation and return its `data` unchanged.
    pub async fn execute(&self, operation: &Operation) -> Result<Value, ExecutorError> {
        self.execute_scoped(operation, &CallerScope::new()).await
    }

    /// Execute an operation and decode its `data` into `T`.
    pub async fn execute_as<T: DeserializeOwned>(
        &self,
        operation: &Operation,
    ) -> Result<T, ExecutorError> {
        let data = self.execute(operation).await?;
        serde_json::from_value(data).map_err(|e| TransportError::malformed(e).into())
    }

    /// Execute an operation on behalf of a caller that may go away.
    #[instrument(
        skip(self, operation, scope),
        fields(
            operation = operation.operation_name().unwrap_or("anonymous"),
            requires_auth = operation.requires_auth()
        )
    )]
    pub async fn execute_scoped(
        &self,
        operation: &Operation,
        scope: &CallerScope,
    ) -> Result<Value, ExecutorError> {
        let stored = self.inner.store.get();
        let status = SessionStatus::of(stored.as_ref(), Utc::now());
        debug!(%status, "Executing operation");

        let mut attempt = Attempt::First;
        let mut credential = match (operation.requires_auth(), status, stored) {
            (true, SessionStatus::Unauthenticated, _) => {
                return Err(ExecutorError::unauthenticated("not signed in"));
            }
            (true, SessionStatus::Terminal, Some(dead)) => {
                return Err(self.end_session(&dead.access_token, LogoutReason::SessionExpired));
            }
            (true, SessionStatus::Expired, Some(expired)) => {
                scope.check()?;
                let fresh = self.refresh_from(&expired).await?;
                scope.check()?;
                attempt = Attempt::AfterRefresh;
                Some(fresh)
            }
            // A public operation never carries a credential that can no longer be refreshed.
            (false, SessionStatus::Terminal, _) => None,
            (_, _, stored) => stored,
        };

        loop {
            let bearer = credential.as_ref().map(|c| &c.access_token);
            let result = self.inner.transport.send(operation, bearer).await;

            let rejected = match Reply::classify(result) {
                Reply::Data(data) => return Ok(data),
                Reply::Failed(err) => return Err(err),
                Reply::Rejected(err) => err,
            };

            // Without a credential there is nothing to refresh: surface the raw failure.
            let Some(sent) = credential.take() else {
                return Err(rejected);
            };
            scope.check()?;

            match attempt {
                Attempt::AfterRefresh => {
                    warn!("Request rejected again after refresh");
                    return Err(
                        self.end_session(&sent.access_token, LogoutReason::RejectedAfterRefresh)
                    );
                }
                Attempt::First if !sent.can_refresh_at(Utc::now()) => {
                    return Err(self.end_session(&sent.access_token, LogoutReason::SessionExpired));
                }
                Attempt::First => {
                    debug!("Authorization rejected, refreshing");
                    let fresh = self.refresh_from(&sent).await?;
                    scope.check()?;
                    credential = Some(fresh);
                    attempt = Attempt::AfterRefresh;
                }
            }
        }
    }

    /// Sign in and store the resulting credential.
    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), ExecutorError> {
        info!("Signing in");

        let operation = Operation::new(SIGN_IN_MUTATION)
            .with_operation_name("SignIn")
            .with_variables(json!({ "email": email, "password": password }))
            .public();

        let data = match Reply::classify(self.inner.transport.send(&operation, None).await) {
            Reply::Data(data) => data,
            Reply::Failed(err) | Reply::Rejected(err) => return Err(err),
        };

        let credential = token_payload(data, SIGN_IN_FIELD).map_err(TransportError::malformed)?;
        if let Err(e) = self.inner.store.set(credential) {
            warn!(error = %e, "Signed in but failed to persist the credential");
        }

        debug!("Signed in");
        Ok(())
    }

    /// Clear the session and fire the logout signal.
    ///
    /// Returns whether a session was actually ended.
    #[instrument(skip(self))]
    pub fn sign_out(&self) -> Result<bool, StorageError> {
        let removed = self.inner.store.clear()?;
        if removed {
            self.inner.logout.emit(LogoutReason::SignedOut);
        }
        Ok(removed)
    }

    /// Refresh the stored credential now, joining any refresh in flight.
    #[instrument(skip(self))]
    pub async fn refresh_now(&self) -> Result<(), ExecutorError> {
        let Some(current) = self.inner.store.get() else {
            return Err(ExecutorError::unauthenticated("not signed in"));
        };
        if !current.can_refresh_at(Utc::now()) {
            return Err(self.end_session(&current.access_token, LogoutReason::SessionExpired));
        }
        self.refresh_from(&current).await.map(|_| ())
    }

    /// Obtain a credential newer than `stale`.
    ///
    /// Joins the in-flight refresh if there is one. If the store already
    /// holds a different credential (someone else refreshed or signed in
    /// since `stale` was read) that one is returned without a network call.
    async fn refresh_from(&self, stale: &Credential) -> Result<Credential, ExecutorError> {
        let refresh = {
            let mut slot = self.slot();
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("Joining in-flight refresh");
                    in_flight.clone()
                }
                None => match self.inner.store.get() {
                    None => {
                        return Err(ExecutorError::unauthenticated("session ended"));
                    }
                    Some(current) if current.access_token != stale.access_token => {
                        debug!("Credential already replaced, skipping refresh");
                        return Ok(current);
                    }
                    Some(current) => {
                        let generation = self.inner.store.generation();
                        // The task owns the refresh; the slot only holds its join handle.
                        let task =
                            tokio::spawn(run_refresh(self.inner.clone(), current, generation));
                        let refresh = async move {
                            task.await
                                .unwrap_or_else(|e| Err(RefreshError::Aborted(e.to_string())))
                        }
                        .boxed()
                        .shared();
                        *slot = Some(refresh.clone());
                        refresh
                    }
                },
            }
        };

        refresh
            .await
            .map_err(|e| ExecutorError::unauthenticated(format!("refresh failed: {e}")))
    }

    /// Retire `rejected` if it is still the stored credential and fire the
    /// logout signal once.
    fn end_session(&self, rejected: &AccessToken, reason: LogoutReason) -> ExecutorError {
        if retire(&self.inner, rejected) {
            self.inner.logout.emit(reason);
        }
        ExecutorError::unauthenticated(match reason {
            LogoutReason::SessionExpired => "session expired, sign in again",
            LogoutReason::RejectedAfterRefresh => "credential rejected after refresh",
            LogoutReason::RefreshFailed => "refresh failed",
            LogoutReason::SignedOut => "signed out",
        })
    }

    fn slot(&self) -> MutexGuard<'_, Option<RefreshFuture>> {
        lock_slot(&self.inner)
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}

fn lock_slot(inner: &ExecutorInner) -> MutexGuard<'_, Option<RefreshFuture>> {
    // The slot only ever holds a whole future handle.
    inner.refresh_slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Clear the store if it still holds the credential whose access token is
/// `rejected`. Returns whether anything was removed.
fn retire(inner: &ExecutorInner, rejected: &AccessToken) -> bool {
    let still_current = inner
        .store
        .get()
        .is_some_and(|c| &c.access_token == rejected);
    if !still_current {
        return false;
    }
    match inner.store.clear() {
        Ok(removed) => removed,
        Err(e) => {
            warn!(error = %e, "Failed to remove persisted credential");
            true
        }
    }
}

/// The single refresh shared by every waiter.
async fn run_refresh(
    inner: Arc<ExecutorInner>,
    from: Credential,
    generation: u64,
) -> Result<Credential, RefreshError> {
    info!("Refreshing credential");

    let outcome = match request_refresh(inner.transport.as_ref(), &from).await {
        Ok(fresh) => match inner.store.set_if_generation(fresh.clone(), generation) {
            Ok(true) => {
                debug!("Credential refreshed");
                Ok(fresh)
            }
            Ok(false) => inner.store.get().ok_or(RefreshError::Superseded),
            Err(e) => {
                warn!(error = %e, "Refreshed credential could not be persisted");
                Ok(fresh)
            }
        },
        Err(e) => {
            warn!(error = %e, "Refresh failed, ending session");
            if retire(&inner, &from.access_token) {
                inner.logout.emit(LogoutReason::RefreshFailed);
            }
            Err(e)
        }
    };

    *lock_slot(&inner) = None;
    outcome
}

async fn request_refresh(
    transport: &dyn Transport,
    from: &Credential,
) -> Result<Credential, RefreshError> {
    if !from.can_refresh_at(Utc::now()) {
        return Err(RefreshError::NoRefreshToken);
    }

    let operation = refresh_operation(&from.refresh_token);
    let response = transport.send(&operation, None).await?;

    if !response.errors.is_empty() {
        let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
        return Err(RefreshError::Rejected(messages.join("; ")));
    }

    token_payload(response.data.unwrap_or(Value::Null), REFRESH_FIELD).map_err(RefreshError::Rejected)
}

fn refresh_operation(refresh_token: &RefreshToken) -> Operation {
    Operation::new(REFRESH_MUTATION)
        .with_operation_name("RefreshToken")
        .with_variables(json!({ "refreshToken": refresh_token.as_str() }))
        .public()
}

/// Decode the token payload under `field` of a mutation's `data`.
fn token_payload(mut data: Value, field: &str) -> Result<Credential, String> {
    let payload = match data.get_mut(field).map(Value::take) {
        Some(Value::Null) | None => return Err(format!("response has no `{field}` payload")),
        Some(payload) => payload,
    };
    let payload: TokenPayload =
        serde_json::from_value(payload).map_err(|e| format!("invalid `{field}` payload: {e}"))?;
    let credential = Credential::from(payload);
    if credential.is_well_formed() {
        Ok(credential)
    } else {
        Err(format!("`{field}` payload carries empty tokens"))
    }
}
