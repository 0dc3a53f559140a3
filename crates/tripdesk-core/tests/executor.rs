//! Executor behaviour against a scripted in-process backend.
//!
//! The scripted backend accepts exactly one access token at a time and
//! rotates it on every successful refresh, which is enough to exercise the
//! refresh, retry and logout paths without a network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures_util::future::join_all;
use serde_json::json;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use tripdesk_core::operation::REFRESH_MUTATION;
use tripdesk_core::{
    AccessToken, CallerScope, Credential, CredentialStore, ErrorKind, Executor, GraphqlError,
    GraphqlResponse, LogoutReason, MemoryStorage, Operation, RefreshToken, SessionStatus, Transport,
    TransportError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshMode {
    Succeed,
    Fail,
}

struct Backend {
    /// Token the backend accepts; `None` rejects every bearer.
    accepted: Mutex<Option<String>>,
    refresh_mode: RefreshMode,
    refresh_delay: StdDuration,
    /// Reply used for authorized requests instead of the default data.
    reply: Mutex<Option<Result<GraphqlResponse, TransportError>>>,
    /// Reject requests that carry no bearer.
    reject_anonymous: bool,
    sends: AtomicUsize,
    refreshes: AtomicUsize,
    bearers: Mutex<Vec<Option<String>>>,
}

impl Backend {
    fn accepting(token: &str) -> Arc<Self> {
        Self::build(Some(token), RefreshMode::Succeed)
    }

    fn build(accepted: Option<&str>, refresh_mode: RefreshMode) -> Arc<Self> {
        Arc::new(Self {
            accepted: Mutex::new(accepted.map(str::to_string)),
            refresh_mode,
            refresh_delay: StdDuration::from_millis(20),
            reply: Mutex::new(None),
            reject_anonymous: false,
            sends: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            bearers: Mutex::new(Vec::new()),
        })
    }

    fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn bearers(&self) -> Vec<Option<String>> {
        self.bearers.lock().unwrap().clone()
    }
}

/// Transport handle sharing one scripted backend.
struct Scripted(Arc<Backend>);

#[async_trait]
impl Transport for Scripted {
    async fn send(
        &self,
        operation: &Operation,
        bearer: Option<&AccessToken>,
    ) -> Result<GraphqlResponse, TransportError> {
        let backend = &self.0;

        if operation.document() == REFRESH_MUTATION {
            let n = backend.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(backend.refresh_delay).await;
            return match backend.refresh_mode {
                RefreshMode::Succeed => {
                    let token = format!("access-{n}");
                    if backend.accepted.lock().unwrap().is_some() {
                        *backend.accepted.lock().unwrap() = Some(token.clone());
                    }
                    Ok(GraphqlResponse::ok(json!({
                        "refreshToken": {
                            "token": token,
                            "refreshToken": format!("refresh-{n}"),
                            "tokenExpiresAt": (Utc::now() + Duration::minutes(15)).to_rfc3339(),
                            "refreshExpiresAt": (Utc::now() + Duration::days(7)).to_rfc3339(),
                        }
                    })))
                }
                RefreshMode::Fail => Ok(GraphqlResponse::with_errors(vec![GraphqlError::new(
                    "Invalid refresh token",
                )])),
            };
        }

        backend.sends.fetch_add(1, Ordering::SeqCst);
        let bearer = bearer.map(|t| t.as_str().to_string());
        backend.bearers.lock().unwrap().push(bearer.clone());

        let authorized = match &bearer {
            Some(token) => backend.accepted.lock().unwrap().as_deref() == Some(token.as_str()),
            None => !backend.reject_anonymous,
        };
        if !authorized {
            return Err(TransportError::Unauthorized);
        }

        match backend.reply.lock().unwrap().clone() {
            Some(reply) => reply,
            None => Ok(GraphqlResponse::ok(json!({ "proposals": [{ "id": "1" }] }))),
        }
    }
}

fn credential(access: &str, access_in: Duration, refresh_in: Duration) -> Credential {
    let now = Utc::now();
    Credential::new(
        AccessToken::new(access),
        RefreshToken::new(format!("{access}-refresh")),
        now + access_in,
        now + refresh_in,
    )
}

fn live(access: &str) -> Credential {
    credential(access, Duration::minutes(10), Duration::days(7))
}

fn expired(access: &str) -> Credential {
    credential(access, Duration::minutes(-1), Duration::days(7))
}

fn executor(backend: &Arc<Backend>, stored: Option<Credential>) -> Executor {
    let store = CredentialStore::init(MemoryStorage::new());
    if let Some(credential) = stored {
        store.set(credential).unwrap();
    }
    Executor::new(Scripted(backend.clone()), store)
}

fn proposals() -> Operation {
    Operation::new("query Proposals { proposals { id } }").with_operation_name("Proposals")
}

// ============================================================================
// Unauthenticated paths
// ============================================================================

#[tokio::test]
async fn public_operation_without_credential_never_refreshes() {
    let backend = Backend::accepting("access-0");
    let exec = executor(&backend, None);

    let data = exec
        .execute(&Operation::new("mutation { signUp { ok } }").public())
        .await
        .unwrap();

    assert_eq!(data["proposals"][0]["id"], "1");
    assert_eq!(backend.bearers(), vec![None]);
    assert_eq!(backend.refreshes(), 0);
}

#[tokio::test]
async fn public_operation_rejected_without_credential_is_not_unauthenticated() {
    let mut backend = Backend::build(None, RefreshMode::Succeed);
    Arc::get_mut(&mut backend).unwrap().reject_anonymous = true;
    let exec = executor(&backend, None);

    let err = exec
        .execute(&Operation::new("{ publicFares { id } }").public())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransportError);
    assert_eq!(backend.refreshes(), 0);
}

#[tokio::test]
async fn authenticated_operation_without_credential_fails_fast() {
    let backend = Backend::accepting("access-0");
    let exec = executor(&backend, None);

    let err = exec.execute(&proposals()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    assert_eq!(backend.sends(), 0);
}

#[tokio::test]
async fn terminal_session_fails_without_network() {
    let backend = Backend::accepting("access-0");
    let exec = executor(
        &backend,
        Some(credential("access-0", Duration::days(-2), Duration::days(-1))),
    );
    assert_eq!(exec.store().status(), SessionStatus::Terminal);
    let mut logout = exec.subscribe_logout();

    let err = exec.execute(&proposals()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    assert_eq!(backend.sends() + backend.refreshes(), 0);
    assert!(exec.store().get().is_none());
    assert_eq!(logout.try_recv().unwrap().reason, LogoutReason::SessionExpired);
}

// ============================================================================
// Refresh and retry
// ============================================================================

#[tokio::test]
async fn expired_session_refreshes_transparently() {
    let backend = Backend::accepting("access-0");
    let exec = executor(&backend, Some(expired("access-0")));
    assert_eq!(exec.store().status(), SessionStatus::Expired);

    let data = exec.execute(&proposals()).await.unwrap();

    assert_eq!(data["proposals"][0]["id"], "1");
    assert_eq!(backend.refreshes(), 1);
    assert_eq!(backend.bearers(), vec![Some("access-1".to_string())]);
    assert_eq!(exec.store().status(), SessionStatus::Authenticated);
}

#[tokio::test]
async fn rejected_request_is_retried_once_with_new_token() {
    let backend = Backend::accepting("server-side-token");
    let exec = executor(&backend, Some(live("revoked")));

    exec.execute(&proposals()).await.unwrap();

    assert_eq!(backend.refreshes(), 1);
    assert_eq!(
        backend.bearers(),
        vec![Some("revoked".to_string()), Some("access-1".to_string())]
    );
    let stored = exec.store().get().unwrap();
    assert_eq!(stored.access_token.as_str(), "access-1");
    assert_eq!(stored.refresh_token.as_str(), "refresh-1");
}

#[tokio::test]
async fn concurrent_rejections_share_one_refresh() {
    let backend = Backend::accepting("server-side-token");
    let exec = executor(&backend, Some(live("revoked")));

    let op = proposals();
    let results = join_all((0..5).map(|_| exec.execute(&op))).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(backend.refreshes(), 1);
    assert_eq!(backend.sends(), 10);
}

#[tokio::test]
async fn concurrent_expired_requests_share_one_refresh() {
    let backend = Backend::accepting("access-0");
    let exec = executor(&backend, Some(expired("access-0")));

    let op = proposals();
    let results = join_all((0..5).map(|_| exec.execute(&op))).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(backend.refreshes(), 1);
    assert!(
        backend
            .bearers()
            .iter()
            .all(|b| b.as_deref() == Some("access-1"))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rejections_on_multithreaded_runtime_share_one_refresh() {
    let backend = Backend::accepting("server-side-token");
    let exec = executor(&backend, Some(live("revoked")));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let exec = exec.clone();
            tokio::spawn(async move { exec.execute(&proposals()).await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(backend.refreshes(), 1);
}

#[tokio::test]
async fn rejection_after_refresh_is_terminal() {
    let backend = Backend::build(None, RefreshMode::Succeed);
    let exec = executor(&backend, Some(live("access-0")));
    let mut logout = exec.subscribe_logout();

    let err = exec.execute(&proposals()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    assert_eq!(backend.refreshes(), 1);
    assert_eq!(backend.sends(), 2);
    assert!(exec.store().get().is_none());
    assert_eq!(
        logout.try_recv().unwrap().reason,
        LogoutReason::RejectedAfterRefresh
    );
    assert!(matches!(logout.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn refresh_failure_clears_session_and_logs_out_once() {
    let backend = Backend::build(Some("server-side-token"), RefreshMode::Fail);
    let exec = executor(&backend, Some(live("revoked")));
    let mut logout = exec.subscribe_logout();

    let op = proposals();
    let results = join_all((0..5).map(|_| exec.execute(&op))).await;

    for result in results {
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Unauthenticated);
    }
    assert_eq!(backend.refreshes(), 1);
    assert!(exec.store().get().is_none());
    assert_eq!(logout.try_recv().unwrap().reason, LogoutReason::RefreshFailed);
    assert!(matches!(logout.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn refresh_failure_on_expired_session_is_unauthenticated() {
    let backend = Backend::build(Some("access-0"), RefreshMode::Fail);
    let exec = executor(&backend, Some(expired("access-0")));

    let err = exec.execute(&proposals()).await.unwrap_err();

    assert!(err.is_unauthenticated());
    assert_eq!(backend.sends(), 0);
    assert!(exec.store().get().is_none());
}

// ============================================================================
// Pass-through failures
// ============================================================================

#[tokio::test]
async fn graphql_errors_pass_through_with_partial_data() {
    let backend = Backend::accepting("access-0");
    *backend.reply.lock().unwrap() = Some(Ok(GraphqlResponse {
        data: Some(json!({ "proposal": null })),
        errors: vec![GraphqlError::new("Proposal matching query does not exist.")],
    }));
    let exec = executor(&backend, Some(live("access-0")));

    let err = exec.execute(&proposals()).await.unwrap_err();

    match err {
        tripdesk_core::ExecutorError::GraphQl { data, errors } => {
            assert_eq!(data, Some(json!({ "proposal": null })));
            assert_eq!(errors[0].message, "Proposal matching query does not exist.");
        }
        other => panic!("expected GraphQL error, got {other:?}"),
    }
    assert_eq!(backend.sends(), 1);
    assert_eq!(backend.refreshes(), 0);
}

#[tokio::test]
async fn transport_errors_are_not_retried() {
    let backend = Backend::accepting("access-0");
    *backend.reply.lock().unwrap() = Some(Err(TransportError::Timeout));
    let exec = executor(&backend, Some(live("access-0")));

    let err = exec.execute(&proposals()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransportError);
    assert_eq!(backend.sends(), 1);
    assert!(exec.store().get().is_some());
}

#[tokio::test]
async fn graphql_auth_error_triggers_refresh() {
    let backend = Backend::accepting("access-0");
    *backend.reply.lock().unwrap() = Some(Ok(GraphqlResponse::with_errors(vec![
        GraphqlError::new("Signature has expired"),
    ])));
    let exec = executor(&backend, Some(live("access-0")));

    let err = exec.execute(&proposals()).await.unwrap_err();

    // The scripted reply keeps reporting an expired signature, so the retry
    // is rejected as well and the session ends.
    assert!(err.is_unauthenticated());
    assert_eq!(backend.refreshes(), 1);
    assert_eq!(backend.sends(), 2);
}

// ============================================================================
// Cancellation and races
// ============================================================================

#[tokio::test]
async fn cancelled_scope_does_not_refresh() {
    let backend = Backend::accepting("server-side-token");
    let stored = live("revoked");
    let exec = executor(&backend, Some(stored.clone()));
    let scope = CallerScope::new();
    scope.cancel();

    let err = exec.execute_scoped(&proposals(), &scope).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(backend.refreshes(), 0);
    assert_eq!(exec.store().get(), Some(stored));
}

#[tokio::test]
async fn scope_cancelled_while_refresh_is_pending() {
    let backend = Backend::accepting("server-side-token");
    let exec = executor(&backend, Some(live("revoked")));
    let scope = CallerScope::new();

    let scoped_proposals = proposals();
    let waiting_proposals = proposals();
    let (cancelled, waiting, _) = tokio::join!(
        exec.execute_scoped(&scoped_proposals, &scope),
        exec.execute(&waiting_proposals),
        async {
            tokio::time::sleep(StdDuration::from_millis(5)).await;
            scope.cancel();
        }
    );

    assert_eq!(cancelled.unwrap_err().kind(), ErrorKind::Cancelled);
    assert!(waiting.is_ok());
    assert_eq!(backend.refreshes(), 1);
    // Two rejected first attempts, then a retry only for the caller still waiting.
    assert_eq!(backend.sends(), 3);
    assert_eq!(
        exec.store().get().unwrap().access_token.as_str(),
        "access-1"
    );
}

#[tokio::test]
async fn abandoned_refresh_completes_and_releases_executor() {
    let backend = Backend::accepting("server-side-token");
    let exec = executor(&backend, Some(expired("old")));
    let store = exec.store().clone();
    let mut logout = exec.subscribe_logout();

    let abandoned =
        tokio::time::timeout(StdDuration::from_millis(5), exec.execute(&proposals())).await;
    assert!(abandoned.is_err());
    assert_eq!(backend.refreshes(), 1);

    tokio::time::sleep(StdDuration::from_millis(60)).await;
    assert_eq!(store.get().unwrap().access_token.as_str(), "access-1");

    drop(exec);
    let closed = tokio::time::timeout(StdDuration::from_secs(1), logout.recv()).await;
    assert!(matches!(closed, Ok(Err(RecvError::Closed))));
}

#[tokio::test]
async fn sign_out_during_refresh_discards_refreshed_credential() {
    let backend = Backend::accepting("server-side-token");
    let exec = executor(&backend, Some(live("revoked")));

    let request = proposals();
    let (result, _) = tokio::join!(exec.execute(&request), async {
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        exec.sign_out().unwrap();
    });

    assert!(result.unwrap_err().is_unauthenticated());
    assert_eq!(backend.refreshes(), 1);
    assert!(exec.store().get().is_none());
}

// ============================================================================
// Login / logout flows
// ============================================================================

#[tokio::test]
async fn sign_in_stores_credential() {
    struct SignIn;

    #[async_trait]
    impl Transport for SignIn {
        async fn send(
            &self,
            operation: &Operation,
            bearer: Option<&AccessToken>,
        ) -> Result<GraphqlResponse, TransportError> {
            assert!(bearer.is_none());
            assert_eq!(operation.variables()["email"], "agent@example.com");
            Ok(GraphqlResponse::ok(json!({
                "tokenAuth": {
                    "token": "signed-in",
                    "refreshToken": "signed-in-refresh",
                    "tokenExpiresAt": (Utc::now() + Duration::minutes(15)).to_rfc3339(),
                    "refreshExpiresAt": (Utc::now() + Duration::days(7)).to_rfc3339(),
                }
            })))
        }
    }

    let exec = Executor::new(SignIn, CredentialStore::init(MemoryStorage::new()));
    let mut watcher = exec.store().subscribe();

    exec.sign_in("agent@example.com", "secret").await.unwrap();

    assert_eq!(watcher.changed().await, Some(SessionStatus::Authenticated));
    assert_eq!(
        exec.store().get().unwrap().access_token.as_str(),
        "signed-in"
    );
}

#[tokio::test]
async fn sign_in_with_bad_password_surfaces_graphql_error() {
    struct BadPassword;

    #[async_trait]
    impl Transport for BadPassword {
        async fn send(
            &self,
            _operation: &Operation,
            _bearer: Option<&AccessToken>,
        ) -> Result<GraphqlResponse, TransportError> {
            Ok(GraphqlResponse::with_errors(vec![GraphqlError::new(
                "Please enter valid credentials",
            )]))
        }
    }

    let exec = Executor::new(BadPassword, CredentialStore::init(MemoryStorage::new()));
    let err = exec.sign_in("agent@example.com", "wrong").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::GraphQlError);
    assert!(exec.store().get().is_none());
}

#[tokio::test]
async fn sign_out_fires_logout_once() {
    let backend = Backend::accepting("access-0");
    let exec = executor(&backend, Some(live("access-0")));
    let mut logout = exec.subscribe_logout();

    assert!(exec.sign_out().unwrap());
    assert!(!exec.sign_out().unwrap());

    assert_eq!(logout.try_recv().unwrap().reason, LogoutReason::SignedOut);
    assert!(matches!(logout.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn refresh_now_rotates_tokens() {
    let backend = Backend::accepting("access-0");
    let exec = executor(&backend, Some(live("access-0")));

    exec.refresh_now().await.unwrap();

    assert_eq!(backend.refreshes(), 1);
    assert_eq!(exec.store().get().unwrap().access_token.as_str(), "access-1");
}

#[tokio::test]
async fn restart_restores_session_from_storage() {
    let backend = Backend::accepting("access-0");
    let storage = MemoryStorage::new();
    CredentialStore::init(storage.clone())
        .set(live("access-0"))
        .unwrap();

    let exec = Executor::new(Scripted(backend.clone()), CredentialStore::init(storage));
    exec.execute(&proposals()).await.unwrap();

    assert_eq!(backend.bearers(), vec![Some("access-0".to_string())]);
}
