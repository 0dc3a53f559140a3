//! tripdesk-core - Credential store and authenticated GraphQL executor.
//!
//! All backend access flows through an [`Executor`]. It attaches the
//! credential held by the [`CredentialStore`], refreshes it once when the
//! backend rejects it, and fires a [`LogoutEvent`] when the session cannot
//! be recovered.

pub mod credential;
pub mod error;
pub mod executor;
pub mod operation;
pub mod signal;
pub mod store;
pub mod tokens;
pub mod traits;
pub mod types;

pub use credential::{Credential, SessionStatus, TokenPayload};
pub use error::{ErrorKind, ExecutorError, InvalidInputError, StorageError, TransportError};
pub use executor::{CallerScope, Executor};
pub use operation::{GraphqlError, GraphqlResponse, Operation};
pub use signal::{LogoutEvent, LogoutReason, LogoutSignal};
pub use store::{CREDENTIAL_KEY, CredentialStore, SessionWatcher};
pub use tokens::{AccessToken, RefreshToken};
pub use traits::{CredentialStorage, MemoryStorage, Transport};
pub use types::GraphqlUrl;

/// Result type alias using the executor's error type.
pub type Result<T> = std::result::Result<T, ExecutorError>;
