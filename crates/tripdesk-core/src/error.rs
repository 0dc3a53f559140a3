//! Error types for tripdesk.
//!
//! The executor resolves every failure to an [`ExecutorError`]. Transport
//! and storage backends report through [`TransportError`] and
//! [`StorageError`], and configuration mistakes through
//! [`InvalidInputError`].

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::operation::GraphqlError;

/// Flat classification of an [`ExecutorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No usable credential; the caller must send the user to sign-in.
    Unauthenticated,
    /// The backend answered with field-level errors.
    GraphQlError,
    /// Network, timeout, HTTP status or malformed response.
    TransportError,
    /// The caller abandoned the request.
    Cancelled,
}

/// The error type returned by [`Executor`](crate::Executor) operations.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// No usable credential is available.
    #[error("unauthenticated: {reason}")]
    Unauthenticated { reason: String },

    /// The backend returned field-level errors, possibly alongside partial data.
    #[error("GraphQL error: {}", summarize(.errors))]
    GraphQl {
        /// Partial data, if the backend returned any.
        data: Option<Value>,
        /// The errors reported by the backend.
        errors: Vec<GraphqlError>,
    },

    /// The transport failed to deliver a usable response.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The caller's scope was cancelled before the executor acted on the result.
    #[error("request cancelled by caller")]
    Cancelled,
}

impl ExecutorError {
    pub(crate) fn unauthenticated(reason: impl Into<String>) -> Self {
        Self::Unauthenticated {
            reason: reason.into(),
        }
    }

    /// Returns the flat error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutorError::Unauthenticated { .. } => ErrorKind::Unauthenticated,
            ExecutorError::GraphQl { .. } => ErrorKind::GraphQlError,
            ExecutorError::Transport(_) => ErrorKind::TransportError,
            ExecutorError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Returns true if the caller has to re-authenticate.
    pub fn is_unauthenticated(&self) -> bool {
        self.kind() == ErrorKind::Unauthenticated
    }
}

fn summarize(errors: &[GraphqlError]) -> String {
    match errors {
        [] => "no error details".to_string(),
        [only] => only.message.clone(),
        [first, rest @ ..] => format!("{} (and {} more)", first.message, rest.len()),
    }
}

/// Transport-level errors.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The endpoint rejected the request's authorization (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,

    /// Network connection failed.
    #[error("connection failed: {message}")]
    Connection { message: String },

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// The endpoint answered with a non-success status and no GraphQL envelope.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The response could not be decoded.
    #[error("malformed response: {message}")]
    Malformed { message: String },
}

impl TransportError {
    pub fn malformed(message: impl fmt::Display) -> Self {
        TransportError::Malformed {
            message: message.to_string(),
        }
    }
}

/// Failure of the refresh mutation.
///
/// Never crosses the executor boundary: it is always converted to
/// [`ExecutorError::Unauthenticated`]. `Clone` because every caller waiting
/// on a coalesced refresh receives the same outcome.
#[derive(Debug, Clone, Error)]
pub(crate) enum RefreshError {
    #[error("no usable refresh token")]
    NoRefreshToken,

    #[error("refresh rejected: {0}")]
    Rejected(String),

    #[error("refresh transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("refresh task aborted: {0}")]
    Aborted(String),

    #[error("session was cleared while refreshing")]
    Superseded,
}

/// Durable credential storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem or platform storage failure.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The credential could not be encoded.
    #[error("failed to encode credential: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Input validation errors.
#[derive(Debug, Error)]
pub enum InvalidInputError {
    /// Invalid GraphQL endpoint URL.
    #[error("invalid endpoint URL '{value}': {reason}")]
    EndpointUrl { value: String, reason: String },
}
