//! GraphQL operation requests, response envelopes and the built-in
//! authentication documents.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Documents
// ============================================================================

/// Sign-in mutation. Public; returns a [`TokenPayload`](crate::TokenPayload).
pub const SIGN_IN_MUTATION: &str = "mutation SignIn($email: String!, $password: String!) { \
tokenAuth(email: $email, password: $password) { token refreshToken tokenExpiresAt refreshExpiresAt } }";

/// Root field of [`SIGN_IN_MUTATION`].
pub const SIGN_IN_FIELD: &str = "tokenAuth";

/// Refresh mutation. Public; the refresh token travels as a variable.
pub const REFRESH_MUTATION: &str = "mutation RefreshToken($refreshToken: String!) { \
refreshToken(refreshToken: $refreshToken) { token refreshToken tokenExpiresAt refreshExpiresAt } }";

/// Root field of [`REFRESH_MUTATION`].
pub const REFRESH_FIELD: &str = "refreshToken";

/// `extensions.code` values that mean the bearer token was not accepted.
const AUTH_ERROR_CODES: &[&str] = &["UNAUTHENTICATED", "UNAUTHORIZED", "TOKEN_EXPIRED"];

/// Whole messages some backends emit for rejected tokens without setting a
/// code. Compared case-insensitively, ignoring a trailing period.
const AUTH_ERROR_MESSAGES: &[&str] = &[
    "signature has expired",
    "error decoding signature",
    "invalid token",
    "authentication credentials were not provided",
];

// ============================================================================
// Request
// ============================================================================

/// A GraphQL operation to execute.
///
/// Built per call and never persisted.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use tripdesk_core::Operation;
///
/// let op = Operation::new("query Proposal($id: ID!) { proposal(id: $id) { title } }")
///     .with_variables(json!({ "id": "42" }))
///     .with_operation_name("Proposal");
/// assert!(op.requires_auth());
///
/// let sign_up = Operation::new("mutation { signUp { ok } }").public();
/// assert!(!sign_up.requires_auth());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    document: String,
    variables: Value,
    operation_name: Option<String>,
    requires_auth: bool,
}

impl Operation {
    /// An authenticated operation with no variables.
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            variables: Value::Object(Map::new()),
            operation_name: None,
            requires_auth: true,
        }
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Marks the operation as usable without a credential (sign-in, sign-up).
    pub fn public(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn variables(&self) -> &Value {
        &self.variables
    }

    pub fn operation_name(&self) -> Option<&str> {
        self.operation_name.as_deref()
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    /// The JSON body sent to the endpoint.
    pub fn body(&self) -> RequestBody<'_> {
        RequestBody {
            query: &self.document,
            variables: &self.variables,
            operation_name: self.operation_name.as_deref(),
        }
    }
}

/// Wire form of an [`Operation`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody<'a> {
    pub query: &'a str,
    pub variables: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<&'a str>,
}

// ============================================================================
// Response
// ============================================================================

/// A GraphQL response envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphqlError>,
}

impl GraphqlResponse {
    /// A successful envelope carrying `data`.
    pub fn ok(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    /// An envelope carrying only errors.
    pub fn with_errors(errors: Vec<GraphqlError>) -> Self {
        Self { data: None, errors }
    }

    /// Returns true if any error reports a rejected bearer token.
    pub fn is_auth_failure(&self) -> bool {
        self.errors.iter().any(GraphqlError::is_auth_error)
    }
}

/// A field-level error reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    /// Attach an `extensions.code`.
    pub fn with_code(mut self, code: &str) -> Self {
        self.extensions = Some(serde_json::json!({ "code": code }));
        self
    }

    /// `extensions.code`, if the backend set one.
    pub fn code(&self) -> Option<&str> {
        self.extensions.as_ref()?.get("code")?.as_str()
    }

    /// Check if this error means the bearer token was not accepted.
    pub fn is_auth_error(&self) -> bool {
        if let Some(code) = self.code() {
            return AUTH_ERROR_CODES.contains(&code);
        }
        let message = self.message.trim().trim_end_matches('.').to_ascii_lowercase();
        AUTH_ERROR_MESSAGES.contains(&message.as_str())
    }
}
