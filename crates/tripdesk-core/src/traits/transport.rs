//! GraphQL transport trait.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::operation::{GraphqlResponse, Operation};
use crate::tokens::AccessToken;

/// Delivers one operation to the GraphQL endpoint.
///
/// Implementations report a rejected bearer token (HTTP 401) as
/// [`TransportError::Unauthorized`] and return any decodable envelope,
/// including one that only carries errors, as `Ok`. They never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `operation`, attaching `bearer` as the authorization header when given.
    async fn send(
        &self,
        operation: &Operation,
        bearer: Option<&AccessToken>,
    ) -> Result<GraphqlResponse, TransportError>;
}
