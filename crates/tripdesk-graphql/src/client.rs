//! GraphQL-over-HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderValue};
use tracing::{debug, instrument, trace};

use tripdesk_core::{AccessToken, GraphqlResponse, GraphqlUrl, Operation, Transport, TransportError};

/// Maximum length for error response bodies in error messages.
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Builder for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportBuilder {
    endpoint: GraphqlUrl,
    timeout: Option<Duration>,
    user_agent: String,
}

impl HttpTransportBuilder {
    /// Per-request timeout. Unset means no timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<HttpTransport, TransportError> {
        let mut builder = reqwest::Client::builder().user_agent(self.user_agent);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| TransportError::Connection {
            message: format!("failed to build HTTP client: {e}"),
        })?;

        Ok(HttpTransport {
            client,
            endpoint: self.endpoint,
        })
    }
}

/// Sends operations to one GraphQL endpoint as JSON POST requests.
///
/// Clone is cheap: `reqwest::Client` shares its connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: GraphqlUrl,
}

impl HttpTransport {
    /// Create a transport with default settings.
    pub fn new(endpoint: GraphqlUrl) -> Result<Self, TransportError> {
        Self::builder(endpoint).build()
    }

    pub fn builder(endpoint: GraphqlUrl) -> HttpTransportBuilder {
        HttpTransportBuilder {
            endpoint,
            timeout: None,
            user_agent: concat!("tripdesk/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Returns the endpoint this transport posts to.
    pub fn endpoint(&self) -> &GraphqlUrl {
        &self.endpoint
    }

    /// Turn an HTTP response into an envelope or a transport error.
    async fn handle_response(
        &self,
        response: reqwest::Response,
    ) -> Result<GraphqlResponse, TransportError> {
        let status = response.status();
        trace!(status = %status, "GraphQL response");

        if status == StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized);
        }

        let body = response.bytes().await.map_err(map_reqwest)?;

        match serde_json::from_slice::<GraphqlResponse>(&body) {
            Ok(envelope) if envelope.data.is_some() || !envelope.errors.is_empty() => {
                // Servers commonly answer validation failures with 4xx plus an `errors` array.
                if !status.is_success() {
                    debug!(status = %status, "Non-success status with GraphQL envelope");
                }
                Ok(envelope)
            }
            Ok(_) if status.is_success() => Err(TransportError::malformed(
                "response is not a GraphQL envelope",
            )),
            Err(e) if status.is_success() => Err(TransportError::malformed(e)),
            _ => Err(TransportError::Http {
                status: status.as_u16(),
                body: truncate_body(&String::from_utf8_lossy(&body)),
            }),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(
        skip(self, operation, bearer),
        fields(
            endpoint = %self.endpoint,
            operation = operation.operation_name().unwrap_or("anonymous"),
            authenticated = bearer.is_some()
        )
    )]
    async fn send(
        &self,
        operation: &Operation,
        bearer: Option<&AccessToken>,
    ) -> Result<GraphqlResponse, TransportError> {
        debug!("GraphQL request");

        let mut request = self
            .client
            .post(self.endpoint.as_url().clone())
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .json(&operation.body());

        if let Some(token) = bearer {
            request = request.bearer_auth(token.as_str());
        }

        let response = request.send().await.map_err(map_reqwest)?;

        self.handle_response(response).await
    }
}

fn map_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connection {
            message: err.to_string(),
        }
    } else if err.is_decode() {
        TransportError::malformed(err)
    } else {
        TransportError::Connection {
            message: err.to_string(),
        }
    }
}

/// Truncate a response body to avoid logging excessive data.
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}
