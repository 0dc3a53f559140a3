//! Validated configuration types.

mod graphql_url;

pub use graphql_url::GraphqlUrl;
