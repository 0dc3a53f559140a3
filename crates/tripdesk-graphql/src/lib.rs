//! tripdesk-graphql - HTTP transport to the GraphQL endpoint.

mod client;

pub use client::{HttpTransport, HttpTransportBuilder};
