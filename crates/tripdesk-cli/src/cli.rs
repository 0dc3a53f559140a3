//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use tripdesk_core::GraphqlUrl;

use crate::commands::{login, logout, query, refresh, status};

/// Command-line client for the tripdesk GraphQL API.
#[derive(Parser, Debug)]
#[command(name = "tripdesk")]
#[command(author, version = env!("TRIPDESK_VERSION"), about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// GraphQL endpoint URL
    #[arg(long, global = true, env = "TRIPDESK_ENDPOINT")]
    pub endpoint: Option<GraphqlUrl>,

    /// Directory holding the persisted session
    #[arg(long, global = true, env = "TRIPDESK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, global = true, env = "TRIPDESK_TIMEOUT", default_value_t = 30)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in and store the session
    Login(login::LoginArgs),

    /// End the stored session
    Logout(logout::LogoutArgs),

    /// Display the session status
    Status(status::StatusArgs),

    /// Refresh the session tokens
    Refresh(refresh::RefreshArgs),

    /// Execute a GraphQL document
    Query(query::QueryArgs),
}
