//! Subcommand implementations.

pub mod login;
pub mod logout;
pub mod query;
pub mod refresh;
pub mod status;

use anyhow::Result;

use crate::cli::{Cli, Commands};
use crate::session::Context;

pub async fn handle(cli: Cli) -> Result<()> {
    let ctx = Context::load(&cli)?;

    match cli.command {
        Commands::Login(args) => login::run(&ctx, args).await,
        Commands::Logout(args) => logout::run(&ctx, args),
        Commands::Status(args) => status::run(&ctx, args),
        Commands::Refresh(args) => refresh::run(&ctx, args).await,
        Commands::Query(args) => query::run(&ctx, args).await,
    }
}
