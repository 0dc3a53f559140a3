//! Refresh command implementation.

use anyhow::{Context as _, Result};
use clap::Args;
use colored::Colorize;

use crate::output;
use crate::session::{Context, LogoutNotice};

#[derive(Args, Debug)]
pub struct RefreshArgs {}

pub async fn run(ctx: &Context, _args: RefreshArgs) -> Result<()> {
    let executor = ctx.executor()?;
    let notice = LogoutNotice::spawn(&executor);

    eprintln!("{}", "Refreshing session...".dimmed());

    let result = executor
        .refresh_now()
        .await
        .context("Failed to refresh session");
    drop(executor);
    notice.finish().await;
    result?;

    output::success("Session refreshed successfully");
    if let Some(credential) = ctx.store().get() {
        output::expiry("Access expires", credential.access_expires_at);
    }

    Ok(())
}
