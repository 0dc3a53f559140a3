//! Login command implementation.

use anyhow::{Context as _, Result};
use clap::Args;
use colored::Colorize;

use crate::output;
use crate::session::{Context, LogoutNotice};

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Account email address
    #[arg(long)]
    pub email: String,

    /// Account password
    #[arg(long, env = "TRIPDESK_PASSWORD", hide_env_values = true)]
    pub password: String,
}

pub async fn run(ctx: &Context, args: LoginArgs) -> Result<()> {
    let executor = ctx.executor()?;
    let notice = LogoutNotice::spawn(&executor);

    eprintln!("{}", "Logging in...".dimmed());

    let result = executor
        .sign_in(&args.email, &args.password)
        .await
        .context("Failed to login");
    drop(executor);
    notice.finish().await;
    result?;

    output::success("Logged in successfully");
    if let Some(credential) = ctx.store().get() {
        println!();
        output::expiry("Access expires", credential.access_expires_at);
        output::expiry("Refresh expires", credential.refresh_expires_at);
    }

    Ok(())
}
