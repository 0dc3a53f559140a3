//! Logout command implementation.

use anyhow::{Context as _, Result};
use clap::Args;

use crate::output;
use crate::session::Context;

#[derive(Args, Debug)]
pub struct LogoutArgs {}

pub fn run(ctx: &Context, _args: LogoutArgs) -> Result<()> {
    let removed = ctx
        .store()
        .clear()
        .context("Failed to remove session file")?;

    if removed {
        output::success("Logged out");
    } else {
        output::success("No active session");
    }

    Ok(())
}
