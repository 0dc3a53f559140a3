//! Status command implementation.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use tripdesk_core::SessionStatus;

use crate::output;
use crate::session::Context;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Print the status as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusOutput {
    status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_expires_at: Option<DateTime<Utc>>,
}

pub fn run(ctx: &Context, args: StatusArgs) -> Result<()> {
    let credential = ctx.store().get();
    let report = StatusOutput {
        status: ctx.store().status(),
        access_expires_at: credential.as_ref().map(|c| c.access_expires_at),
        refresh_expires_at: credential.as_ref().map(|c| c.refresh_expires_at),
    };

    if args.json {
        return output::json(&report, false);
    }

    output::field("Status", report.status);
    if let (Some(access), Some(refresh)) = (report.access_expires_at, report.refresh_expires_at) {
        output::expiry("Access expires", access);
        output::expiry("Refresh expires", refresh);
    }
    output::field("Data directory", ctx.data_dir().display());

    Ok(())
}
