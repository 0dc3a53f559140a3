//! Terminal output for the commands.

use std::fmt::Display;

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use tripdesk_core::GraphqlError;

/// Width labels are padded to so values line up.
const LABEL_WIDTH: usize = 16;

pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print one field-level GraphQL error, with its path when present.
pub fn graphql_error(error: &GraphqlError) {
    let path = error
        .path
        .as_ref()
        .map(|segments| {
            let joined: Vec<String> = segments
                .iter()
                .map(|s| s.as_str().map_or_else(|| s.to_string(), str::to_string))
                .collect();
            format!(" (at {})", joined.join("."))
        })
        .unwrap_or_default();
    eprintln!("{} {}{}", "✗".red(), error.message, path.dimmed());
}

pub fn field(label: &str, value: impl Display) {
    let label = format!("{label}:");
    println!("{} {}", format!("{label:<LABEL_WIDTH$}").dimmed(), value);
}

/// Print an expiry instant with how far away it is.
pub fn expiry(label: &str, at: DateTime<Utc>) {
    let minutes = (at - Utc::now()).num_minutes();
    let relative = if minutes >= 0 {
        format!("in {}", human_minutes(minutes))
    } else {
        format!("{} ago", human_minutes(-minutes)).red().to_string()
    };
    field(label, format!("{} ({})", at.to_rfc3339(), relative));
}

fn human_minutes(minutes: i64) -> String {
    match minutes {
        m if m < 60 => format!("{m}m"),
        m if m < 60 * 24 => format!("{}h{}m", m / 60, m % 60),
        m => format!("{}d{}h", m / (60 * 24), (m / 60) % 24),
    }
}

pub fn json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}
