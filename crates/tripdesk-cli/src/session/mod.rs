//! Session context shared by the commands.

mod notice;

pub use notice::LogoutNotice;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use directories::ProjectDirs;
use tracing::debug;

use tripdesk_core::{CredentialStore, Executor, GraphqlUrl};
use tripdesk_file::FileStorage;
use tripdesk_graphql::HttpTransport;

use crate::cli::Cli;

/// Resolved configuration plus the credential store loaded from disk.
pub struct Context {
    store: CredentialStore,
    endpoint: Option<GraphqlUrl>,
    data_dir: PathBuf,
    timeout: Duration,
}

impl Context {
    pub fn load(cli: &Cli) -> Result<Self> {
        let data_dir = match &cli.data_dir {
            Some(dir) => dir.clone(),
            None => default_data_dir()?,
        };
        debug!(data_dir = %data_dir.display(), "Using data directory");

        Ok(Self {
            store: CredentialStore::init(FileStorage::new(&data_dir)),
            endpoint: cli.endpoint.clone(),
            data_dir,
            timeout: Duration::from_secs(cli.timeout),
        })
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Build an executor against the configured endpoint.
    pub fn executor(&self) -> Result<Executor> {
        let endpoint = self
            .endpoint
            .clone()
            .context("No endpoint configured. Pass --endpoint or set TRIPDESK_ENDPOINT.")?;

        let transport = HttpTransport::builder(endpoint)
            .timeout(self.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Executor::new(transport, self.store.clone()))
    }
}

fn default_data_dir() -> Result<PathBuf> {
    let dirs =
        ProjectDirs::from("", "", "tripdesk").context("Could not determine data directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
