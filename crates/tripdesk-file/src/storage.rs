//! Credential payload stored as a single JSON file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, instrument};

use tripdesk_core::{CREDENTIAL_KEY, CredentialStorage, StorageError};

/// Durable storage for the credential payload.
///
/// The payload lives at `<dir>/tripdesk.session.json`. Writes go to a
/// temporary file that is renamed into place while an exclusive lock on
/// `<dir>/tripdesk.session.lock` is held, so concurrent processes never see
/// a partially written file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Store the credential under `dir`. The directory is created on first write.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Get the storage directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the credential file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{CREDENTIAL_KEY}.json"))
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("{CREDENTIAL_KEY}.json.tmp"))
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{CREDENTIAL_KEY}.lock"))
    }

    /// Hold an exclusive lock for the duration of `f`.
    fn locked<T>(&self, f: impl FnOnce() -> io::Result<T>) -> io::Result<T> {
        fs::create_dir_all(&self.dir)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;

        lock_file.lock_exclusive()?;
        let result = f();
        lock_file.unlock()?;
        result
    }
}

impl CredentialStorage for FileStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path()) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, payload), fields(path = %self.path().display()))]
    fn save(&self, payload: &str) -> Result<(), StorageError> {
        self.locked(|| {
            let temp = self.temp_path();
            let mut file = File::create(&temp)?;
            restrict_permissions(&temp)?;
            file.write_all(payload.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp, self.path())
        })?;

        debug!("Saved credential");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path().display()))]
    fn remove(&self) -> Result<(), StorageError> {
        self.locked(|| match fs::remove_file(self.path()) {
            Ok(()) => {
                debug!("Removed credential");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        })?;
        Ok(())
    }
}

/// Owner read/write only (Unix).
fn restrict_permissions(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
