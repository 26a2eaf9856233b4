use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::protocol::AuthMaterial;
use tokio::fs;
use tracing::{debug, info};

const CREDENTIALS_FILE: &str = "creds.json";

/// Durable home of the session credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    async fn load(&self) -> Result<Option<AuthMaterial>>;
    async fn save(&self, auth: &AuthMaterial) -> Result<()>;
    /// Removes every stored credential. Succeeds when nothing is stored.
    async fn clear(&self) -> Result<()>;
}

/// Stores credentials as JSON inside a session directory.
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn creds_path(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<AuthMaterial>> {
        let path = self.creds_path();
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read credentials '{}'", path.display()))
            }
        };
        let auth = serde_json::from_slice(&raw)
            .with_context(|| format!("credentials '{}' are corrupt", path.display()))?;
        Ok(Some(auth))
    }

    async fn save(&self, auth: &AuthMaterial) -> Result<()> {
        fs::create_dir_all(&self.dir).await.with_context(|| {
            format!("failed to create session directory '{}'", self.dir.display())
        })?;

        let path = self.creds_path();
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_vec_pretty(auth).context("failed to encode credentials")?;
        fs::write(&tmp, raw)
            .await
            .with_context(|| format!("failed to write '{}'", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to replace '{}'", path.display()))?;
        debug!(path = %path.display(), "credentials saved");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                info!(dir = %self.dir.display(), "session directory removed");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("failed to remove session directory '{}'", self.dir.display())
            }),
        }
    }
}

#[cfg(test)]
#[path = "tests/credentials_tests.rs"]
mod tests;
