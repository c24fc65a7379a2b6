use std::env;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::sys::secrets::SecretToken;
use crate::sys::traits::{ArtifactStore, CollaboratorError, SecretStore};

/// Artifact store backed by a workspace directory.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// 🛡️ Path traversal shield: only plain relative paths below the root.
    fn resolve(&self, path: &Path) -> Result<PathBuf, CollaboratorError> {
        let relative = path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if !relative || path.as_os_str().is_empty() {
            return Err(CollaboratorError::Failed(format!(
                "artifact path '{}' must stay inside the workspace",
                path.display()
            )));
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn retrieve(&self, path: &Path) -> Result<Vec<u8>, CollaboratorError> {
        let full = self.resolve(path)?;
        fs::read(&full).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CollaboratorError::NotFound(path.display().to_string()),
            _ => CollaboratorError::Failed(format!("Failed to read {}: {e}", path.display())),
        })
    }

    async fn store(&self, bytes: &[u8], path: &Path) -> Result<(), CollaboratorError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                CollaboratorError::Failed(format!("Failed to create directories: {e}"))
            })?;
        }

        // Write-then-rename so a half-written artifact never appears under its final name.
        let tmp = full.with_extension("sign-relay.tmp");
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| CollaboratorError::Failed(format!("Failed to write temp file: {e}")))?;
        if let Err(e) = fs::rename(&tmp, &full).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(CollaboratorError::Failed(format!(
                "Failed to move artifact into place: {e}"
            )));
        }
        Ok(())
    }
}

/// Resolves secret ids as environment variable names.
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn retrieve(&self, id: &str) -> Result<SecretToken, CollaboratorError> {
        match env::var(id) {
            Ok(value) if !value.is_empty() => Ok(SecretToken::new(value)),
            _ => Err(CollaboratorError::NotFound(format!("secret '{id}'"))),
        }
    }
}
