//! Filesystem artifact sink.
//!
//! Stores artifacts under a local directory and hands out `file://` URLs.
//! Useful for local runs and for CI setups that archive a directory instead
//! of talking to object storage.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{ArtifactError, ArtifactResult, ArtifactSink};

#[derive(Debug, Clone)]
pub struct FsArtifactSink {
    root: PathBuf,
}

impl FsArtifactSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps `key` below the root, rejecting keys that would escape it.
    fn path_for(&self, key: &str) -> Option<PathBuf> {
        let relative = Path::new(key);
        relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
            .then(|| self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactSink for FsArtifactSink {
    async fn upload(&self, bytes: Vec<u8>, key: &str) -> ArtifactResult<()> {
        let path = self.path_for(key).ok_or_else(|| ArtifactError::Upload {
            key: key.to_string(),
            message: "key escapes the artifact directory".to_string(),
        })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    /// The returned URL carries the expiry as a query parameter; the file
    /// itself is not removed when it passes.
    async fn presign(&self, key: &str, ttl: Duration) -> ArtifactResult<String> {
        let path = self.path_for(key).ok_or_else(|| ArtifactError::Presign {
            key: key.to_string(),
            message: "key escapes the artifact directory".to_string(),
        })?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(ArtifactError::Presign {
                key: key.to_string(),
                message: "artifact does not exist".to_string(),
            });
        }

        let path = tokio::fs::canonicalize(&path).await?;
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = Utc::now().timestamp().saturating_add(ttl);
        Ok(format!("file://{}?expires={}", path.display(), expires))
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}
