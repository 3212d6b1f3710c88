//! Content-addressed on-disk artifact cache.
//!
//! Adapters memoize derived artifacts (a resized remote image, a transcoded
//! snippet) under `<root>/<sha256-of-source-ref>.<ext>`. Presence of the
//! file is the cache hit; there is no expiry. The read-through entry point
//! is [`ArtifactCache::store_with`], which only invokes the producer when
//! the artifact is absent.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use gridhub_core::errors::ModuleError;

/// Content-addressed artifact store rooted at one directory.
#[derive(Clone, Debug)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    /// Create a cache rooted at `root`. The directory is created lazily on
    /// first store.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The on-disk path an artifact for `source` would live at.
    #[must_use]
    pub fn path_for(&self, source: &str, ext: &str) -> PathBuf {
        let digest = Sha256::digest(source.as_bytes());
        let mut name = String::with_capacity(64 + 1 + ext.len());
        for byte in digest {
            name.push_str(&format!("{byte:02x}"));
        }
        if !ext.is_empty() {
            name.push('.');
            name.push_str(ext);
        }
        self.root.join(name)
    }

    /// Whether an artifact for `source` is already cached.
    pub async fn contains(&self, source: &str, ext: &str) -> bool {
        tokio::fs::try_exists(self.path_for(source, ext))
            .await
            .unwrap_or(false)
    }

    /// Read-through store: reuse the cached artifact if present, otherwise
    /// run `produce`, persist its bytes, and return the path.
    pub async fn store_with<F, Fut>(
        &self,
        source: &str,
        ext: &str,
        produce: F,
    ) -> Result<PathBuf, ModuleError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<u8>, ModuleError>>,
    {
        let path = self.path_for(source, ext);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(source, path = %path.display(), "artifact cache hit");
            return Ok(path);
        }

        let bytes = produce().await?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&path, &bytes).await?;
        debug!(source, path = %path.display(), len = bytes.len(), "artifact stored");
        Ok(path)
    }
}
