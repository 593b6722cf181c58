use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `body` under `id`. An empty bucket name is a no-op.
    async fn put_object(&self, id: &str, bucket: &str, body: Bytes) -> Result<()>;
}

/// Writes objects to `<root>/<bucket>/<id>`.
pub struct FsObjectStore {
    pub root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }
}

fn is_plain_relative(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_)))
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put_object(&self, id: &str, bucket: &str, body: Bytes) -> Result<()> {
        if bucket.is_empty() {
            return Ok(());
        }
        if !is_plain_relative(Path::new(bucket)) || !is_plain_relative(Path::new(id)) {
            bail!("Invalid object path {bucket}/{id}");
        }
        let path = self.root.join(bucket).join(id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}
