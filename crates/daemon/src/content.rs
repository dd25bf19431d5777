//! Content-addressed blob storage on top of `object_store`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;

use common::vfs::{ContentHash, ContentStore};

#[derive(Debug, Clone)]
pub struct ObjectContentStore {
    inner: Arc<dyn ObjectStore>,
}

impl ObjectContentStore {
    /// Store blobs under `path` on the local filesystem.
    pub fn local(path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(path)?;
        let store = LocalFileSystem::new_with_prefix(path)?;
        Ok(Self {
            inner: Arc::new(store),
        })
    }

    pub fn memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
        }
    }

    fn data_path(hash: &ContentHash) -> ObjectPath {
        ObjectPath::from(format!("data/{}", hash))
    }
}

#[async_trait]
impl ContentStore for ObjectContentStore {
    async fn put(&self, data: Bytes) -> anyhow::Result<ContentHash> {
        let hash = ContentHash::of(&data);
        let path = Self::data_path(&hash);

        match self.inner.head(&path).await {
            Ok(_) => {
                tracing::trace!(%hash, "blob already stored");
                return Ok(hash);
            }
            Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        self.inner.put(&path, data.into()).await?;
        Ok(hash)
    }

    async fn get(&self, hash: &ContentHash) -> anyhow::Result<Option<Bytes>> {
        let path = Self::data_path(hash);
        match self.inner.get(&path).await {
            Ok(result) => {
                let bytes = result.bytes().await?;
                Ok(Some(bytes))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
