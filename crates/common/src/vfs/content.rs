//! Content-addressed storage for file bytes.
//!
//! Nodes only carry a [`ContentHash`]; the bytes themselves live behind a
//! [`ContentStore`]. Identical uploads share a single blob.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// BLAKE3 digest of a blob, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(data: &[u8]) -> Self {
        Self(blake3::hash(data).to_hex().to_string())
    }

    pub fn from_hex(hex_str: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != blake3::OUT_LEN {
            anyhow::bail!("content hash must be {} bytes", blake3::OUT_LEN);
        }
        Ok(Self(hex_str.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `data`, returning its hash. Storing the same bytes twice is a
    /// no-op.
    async fn put(&self, data: Bytes) -> anyhow::Result<ContentHash>;

    async fn get(&self, hash: &ContentHash) -> anyhow::Result<Option<Bytes>>;
}

/// Keeps every blob in memory. Used by tests and ephemeral engines.
#[derive(Debug, Clone, Default)]
pub struct MemoryContentStore {
    blobs: Arc<RwLock<HashMap<ContentHash, Bytes>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, data: Bytes) -> anyhow::Result<ContentHash> {
        let hash = ContentHash::of(&data);
        self.blobs.write().entry(hash.clone()).or_insert(data);
        Ok(hash)
    }

    async fn get(&self, hash: &ContentHash) -> anyhow::Result<Option<Bytes>> {
        Ok(self.blobs.read().get(hash).cloned())
    }
}
