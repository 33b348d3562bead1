/// In-memory asset storage
use super::{extension_for, AssetRef, AssetStorage, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Asset storage backed by a process-local map
#[derive(Debug, Default)]
pub struct MemoryAssetStorage {
    assets: RwLock<HashMap<AssetRef, Bytes>>,
}

impl MemoryAssetStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored assets
    pub async fn len(&self) -> usize {
        self.assets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.assets.read().await.is_empty()
    }
}

#[async_trait]
impl AssetStorage for MemoryAssetStorage {
    async fn put(&self, bytes: Bytes, content_type: &str) -> Result<AssetRef, StorageError> {
        let asset = AssetRef::new(format!(
            "mem://{}.{}",
            Uuid::new_v4(),
            extension_for(content_type)
        ));
        self.assets.write().await.insert(asset.clone(), bytes);
        Ok(asset)
    }

    async fn get(&self, asset: &AssetRef) -> Result<Bytes, StorageError> {
        self.assets
            .read()
            .await
            .get(asset)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(asset.clone()))
    }

    async fn delete(&self, asset: &AssetRef) -> Result<(), StorageError> {
        self.assets.write().await.remove(asset);
        Ok(())
    }
}
