/// Local filesystem asset storage
///
/// Each asset is one file named `<uuid>.<ext>` directly under the root
/// directory. The asset reference is the file name, so references can never
/// point outside the root.
use super::{extension_for, AssetRef, AssetStorage, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Asset storage rooted at a local directory
#[derive(Debug, Clone)]
pub struct FsAssetStorage {
    root: PathBuf,
}

impl FsAssetStorage {
    /// Opens (and creates if needed) the storage root
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Opened filesystem asset storage");
        Ok(Self { root })
    }

    fn path_for(&self, asset: &AssetRef) -> Result<PathBuf, StorageError> {
        let name = asset.as_str();
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');

        if !valid {
            return Err(StorageError::InvalidRef(asset.clone()));
        }

        Ok(self.root.join(name))
    }
}

#[async_trait]
impl AssetStorage for FsAssetStorage {
    async fn put(&self, bytes: Bytes, content_type: &str) -> Result<AssetRef, StorageError> {
        let asset = AssetRef::new(format!("{}.{}", Uuid::new_v4(), extension_for(content_type)));
        let path = self.path_for(&asset)?;
        tokio::fs::write(&path, &bytes).await?;
        debug!(asset = %asset, size = bytes.len(), "Stored asset");
        Ok(asset)
    }

    async fn get(&self, asset: &AssetRef) -> Result<Bytes, StorageError> {
        let path = self.path_for(asset)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(asset.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, asset: &AssetRef) -> Result<(), StorageError> {
        let path = self.path_for(asset)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
