/// Asset storage
///
/// Original and enhanced images are kept outside the database behind the
/// `AssetStorage` trait. The core only ever sees an opaque `AssetRef`.
///
/// # Backends
///
/// - `memory`: process-local map, used by tests and local development
/// - `fs`: one file per asset under a root directory
///
/// # Example
///
/// ```
/// use retouch_shared::storage::{AssetStorage, MemoryAssetStorage};
/// use bytes::Bytes;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = MemoryAssetStorage::new();
/// let asset = storage.put(Bytes::from_static(b"\xFF\xD8\xFF"), "image/jpeg").await?;
/// let bytes = storage.get(&asset).await?;
/// assert_eq!(bytes.len(), 3);
/// # Ok(())
/// # }
/// ```

pub mod fs;
pub mod memory;

pub use fs::FsAssetStorage;
pub use memory::MemoryAssetStorage;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque reference to a stored asset
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(String);

impl AssetRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AssetRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Asset storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Asset not found: {0}")]
    NotFound(AssetRef),

    #[error("Invalid asset reference: {0}")]
    InvalidRef(AssetRef),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blob store for image assets
#[async_trait]
pub trait AssetStorage: Send + Sync {
    /// Stores `bytes` and returns a reference to them
    async fn put(&self, bytes: Bytes, content_type: &str) -> Result<AssetRef, StorageError>;

    /// Loads a stored asset
    async fn get(&self, asset: &AssetRef) -> Result<Bytes, StorageError>;

    /// Removes a stored asset
    ///
    /// Deleting an asset that does not exist succeeds.
    async fn delete(&self, asset: &AssetRef) -> Result<(), StorageError>;
}

/// File extension used for a content type
pub(crate) fn extension_for(content_type: &str) -> &'static str {
    match crate::media::ImageFormat::from_content_type(content_type) {
        Some(crate::media::ImageFormat::Jpeg) => "jpg",
        Some(crate::media::ImageFormat::Png) => "png",
        Some(crate::media::ImageFormat::Webp) => "webp",
        None => "bin",
    }
}
