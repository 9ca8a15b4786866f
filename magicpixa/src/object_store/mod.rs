//! Object storage for generated media and user uploads.
//!
//! Objects are written under owner-scoped keys:
//!
//! - `user/{userId}/{feature}/{fileId}.{ext}` for signed-in users
//! - `anonymous/{deviceId}/{feature}/{fileId}.{ext}` for anonymous devices
//!
//! Every backend returns a public URL for the stored object.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ObjectStorageConfig;
use crate::types::{DeviceId, UserId};

pub mod local;
pub mod s3;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Upload timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

/// Who a stored object belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectOwner {
    User(UserId),
    Anonymous(DeviceId),
}

#[derive(Debug, Clone)]
pub struct PutObject {
    pub key: String,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
    pub size: usize,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, replacing any existing object under the same key.
    async fn put(&self, object: PutObject) -> Result<StoredObject, StorageError>;
}

/// Raster image types accepted for uploads, job inputs and model outputs. Scriptable types such
/// as SVG are never stored.
const RASTER_IMAGE_TYPES: [(&str, &str); 6] = [
    ("image/jpeg", "jpg"),
    ("image/jpg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
    ("image/gif", "gif"),
    ("image/heic", "heic"),
];

pub fn is_raster_image(content_type: &str) -> bool {
    RASTER_IMAGE_TYPES.iter().any(|(mime, _)| *mime == content_type)
}

/// File extension used for a content type.
pub fn extension_for(content_type: &str) -> &'static str {
    match RASTER_IMAGE_TYPES.iter().find(|(mime, _)| *mime == content_type) {
        Some((_, ext)) => *ext,
        None => mime_guess::get_mime_extensions_str(content_type)
            .and_then(|exts| exts.first().copied())
            .unwrap_or("bin"),
    }
}

/// Build a fresh key for an object owned by `owner`.
pub fn object_key(owner: ObjectOwner, feature: &str, content_type: &str) -> String {
    let file_id = Uuid::new_v4();
    let ext = extension_for(content_type);
    match owner {
        ObjectOwner::User(user_id) => format!("user/{user_id}/{feature}/{file_id}.{ext}"),
        ObjectOwner::Anonymous(device_id) => format!("anonymous/{device_id}/{feature}/{file_id}.{ext}"),
    }
}

/// Reject keys that could escape the storage root.
pub(crate) fn check_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|segment| segment.is_empty() || segment == "..") {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

pub(crate) fn join_url(base: &url::Url, key: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), key)
}

/// Create the configured object store.
pub async fn create_object_store(config: &ObjectStorageConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match config {
        ObjectStorageConfig::Local(local_config) => Ok(Arc::new(local::LocalObjectStore::new(
            local_config.path.clone(),
            local_config.public_base_url.clone(),
        ))),
        ObjectStorageConfig::S3(s3_config) => Ok(Arc::new(s3::S3ObjectStore::from_config(s3_config).await)),
    }
}
