//! Local filesystem backend, served by this server under `/media`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use url::Url;

use super::{ObjectStore, PutObject, StorageError, StoredObject, check_key, join_url};

pub struct LocalObjectStore {
    base_path: PathBuf,
    public_base_url: Url,
}

impl LocalObjectStore {
    pub fn new(base_path: PathBuf, public_base_url: Url) -> Self {
        Self {
            base_path,
            public_base_url,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, object: PutObject) -> Result<StoredObject, StorageError> {
        check_key(&object.key)?;
        let full_path = self.base_path.join(&object.key);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&full_path).await?;
        file.write_all(&object.data).await?;
        file.sync_all().await?;

        tracing::debug!(key = %object.key, size = object.data.len(), "Stored object on local disk");

        Ok(StoredObject {
            url: join_url(&self.public_base_url, &object.key),
            size: object.data.len(),
            key: object.key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn writes_file_and_returns_public_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf(), Url::parse("http://localhost:3001/media/").unwrap());

        let stored = store
            .put(PutObject {
                key: "user/abc/enhance/out.png".to_string(),
                content_type: "image/png".to_string(),
                data: Bytes::from_static(b"png"),
            })
            .await
            .unwrap();

        assert_eq!(stored.url, "http://localhost:3001/media/user/abc/enhance/out.png");
        assert_eq!(stored.size, 3);
        let written = std::fs::read(dir.path().join("user/abc/enhance/out.png")).unwrap();
        assert_eq!(written, b"png");
    }

    #[tokio::test]
    async fn refuses_keys_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf(), Url::parse("http://localhost/media").unwrap());

        let err = store
            .put(PutObject {
                key: "../escape.png".to_string(),
                content_type: "image/png".to_string(),
                data: Bytes::from_static(b"png"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
