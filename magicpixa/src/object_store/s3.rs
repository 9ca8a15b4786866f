//! S3-compatible bucket backend.
//!
//! Credentials and (unless configured) the region come from the standard AWS provider chain:
//! `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, profiles, instance metadata and so on.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{Client, config::Region, primitives::ByteStream};
use url::Url;

use super::{ObjectStore, PutObject, StorageError, StoredObject, check_key, join_url};
use crate::config::S3StorageConfig;

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    public_base_url: Url,
}

impl S3ObjectStore {
    pub async fn from_config(config: &S3StorageConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            public_base_url: config.public_base_url.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, object: PutObject) -> Result<StoredObject, StorageError> {
        check_key(&object.key)?;
        let size = object.data.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object.key)
            .content_type(&object.content_type)
            .body(ByteStream::from(object.data))
            .send()
            .await
            .map_err(|e| StorageError::Upload(aws_sdk_s3::error::DisplayErrorContext(e).to_string()))?;

        tracing::debug!(bucket = %self.bucket, key = %object.key, size, "Stored object in bucket");

        Ok(StoredObject {
            url: join_url(&self.public_base_url, &object.key),
            size,
            key: object.key,
        })
    }
}
