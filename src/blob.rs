//! Optional storage of original uploads in an S3-compatible bucket (Cloudflare R2).
//!
//! Every operation degrades instead of failing: an upload error yields no
//! key, a download error yields no bytes, a delete error yields `false`. The
//! analysis itself never depends on the blob store.

use crate::config::StorageConfig;
use crate::error::ExplainError;
use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ServerSideEncryption;
use aws_sdk_s3::Client as S3Client;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Concurrent deletes issued by [`BlobStore::delete_many`].
const DELETE_CONCURRENCY: usize = 8;

#[async_trait]
pub trait BlobStore: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Store `bytes` and return the object key.
    async fn upload(&self, bytes: &[u8], filename: &str, content_type: &str) -> Option<String>;

    async fn download(&self, key: &str) -> Option<Vec<u8>>;

    async fn delete(&self, key: &str) -> bool;

    /// Delete every key; returns how many deletes succeeded.
    async fn delete_many(&self, keys: &[String]) -> usize {
        let mut deleted = 0;
        for key in keys {
            if self.delete(key).await {
                deleted += 1;
            }
        }
        deleted
    }
}

/// Blob store used when object storage is off.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledBlobStore;

#[async_trait]
impl BlobStore for DisabledBlobStore {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn upload(&self, _bytes: &[u8], _filename: &str, _content_type: &str) -> Option<String> {
        None
    }

    async fn download(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    async fn delete(&self, _key: &str) -> bool {
        false
    }

    async fn delete_many(&self, _keys: &[String]) -> usize {
        0
    }
}

/// Object key for a new upload.
pub fn object_key(filename: &str) -> String {
    format!("documents/{}-{}", uuid::Uuid::new_v4(), filename)
}

/// R2 bucket accessed through the S3 API. Objects are written with
/// server-side encryption (`AES256`).
#[derive(Debug, Clone)]
pub struct R2BlobStore {
    client: S3Client,
    bucket: String,
}

impl R2BlobStore {
    pub async fn from_config(config: &StorageConfig) -> Result<Self, ExplainError> {
        config.validate()?;
        let endpoint = config
            .endpoint_url()
            .ok_or_else(|| ExplainError::BlobStorageMisconfigured {
                missing: "R2_ACCOUNT_ID".to_string(),
            })?;
        let credentials = Credentials::new(
            config.access_key_id.clone().unwrap_or_default(),
            config.secret_access_key.clone().unwrap_or_default(),
            None,
            None,
            "r2",
        );

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .endpoint_url(&endpoint)
            .region(Region::new("auto"))
            .credentials_provider(credentials)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        info!("Object storage enabled: bucket '{}' at {}", config.bucket, endpoint);
        Ok(Self::with_client(S3Client::from_conf(s3_config), &config.bucket))
    }

    pub fn with_client(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl BlobStore for R2BlobStore {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn upload(&self, bytes: &[u8], filename: &str, content_type: &str) -> Option<String> {
        let key = object_key(filename);
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(content_type)
            .server_side_encryption(ServerSideEncryption::Aes256)
            .metadata("original-filename", filename)
            .send()
            .await;
        match result {
            Ok(_) => {
                info!("Stored original '{}' as {}", filename, key);
                Some(key)
            }
            Err(e) => {
                error!("Upload of '{}' to object storage failed: {}", filename, e);
                None
            }
        }
    }

    async fn download(&self, key: &str) -> Option<Vec<u8>> {
        if key.is_empty() {
            return None;
        }
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                error!("Download of {} failed: {}", key, e);
                return None;
            }
        };
        match resp.body.collect().await {
            Ok(data) => {
                let bytes = data.into_bytes().to_vec();
                debug!("Downloaded {} ({} bytes)", key, bytes.len());
                Some(bytes)
            }
            Err(e) => {
                error!("Reading body of {} failed: {}", key, e);
                None
            }
        }
    }

    async fn delete(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => {
                debug!("Deleted {}", key);
                true
            }
            Err(e) => {
                error!("Delete of {} failed: {}", key, e);
                false
            }
        }
    }

    async fn delete_many(&self, keys: &[String]) -> usize {
        delete_concurrently(self, keys).await
    }
}

/// Delete `keys` from `store` with at most [`DELETE_CONCURRENCY`] requests in
/// flight; returns how many deletes succeeded.
async fn delete_concurrently<S>(store: &S, keys: &[String]) -> usize
where
    S: BlobStore + ?Sized,
{
    stream::iter(keys.iter().cloned())
        .map(|key| async move { store.delete(&key).await })
        .buffer_unordered(DELETE_CONCURRENCY)
        .fold(0usize, |n, ok| futures::future::ready(n + usize::from(ok)))
        .await
}

/// The blob store described by `config`: R2 when enabled, otherwise disabled.
pub async fn from_config(config: &StorageConfig) -> Result<Arc<dyn BlobStore>, ExplainError> {
    if !config.enabled {
        debug!("Object storage disabled");
        return Ok(Arc::new(DisabledBlobStore));
    }
    Ok(Arc::new(R2BlobStore::from_config(config).await?))
}
