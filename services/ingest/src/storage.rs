use crate::config::StorageConfig;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors returned by an [`ObjectStore`].
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload of {key} failed (status {status:?}): {message}")]
    Request {
        key: String,
        status: Option<u16>,
        message: String,
    },

    #[error("upload of {key} returned no version id")]
    MissingVersionId { key: String },
}

/// Durable byte storage keyed by path-like strings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key` and return the version id the store assigned.
    async fn put(&self, key: &str, body: Bytes, content_type: &str)
        -> Result<String, StorageError>;
}

/// Object key for a raw upload.
/// Format: events/{event_id}/{user_id}/raw/{file_name}
pub fn raw_object_key(event_id: &str, user_id: &str, file_name: &str) -> String {
    format!("events/{event_id}/{user_id}/raw/{file_name}")
}

/// S3-compatible store (Backblaze B2, MinIO, AWS) using static credentials.
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Create a new S3 store
    pub async fn new(config: &StorageConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "image-ingest-static",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = config.endpoint_url.as_deref().unwrap_or("default"),
            "S3 object store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, body), fields(bucket = %self.bucket, size_bytes = body.len()))]
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError> {
        debug!(key = %key, content_type = %content_type, "Uploading object");

        // The SDK turns any non-2xx response into an error; PutObject answers 200 on success.
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                let status = e.raw_response().map(|r| r.status().as_u16());
                warn!(key = %key, status = ?status, "PutObject failed");
                StorageError::Request {
                    key: key.to_string(),
                    status,
                    message: DisplayErrorContext(&e).to_string(),
                }
            })?;

        let version_id = output
            .version_id()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| StorageError::MissingVersionId {
                key: key.to_string(),
            })?;

        info!(key = %key, version_id = %version_id, "Object uploaded");

        Ok(version_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_object_key() {
        assert_eq!(
            raw_object_key("1089", "j8NCXEn4", "photo1.jpg"),
            "events/1089/j8NCXEn4/raw/photo1.jpg"
        );
    }

    #[test]
    fn test_error_messages_name_the_key() {
        let err = StorageError::MissingVersionId {
            key: "events/1/u/raw/a.png".to_string(),
        };
        assert!(err.to_string().contains("events/1/u/raw/a.png"));

        let err = StorageError::Request {
            key: "k".to_string(),
            status: Some(503),
            message: "slow down".to_string(),
        };
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_s3_store_builds_from_config() {
        let config = StorageConfig {
            bucket: "test-bucket".to_string(),
            endpoint_url: Some("http://127.0.0.1:9000".to_string()),
            region: "us-west-004".to_string(),
            access_key_id: "id".to_string(),
            secret_access_key: "secret".to_string(),
            force_path_style: true,
        };
        let store = S3ObjectStore::new(&config).await;
        assert_eq!(store.bucket(), "test-bucket");
    }
}
