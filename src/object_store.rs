use crate::config::S3Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client as S3Client;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Largest batch the S3 DeleteObjects call accepts.
pub const MAX_DELETE_BATCH: usize = 1000;

/// Bucket-scoped object storage capability.
///
/// Every component takes this trait rather than an SDK client so tests can
/// substitute fakes and the bucket stays a construction-time concern.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, overwriting any previous content under the key.
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    /// Fetch an object's bytes.
    async fn fetch_object(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete a single object. Deleting a missing key is not an error.
    async fn delete_object(&self, key: &str) -> Result<()>;

    /// List every key under `prefix`, following continuation tokens until the
    /// store reports no more pages.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete up to [`MAX_DELETE_BATCH`] objects in one request.
    async fn delete_objects(&self, keys: Vec<String>) -> Result<()>;

    /// Generate a fresh time-limited read URL for an object. URLs are never
    /// persisted; callers mint them per request.
    async fn presigned_get_url(&self, key: &str) -> Result<String>;
}

/// S3-backed object store for photos and thumbnails
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    presign_expiry: Duration,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            presign_expiry: Duration::from_secs(config.presigned_url_expiry_secs),
        })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, body), fields(key = %key, size_bytes = body.len()))]
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .context("Failed to write object to S3")?;

        debug!(key = %key, "Object written");
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn fetch_object(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("Failed to fetch object from S3")?;

        let bytes = response
            .body
            .collect()
            .await
            .context("Failed to read object body")?;

        Ok(bytes.into_bytes().to_vec())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("Failed to delete object from S3")?;

        debug!(key = %key, "Object deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request.send().await.context("Failed to list objects")?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(String::from)),
            );

            match response.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(prefix = %prefix, count = keys.len(), "Listed objects");
        Ok(keys)
    }

    #[instrument(skip(self, keys), fields(count = keys.len()))]
    async fn delete_objects(&self, keys: Vec<String>) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let identifiers = keys
            .into_iter()
            .map(|key| {
                ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .context("Invalid object identifier")
            })
            .collect::<Result<Vec<_>>>()?;

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .build()
            .context("Failed to build delete request")?;

        let response = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .context("Failed to batch-delete objects from S3")?;

        // DeleteObjects reports per-key failures in a 200 response.
        check_delete_errors(response.errors())
    }

    async fn presigned_get_url(&self, key: &str) -> Result<String> {
        let presigning_config = PresigningConfig::expires_in(self.presign_expiry)
            .context("Failed to create presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .context("Failed to generate presigned URL")?;

        Ok(presigned.uri().to_string())
    }
}

/// Turn the per-key error list of a DeleteObjects response into a failure
/// naming every key that was not removed.
fn check_delete_errors(errors: &[aws_sdk_s3::types::Error]) -> Result<()> {
    if errors.is_empty() {
        return Ok(());
    }

    let failed: Vec<String> = errors
        .iter()
        .map(|e| {
            format!(
                "{} ({})",
                e.key().unwrap_or("<unknown key>"),
                e.code().unwrap_or("unknown error")
            )
        })
        .collect();

    anyhow::bail!(
        "batch delete left {} objects in place: {}",
        errors.len(),
        failed.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::types::Error as S3Error;

    #[test]
    fn test_check_delete_errors_accepts_clean_response() {
        assert!(check_delete_errors(&[]).is_ok());
    }

    #[test]
    fn test_check_delete_errors_names_failed_keys() {
        let errors = vec![
            S3Error::builder()
                .key("u1/photos/a.jpg")
                .code("AccessDenied")
                .build(),
            S3Error::builder().key("u1/photos/b.jpg").build(),
        ];

        let message = check_delete_errors(&errors).unwrap_err().to_string();
        assert!(message.contains("2 objects"));
        assert!(message.contains("u1/photos/a.jpg (AccessDenied)"));
        assert!(message.contains("u1/photos/b.jpg"));
    }
}
