//! S3-compatible object store backend
//!
//! Talks to AWS S3 or any compatible store (MinIO, Ceph RGW, ...) with static
//! credentials from a configured remote. Requests use path-style addressing
//! so bare host names and IP endpoints work without wildcard DNS.

use anyhow::{anyhow, Context, Result};
use aws_sdk_s3::config::{
    BehaviorVersion, Builder, Credentials, Region, RequestChecksumCalculation,
    ResponseChecksumValidation,
};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::Client;
use bucketsync_core::config::Remote;
use bucketsync_core::domain::Endpoint;
use bucketsync_core::ports::{ObjectReader, ObjectRef, StorageBackend};
use tracing::debug;
use url::Url;

/// Provider name attached to the static credentials.
const CREDENTIALS_PROVIDER: &str = "bucketsyncd";

/// Object store client bound to one endpoint and credential set.
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: Client,
    endpoint: String,
}

impl S3Backend {
    /// Builds a client for `endpoint` signing requests with `remote`'s keys.
    pub fn new(endpoint: &Endpoint, remote: &Remote) -> Result<Self> {
        let endpoint_url = endpoint.url();
        Url::parse(&endpoint_url)
            .with_context(|| format!("Invalid object store endpoint '{endpoint_url}'"))?;

        let credentials = Credentials::new(
            remote.access_key.clone(),
            remote.secret_key.clone(),
            None,
            None,
            CREDENTIALS_PROVIDER,
        );

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(remote.region.clone()))
            .endpoint_url(endpoint_url.clone())
            .credentials_provider(credentials)
            .force_path_style(true)
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .build();

        debug!(endpoint = %endpoint_url, remote = %remote.name, "Created object store client");

        Ok(Self {
            client: Client::from_conf(config),
            endpoint: endpoint_url,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl StorageBackend for S3Backend {
    async fn put(&self, object: &ObjectRef, file: tokio::fs::File, size: u64) -> Result<u64> {
        let body = ByteStream::read_from()
            .file(file)
            .length(Length::Exact(size))
            .build()
            .await
            .context("Failed to prepare upload body")?;

        let content_length =
            i64::try_from(size).context("Object too large for a single PUT request")?;

        self.client
            .put_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .content_length(content_length)
            .body(body)
            .send()
            .await
            .map_err(|e| anyhow!("PUT {object} failed: {}", DisplayErrorContext(&e)))?;

        Ok(size)
    }

    async fn get(&self, object: &ObjectRef) -> Result<ObjectReader> {
        let output = self
            .client
            .get_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
            .map_err(|e| anyhow!("GET {object} failed: {}", DisplayErrorContext(&e)))?;

        let size = output
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| anyhow!("GET {object} returned no content length"))?;

        Ok(ObjectReader {
            size,
            body: Box::pin(output.body.into_async_read()),
        })
    }

    async fn exists(&self, object: &ObjectRef) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e.as_service_error().is_some_and(|se| se.is_not_found())
                    || e.raw_response().is_some_and(|r| r.status().as_u16() == 404);
                if not_found {
                    Ok(false)
                } else {
                    Err(anyhow!("HEAD {object} failed: {}", DisplayErrorContext(&e)))
                }
            }
        }
    }

    async fn delete(&self, object: &ObjectRef) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
            .map_err(|e| anyhow!("DELETE {object} failed: {}", DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| {
                    anyhow!("LIST {bucket}/{prefix} failed: {}", DisplayErrorContext(&e))
                })?;

            keys.extend(page.contents().iter().filter_map(|o| o.key().map(str::to_string)));

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }
}
