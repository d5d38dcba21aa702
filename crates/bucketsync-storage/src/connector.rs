//! Production [`StorageConnector`].

use std::sync::Arc;

use anyhow::Result;
use bucketsync_core::config::Remote;
use bucketsync_core::domain::{Endpoint, WebDavTarget};
use bucketsync_core::ports::{StorageBackend, StorageConnector};
use reqwest::Client;

use crate::s3::S3Backend;
use crate::webdav::WebDavBackend;

/// Builds S3 and WebDAV backends. WebDAV backends share one HTTP connection
/// pool; each S3 backend owns its SDK client.
#[derive(Debug, Clone, Default)]
pub struct DefaultStorageConnector {
    http: Client,
}

impl DefaultStorageConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StorageConnector for DefaultStorageConnector {
    async fn object_store(
        &self,
        endpoint: &Endpoint,
        remote: &Remote,
    ) -> Result<Arc<dyn StorageBackend>> {
        Ok(Arc::new(S3Backend::new(endpoint, remote)?))
    }

    async fn webdav(&self, target: &WebDavTarget) -> Result<Arc<dyn StorageBackend>> {
        Ok(Arc::new(WebDavBackend::with_client(self.http.clone(), target)))
    }
}
