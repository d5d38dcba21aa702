//! WebDAV backend
//!
//! A minimal WebDAV client over `reqwest`, covering what the pipelines need:
//!
//! | Operation | Method            |
//! |-----------|-------------------|
//! | put       | MKCOL (parents), PUT |
//! | get       | GET               |
//! | exists    | HEAD              |
//! | delete    | DELETE            |
//! | list      | PROPFIND, Depth 1 |
//!
//! Object keys are server paths such as `/files/out/report.csv`; the bucket of
//! an [`ObjectRef`] is ignored.

use anyhow::{anyhow, bail, Context, Result};
use aws_smithy_xml::decode::{try_data, Document, ScopedDecoder};
use bucketsync_core::domain::WebDavTarget;
use bucketsync_core::ports::{ObjectReader, ObjectRef, StorageBackend};
use futures_util::TryStreamExt;
use percent_encoding::percent_decode_str;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, Method, RequestBuilder, StatusCode};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};
use url::Url;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<d:propfind xmlns:d="DAV:"><d:prop><d:resourcetype/></d:prop></d:propfind>"#;

/// WebDAV client bound to one server and credential pair.
#[derive(Clone)]
pub struct WebDavBackend {
    client: Client,
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for WebDavBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDavBackend")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl WebDavBackend {
    pub fn new(target: &WebDavTarget) -> Self {
        Self::with_client(Client::new(), target)
    }

    /// Shares an existing connection pool.
    pub fn with_client(client: Client, target: &WebDavTarget) -> Self {
        Self {
            client,
            base_url: target.base_url.clone(),
            username: target.username.clone(),
            password: target.password.clone(),
        }
    }

    /// Absolute URL for a server path. Collections get a trailing slash.
    fn url_for(&self, path: &str, collection: bool) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("WebDAV base URL '{}' cannot hold a path", self.base_url))?;
            segments.clear();
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
            if collection {
                segments.push("");
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        }
    }

    /// Creates every collection on the way to `dir`. Failures are logged and
    /// otherwise ignored; the following PUT reports the real problem.
    async fn ensure_collections(&self, dir: &str) {
        let mkcol = match Method::from_bytes(b"MKCOL") {
            Ok(method) => method,
            Err(e) => {
                warn!(error = %e, "Cannot build MKCOL method");
                return;
            }
        };

        let mut current = String::new();
        for segment in dir.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);

            let url = match self.url_for(&current, true) {
                Ok(url) => url,
                Err(e) => {
                    warn!(remote_dir = %current, error = %e, "Cannot build collection URL");
                    return;
                }
            };
            match self.request(mkcol.clone(), url).send().await {
                // 405: the collection already exists
                Ok(resp)
                    if resp.status().is_success()
                        || resp.status() == StatusCode::METHOD_NOT_ALLOWED => {}
                Ok(resp) => warn!(
                    remote_dir = %current,
                    status = %resp.status(),
                    "Failed to create remote directory, continuing anyway"
                ),
                Err(e) => warn!(
                    remote_dir = %current,
                    error = %e,
                    "Failed to create remote directory, continuing anyway"
                ),
            }
        }
    }
}

#[async_trait::async_trait]
impl StorageBackend for WebDavBackend {
    async fn put(&self, object: &ObjectRef, file: tokio::fs::File, size: u64) -> Result<u64> {
        if let Some((parent, _)) = object.key.rsplit_once('/') {
            if !parent.is_empty() {
                self.ensure_collections(parent).await;
            }
        }

        let url = self.url_for(&object.key, false)?;
        debug!(url = %url, size, "Uploading to WebDAV");

        self.request(Method::PUT, url)
            .header(CONTENT_LENGTH, size)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .with_context(|| format!("Failed to send PUT {object}"))?
            .error_for_status()
            .with_context(|| format!("PUT {object} returned error status"))?;

        Ok(size)
    }

    async fn get(&self, object: &ObjectRef) -> Result<ObjectReader> {
        let url = self.url_for(&object.key, false)?;

        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .with_context(|| format!("Failed to send GET {object}"))?
            .error_for_status()
            .with_context(|| format!("GET {object} returned error status"))?;

        if let Some(size) = response.content_length() {
            let stream = response.bytes_stream().map_err(std::io::Error::other);
            return Ok(ObjectReader {
                size,
                body: Box::pin(StreamReader::new(stream)),
            });
        }

        // No Content-Length (chunked): the size is only known once read
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read GET {object} body"))?;
        Ok(ObjectReader {
            size: bytes.len() as u64,
            body: Box::pin(std::io::Cursor::new(bytes)),
        })
    }

    async fn exists(&self, object: &ObjectRef) -> Result<bool> {
        let url = self.url_for(&object.key, false)?;
        let response = self
            .request(Method::HEAD, url)
            .send()
            .await
            .with_context(|| format!("Failed to send HEAD {object}"))?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(anyhow!("HEAD {object} returned {s}")),
        }
    }

    async fn delete(&self, object: &ObjectRef) -> Result<()> {
        let url = self.url_for(&object.key, false)?;
        let response = self
            .request(Method::DELETE, url)
            .send()
            .await
            .with_context(|| format!("Failed to send DELETE {object}"))?;

        match response.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(()),
            s => Err(anyhow!("DELETE {object} returned {s}")),
        }
    }

    /// Files directly inside the collection `prefix`, as decoded server paths.
    async fn list(&self, _bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let url = self.url_for(prefix, true)?;
        let method = Method::from_bytes(b"PROPFIND").context("Invalid PROPFIND method")?;

        let body = self
            .request(method, url)
            .header("Depth", "1")
            .header(CONTENT_TYPE, "application/xml")
            .body(PROPFIND_BODY)
            .send()
            .await
            .with_context(|| format!("Failed to send PROPFIND {prefix}"))?
            .error_for_status()
            .with_context(|| format!("PROPFIND {prefix} returned error status"))?
            .text()
            .await
            .context("Failed to read PROPFIND response")?;

        let files = parse_multistatus(&body)?
            .into_iter()
            .filter(|entry| !entry.is_collection)
            .map(|entry| href_to_path(&entry.href))
            .collect::<Result<Vec<_>>>()?;

        Ok(files)
    }
}

// ============================================================================
// PROPFIND response parsing
// ============================================================================

#[derive(Debug, Default, PartialEq, Eq)]
struct PropEntry {
    href: String,
    is_collection: bool,
}

/// Extracts `href` and collection flag of every `response` in a
/// `multistatus` document. Namespace prefixes are ignored; entity and
/// character references in `href` are resolved by the decoder.
fn parse_multistatus(xml: &str) -> Result<Vec<PropEntry>> {
    let mut doc = Document::new(xml);
    let mut root = doc
        .root_element()
        .context("Malformed PROPFIND response")?;
    if root.start_el().local() != "multistatus" {
        bail!(
            "PROPFIND response root is <{}>, expected <multistatus>",
            root.start_el().local()
        );
    }

    let mut entries = Vec::new();
    while let Some(mut response) = root.next_tag() {
        if response.start_el().local() == "response" {
            entries.push(parse_response(&mut response)?);
        }
    }
    Ok(entries)
}

fn parse_response(response: &mut ScopedDecoder<'_, '_>) -> Result<PropEntry> {
    let mut entry = PropEntry::default();
    while let Some(mut tag) = response.next_tag() {
        match tag.start_el().local() {
            "href" => {
                entry.href = try_data(&mut tag)
                    .context("Malformed href in PROPFIND response")?
                    .into_owned();
            }
            "propstat" => entry.is_collection |= contains_collection(&mut tag),
            _ => {}
        }
    }
    Ok(entry)
}

/// True when a `collection` element appears anywhere below `scope`.
fn contains_collection(scope: &mut ScopedDecoder<'_, '_>) -> bool {
    let mut found = false;
    while let Some(mut tag) = scope.next_tag() {
        if tag.start_el().local() == "collection" || contains_collection(&mut tag) {
            found = true;
        }
    }
    found
}

/// Servers answer with either absolute URLs or absolute paths.
fn href_to_path(href: &str) -> Result<String> {
    let href = href.trim();
    let raw_path = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    percent_decode_str(&raw_path)
        .decode_utf8()
        .map(|p| p.into_owned())
        .with_context(|| format!("href '{href}' is not valid UTF-8"))
}
