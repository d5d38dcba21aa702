//! Outbound destination URIs
//!
//! | Scheme    | Target                        |
//! |-----------|-------------------------------|
//! | `s3`      | object store over TLS         |
//! | `https`   | object store over TLS         |
//! | `http`    | object store without TLS      |
//! | `webdav`  | WebDAV server over plain HTTP |
//! | `webdavs` | WebDAV server over HTTPS      |
//!
//! Object store destinations carry the endpoint host, the bucket (first path
//! segment) and an optional key prefix (the remaining segments). WebDAV
//! destinations carry their own credentials in the userinfo part.

use std::fmt;

use percent_encoding::percent_decode_str;
use url::Url;

use super::errors::DomainError;
use crate::config::Remote;

/// Where an object store client should connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name, or a full URL when the remote was configured with one.
    pub host: String,
    pub port: Option<u16>,
    pub secure: bool,
}

impl Endpoint {
    /// Endpoint for an inbound remote.
    pub fn for_remote(remote: &Remote) -> Self {
        Self {
            host: remote.endpoint.clone(),
            port: None,
            secure: remote.secure,
        }
    }

    /// Base URL for HTTP requests against this endpoint.
    pub fn url(&self) -> String {
        if self.host.contains("://") {
            return self.host.clone();
        }
        let scheme = if self.secure { "https" } else { "http" };
        match self.port {
            Some(port) => format!("{scheme}://{}:{port}", self.host),
            None => format!("{scheme}://{}", self.host),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Bucket and key prefix on an S3-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStoreTarget {
    pub endpoint: Endpoint,
    pub bucket: String,
    /// Key prefix without leading or trailing slashes; empty for none.
    pub prefix: String,
}

impl ObjectStoreTarget {
    /// Object key for a file uploaded to this target.
    pub fn key_for(&self, filename: &str) -> String {
        if self.prefix.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{filename}", self.prefix)
        }
    }
}

/// Collection on a WebDAV server.
#[derive(Clone, PartialEq, Eq)]
pub struct WebDavTarget {
    /// Server root (`http(s)://host[:port]/`) without credentials.
    pub base_url: Url,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Decoded collection path, always starting with `/`.
    pub path: String,
}

impl WebDavTarget {
    /// Remote path for a file uploaded into this collection.
    pub fn path_for(&self, filename: &str) -> String {
        format!("{}/{filename}", self.path.trim_end_matches('/'))
    }
}

impl fmt::Debug for WebDavTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDavTarget")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("path", &self.path)
            .finish()
    }
}

/// A parsed outbound destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    ObjectStore(ObjectStoreTarget),
    WebDav(WebDavTarget),
}

impl Destination {
    pub fn parse(uri: &str) -> Result<Self, DomainError> {
        let url = Url::parse(uri)
            .map_err(|e| DomainError::InvalidDestination(format!("{uri}: {e}")))?;

        match url.scheme() {
            "s3" | "https" => Self::object_store(&url, true),
            "http" => Self::object_store(&url, false),
            "webdav" => Self::webdav(&url, "http"),
            "webdavs" => Self::webdav(&url, "https"),
            other => Err(DomainError::UnsupportedScheme(other.to_string())),
        }
    }

    fn object_store(url: &Url, secure: bool) -> Result<Self, DomainError> {
        let host = required_host(url)?;

        let mut segments = decoded_segments(url)?.into_iter();
        let bucket = segments.next().ok_or_else(|| {
            DomainError::InvalidDestination(format!("{url}: missing bucket in path"))
        })?;
        let prefix = segments.collect::<Vec<_>>().join("/");

        Ok(Self::ObjectStore(ObjectStoreTarget {
            endpoint: Endpoint {
                host,
                port: url.port(),
                secure,
            },
            bucket,
            prefix,
        }))
    }

    fn webdav(url: &Url, http_scheme: &str) -> Result<Self, DomainError> {
        let host = required_host(url)?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        };
        let base_url = Url::parse(&format!("{http_scheme}://{authority}/"))
            .map_err(|e| DomainError::InvalidDestination(format!("{url}: {e}")))?;

        let username = match url.username() {
            "" => None,
            name => Some(decode(name)?),
        };
        let password = url.password().map(decode).transpose()?;

        let path = decode(url.path())?;
        let path = if path.is_empty() { "/".to_string() } else { path };

        Ok(Self::WebDav(WebDavTarget {
            base_url,
            username,
            password,
            path,
        }))
    }

    /// Host used to look up credentials, if this destination needs them.
    pub fn credential_host(&self) -> Option<&str> {
        match self {
            Self::ObjectStore(target) => Some(&target.endpoint.host),
            Self::WebDav(_) => None,
        }
    }
}

fn required_host(url: &Url) -> Result<String, DomainError> {
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(host.to_string()),
        _ => Err(DomainError::InvalidDestination(format!("{url}: missing host"))),
    }
}

fn decoded_segments(url: &Url) -> Result<Vec<String>, DomainError> {
    url.path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(decode)
        .collect()
}

fn decode(value: &str) -> Result<String, DomainError> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| DomainError::InvalidDestination(format!("'{value}' is not valid UTF-8")))
}
