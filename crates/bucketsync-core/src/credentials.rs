//! Credential resolution
//!
//! Outbound workflows find credentials by the host of their destination URI;
//! inbound workflows name their remote explicitly. Both lookups are read-only
//! over the remotes loaded at startup, so the resolver is shared through an
//! `Arc` without any locking.

use std::sync::Arc;

use crate::config::Remote;

#[derive(Debug, Clone, Default)]
pub struct CredentialResolver {
    remotes: Arc<[Remote]>,
}

impl CredentialResolver {
    pub fn new(remotes: Vec<Remote>) -> Self {
        Self {
            remotes: remotes.into(),
        }
    }

    /// First remote whose `endpoint` equals `host` exactly (case-sensitive).
    pub fn by_endpoint_host(&self, host: &str) -> Option<&Remote> {
        self.remotes.iter().find(|r| r.endpoint == host)
    }

    /// First remote called `name`.
    pub fn by_name(&self, name: &str) -> Option<&Remote> {
        self.remotes.iter().find(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.remotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }
}
