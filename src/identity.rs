//! Caller identity for rate limiting.
//!
//! Identities are opaque `user_<16 hex>` strings. Strategies are tried in
//! order; the first that yields an identity wins, otherwise the resolver
//! falls back to a random identity persisted in a local file. This is an
//! abuse deterrent, not authentication.

use crate::session::ClientInfo;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Derive an identity from request metadata.
pub trait IdentityStrategy: Send + Sync {
    fn identify(&self, client: &ClientInfo) -> Option<String>;
}

fn hashed_identity(material: &str) -> String {
    let digest = Sha256::digest(material.as_bytes());
    format!("user_{}", &hex::encode(digest)[..16])
}

/// Hash of a request header, e.g. `x-forwarded-for`.
#[derive(Debug, Clone)]
pub struct HeaderIdentity {
    header: String,
}

impl HeaderIdentity {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl IdentityStrategy for HeaderIdentity {
    fn identify(&self, client: &ClientInfo) -> Option<String> {
        let value = client.header(&self.header)?.trim();
        // First hop of a forwarded chain.
        let value = value.split(',').next().unwrap_or(value).trim();
        (!value.is_empty()).then(|| hashed_identity(&format!("{}:{}", self.header, value)))
    }
}

/// Hash of the session token.
#[derive(Debug, Clone, Default)]
pub struct SessionTokenIdentity;

impl IdentityStrategy for SessionTokenIdentity {
    fn identify(&self, client: &ClientInfo) -> Option<String> {
        client
            .session_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| hashed_identity(&format!("session:{t}")))
    }
}

/// Random identity persisted to a file, created on first use.
#[derive(Debug)]
pub struct AnonymousIdentity {
    path: PathBuf,
    cached: OnceLock<String>,
}

impl AnonymousIdentity {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> String {
        self.cached.get_or_init(|| load_or_create(&self.path)).clone()
    }
}

fn load_or_create(path: &Path) -> String {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let id = existing.trim();
        if !id.is_empty() {
            debug!("Loaded anonymous identity from {}", path.display());
            return id.to_string();
        }
    }

    let id = format!("user_{}", &uuid::Uuid::new_v4().simple().to_string()[..16]);
    if let Err(e) = std::fs::write(path, &id) {
        warn!(
            "Could not persist identity to {}: {} (limits will reset on restart)",
            path.display(),
            e
        );
    }
    id
}

/// Ordered strategies with a persistent anonymous fallback.
pub struct IdentityResolver {
    strategies: Vec<Box<dyn IdentityStrategy>>,
    fallback: AnonymousIdentity,
}

impl IdentityResolver {
    pub fn new(fallback: AnonymousIdentity) -> Self {
        Self {
            strategies: Vec::new(),
            fallback,
        }
    }

    /// Header, then session token, then the anonymous file at `user_id_path`.
    pub fn standard(user_id_path: impl Into<PathBuf>) -> Self {
        Self::new(AnonymousIdentity::new(user_id_path))
            .with_strategy(HeaderIdentity::new("x-forwarded-for"))
            .with_strategy(SessionTokenIdentity)
    }

    pub fn with_strategy(mut self, strategy: impl IdentityStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn resolve(&self, client: &ClientInfo) -> String {
        self.strategies
            .iter()
            .find_map(|s| s.identify(client))
            .unwrap_or_else(|| self.fallback.get())
    }
}
