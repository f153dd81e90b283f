//! # External Collaborators
//!
//! Interfaces the channel consumes but does not implement: where credentials
//! come from, where invalidations go, and what the host environment says
//! about visibility and feature flags.
//!
//! Each trait ships with a small implementation so the channel can run
//! standalone (see `apps/listen`) and be tested without globals.

use chorewheel_core::CacheKey;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

use crate::error::{RealtimeError, RealtimeResult};

// =============================================================================
// Credentials
// =============================================================================

/// Supplies the token and endpoint the channel authenticates with.
pub trait CredentialProvider: Send + Sync {
    /// Current bearer token, if any.
    fn token(&self) -> Option<String>;

    /// True if the token is present and not expired.
    fn is_valid(&self) -> bool;

    /// Base API endpoint the transport paths are appended to.
    fn endpoint(&self) -> Option<Url>;

    /// Tenant / partition identifier, when the server needs one.
    fn tenant_id(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Default)]
struct StoredToken {
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory credentials that the embedding app updates on login/refresh.
#[derive(Debug)]
pub struct StaticCredentials {
    endpoint: Option<Url>,
    tenant_id: Option<String>,
    token: RwLock<StoredToken>,
}

impl StaticCredentials {
    pub fn new(endpoint: Url, token: impl Into<String>) -> Self {
        StaticCredentials {
            endpoint: Some(endpoint),
            tenant_id: None,
            token: RwLock::new(StoredToken {
                token: Some(token.into()),
                expires_at: None,
            }),
        }
    }

    /// Credentials with nothing configured; never valid.
    pub fn empty() -> Self {
        StaticCredentials {
            endpoint: None,
            tenant_id: None,
            token: RwLock::new(StoredToken::default()),
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_expiry(self, expires_at: DateTime<Utc>) -> Self {
        if let Ok(mut stored) = self.token.write() {
            stored.expires_at = Some(expires_at);
        }
        self
    }

    /// Builds credentials from the environment.
    ///
    /// `CHOREWHEEL_API_URL` and `CHOREWHEEL_TOKEN` are required;
    /// `CHOREWHEEL_TENANT_ID` and `CHOREWHEEL_TOKEN_EXPIRES_AT` (RFC 3339) are
    /// optional.
    pub fn from_env() -> RealtimeResult<Self> {
        let endpoint = std::env::var("CHOREWHEEL_API_URL").map_err(|_| {
            RealtimeError::InvalidConfig("CHOREWHEEL_API_URL is not set".into())
        })?;
        let token = std::env::var("CHOREWHEEL_TOKEN")
            .map_err(|_| RealtimeError::InvalidConfig("CHOREWHEEL_TOKEN is not set".into()))?;

        let mut credentials = StaticCredentials::new(Url::parse(&endpoint)?, token);

        if let Ok(tenant) = std::env::var("CHOREWHEEL_TENANT_ID") {
            credentials = credentials.with_tenant(tenant);
        }

        if let Ok(raw) = std::env::var("CHOREWHEEL_TOKEN_EXPIRES_AT") {
            let expires_at = DateTime::parse_from_rfc3339(&raw).map_err(|e| {
                RealtimeError::InvalidConfig(format!("CHOREWHEEL_TOKEN_EXPIRES_AT: {}", e))
            })?;
            credentials = credentials.with_expiry(expires_at.with_timezone(&Utc));
        }

        Ok(credentials)
    }

    /// Replaces the token after a login or refresh.
    pub fn set_token(&self, token: impl Into<String>, expires_at: Option<DateTime<Utc>>) {
        if let Ok(mut stored) = self.token.write() {
            stored.token = Some(token.into());
            stored.expires_at = expires_at;
        }
    }

    /// Forgets the token (logout).
    pub fn clear(&self) {
        if let Ok(mut stored) = self.token.write() {
            *stored = StoredToken::default();
        }
    }

    /// Seconds until the token expires; `None` if it never does or is missing.
    pub fn remaining_secs(&self) -> Option<i64> {
        let stored = self.token.read().ok()?;
        stored
            .expires_at
            .map(|at| (at - Utc::now()).num_seconds().max(0))
    }
}

impl CredentialProvider for StaticCredentials {
    fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|stored| stored.token.clone())
    }

    fn is_valid(&self) -> bool {
        if self.endpoint.is_none() {
            return false;
        }
        let Ok(stored) = self.token.read() else {
            return false;
        };
        let has_token = stored.token.as_deref().is_some_and(|t| !t.is_empty());
        let unexpired = stored.expires_at.map_or(true, |at| Utc::now() < at);
        has_token && unexpired
    }

    fn endpoint(&self) -> Option<Url> {
        self.endpoint.clone()
    }

    fn tenant_id(&self) -> Option<String> {
        self.tenant_id.clone()
    }
}

// =============================================================================
// Cache Invalidation
// =============================================================================

/// Receives the cache keys an event made stale.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, key: &CacheKey);
}

impl<F> CacheInvalidator for F
where
    F: Fn(&CacheKey) + Send + Sync,
{
    fn invalidate(&self, key: &CacheKey) {
        self(key)
    }
}

/// Logs every invalidation; useful when no cache is attached.
pub struct LoggingInvalidator;

impl CacheInvalidator for LoggingInvalidator {
    fn invalidate(&self, key: &CacheKey) {
        info!(scope = key.scope(), key = %key.as_str(), "Cache key invalidated");
    }
}

/// Remembers invalidations in order.
#[derive(Debug, Default)]
pub struct RecordingInvalidator {
    keys: Mutex<Vec<CacheKey>>,
}

impl RecordingInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.keys.lock().map(|keys| keys.clone()).unwrap_or_default()
    }

    /// Drains the recorded keys.
    pub fn take(&self) -> Vec<CacheKey> {
        self.keys
            .lock()
            .map(|mut keys| std::mem::take(&mut *keys))
            .unwrap_or_default()
    }
}

impl CacheInvalidator for RecordingInvalidator {
    fn invalidate(&self, key: &CacheKey) {
        match self.keys.lock() {
            Ok(mut keys) => keys.push(key.clone()),
            Err(_) => warn!(key = %key.as_str(), "Invalidation log poisoned; key dropped"),
        }
    }
}

// =============================================================================
// Environment Signals
// =============================================================================

/// Whether the host app is in front of the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Foreground,
    Background,
}

/// Host environment: feature flag and visibility changes.
pub trait EnvironmentSignals: Send + Sync {
    fn is_feature_enabled(&self) -> bool;

    /// Receiver that observes every visibility change.
    fn visibility(&self) -> watch::Receiver<Visibility>;
}

/// Signals driven by explicit calls from the embedding app.
#[derive(Debug)]
pub struct ManualSignals {
    feature_enabled: AtomicBool,
    visibility: watch::Sender<Visibility>,
}

impl ManualSignals {
    pub fn new(feature_enabled: bool) -> Self {
        let (visibility, _) = watch::channel(Visibility::Foreground);
        ManualSignals {
            feature_enabled: AtomicBool::new(feature_enabled),
            visibility,
        }
    }

    pub fn set_feature_enabled(&self, enabled: bool) {
        self.feature_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        self.visibility.send_replace(visibility);
    }
}

impl Default for ManualSignals {
    fn default() -> Self {
        ManualSignals::new(true)
    }
}

impl EnvironmentSignals for ManualSignals {
    fn is_feature_enabled(&self) -> bool {
        self.feature_enabled.load(Ordering::SeqCst)
    }

    fn visibility(&self) -> watch::Receiver<Visibility> {
        self.visibility.subscribe()
    }
}
