//! Bearer-token persistence.
//!
//! Writes go to a single canonical key. Reads go through one compatibility
//! shim that still understands the aliases older clients wrote (a JSON
//! `auth` object, the flat legacy keys and the session-scoped `ibmi_token`),
//! and [`TokenStore::migrate_legacy`] folds those aliases into the canonical
//! key.

use crate::errors::AppError;
use crate::storage::{KeyValueStore, MemoryStore, StorageEvent};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::broadcast;

pub const CANONICAL_KEY: &str = "access_token";
/// Flat keys checked in priority order.
pub const LEGACY_KEYS: [&str; 4] = ["access_token", "token", "jwt", "auth_token"];
/// Key holding a JSON object with an `access_token` field.
pub const AUTH_OBJECT_KEY: &str = "auth";
/// Session-scoped key.
pub const SESSION_KEY: &str = "ibmi_token";

#[derive(Clone)]
pub struct TokenStore {
    local: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    /// Creates a token store over an origin-scoped and a session-scoped store.
    pub fn new(local: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        Self { local, session }
    }

    /// Both scopes in memory; nothing survives the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    /// Direct access to the origin-scoped store.
    pub fn local(&self) -> &Arc<dyn KeyValueStore> {
        &self.local
    }

    /// Stores `value` under the canonical key. Empty values are ignored.
    pub fn set_token(&self, value: &str) -> Result<(), AppError> {
        self.set_token_under(CANONICAL_KEY, value)
    }

    /// Stores `value` under `key`. Empty values are ignored.
    pub fn set_token_under(&self, key: &str, value: &str) -> Result<(), AppError> {
        if value.is_empty() {
            return Ok(());
        }
        self.local.set(key, value)?;
        tracing::debug!("Token {} stored under '{}'", fingerprint(value), key);
        Ok(())
    }

    /// Resolves the current token, or `""` when none is stored.
    pub fn get_token(&self) -> String {
        if let Some(token) = self.token_from_auth_object() {
            return token;
        }
        for key in LEGACY_KEYS {
            if let Some(value) = self.local.get(key).filter(|v| !v.is_empty()) {
                return value;
            }
        }
        self.session
            .get(SESSION_KEY)
            .filter(|v| !v.is_empty())
            .unwrap_or_default()
    }

    fn token_from_auth_object(&self) -> Option<String> {
        let raw = self.local.get(AUTH_OBJECT_KEY)?;
        // Malformed JSON is treated as absent
        let parsed: serde_json::Value = serde_json::from_str(&raw).ok()?;
        parsed
            .get("access_token")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Removes the token from every known key in both scopes.
    pub fn clear_token(&self) -> Result<(), AppError> {
        for key in LEGACY_KEYS {
            self.local.remove(key)?;
        }
        self.local.remove(AUTH_OBJECT_KEY)?;
        self.session.remove(SESSION_KEY)?;
        tracing::debug!("Token cleared from all storage keys");
        Ok(())
    }

    /// Authorization header for the currently stored token.
    pub fn auth_headers(&self) -> HeaderMap {
        auth_headers(&self.get_token())
    }

    /// Moves whatever token the read shim resolves into the canonical key
    /// and deletes every alias.
    ///
    /// Returns the migrated token, if any.
    pub fn migrate_legacy(&self) -> Result<Option<String>, AppError> {
        let token = self.get_token();
        let has_aliases = self.local.get(AUTH_OBJECT_KEY).is_some()
            || LEGACY_KEYS[1..].iter().any(|k| self.local.get(k).is_some())
            || self.session.get(SESSION_KEY).is_some();
        let canonical_current = self.local.get(CANONICAL_KEY).as_deref() == Some(token.as_str());

        if !has_aliases && (token.is_empty() || canonical_current) {
            return Ok(non_empty(token));
        }

        self.clear_token()?;
        self.set_token(&token)?;
        if !token.is_empty() {
            tracing::info!(
                "Migrated legacy token {} to '{}'",
                fingerprint(&token),
                CANONICAL_KEY
            );
        }
        Ok(non_empty(token))
    }

    /// Change notifications from the origin-scoped store.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.local.subscribe()
    }
}

fn non_empty(token: String) -> Option<String> {
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// `Authorization: Bearer <token>` for a non-empty token, otherwise no headers.
pub fn auth_headers(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if token.is_empty() {
        return headers;
    }
    match HeaderValue::from_str(&format!("Bearer {}", token)) {
        Ok(value) => {
            headers.insert(AUTHORIZATION, value);
        }
        Err(_) => tracing::warn!("Token {} is not a valid header value", fingerprint(token)),
    }
    headers
}

/// Short SHA-256 fingerprint, safe to log.
pub fn fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("sha256:{}", &digest[..12])
}
