//! Token storage for ghpm-tools.
//!
//! The GitHub token is looked up in the `GITHUB_TOKEN` environment variable
//! first and in the OS keychain second (Keychain Services on macOS,
//! Credential Manager on Windows, Secret Service on Linux).
//!
//! ```ignore
//! use ghpm_storage::{resolve_token, CredentialStore, KeychainStore, GITHUB_PROVIDER};
//!
//! let store = KeychainStore::new();
//! store.store(&ghpm_storage::token_key(GITHUB_PROVIDER), "ghp_xxx")?;
//! let token = resolve_token(&store)?;
//! ```

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use ghpm_core::{Error, Result};
use keyring::Entry;
use tracing::{debug, warn};

/// Service name used in the OS keychain.
const SERVICE_NAME: &str = "ghpm-tools";

/// Environment variable that overrides the stored token.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Provider segment of credential keys.
pub const GITHUB_PROVIDER: &str = "github";

/// Credential storage backend.
pub trait CredentialStore: Send + Sync {
    /// Store a credential under `key` (`{provider}/{name}`), replacing any old value.
    fn store(&self, key: &str, value: &str) -> Result<()>;

    /// `Ok(None)` when nothing is stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Deleting a missing credential is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> bool {
        matches!(self.get(key), Ok(Some(_)))
    }
}

// =============================================================================
// KeychainStore
// =============================================================================

/// Credential store backed by the OS keychain.
#[derive(Debug)]
pub struct KeychainStore {
    service_name: String,
}

impl KeychainStore {
    pub fn new() -> Self {
        Self {
            service_name: SERVICE_NAME.to_string(),
        }
    }

    /// Use a separate keychain service, e.g. to keep test entries apart.
    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service_name, key).map_err(|e| {
            Error::Storage(format!("Failed to open keychain entry '{}': {}", key, e))
        })
    }
}

impl Default for KeychainStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeychainStore {
    fn store(&self, key: &str, value: &str) -> Result<()> {
        debug!(key, "Storing credential in keychain");
        self.entry(key)?
            .set_password(value)
            .map_err(|e| Error::Storage(format!("Failed to store credential '{}': {}", key, e)))
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => {
                debug!(key, "Credential not found in keychain");
                Ok(None)
            }
            Err(e) => {
                warn!(key, error = %e, "Keychain lookup failed");
                Err(Error::Storage(format!(
                    "Failed to read credential '{}': {}",
                    key, e
                )))
            }
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        debug!(key, "Deleting credential from keychain");
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::Storage(format!(
                "Failed to delete credential '{}': {}",
                key, e
            ))),
        }
    }
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-memory credential store, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    credentials: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            credentials: RwLock::new(credentials.into_iter().collect()),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn store(&self, key: &str, value: &str) -> Result<()> {
        self.credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

// =============================================================================
// Token resolution
// =============================================================================

/// Credential key of a provider's API token.
pub fn token_key(provider: &str) -> String {
    format!("{}/token", provider)
}

/// Where a resolved token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Environment,
    Store,
}

impl TokenSource {
    pub fn describe(&self) -> &'static str {
        match self {
            TokenSource::Environment => "environment (GITHUB_TOKEN)",
            TokenSource::Store => "keychain",
        }
    }
}

/// Resolve the GitHub token: `GITHUB_TOKEN` first, then `store`.
pub fn resolve_token(store: &dyn CredentialStore) -> Result<Option<(String, TokenSource)>> {
    resolve_token_from(std::env::var(TOKEN_ENV).ok(), store)
}

/// [`resolve_token`] with the environment value passed in.
///
/// Blank values count as unset.
pub fn resolve_token_from(
    env_value: Option<String>,
    store: &dyn CredentialStore,
) -> Result<Option<(String, TokenSource)>> {
    if let Some(token) = env_value.filter(|t| !t.trim().is_empty()) {
        debug!("Using GitHub token from environment");
        return Ok(Some((token, TokenSource::Environment)));
    }

    Ok(store
        .get(&token_key(GITHUB_PROVIDER))?
        .filter(|t| !t.trim().is_empty())
        .map(|token| (token, TokenSource::Store)))
}

/// Mask a secret for display, keeping a short prefix.
pub fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    if token.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{}****", prefix)
    }
}
