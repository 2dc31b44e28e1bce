//! Session-scoped key–value persistence

use crate::error::StoreError;

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Keys under which broker state is persisted
pub mod keys {
    /// The cached installation token
    pub const INSTALLATION_TOKEN: &str = "github_token";
    /// Expiry of the cached installation token, in epoch milliseconds
    pub const INSTALLATION_TOKEN_EXPIRY: &str = "github_token_expiry";
    /// The encrypted private key
    pub const ENCRYPTED_PRIVATE_KEY: &str = "p_info";
    /// The session login token
    pub const LOGIN_TOKEN: &str = "new_login_token";
    /// Expiry of the session login token, in epoch milliseconds
    pub const LOGIN_TOKEN_EXPIRY: &str = "new_login_token_expiry";
    /// When the signing key was last proven against the provider, in epoch milliseconds
    pub const KEY_UPLOAD_TIMESTAMP: &str = "github_key_upload_timestamp";
    /// The resolved installation identifier
    pub const INSTALLATION_ID: &str = "github_installation_id";
}

/// A key–value store holding string values
///
/// Implementations must be safe to share between tasks. Operations are
/// synchronous; they are expected to be cheap relative to network calls.
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key`, replacing any prior value
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes the value stored under `key`, if any
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }
}
