//! Persistent caching of session and installation credentials

use std::{error, fmt, sync::Arc};

use tollgate_clock::{Clock, System, UnixMillis};

use crate::{
    error::StoreError,
    store::{keys, KeyValueStore},
    AccessToken, InstallationId, InstallationToken, LoginToken, SessionToken,
};

/// A cache of the credentials held for the current session
///
/// Each credential is stored alongside its expiry in epoch milliseconds.
/// Expired entries are never returned; an entry whose expiry equals the
/// current time is already expired.
pub struct TokenCache<C = System> {
    store: Arc<dyn KeyValueStore>,
    clock: C,
}

impl TokenCache<System> {
    /// Constructs a cache over `store` using the system clock
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            clock: System,
        }
    }
}

impl<C> TokenCache<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenCache<D> {
        TokenCache {
            store: self.store,
            clock,
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(error) => {
                tracing::warn!(
                    key,
                    error = (&error as &dyn error::Error),
                    "unable to read from store, treating entry as absent"
                );
                None
            }
        }
    }

    fn read_millis(&self, key: &str) -> Option<UnixMillis> {
        let raw = self.read(key)?;
        match raw.trim().parse() {
            Ok(millis) => Some(UnixMillis(millis)),
            Err(_) => {
                tracing::warn!(key, "stored timestamp is not a number, ignoring");
                None
            }
        }
    }

    fn write_expiring(
        &self,
        value_key: &str,
        value: &str,
        expiry_key: &str,
        expires_at: UnixMillis,
    ) -> Result<(), StoreError> {
        self.store.set(value_key, value)?;
        self.store.set(expiry_key, &expires_at.0.to_string())
    }

    /// Gets the stored installation token, even if it has expired
    pub fn stored_installation_token(&self) -> Option<InstallationToken> {
        let value = self.read(keys::INSTALLATION_TOKEN)?;
        let expires_at = self.read_millis(keys::INSTALLATION_TOKEN_EXPIRY)?;
        Some(InstallationToken::new(AccessToken::new(value), expires_at))
    }

    /// Stores an installation token, overwriting any prior token
    pub fn set_installation_token(&self, token: &InstallationToken) -> Result<(), StoreError> {
        self.write_expiring(
            keys::INSTALLATION_TOKEN,
            token.access_token().as_str(),
            keys::INSTALLATION_TOKEN_EXPIRY,
            token.expires_at(),
        )
    }

    /// Gets the stored session token, even if it has expired
    pub fn stored_session_token(&self) -> Option<SessionToken> {
        let value = self.read(keys::LOGIN_TOKEN)?;
        let expires_at = self.read_millis(keys::LOGIN_TOKEN_EXPIRY)?;
        Some(SessionToken::new(LoginToken::new(value), expires_at))
    }

    /// Stores a session token, overwriting any prior token
    pub fn set_session_token(&self, token: &SessionToken) -> Result<(), StoreError> {
        self.write_expiring(
            keys::LOGIN_TOKEN,
            token.login_token().as_str(),
            keys::LOGIN_TOKEN_EXPIRY,
            token.expires_at(),
        )
    }

    /// Gets the resolved installation identifier
    pub fn installation_id(&self) -> Option<InstallationId> {
        let raw = self.read(keys::INSTALLATION_ID)?;
        match raw.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!("stored installation id is not a number, ignoring");
                None
            }
        }
    }

    /// Stores the resolved installation identifier
    pub fn set_installation_id(&self, id: InstallationId) -> Result<(), StoreError> {
        self.store.set(keys::INSTALLATION_ID, &id.to_string())
    }

    /// Forgets the resolved installation identifier
    pub fn forget_installation_id(&self) -> Result<(), StoreError> {
        self.store.remove(keys::INSTALLATION_ID)
    }

    /// Gets when the signing key was last proven against the provider
    pub fn key_upload_timestamp(&self) -> Option<UnixMillis> {
        self.read_millis(keys::KEY_UPLOAD_TIMESTAMP)
    }

    /// Records when the signing key was proven against the provider
    pub fn set_key_upload_timestamp(&self, at: UnixMillis) -> Result<(), StoreError> {
        self.store.set(keys::KEY_UPLOAD_TIMESTAMP, &at.0.to_string())
    }

    /// Removes every cached credential
    ///
    /// All removals are attempted; the first failure is reported.
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut first_error = None;
        for key in [
            keys::INSTALLATION_TOKEN,
            keys::INSTALLATION_TOKEN_EXPIRY,
            keys::LOGIN_TOKEN,
            keys::LOGIN_TOKEN_EXPIRY,
            keys::INSTALLATION_ID,
            keys::KEY_UPLOAD_TIMESTAMP,
        ] {
            if let Err(error) = self.store.remove(key) {
                tracing::warn!(key, error = (&error as &dyn error::Error), "unable to clear entry");
                first_error.get_or_insert(error);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl<C: Clock> TokenCache<C> {
    /// The current time according to the cache's clock
    #[inline]
    pub fn now(&self) -> UnixMillis {
        self.clock.now()
    }

    /// Gets the cached installation token if it has not expired
    pub fn installation_token(&self) -> Option<InstallationToken> {
        let now = self.now();
        let token = self.stored_installation_token()?;
        if token.is_valid_at(now) {
            tracing::trace!(expiry = token.expires_at().0, "installation token cache hit");
            Some(token)
        } else {
            tracing::debug!(
                now = now.0,
                expiry = token.expires_at().0,
                "cached installation token has expired"
            );
            None
        }
    }

    /// Gets the session token if it has not expired
    pub fn session_token(&self) -> Option<SessionToken> {
        let token = self.stored_session_token()?;
        if token.is_valid_at(self.now()) {
            Some(token)
        } else {
            tracing::debug!(expiry = token.expires_at().0, "session token has expired");
            None
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for TokenCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
