//! Orchestration of sessions, keys, and installation tokens

use std::{
    error, fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::rand::{SecureRandom, SystemRandom};
use tollgate_clock::{Clock, System, UnixMillis};

use crate::{
    assertion::{self, AppKey},
    cache::TokenCache,
    config::BrokerConfig,
    error::{encryption_failed, AuthError, ExchangeError},
    github::{GithubClient, InstallationProvider},
    identity::IdentityProvider,
    store::KeyValueStore,
    vault::KeyVault,
    AccessToken, InstallationToken, LoginToken, PasswordRef, PrivateKeyPemRef, SessionToken,
    TokenStatus, UsernameRef,
};

/// Where the broker stands with respect to issuing a token
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthState {
    /// No valid session; nothing can be issued
    NoSession,
    /// A session exists, but no installation token has been issued
    SessionValid,
    /// A usable installation token is cached
    TokenCached,
    /// The cached installation token has expired
    TokenExpired,
    /// A new installation token is being obtained
    TokenRefreshing,
}

/// Issues installation tokens to callers holding a valid session
///
/// Construct one per configured application and share it behind an [`Arc`].
/// Refreshes are single-flight: callers that find the cached token expired
/// while another refresh is in progress wait for it and receive its result,
/// whether that is a new token or the error that ended the attempt.
pub struct Broker<C = System> {
    config: BrokerConfig,
    cache: TokenCache<C>,
    vault: KeyVault,
    provider: Arc<dyn InstallationProvider>,
    identity: Arc<dyn IdentityProvider>,
    key: parking_lot::RwLock<Option<AppKey>>,
    /// Serializes work that mints tokens or tears the session down; holds
    /// the failure of the last completed refresh, if it failed
    refresh: tokio::sync::Mutex<Option<AuthError>>,
    /// Number of refreshes that have run to completion
    refreshes: AtomicU64,
    refreshing: AtomicBool,
}

/// Marks a token request to the provider as in progress while held
struct InProgress<'a>(&'a AtomicBool);

impl<'a> InProgress<'a> {
    fn start(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Broker<System> {
    /// Constructs a broker over the given collaborators
    pub fn new(
        config: BrokerConfig,
        store: Arc<dyn KeyValueStore>,
        provider: Arc<dyn InstallationProvider>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            cache: TokenCache::new(store.clone()),
            vault: KeyVault::new(store, config.encryption_key.clone()),
            config,
            provider,
            identity,
            key: parking_lot::RwLock::new(None),
            refresh: tokio::sync::Mutex::new(None),
            refreshes: AtomicU64::new(0),
            refreshing: AtomicBool::new(false),
        }
    }

    /// Constructs a broker that talks to the provider API named in `config`
    pub fn for_github(
        config: BrokerConfig,
        store: Arc<dyn KeyValueStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let client = GithubClient::new(reqwest::Client::new(), config.api_base_url.as_str())
            .with_user_agent(config.user_agent.as_str())
            .with_lookup(config.lookup);
        Self::new(config, store, Arc::new(client), identity)
    }
}

impl<C> Broker<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> Broker<D> {
        Broker {
            config: self.config,
            cache: self.cache.with_clock(clock),
            vault: self.vault,
            provider: self.provider,
            identity: self.identity,
            key: self.key,
            refresh: self.refresh,
            refreshes: self.refreshes,
            refreshing: self.refreshing,
        }
    }

    /// The configuration the broker was constructed with
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    fn remember_key(&self, key: AppKey) {
        *self.key.write() = Some(key);
    }

    /// The signing key, from memory or else from the vault
    fn signing_key(&self) -> Result<AppKey, AuthError> {
        if let Some(key) = self.key.read().as_ref() {
            return Ok(key.clone());
        }

        let pem = match self.vault.load() {
            Ok(Some(pem)) => pem,
            Ok(None) => return Err(AuthError::PrivateKeyRequired),
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "stored private key is unusable, treating it as absent"
                );
                return Err(AuthError::PrivateKeyRequired);
            }
        };

        let key = AppKey::from_pem(&pem)?;
        tracing::debug!("loaded private key from vault");
        self.remember_key(key.clone());
        Ok(key)
    }

    fn has_private_key(&self) -> bool {
        self.key.read().is_some() || matches!(self.vault.load(), Ok(Some(_)))
    }

    /// Validates the key, then keeps it in memory and persists it encrypted
    ///
    /// # Errors
    ///
    /// The key cannot be parsed as an RSA key, or it cannot be stored.
    pub fn set_private_key(&self, pem: &PrivateKeyPemRef) -> Result<(), AuthError> {
        let key = AppKey::from_pem(pem)?;
        self.vault.save(pem)?;
        self.remember_key(key);
        tracing::info!("private key updated");
        Ok(())
    }
}

impl<C: Clock> Broker<C> {
    /// Whether a session is active
    pub fn is_logged_in(&self) -> bool {
        self.cache.session_token().is_some()
    }

    /// Whether a token could be produced without further input from the user
    ///
    /// True when an installation token is cached or a private key is
    /// available. Does not check for a session.
    pub fn has_auth(&self) -> bool {
        self.cache.installation_token().is_some() || self.has_private_key()
    }

    /// Whether the current key has yet to be proven against the provider
    pub fn needs_key_upload(&self) -> bool {
        self.cache.key_upload_timestamp().is_none()
    }

    /// Observes the broker's current state
    ///
    /// [`AuthState::TokenRefreshing`] is reported while a token is being
    /// requested from the provider, either to refresh the cache or to prove
    /// an uploaded key. Callers merely waiting for that request, and a
    /// teardown in progress, do not count.
    pub fn state(&self) -> AuthState {
        if self.cache.session_token().is_none() {
            return AuthState::NoSession;
        }

        if self.refreshing.load(Ordering::Acquire) {
            return AuthState::TokenRefreshing;
        }

        match self.cache.stored_installation_token() {
            None => AuthState::SessionValid,
            Some(token) => match self.status_of(&token) {
                TokenStatus::Fresh => AuthState::TokenCached,
                TokenStatus::Stale | TokenStatus::Expired => AuthState::TokenExpired,
            },
        }
    }

    fn status_of(&self, token: &InstallationToken) -> TokenStatus {
        token.token_status_at(self.cache.now(), self.config.minimum_validity)
    }

    fn require_session(&self) -> Result<(), AuthError> {
        if self.is_logged_in() {
            Ok(())
        } else {
            tracing::debug!("no valid session");
            Err(AuthError::AuthenticationRequired)
        }
    }

    fn fresh_cached_token(&self) -> Option<AccessToken> {
        let token = self.cache.installation_token()?;
        match self.status_of(&token) {
            TokenStatus::Fresh => Some(token.into_value()),
            status => {
                tracing::debug!(?status, "cached installation token needs refreshing");
                None
            }
        }
    }

    /// Establishes a session for the user
    ///
    /// The session lasts for the configured session lifetime. If the
    /// identity provider releases a private key, it is validated and stored.
    ///
    /// # Errors
    ///
    /// The credentials are rejected, the identity provider fails, or the
    /// session cannot be persisted.
    #[tracing::instrument(err, skip(self, username, password), fields(username = %username))]
    pub async fn login(
        &self,
        username: &UsernameRef,
        password: &PasswordRef,
    ) -> Result<SessionToken, AuthError> {
        let grant = self
            .identity
            .verify_credentials(username, password)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if let Some(pem) = &grant.private_key {
            self.set_private_key(pem)?;
        }

        let token = match grant.token {
            Some(token) => token,
            None => generate_login_token()?,
        };

        let session = SessionToken::new(token, self.cache.now() + self.config.session_ttl);
        self.cache.set_session_token(&session)?;

        tracing::info!(expiry = session.expires_at().0, "session established");
        Ok(session)
    }

    /// Gets a valid installation token, minting a new one if required
    ///
    /// # Errors
    ///
    /// There is no session, no usable private key, or the provider could
    /// not issue a token.
    #[tracing::instrument(err, skip(self))]
    pub async fn get_auth_token(&self) -> Result<AccessToken, AuthError> {
        self.require_session()?;

        if let Some(token) = self.fresh_cached_token() {
            tracing::trace!("using cached installation token");
            return Ok(token);
        }

        let observed = self.refreshes.load(Ordering::Acquire);
        let mut last_failure = self.refresh.lock().await;

        // The session may have been torn down while waiting
        self.require_session()?;

        if let Some(token) = self.fresh_cached_token() {
            tracing::debug!("installation token was refreshed by a concurrent caller");
            return Ok(token);
        }

        if self.refreshes.load(Ordering::Acquire) != observed {
            if let Some(error) = last_failure.as_ref() {
                tracing::debug!("concurrent refresh failed, reporting its error");
                return Err(error.clone());
            }
        }

        let outcome = self.refresh_token().await;
        *last_failure = outcome.as_ref().err().cloned();
        self.refreshes.fetch_add(1, Ordering::Release);

        outcome.map(InstallationToken::into_value)
    }

    async fn refresh_token(&self) -> Result<InstallationToken, AuthError> {
        let key = self.signing_key()?;
        let _in_progress = InProgress::start(&self.refreshing);
        self.mint_with_retry(&key).await
    }

    /// Proves `pem` against the provider and adopts it as the signing key
    ///
    /// A full exchange is performed with the new key. On success, the
    /// resulting token is cached, the key is stored, and the upload time is
    /// recorded.
    ///
    /// # Errors
    ///
    /// There is no session, the key is invalid, or the provider rejects it.
    #[tracing::instrument(err, skip(self, pem))]
    pub async fn upload_key(&self, pem: &PrivateKeyPemRef) -> Result<AccessToken, AuthError> {
        self.require_session()?;
        let key = AppKey::from_pem(pem)?;

        let _refreshing = self.refresh.lock().await;
        self.require_session()?;

        let token = {
            let _in_progress = InProgress::start(&self.refreshing);
            self.mint_with_retry(&key).await?
        };

        self.vault.save(pem)?;
        self.remember_key(key);
        self.cache.set_key_upload_timestamp(self.cache.now())?;

        tracing::info!("private key verified with provider");
        Ok(token.into_value())
    }

    /// Forgets every credential held for the session
    ///
    /// Waits for any in-flight refresh so that it cannot repopulate the
    /// cache afterwards.
    ///
    /// # Errors
    ///
    /// Some entry could not be removed from storage. Removal of the other
    /// entries is still attempted.
    pub async fn clear_all_auth_cache(&self) -> Result<(), AuthError> {
        let mut last_failure = self.refresh.lock().await;
        *last_failure = None;

        *self.key.write() = None;
        let cache = self.cache.clear();
        let vault = self.vault.clear();
        cache?;
        vault?;

        tracing::info!("cleared all cached credentials");
        Ok(())
    }

    async fn mint_with_retry(&self, key: &AppKey) -> Result<InstallationToken, AuthError> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            match self.mint(key).await {
                Err(error) if error.is_retryable() && attempt < retry.retries => {
                    let delay = retry.delay_for(attempt);
                    tracing::warn!(
                        error = (&error as &dyn error::Error),
                        delay_ms = delay.as_millis() as u64,
                        "transient provider failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn mint(&self, key: &AppKey) -> Result<InstallationToken, AuthError> {
        let now = self.cache.now();
        let assertion = assertion::sign(&self.config.app_id, key, now)?;

        let installation = match self.cache.installation_id() {
            Some(id) => {
                tracing::trace!(installation = %id, "using cached installation id");
                id
            }
            None => {
                let id = self
                    .provider
                    .resolve_installation(&assertion, &self.config.owner, &self.config.repo)
                    .await?;
                if let Err(error) = self.cache.set_installation_id(id) {
                    tracing::warn!(
                        error = (&error as &dyn error::Error),
                        "unable to cache installation id"
                    );
                }
                id
            }
        };

        let issued = match self
            .provider
            .create_access_token(&assertion, installation)
            .await
        {
            Ok(token) => token,
            Err(ExchangeError::Upstream(e)) if e.status() == Some(404) => {
                tracing::warn!(
                    installation = %installation,
                    "provider no longer knows installation, forgetting it"
                );
                if let Err(error) = self.cache.forget_installation_id() {
                    tracing::warn!(
                        error = (&error as &dyn error::Error),
                        "unable to forget installation id"
                    );
                }
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let expires_at = issued
            .expires_at()
            .min(now + self.config.installation_token_ttl);
        let token = InstallationToken::new(issued.into_value(), expires_at);

        if let Err(error) = self.cache.set_installation_token(&token) {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "unable to cache installation token"
            );
        }

        tracing::info!(
            installation = %installation,
            expiry = expires_at.0,
            lifetime_secs = token.until_expired_at(now).as_secs(),
            "minted new installation token"
        );
        Ok(token)
    }

    /// The current time according to the broker's clock
    pub fn now(&self) -> UnixMillis {
        self.cache.now()
    }
}

fn generate_login_token() -> Result<LoginToken, AuthError> {
    let mut raw = [0u8; 32];
    SystemRandom::new()
        .fill(&mut raw)
        .map_err(|_| AuthError::Encryption(encryption_failed()))?;
    Ok(LoginToken::new(URL_SAFE_NO_PAD.encode(raw)))
}

impl<C: fmt::Debug> fmt::Debug for Broker<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Broker")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("has_key", &self.key.read().is_some())
            .finish_non_exhaustive()
    }
}
