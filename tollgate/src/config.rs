//! Broker configuration

use std::time::Duration;

use serde::Deserialize;
use tollgate_clock::DurationMillis;

use crate::{
    github::{InstallationLookup, DEFAULT_API_BASE_URL, DEFAULT_USER_AGENT},
    AppId, EncryptionKey, Owner, Repo,
};

/// How long a login session lasts
pub const DEFAULT_SESSION_TTL: DurationMillis = DurationMillis::from_hours(24);

/// The longest an installation token is kept before being refreshed
pub const DEFAULT_INSTALLATION_TOKEN_TTL: DurationMillis = DurationMillis::from_hours(1);

/// Configuration for retrying transient provider failures
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; `0` disables retrying
    pub retries: u32,
    /// Delay before the first retry
    pub initial_delay: DurationMillis,
    /// Factor applied to the delay after each further failure
    pub multiplier: u64,
    /// Upper bound on any single delay
    pub max_delay: DurationMillis,
}

impl Default for RetryConfig {
    /// Default retry configuration
    ///
    /// Retries once after 250 ms. Further retries, if configured, double the
    /// delay up to a cap of 5 seconds.
    fn default() -> Self {
        Self {
            retries: 1,
            initial_delay: DurationMillis(250),
            multiplier: 2,
            max_delay: DurationMillis::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries
    pub fn disabled() -> Self {
        Self {
            retries: 0,
            ..Self::default()
        }
    }

    /// The delay before retry number `retry`, counting from zero
    pub fn delay_for(&self, retry: u32) -> Duration {
        let mut delay = self.initial_delay.0;
        for _ in 0..retry {
            delay = delay.saturating_mul(self.multiplier);
            if delay >= self.max_delay.0 {
                break;
            }
        }
        Duration::from_millis(delay.min(self.max_delay.0))
    }
}

/// Everything the broker needs to know about the application and its target
#[derive(Clone, Debug, Deserialize)]
pub struct BrokerConfig {
    /// The application whose key signs assertions
    pub app_id: AppId,
    /// The account owning the target repository
    pub owner: Owner,
    /// The target repository
    pub repo: Repo,
    /// Passphrase protecting the private key at rest
    pub encryption_key: EncryptionKey,
    /// Root of the provider's API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// How installations are located
    #[serde(default)]
    pub lookup: InstallationLookup,
    /// How long a login session lasts
    #[serde(default = "default_session_ttl")]
    pub session_ttl: DurationMillis,
    /// The longest an installation token is cached, regardless of the
    /// expiry reported by the provider
    #[serde(default = "default_installation_token_ttl")]
    pub installation_token_ttl: DurationMillis,
    /// Cached tokens with less than this remaining are refreshed early
    #[serde(default)]
    pub minimum_validity: DurationMillis,
    /// Retry policy for transient provider failures
    #[serde(default)]
    pub retry: RetryConfig,
    /// User agent sent to the provider
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_owned()
}

fn default_session_ttl() -> DurationMillis {
    DEFAULT_SESSION_TTL
}

fn default_installation_token_ttl() -> DurationMillis {
    DEFAULT_INSTALLATION_TOKEN_TTL
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_owned()
}

impl BrokerConfig {
    /// Constructs a configuration with defaults for everything optional
    pub fn new(app_id: AppId, owner: Owner, repo: Repo, encryption_key: EncryptionKey) -> Self {
        Self {
            app_id,
            owner,
            repo,
            encryption_key,
            api_base_url: default_api_base_url(),
            lookup: InstallationLookup::default(),
            session_ttl: DEFAULT_SESSION_TTL,
            installation_token_ttl: DEFAULT_INSTALLATION_TOKEN_TTL,
            minimum_validity: DurationMillis::ZERO,
            retry: RetryConfig::default(),
            user_agent: default_user_agent(),
        }
    }

    /// Sets the root of the provider's API
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Sets how installations are located
    pub fn with_lookup(mut self, lookup: InstallationLookup) -> Self {
        self.lookup = lookup;
        self
    }

    /// Sets how long a login session lasts
    pub fn with_session_ttl(mut self, ttl: DurationMillis) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Sets the longest an installation token is cached
    pub fn with_installation_token_ttl(mut self, ttl: DurationMillis) -> Self {
        self.installation_token_ttl = ttl;
        self
    }

    /// Sets how much validity a cached token must retain to be reused
    pub fn with_minimum_validity(mut self, minimum_validity: DurationMillis) -> Self {
        self.minimum_validity = minimum_validity;
        self
    }

    /// Sets the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the user agent sent to the provider
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}
