//! Errors raised while issuing credentials
//!
//! Each component reports its own narrow error type. The broker folds them
//! into [`AuthError`], a closed set that callers can branch on without
//! inspecting message text. All of them are cheap to clone, so that one
//! failed refresh can be reported to every caller that waited on it.

#![allow(missing_copy_implementations)]

use std::{error::Error as StdError, io, sync::Arc};

use thiserror::Error;

use crate::{Owner, OwnerRef, Repo, RepoRef};

/// The stored blob could not be decrypted
///
/// Raised for malformed encodings, truncated input, authentication failures
/// (wrong key or tampering) and plaintext that is not UTF-8. No partial
/// plaintext is ever returned alongside this error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("unable to decrypt stored blob: {reason}")]
pub struct DecryptionError {
    reason: DecryptionFailure,
}

impl DecryptionError {
    /// Why decryption failed
    #[must_use]
    pub fn reason(&self) -> DecryptionFailure {
        self.reason
    }
}

/// The stage at which decryption failed
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DecryptionFailure {
    /// The blob is not valid base64
    Encoding,
    /// The blob was produced by an unknown format version
    UnsupportedVersion(u8),
    /// The blob is too short to hold the header and tag
    Truncated,
    /// The authentication tag did not verify
    Unauthenticated,
    /// The decrypted bytes are not valid UTF-8
    NotUtf8,
}

impl std::fmt::Display for DecryptionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encoding => f.write_str("invalid encoding"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported version {}", v),
            Self::Truncated => f.write_str("truncated"),
            Self::Unauthenticated => f.write_str("authentication failed"),
            Self::NotUtf8 => f.write_str("plaintext is not UTF-8"),
        }
    }
}

pub(crate) const fn decryption_failed(reason: DecryptionFailure) -> DecryptionError {
    DecryptionError { reason }
}

/// Encryption could not be performed
#[derive(Clone, Debug, Error)]
#[error("unable to encrypt value")]
pub struct EncryptionError {
    _p: (),
}

pub(crate) const fn encryption_failed() -> EncryptionError {
    EncryptionError { _p: () }
}

type BoxedSource = Box<dyn StdError + Send + Sync + 'static>;
type SharedSource = Arc<dyn StdError + Send + Sync + 'static>;

fn shared(source: impl Into<BoxedSource>) -> SharedSource {
    let boxed: BoxedSource = source.into();
    Arc::from(boxed)
}

/// The private key could not be parsed or is not an RSA key
#[derive(Clone, Debug, Error)]
#[error("private key rejected")]
pub struct InvalidKeyError {
    #[source]
    source: SharedSource,
}

pub(crate) fn invalid_key(
    source: impl Into<BoxedSource>,
) -> InvalidKeyError {
    InvalidKeyError {
        source: shared(source),
    }
}

/// No installation of the application matches the configured target
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("no installation found for {owner}/{repo}")]
pub struct InstallationNotFoundError {
    owner: Owner,
    repo: Repo,
}

impl InstallationNotFoundError {
    /// The owner that was searched for
    #[must_use]
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// The repository that was searched for
    #[must_use]
    pub fn repo(&self) -> &Repo {
        &self.repo
    }
}

pub(crate) fn installation_not_found(owner: &OwnerRef, repo: &RepoRef) -> InstallationNotFoundError {
    InstallationNotFoundError {
        owner: owner.to_owned(),
        repo: repo.to_owned(),
    }
}

/// The provider could not be reached or answered with a failure status
#[derive(Clone, Debug, Error)]
pub enum UpstreamError {
    /// The provider answered with a non-success status
    #[error("provider responded with status {status}: {body}")]
    Status {
        /// The HTTP status code
        status: u16,
        /// The response body, for diagnostics
        body: String,
    },

    /// The request could not be sent or the response could not be read
    #[error("error communicating with provider")]
    Transport(#[source] Arc<reqwest::Error>),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(Arc::new(err))
    }
}

impl UpstreamError {
    /// The status code returned by the provider, if one was received
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(err) => err.status().map(|s| s.as_u16()),
        }
    }

    /// Whether a later attempt could reasonably succeed
    ///
    /// Transport failures, `429 Too Many Requests`, and `5xx` responses are
    /// considered transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Transport(err) => {
                err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
            }
        }
    }
}

/// The provider's response did not have the expected shape
#[derive(Clone, Debug, Error)]
#[error("malformed response from provider")]
pub struct MalformedResponseError {
    #[source]
    source: SharedSource,
}

pub(crate) fn malformed_response(
    source: impl Into<BoxedSource>,
) -> MalformedResponseError {
    MalformedResponseError {
        source: shared(source),
    }
}

/// A failure while resolving the installation identifier
#[derive(Clone, Debug, Error)]
pub enum ResolveError {
    /// No installation matched
    #[error(transparent)]
    NotFound(#[from] InstallationNotFoundError),

    /// The provider failed the request
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// The provider's listing could not be parsed
    #[error(transparent)]
    MalformedResponse(#[from] MalformedResponseError),
}

/// A failure while exchanging an assertion for an installation token
#[derive(Clone, Debug, Error)]
pub enum ExchangeError {
    /// The provider failed the request
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// The provider's token response could not be parsed
    #[error(transparent)]
    MalformedResponse(#[from] MalformedResponseError),
}

/// The persistence backend failed
#[derive(Clone, Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing medium failed
    #[error("storage I/O failed")]
    Io(#[source] Arc<io::Error>),

    /// The stored data could not be encoded or decoded
    #[error("stored data is corrupt")]
    Serialization(#[source] Arc<serde_json::Error>),
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(Arc::new(err))
    }
}

/// A failure of the encrypted key store
#[derive(Clone, Debug, Error)]
pub enum VaultError {
    /// The key could not be encrypted
    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    /// The stored blob could not be decrypted
    #[error(transparent)]
    Decryption(#[from] DecryptionError),

    /// The backing store failed
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// The identity provider failed to evaluate the credentials
///
/// A rejection of the credentials is not an error at this level; see
/// [`IdentityProvider`](crate::identity::IdentityProvider).
#[derive(Clone, Debug, Error)]
#[error("identity provider unavailable")]
pub struct IdentityError {
    #[source]
    source: SharedSource,
}

impl IdentityError {
    /// Wraps an underlying provider failure
    pub fn new(source: impl Into<BoxedSource>) -> Self {
        Self {
            source: shared(source),
        }
    }
}

/// A failure to produce an installation token or establish a session
#[derive(Clone, Debug, Error)]
pub enum AuthError {
    /// There is no valid session; log in first
    #[error("authentication required")]
    AuthenticationRequired,

    /// The identity provider rejected the credentials
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The session is valid, but no signing key is available
    #[error("a private key is required")]
    PrivateKeyRequired,

    /// The available signing key cannot be used
    #[error(transparent)]
    InvalidKey(#[from] InvalidKeyError),

    /// No installation matches the configured owner and repository
    #[error(transparent)]
    InstallationNotFound(#[from] InstallationNotFoundError),

    /// The provider failed a request
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// The provider's response could not be understood
    #[error(transparent)]
    MalformedResponse(#[from] MalformedResponseError),

    /// The identity provider could not be consulted
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Session state could not be persisted
    #[error(transparent)]
    Storage(#[from] StoreError),

    /// The key could not be encrypted for storage
    #[error(transparent)]
    Encryption(#[from] EncryptionError),
}

impl From<ResolveError> for AuthError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(e) => Self::InstallationNotFound(e),
            ResolveError::Upstream(e) => Self::Upstream(e),
            ResolveError::MalformedResponse(e) => Self::MalformedResponse(e),
        }
    }
}

impl From<ExchangeError> for AuthError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Upstream(e) => Self::Upstream(e),
            ExchangeError::MalformedResponse(e) => Self::MalformedResponse(e),
        }
    }
}

impl From<VaultError> for AuthError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::Encryption(e) => Self::Encryption(e),
            VaultError::Decryption(_) => Self::PrivateKeyRequired,
            VaultError::Storage(e) => Self::Storage(e),
        }
    }
}

impl AuthError {
    /// Whether the caller may retry the same operation later, with backoff
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream(e) if e.is_transient())
    }

    /// Whether the caller needs to log in before trying again
    #[must_use]
    pub fn is_authentication_required(&self) -> bool {
        matches!(self, Self::AuthenticationRequired)
    }

    /// Whether the caller needs to supply a signing key before trying again
    #[must_use]
    pub fn is_private_key_required(&self) -> bool {
        matches!(self, Self::PrivateKeyRequired)
    }
}
