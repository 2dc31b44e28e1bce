use std::{fmt, num::ParseIntError, str::FromStr};

use serde::{Deserialize, Serialize};
use tollgate_clock::{DurationMillis, UnixMillis};

use crate::{AccessToken, AccessTokenRef, LoginToken, LoginTokenRef};

/// The provider's identifier for an installation of the application
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallationId(pub u64);

impl fmt::Display for InstallationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for InstallationId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is valid for at least the required minimum
    Fresh,
    /// The token is valid, but less than the required minimum remains
    Stale,
    /// The token is no longer valid
    Expired,
}

/// A credential paired with the instant it stops being valid
///
/// A credential is valid strictly before its expiry; at `expires_at` itself
/// it is already expired.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expiring<T> {
    value: T,
    expires_at: UnixMillis,
}

/// An installation access token and its expiry
pub type InstallationToken = Expiring<AccessToken>;

/// A session login token and its expiry
pub type SessionToken = Expiring<LoginToken>;

impl<T> Expiring<T> {
    /// Pairs a credential with its expiry
    pub fn new(value: T, expires_at: UnixMillis) -> Self {
        Self { value, expires_at }
    }

    /// The time at which the credential expires
    #[inline]
    pub fn expires_at(&self) -> UnixMillis {
        self.expires_at
    }

    /// Consumes the pairing, returning the credential
    pub fn into_value(self) -> T {
        self.value
    }

    /// Whether the credential is valid at `time`
    #[inline]
    pub fn is_valid_at(&self, time: UnixMillis) -> bool {
        time < self.expires_at
    }

    /// Gets the credential's status at `time`, requiring at least
    /// `minimum_validity` to remain for it to be considered fresh
    #[inline]
    pub fn token_status_at(
        &self,
        time: UnixMillis,
        minimum_validity: DurationMillis,
    ) -> TokenStatus {
        if time >= self.expires_at {
            TokenStatus::Expired
        } else if time + minimum_validity >= self.expires_at {
            TokenStatus::Stale
        } else {
            TokenStatus::Fresh
        }
    }

    /// Gets how much longer the credential would be valid as of `time`
    #[inline]
    pub fn until_expired_at(&self, time: UnixMillis) -> DurationMillis {
        self.expires_at - time
    }
}

impl Expiring<AccessToken> {
    /// The access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.value
    }
}

impl Expiring<LoginToken> {
    /// The login token
    #[inline]
    pub fn login_token(&self) -> &LoginTokenRef {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_at: u64) -> InstallationToken {
        InstallationToken::new(AccessToken::from_static("ghs_x"), UnixMillis(expires_at))
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let t = token(1_000);
        assert!(t.is_valid_at(UnixMillis(999)));
        assert!(!t.is_valid_at(UnixMillis(1_000)));
        assert!(!t.is_valid_at(UnixMillis(1_001)));
    }

    #[test]
    fn status_honours_minimum_validity() {
        let t = token(10_000);
        let min = DurationMillis(1_000);

        assert_eq!(t.token_status_at(UnixMillis(8_999), min), TokenStatus::Fresh);
        assert_eq!(t.token_status_at(UnixMillis(9_000), min), TokenStatus::Stale);
        assert_eq!(t.token_status_at(UnixMillis(9_999), min), TokenStatus::Stale);
        assert_eq!(t.token_status_at(UnixMillis(10_000), min), TokenStatus::Expired);

        assert_eq!(
            t.token_status_at(UnixMillis(9_999), DurationMillis::ZERO),
            TokenStatus::Fresh
        );
    }

    #[test]
    fn remaining_lifetime_saturates() {
        let t = token(10_000);
        assert_eq!(t.until_expired_at(UnixMillis(4_000)), DurationMillis(6_000));
        assert_eq!(t.until_expired_at(UnixMillis(12_000)), DurationMillis::ZERO);
    }

    #[test]
    fn installation_id_parses_from_storage() {
        assert_eq!("42".parse::<InstallationId>(), Ok(InstallationId(42)));
        assert!("forty-two".parse::<InstallationId>().is_err());
        assert_eq!(InstallationId(7).to_string(), "7");
    }
}
