//! Verification of the credentials presented at login

use async_trait::async_trait;
use ring::digest;

use crate::{
    error::IdentityError, LoginToken, PasswordRef, PrivateKeyPem, Username, UsernameRef,
};

/// What an identity provider hands back for accepted credentials
#[derive(Clone, Debug, Default)]
pub struct LoginGrant {
    /// A session token issued by the provider
    ///
    /// When absent, a random session token is generated locally.
    pub token: Option<LoginToken>,

    /// A signing key released to the user on login
    pub private_key: Option<PrivateKeyPem>,
}

impl LoginGrant {
    /// A grant carrying nothing beyond acceptance
    pub fn accepted() -> Self {
        Self::default()
    }

    /// Attaches a provider-issued session token
    pub fn with_token(mut self, token: LoginToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Attaches a signing key
    pub fn with_private_key(mut self, pem: PrivateKeyPem) -> Self {
        self.private_key = Some(pem);
        self
    }
}

/// An authority that decides whether a user may start a session
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Checks the credentials
    ///
    /// Returns `Ok(None)` if the credentials are rejected. An `Err` means the
    /// provider could not reach a decision.
    async fn verify_credentials(
        &self,
        username: &UsernameRef,
        password: &PasswordRef,
    ) -> Result<Option<LoginGrant>, IdentityError>;
}

/// A single configured user
///
/// Only SHA-256 digests of the credentials are retained.
#[derive(Clone)]
pub struct StaticCredentials {
    username: Username,
    password_digest: digest::Digest,
    grant: LoginGrant,
}

impl StaticCredentials {
    /// Accepts exactly `username` with `password`
    pub fn new(username: Username, password: &PasswordRef) -> Self {
        Self {
            username,
            password_digest: digest::digest(&digest::SHA256, password.as_str().as_bytes()),
            grant: LoginGrant::accepted(),
        }
    }

    /// Sets the grant handed out on a successful login
    pub fn with_grant(mut self, grant: LoginGrant) -> Self {
        self.grant = grant;
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticCredentials {
    async fn verify_credentials(
        &self,
        username: &UsernameRef,
        password: &PasswordRef,
    ) -> Result<Option<LoginGrant>, IdentityError> {
        let presented = digest::digest(&digest::SHA256, password.as_str().as_bytes());
        let password_ok = presented.as_ref() == self.password_digest.as_ref();
        let username_ok = username == &*self.username;

        if username_ok && password_ok {
            Ok(Some(self.grant.clone()))
        } else {
            tracing::debug!(username = %username, "credentials rejected");
            Ok(None)
        }
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::Password;

    #[tokio::test]
    async fn accepts_only_configured_pair() -> Result<()> {
        let provider = StaticCredentials::new(
            Username::from_static("ada"),
            &Password::from_static("lovelace"),
        );

        let accepted = provider
            .verify_credentials(
                UsernameRef::from_static("ada"),
                PasswordRef::from_static("lovelace"),
            )
            .await?;
        assert!(accepted.is_some());

        for (user, pass) in [("ada", "babbage"), ("charles", "lovelace"), ("", "")] {
            let rejected = provider
                .verify_credentials(UsernameRef::from_str(user), PasswordRef::from_str(pass))
                .await?;
            assert!(rejected.is_none(), "{} should be rejected", user);
        }
        Ok(())
    }

    #[tokio::test]
    async fn grant_is_handed_out() -> Result<()> {
        let provider = StaticCredentials::new(
            Username::from_static("ada"),
            &Password::from_static("lovelace"),
        )
        .with_grant(LoginGrant::accepted().with_token(LoginToken::from_static("sess")));

        let grant = provider
            .verify_credentials(
                UsernameRef::from_static("ada"),
                PasswordRef::from_static("lovelace"),
            )
            .await?
            .unwrap_or_default();
        assert_eq!(grant.token, Some(LoginToken::from_static("sess")));
        assert!(grant.private_key.is_none());
        Ok(())
    }

    #[test]
    fn debug_omits_the_digest() {
        let provider = StaticCredentials::new(
            Username::from_static("ada"),
            &Password::from_static("lovelace"),
        );
        assert_eq!(
            format!("{:?}", provider),
            "StaticCredentials { username: \"ada\", .. }"
        );
    }
}
