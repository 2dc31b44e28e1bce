//! DTOs for the provider's installation endpoints

use serde::Deserialize;

use crate::{AccessToken, InstallationId};

/// An installation of the application, as listed by the provider
#[derive(Debug, Deserialize)]
pub struct Installation {
    /// The installation's identifier
    pub id: InstallationId,

    /// The account the application is installed on
    ///
    /// Absent for some enterprise installations.
    #[serde(default)]
    pub account: Option<Account>,
}

impl Installation {
    /// Whether the installation belongs to `login`, ignoring ASCII case
    pub fn is_for_account(&self, login: &str) -> bool {
        self.account
            .as_ref()
            .map_or(false, |a| a.login.eq_ignore_ascii_case(login))
    }
}

/// The account owning an installation
#[derive(Debug, Deserialize)]
pub struct Account {
    /// The account's login name
    pub login: String,
}

/// The body returned when creating an installation access token
#[derive(Debug, Deserialize)]
pub struct AccessTokenResponse {
    /// The installation access token
    pub token: AccessToken,

    /// When the token expires, in RFC 3339 form
    pub expires_at: String,
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    #[test]
    fn installation_matches_owner_case_insensitively() -> Result<()> {
        let inst: Installation =
            serde_json::from_str(r#"{"id": 42, "account": {"login": "Octo-Org", "id": 1}}"#)?;
        assert_eq!(inst.id, InstallationId(42));
        assert!(inst.is_for_account("octo-org"));
        assert!(!inst.is_for_account("octo"));
        Ok(())
    }

    #[test]
    fn installation_without_account_matches_nothing() -> Result<()> {
        let inst: Installation = serde_json::from_str(r#"{"id": 7, "account": null}"#)?;
        assert!(!inst.is_for_account(""));
        Ok(())
    }

    #[test]
    fn token_response_requires_expiry() {
        let err = serde_json::from_str::<AccessTokenResponse>(r#"{"token": "ghs_x"}"#);
        assert!(err.is_err());
    }
}
