//! Resolution of installations and exchange of assertions with the provider

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use tollgate_clock::UnixMillis;

use crate::{
    assertion::Assertion,
    error::{self, ExchangeError, MalformedResponseError, ResolveError, UpstreamError},
    InstallationId, InstallationToken, OwnerRef, RepoRef,
};

pub mod dto;

/// The provider's public API
pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

/// The user agent sent when none is configured
pub const DEFAULT_USER_AGENT: &str = concat!("tollgate/", env!("CARGO_PKG_VERSION"));

const API_VERSION: &str = "2022-11-28";
const ACCEPT: &str = "application/vnd.github+json";
const PAGE_SIZE: usize = 100;

/// The provider operations needed to turn an assertion into an
/// installation token
#[async_trait]
pub trait InstallationProvider: Send + Sync {
    /// Finds the installation covering `owner`/`repo`
    async fn resolve_installation(
        &self,
        assertion: &Assertion,
        owner: &OwnerRef,
        repo: &RepoRef,
    ) -> Result<InstallationId, ResolveError>;

    /// Exchanges the assertion for an access token scoped to `installation`
    ///
    /// The returned token carries the expiry reported by the provider.
    async fn create_access_token(
        &self,
        assertion: &Assertion,
        installation: InstallationId,
    ) -> Result<InstallationToken, ExchangeError>;
}

/// How the installation for a repository is located
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallationLookup {
    /// Page through the application's installations and match the owner
    #[default]
    Installations,
    /// Ask for the installation of the repository directly
    Repository,
}

/// An HTTP client for the provider's installation endpoints
#[derive(Clone, Debug)]
pub struct GithubClient {
    client: reqwest::Client,
    api_base: String,
    user_agent: String,
    lookup: InstallationLookup,
}

impl GithubClient {
    /// Constructs a client against the API rooted at `api_base`
    pub fn new(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        let mut api_base = api_base.into();
        while api_base.ends_with('/') {
            api_base.pop();
        }

        Self {
            client,
            api_base,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            lookup: InstallationLookup::default(),
        }
    }

    /// Sets the user agent sent with every request
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets how installations are located
    pub fn with_lookup(mut self, lookup: InstallationLookup) -> Self {
        self.lookup = lookup;
        self
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        assertion: &Assertion,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_base, path))
            .bearer_auth(assertion.token().as_str())
            .header(reqwest::header::ACCEPT, ACCEPT)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Finds the installation covering `owner`/`repo`
    #[tracing::instrument(
        err,
        skip(self, assertion),
        fields(owner = %owner, repo = %repo, lookup = ?self.lookup),
    )]
    pub async fn resolve(
        &self,
        assertion: &Assertion,
        owner: &OwnerRef,
        repo: &RepoRef,
    ) -> Result<InstallationId, ResolveError> {
        let id = match self.lookup {
            InstallationLookup::Installations => {
                self.search_installations(assertion, owner, repo).await?
            }
            InstallationLookup::Repository => {
                self.repository_installation(assertion, owner, repo).await?
            }
        };

        tracing::debug!(installation = %id, "resolved installation");
        Ok(id)
    }

    async fn search_installations(
        &self,
        assertion: &Assertion,
        owner: &OwnerRef,
        repo: &RepoRef,
    ) -> Result<InstallationId, ResolveError> {
        for page in 1.. {
            tracing::trace!(page, "listing installations");
            let path = format!("/app/installations?per_page={}&page={}", PAGE_SIZE, page);
            let resp = send(self.request(reqwest::Method::GET, &path, assertion)).await?;
            let installations: Vec<dto::Installation> = read_json::<_, ResolveError>(resp).await?;

            if let Some(found) = installations.iter().find(|i| i.is_for_account(owner.as_str())) {
                return Ok(found.id);
            }

            if installations.len() < PAGE_SIZE {
                break;
            }
        }

        Err(error::installation_not_found(owner, repo).into())
    }

    async fn repository_installation(
        &self,
        assertion: &Assertion,
        owner: &OwnerRef,
        repo: &RepoRef,
    ) -> Result<InstallationId, ResolveError> {
        let path = format!("/repos/{}/{}/installation", owner, repo);
        let resp = match send(self.request(reqwest::Method::GET, &path, assertion)).await {
            Ok(resp) => resp,
            Err(UpstreamError::Status { status: 404, .. }) => {
                return Err(error::installation_not_found(owner, repo).into())
            }
            Err(error) => return Err(error.into()),
        };

        let installation: dto::Installation = read_json::<_, ResolveError>(resp).await?;
        Ok(installation.id)
    }

    /// Exchanges the assertion for an access token scoped to `installation`
    #[tracing::instrument(err, skip(self, assertion), fields(installation = %installation))]
    pub async fn exchange(
        &self,
        assertion: &Assertion,
        installation: InstallationId,
    ) -> Result<InstallationToken, ExchangeError> {
        tracing::trace!("requesting installation token from provider");

        let path = format!("/app/installations/{}/access_tokens", installation);
        let resp = send(self.request(reqwest::Method::POST, &path, assertion)).await?;
        let body: dto::AccessTokenResponse = read_json::<_, ExchangeError>(resp).await?;

        let expires_at = parse_expiry(&body.expires_at)?;
        tracing::info!(expiry = expires_at.0, "received new installation token");

        Ok(InstallationToken::new(body.token, expires_at))
    }
}

#[async_trait]
impl InstallationProvider for GithubClient {
    async fn resolve_installation(
        &self,
        assertion: &Assertion,
        owner: &OwnerRef,
        repo: &RepoRef,
    ) -> Result<InstallationId, ResolveError> {
        self.resolve(assertion, owner, repo).await
    }

    async fn create_access_token(
        &self,
        assertion: &Assertion,
        installation: InstallationId,
    ) -> Result<InstallationToken, ExchangeError> {
        self.exchange(assertion, installation).await
    }
}

async fn send(req: reqwest::RequestBuilder) -> Result<reqwest::Response, UpstreamError> {
    let resp = req.send().await.map_err(UpstreamError::from)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received response from provider"
    );

    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        let body = resp.text().await.map_err(UpstreamError::from)?;
        Err(UpstreamError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

async fn read_json<T, E>(resp: reqwest::Response) -> Result<T, E>
where
    T: DeserializeOwned,
    E: From<UpstreamError> + From<MalformedResponseError>,
{
    let body = resp.bytes().await.map_err(UpstreamError::from)?;
    serde_json::from_slice(&body).map_err(|e| error::malformed_response(e).into())
}

fn parse_expiry(raw: &str) -> Result<UnixMillis, MalformedResponseError> {
    let expires_at =
        chrono::DateTime::parse_from_rfc3339(raw).map_err(error::malformed_response)?;
    u64::try_from(expires_at.timestamp_millis())
        .map(UnixMillis)
        .map_err(error::malformed_response)
}
