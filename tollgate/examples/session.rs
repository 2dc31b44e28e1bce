use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use tokio::time;
use tollgate::{
    github::InstallationLookup, identity::StaticCredentials, store::FileStore, AppId, Broker,
    BrokerConfig, EncryptionKey, Owner, Password, PrivateKeyPem, Repo, Username,
};

#[derive(Debug, Parser)]
struct Opts {
    /// The application's identifier
    #[arg(long, env)]
    app_id: AppId,

    /// The account owning the target repository
    #[arg(long, env)]
    owner: Owner,

    /// The target repository
    #[arg(long, env)]
    repo: Repo,

    /// Passphrase protecting the private key at rest
    #[arg(long, env, hide_env_values = true)]
    encryption_key: EncryptionKey,

    /// The user allowed to start a session
    #[arg(short, long, env)]
    username: Username,

    /// The user's password
    #[arg(short, long, env, hide_env_values = true)]
    password: Password,

    /// A PEM file holding the application's private key
    #[arg(short = 'k', long, env)]
    private_key_file: Option<PathBuf>,

    /// Root of the provider's API
    #[arg(long, env, default_value = tollgate::github::DEFAULT_API_BASE_URL)]
    api_base_url: String,

    /// Look the installation up by repository instead of listing installations
    #[arg(long, env)]
    repository_lookup: bool,

    /// The local file holding session state
    #[arg(short = 'f', long, env, default_value = ".tollgate.json")]
    state_file: PathBuf,

    /// Seconds between token requests
    #[arg(long, env, default_value_t = 60)]
    interval: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let lookup = if opts.repository_lookup {
        InstallationLookup::Repository
    } else {
        InstallationLookup::Installations
    };

    let config = BrokerConfig::new(opts.app_id, opts.owner, opts.repo, opts.encryption_key)
        .with_api_base_url(opts.api_base_url)
        .with_lookup(lookup);

    let identity = StaticCredentials::new(opts.username.clone(), &opts.password);
    let store = FileStore::new(opts.state_file);
    let broker = Broker::for_github(config, Arc::new(store), Arc::new(identity));

    if !broker.is_logged_in() {
        let session = broker.login(&opts.username, &opts.password).await?;
        tracing::info!(expiry = session.expires_at().0, "logged in");
    }

    if let Some(path) = opts.private_key_file {
        let pem = PrivateKeyPem::new(std::fs::read_to_string(path)?);
        if broker.needs_key_upload() {
            let token = broker.upload_key(&pem).await?;
            tracing::info!(token = format_args!("{:#?}", token), "private key verified");
        } else {
            broker.set_private_key(&pem)?;
        }
    }

    let mut interval = time::interval(Duration::from_secs(opts.interval));
    loop {
        interval.tick().await;

        let before = broker.state();
        match broker.get_auth_token().await {
            Ok(token) => {
                tracing::info!(
                    ?before,
                    token = format_args!("{:#?}", token),
                    "pulled token"
                );
            }
            Err(error) if error.is_retryable() => {
                tracing::warn!(?before, %error, "provider unavailable, will try again");
            }
            Err(error) => {
                tracing::error!(?before, %error, "unable to obtain a token");
                if error.is_authentication_required() || error.is_private_key_required() {
                    return Err(error.into());
                }
            }
        }
    }
}
