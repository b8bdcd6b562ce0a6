use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ticktick_connect::{
    ApiError, CredentialStore, DEFAULT_CREDENTIALS_FILE, OAuthClient, OAuthConfig, OAuthError,
    TickTickClient,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "ticktick-connect",
    about = "Authorize against TickTick via OAuth and verify the stored credentials."
)]
struct Cli {
    /// Credential file holding TICKTICK_* keys.
    #[arg(long, global = true, default_value = DEFAULT_CREDENTIALS_FILE)]
    env_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the browser authorization flow and save the tokens.
    Auth {
        #[arg(long)]
        client_id: Option<String>,
        #[arg(long)]
        client_secret: Option<String>,
        #[arg(long, default_value = "http://localhost:8000/callback")]
        redirect_uri: String,
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
    /// List projects with the stored access token.
    Check,
}

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = CredentialStore::new(cli.env_file);
    match cli.command {
        Command::Auth {
            client_id,
            client_secret,
            redirect_uri,
            port,
        } => run_auth(store, client_id, client_secret, redirect_uri, port).await?,
        Command::Check => run_check(store).await?,
    }
    Ok(())
}

async fn run_auth(
    store: CredentialStore,
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: String,
    port: u16,
) -> Result<(), OAuthError> {
    let mut config = OAuthConfig::from_env(&store.load()?)
        .with_redirect_uri(redirect_uri)
        .with_local_port(port);
    if let Some(client_id) = client_id {
        config = config.with_client_id(client_id);
    }
    if let Some(client_secret) = client_secret {
        config = config.with_client_secret(client_secret);
    }

    let client = OAuthClient::new(config, store)?;
    let outcome = client.start_auth_flow().await?;
    println!("{outcome}");
    Ok(())
}

async fn run_check(store: CredentialStore) -> Result<(), ApiError> {
    let credentials = store.load()?;
    let oauth = OAuthClient::new(OAuthConfig::from_env(&credentials), store.clone())?;

    let client = match TickTickClient::from_store(&store) {
        Ok(client) => client.with_refresh(&oauth),
        Err(err) => return Err(reauth_hint(err)),
    };

    let projects = client.get_projects().await.map_err(reauth_hint)?;
    println!("Fetched {} projects from TickTick.", projects.len());
    for project in &projects {
        println!("  - {} (ID: {})", project.name, project.id);
    }
    Ok(())
}

fn reauth_hint(err: ApiError) -> ApiError {
    if err.requires_reauth() {
        eprintln!("Run `ticktick-connect auth` to authorize again.");
    }
    err
}
