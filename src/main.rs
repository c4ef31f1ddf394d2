//! SGCD PM command line client

use std::sync::Arc;

use clap::{Parser, Subcommand};
use sgcd_pm::core::auth::{
    ApiError, FileStorage, HttpAuthApi, LoggingNavigator, RouteGuard, SessionError,
    SessionManager, StorageError, TokenStore,
};
use sgcd_pm::core::client::{ApiClient, ClientError};
use sgcd_pm::core::config::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sgcd-pm")]
#[command(about = "Session client for the SGCD project-management API")]
#[command(version)]
struct Cli {
    /// Override the API base URL (SGCD_PM_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the session
    Login { username: String, password: String },
    /// Drop the stored session
    Logout,
    /// Show the local session state without contacting the backend
    Status,
    /// Ask the backend who the current session belongs to
    Whoami,
    /// Exchange the refresh token for a new access token now
    Refresh,
    /// Check whether navigating to a path would be allowed
    Guard { path: String },
    /// GET an API path with the session's credentials and print the JSON
    Get { path: String },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Api(#[from] ApiError),

    #[error("{0}")]
    Session(#[from] SessionError),

    #[error("{0}")]
    Client(#[from] ClientError),

    #[error("{0}")]
    Output(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }

    tracing::info!(
        "Config loaded: api_url={}, storage_dir={}, timeout={}, refresh_backoff={}",
        config.api_url,
        config.storage_dir.display(),
        config.has_http_timeout(),
        config.has_refresh_backoff()
    );

    if let Err(e) = run(cli.command, &config).await {
        tracing::error!("Command failed: {}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(command: Command, config: &Config) -> Result<(), CliError> {
    let storage = FileStorage::for_origin(&config.storage_dir, config.api_origin())?;
    let store = TokenStore::new(Arc::new(storage));
    let api = HttpAuthApi::new(&config.api_url, config.http_timeout())?;

    let session = SessionManager::builder(store, Arc::new(api), Arc::new(LoggingNavigator))
        .policy(config.refresh_policy())
        .login_path(&config.login_path)
        .build();

    match command {
        Command::Login { username, password } => {
            session.login(&username, &password).await?;
            println!(
                "Logged in as {} ({})",
                username,
                session.role().unwrap_or_default()
            );
        }
        Command::Logout => {
            session.logout()?;
            println!("Logged out");
        }
        Command::Status => {
            println!("state:     {}", session.state());
            println!("logged in: {}", session.is_logged_in());
            if let Some(role) = session.role() {
                println!("role:      {}", role);
            }
            match session.expires_in() {
                Ok(secs) if secs > 0 => println!("expires in {}s", secs),
                Ok(secs) => println!("expired {}s ago", -secs),
                Err(SessionError::NotAuthenticated) => {}
                Err(e) => println!("token: {}", e),
            }
        }
        Command::Whoami => {
            let user = session.whoami().await?;
            println!("{} ({})", user.username, user.role);
        }
        Command::Refresh => {
            session.force_refresh().await?;
            println!("Token refreshed");
            if let Ok(secs) = session.expires_in() {
                println!("expires in {}s", secs);
            }
        }
        Command::Guard { path } => {
            let guard = RouteGuard::new(session);
            println!("{:?}", guard.check(&path));
        }
        Command::Get { path } => {
            let client = ApiClient::new(&config.api_url, session, config.http_timeout())?;
            let body: serde_json::Value = client.get(&path).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}
