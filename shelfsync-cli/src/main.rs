//! Shelfsync CLI
//!
//! Command-line interface for logging in and syncing the game library.
//!
//! # Usage
//!
//! ```bash
//! # Print the URL to open in a browser; it redirects with an authorization code
//! shelfsync login-url
//!
//! # Exchange the code for a session
//! shelfsync login <code>
//!
//! # Show the library (served from cache when it is recent)
//! shelfsync sync
//! shelfsync sync --force --format json
//! ```

mod app;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use shelfsync_core::{AuthOutcome, ClientConfig, SyncResult, load_config};
use tracing_subscriber::{EnvFilter, fmt};

use crate::app::{App, SyncReport, clear_local_state, render_text};

#[derive(Parser)]
#[command(name = "shelfsync")]
#[command(about = "Sync your Epic Games library to the terminal")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the authorization URL to open in a browser
    LoginUrl,

    /// Exchange an authorization code for a session
    Login {
        /// Code from the authorization redirect
        code: String,
    },

    /// Show session and cache state
    Status,

    /// Fetch the game library
    Sync {
        /// Ignore a fresh cache and fetch from the service
        #[arg(short, long)]
        force: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Remove the stored session and the library cache
    Logout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(cli.verbose, &config.log_level);
    tracing::debug!("Loaded configuration from {:?}", config.config_path);

    // Only commands that read the session restore it
    match cli.command {
        Commands::LoginUrl => login_url(&build(&config)?),
        Commands::Login { code } => login(&build(&config)?, &code).await,
        Commands::Status => status(&restored(&config).await?).await,
        Commands::Sync { force, format } => sync(&restored(&config).await?, force, format).await,
        Commands::Logout => logout(&config).await,
    }
}

fn build(config: &ClientConfig) -> Result<App> {
    App::build(config).context("Failed to initialize")
}

async fn restored(config: &ClientConfig) -> Result<App> {
    App::restored(config).await.context("Failed to initialize")
}

/// Log to stderr so `--format json` output stays parseable.
fn init_logging(verbose: bool, level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn login_url(app: &App) -> Result<()> {
    println!("{}", app.session().authorization_url());
    Ok(())
}

async fn login(app: &App, code: &str) -> Result<()> {
    match app.session().exchange_auth_code(code.trim()).await {
        AuthOutcome::Success { display_name } => {
            println!("Logged in as {}", display_name);
            Ok(())
        }
        AuthOutcome::Failure(e) => bail!("Login failed: {}", e.user_message()),
    }
}

async fn status(app: &App) -> Result<()> {
    let session = app.session();
    match session.display_name() {
        Some(name) => {
            println!("Logged in as {}", name);
            if let Some(account_id) = session.account_id() {
                println!("  Account: {}", account_id);
            }
            if let Some(expires_at) = session.current().map(|s| s.expires_at) {
                println!("  Token expires: {}", expires_at);
            }
        }
        None => println!("Not logged in"),
    }

    match app.sync.last_sync().await {
        Some(at) => println!("Last sync: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last sync: never"),
    }
    Ok(())
}

async fn sync(app: &App, force: bool, format: OutputFormat) -> Result<()> {
    let result = app.sync.fetch_library(force).await;

    match format {
        OutputFormat::Json => {
            let report = SyncReport::from_result(&result);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => println!("{}", render_text(&result)),
    }

    if let SyncResult::Error(message) = result {
        bail!("{}", message);
    }
    Ok(())
}

async fn logout(config: &ClientConfig) -> Result<()> {
    clear_local_state(config)
        .await
        .context("Failed to remove local state")?;
    println!("Logged out");
    Ok(())
}
