use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use server::accounts::{AccountStore, CredentialStore};
use server::config::ServerSettings;
use server::console::spawn_console;
use server::content::GameData;
use server::game_loop::start;
use std::path::PathBuf;
use std::sync::Arc;

/// Command line arguments. Anything given here overrides the settings file.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// TOML settings file
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Address to listen on, e.g. 0.0.0.0:44445
    #[clap(short, long)]
    bind: Option<String>,
    /// Target tick duration in milliseconds
    #[clap(short, long)]
    update_rate: Option<u64>,
    /// Account database file
    #[clap(short, long)]
    accounts: Option<PathBuf>,
}

/// Main-method of the application.
/// Loads the settings, starts the server and then waits for Ctrl+C or the `shutdown` console
/// command.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => ServerSettings::load(path)?,
        None => ServerSettings::default(),
    };
    if let Some(bind) = args.bind {
        settings.bind_address = bind;
    }
    if let Some(update_rate) = args.update_rate {
        settings.update_rate_ms = update_rate;
    }
    if let Some(accounts) = args.accounts {
        settings.accounts_file = Some(accounts);
    }
    settings.validate()?;

    let store: Arc<dyn CredentialStore> = match &settings.accounts_file {
        Some(path) => Arc::new(AccountStore::open(path)?),
        None => {
            warn!("No accounts file configured, accounts are lost on exit");
            Arc::new(AccountStore::in_memory())
        }
    };
    let content = match &settings.content_file {
        Some(path) => GameData::load(path)?,
        None => {
            info!("No content file configured, using the built-in demo world");
            GameData::demo()
        }
    };

    let server = start(settings, store, content).await?;
    let shutdown = server.shutdown_handle();
    spawn_console(server.console(), shutdown.clone())?;
    info!("Type `help` for console commands");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Received Ctrl+C, shutting down");
        }
        _ = shutdown.wait() => {}
    }

    server.stop().await;
    Ok(())
}
