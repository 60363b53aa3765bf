use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use txwatch::config::{FeedConfig, ENV_URL};
use txwatch::feed::{ConnectionState, FeedManager, UpdateEvent};
use txwatch::logging::init_logging;
use txwatch::server;

#[derive(Parser)]
#[command(name = "txwatch")]
#[command(about = "Live transaction-update feed for fraud review dashboards", version)]
#[command(after_help = "The feed endpoint is read from TXWATCH_WS_URL (or a .env file) unless
--url or --config is given. Run `txwatch relay` for a local endpoint that
rebroadcasts every message to all connected dashboards.")]
struct Cli {
    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Also write daily-rotated logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// TOML feed configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe and print every delivered event until Ctrl-C
    Listen {
        #[arg(short, long)]
        url: Option<String>,
        #[arg(short, long, default_value = "cli")]
        key: String,
    },
    /// Announce that a flagged transaction was cleared
    Resolve {
        transaction_id: String,
        #[arg(short, long)]
        url: Option<String>,
        /// How long to wait for the connection
        #[arg(long, default_value = "5000")]
        wait_ms: u64,
    },
    /// Run the development relay
    Relay {
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(&cli.log_level, cli.log_dir.as_deref())?;

    match cli.command {
        Commands::Listen { url, key } => {
            let config = load_config(cli.config.as_deref(), url)?;
            listen(config, key).await?;
        }
        Commands::Resolve {
            transaction_id,
            url,
            wait_ms,
        } => {
            let config = load_config(cli.config.as_deref(), url)?;
            resolve(config, &transaction_id, Duration::from_millis(wait_ms)).await?;
        }
        Commands::Relay { port } => {
            println!(
                "{}",
                format!("🌐 Starting relay on port {}...", port).cyan().bold()
            );
            server::start(port).await?;
        }
    }

    Ok(())
}

/// Config file first, then the environment; `--url` wins over both.
fn load_config(path: Option<&Path>, url: Option<String>) -> Result<FeedConfig> {
    let config = match (path, url) {
        (Some(path), Some(url)) => FeedConfig::from_file(path)?.with_url(url),
        (Some(path), None) => FeedConfig::from_file(path)?,
        (None, Some(url)) => {
            dotenvy::dotenv().ok();
            FeedConfig::from_vars(|key| {
                if key == ENV_URL {
                    Some(url.clone())
                } else {
                    std::env::var(key).ok()
                }
            })?
        }
        (None, None) => FeedConfig::from_env()?,
    };

    config.validate()?;
    Ok(config)
}

async fn listen(config: FeedConfig, key: String) -> Result<()> {
    println!(
        "{} Listening on {} as {}",
        "👂".cyan(),
        config.url.bright_blue(),
        key.bright_yellow()
    );

    let feed = FeedManager::new(config);
    feed.subscribe(key, |event: Arc<UpdateEvent>| async move {
        print_event(&event);
        Ok::<_, anyhow::Error>(())
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    let stats = feed.stats();
    println!(
        "\n{} {} events delivered, {} malformed, {} invalid",
        "✓".green(),
        stats.events_dispatched.to_string().bright_white(),
        stats.malformed_frames,
        stats.invalid_events
    );
    Ok(())
}

fn print_event(event: &UpdateEvent) {
    let at = chrono::Local::now().format("%H:%M:%S").to_string();

    match event.transaction_update() {
        Some(update) => {
            let risk = match update.risk_level.as_str() {
                "high" => update.risk_level.red().bold(),
                "medium" => update.risk_level.yellow(),
                _ => update.risk_level.green(),
            };
            println!(
                "{} {} {} status={} risk={}",
                at.dimmed(),
                event.kind.bright_yellow(),
                update.transaction_id.bright_white(),
                update.status,
                risk
            );
        }
        None => println!("{} {} {}", at.dimmed(), event.kind.bright_yellow(), event.data),
    }
}

async fn resolve(config: FeedConfig, transaction_id: &str, wait: Duration) -> Result<()> {
    let feed = FeedManager::new(config);
    feed.connect();

    if !feed.wait_for_state(ConnectionState::Connected, wait).await {
        bail!(
            "Feed at {} not reachable within {} ms",
            feed.config().url,
            wait.as_millis()
        );
    }

    feed.announce_resolved(transaction_id);

    // The write happens on the connection task; give it a moment before exiting.
    let flushed = tokio::time::timeout(Duration::from_secs(1), async {
        while feed.stats().messages_sent == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok();

    if !flushed {
        bail!("Connection closed before the announcement was written");
    }

    println!(
        "{} Announced {} as {}",
        "✓".green(),
        transaction_id.bright_yellow(),
        "unflagged".green()
    );
    Ok(())
}
