use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod actions;
mod agent;
mod bridge;
mod cache;
mod channel;
mod config;
mod error;
mod hook;
mod interact;
mod session;
mod tmux;

use actions::Action;
use bridge::Bridge;
use channel::TelegramChannel;
use config::Config;
use tmux::scanner::AgentPatterns;
use tmux::{MenuCueProbe, Multiplexer, PaneScanner, TmuxClient};

#[derive(Parser)]
#[command(name = "panebridge")]
#[command(version)]
#[command(about = "Relay coding agents running in tmux to a Telegram chat")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PANEBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge (default)
    Run,
    /// List the agent panes found right now
    Scan {
        /// Only report whether the agent in this pane is idle
        #[arg(long)]
        pane: Option<String>,
    },
    /// Print the effective configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(directives.as_deref(), cli.verbose))
        .init();

    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Scan { pane } => scan_once(&config, pane.as_deref()).await,
        Commands::CheckConfig => check_config(config),
    }
}

/// `RUST_LOG` directives when given and valid, otherwise info (debug with `--verbose`)
fn log_filter(directives: Option<&str>, verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { "info" };
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(level))
}

async fn run(config: Config) -> Result<()> {
    config.validate()?;

    let tmux_client = TmuxClient::new();
    if !tmux_client.is_available().await {
        tracing::warn!("tmux is not available; panes cannot be driven until it is");
    }
    let mux: Arc<dyn Multiplexer> = Arc::new(tmux_client);
    let scanner = Arc::new(PaneScanner::new(
        mux.clone(),
        AgentPatterns::from_config(&config.agents)?,
    ));
    let telegram = Arc::new(TelegramChannel::new(&config.telegram)?);

    // Create event channel
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();

    // Spawn hook server
    let hook_tx = tx.clone();
    let bind = config.hook.bind;
    let secret = config.hook.secret.clone();
    tokio::spawn(async move {
        if let Err(e) = hook::serve(bind, hook_tx, &secret).await {
            tracing::error!("hook server failed: {e:#}");
        }
    });

    // Spawn chat poller
    let poll_tx = tx.clone();
    let poller = telegram.clone();
    tokio::spawn(async move {
        poller.poll_updates(poll_tx).await;
    });

    // Spawn pane scanner
    let scan_tx = tx.clone();
    let scan_interval = config.bridge.scan_interval();
    let pane_scanner = scanner.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(scan_interval);
        loop {
            ticker.tick().await;
            let scan = pane_scanner.scan().await;
            if scan_tx.send(Action::Scan(scan)).is_err() {
                break;
            }
        }
    });

    // Spawn expiry sweeper
    let sweep_tx = tx.clone();
    let sweep_interval = config.bridge.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if sweep_tx.send(Action::Sweep).is_err() {
                break;
            }
        }
    });

    // Ctrl-C asks the loop to stop
    let quit_tx = tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = quit_tx.send(Action::Quit);
        }
    });

    let mut bridge = Bridge::new(
        &config,
        mux,
        Arc::new(MenuCueProbe::from_config(&config.bridge)?),
        telegram,
        scanner,
    );
    tracing::info!(hook = %config.hook.bind, "panebridge running");
    if bridge.chat_id().is_none() {
        tracing::info!("send /start to the bot to bind a chat");
    }

    // Main event loop
    while let Some(action) = rx.recv().await {
        if bridge.handle_action(action).await {
            break;
        }
    }

    bridge.shutdown();
    Ok(())
}

async fn scan_once(config: &Config, pane: Option<&str>) -> Result<()> {
    let scanner = PaneScanner::new(
        Arc::new(TmuxClient::new()),
        AgentPatterns::from_config(&config.agents)?,
    );

    if let Some(target) = pane {
        let idle = scanner.is_idle(target).await;
        println!("{target} {}", if idle { "idle" } else { "busy" });
        return Ok(());
    }

    let scan = scanner.scan().await;

    if scan.panes.is_empty() {
        println!("No agent panes found.");
        return Ok(());
    }
    for pane in &scan.panes {
        println!(
            "{:<16} {:<12} {:<5} {}",
            pane.pane.target,
            pane.agent,
            if pane.idle { "idle" } else { "busy" },
            pane.pane.cwd
        );
    }
    Ok(())
}

fn check_config(mut config: Config) -> Result<()> {
    if !config.telegram.bot_token.is_empty() {
        config.telegram.bot_token = "********".to_string();
    }
    if !config.hook.secret.is_empty() {
        config.hook.secret = "********".to_string();
    }
    let problems = config.validate().err();

    println!("{}", toml::to_string_pretty(&config)?);
    match problems {
        Some(e) => println!("# {e}"),
        None => println!("# configuration OK"),
    }
    Ok(())
}
