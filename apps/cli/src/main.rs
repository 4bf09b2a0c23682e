//! Turnwire CLI
//!
//! Runs the UDP relay proxy from the command line and manages saved presets.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use turnwire_client::TurnProxy;
use turnwire_core::{ProxyConfig, TransportMode};
use turnwire_logging::LogLevel;
use turnwire_settings::{default_settings_path, Preset, Settings};

/// Turnwire - DTLS over TURN UDP relay
#[derive(Parser)]
#[command(name = "turnwire")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy until Ctrl-C
    Run(RunArgs),

    /// Manage saved presets
    Preset {
        #[command(subcommand)]
        action: PresetAction,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Start from a saved preset
    #[arg(long)]
    preset: Option<String>,

    /// Remote peer address (host:port)
    #[arg(long)]
    peer: Option<String>,

    /// Credential locator for the signaling service
    #[arg(long)]
    link: Option<String>,

    /// Local UDP listen address (host:port)
    #[arg(long)]
    listen: Option<String>,

    /// Number of concurrent pipelines
    #[arg(short = 'n', long)]
    streams: Option<usize>,

    /// Reach the relay service over TCP instead of UDP
    #[arg(long)]
    tcp: bool,

    /// Realm presented to the relay service
    #[arg(long)]
    realm: Option<String>,
}

#[derive(Subcommand)]
enum PresetAction {
    /// Save or replace a preset
    Save {
        name: String,

        #[arg(long)]
        peer: String,

        #[arg(long)]
        link: String,

        #[arg(long, default_value = turnwire_core::DEFAULT_LISTEN_ADDR)]
        listen: String,
    },

    /// List saved presets
    List,

    /// Remove a preset
    Remove { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    turnwire_logging::try_init(LogLevel::from_verbosity(cli.verbose))
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    let settings_path = cli.config.clone().unwrap_or_else(default_settings_path);
    let settings = Settings::load_from(&settings_path)
        .with_context(|| format!("loading settings from {:?}", settings_path))?;

    match cli.command {
        Commands::Run(args) => {
            let config = resolve_config(&settings, args)?;
            run_proxy(config).await?;
        }
        Commands::Preset { action } => {
            manage_presets(settings, action)?;
        }
    }

    Ok(())
}

// ============================================================================
// Proxy
// ============================================================================

/// Settings (or preset), then command-line overrides
fn resolve_config(settings: &Settings, args: RunArgs) -> Result<ProxyConfig> {
    let mut config = match &args.preset {
        Some(name) => settings.proxy_for_preset(name)?,
        None => settings.proxy.clone(),
    };

    if let Some(peer) = args.peer {
        config.peer = peer;
    }
    if let Some(link) = args.link {
        config.link = link;
    }
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(streams) = args.streams {
        config.streams = streams;
    }
    if args.tcp {
        config.transport = TransportMode::Stream;
    }
    if let Some(realm) = args.realm {
        config.realm = realm;
    }

    if config.peer.is_empty() {
        bail!("no peer address: pass --peer or --preset");
    }
    config.validate()?;
    Ok(config)
}

async fn run_proxy(config: ProxyConfig) -> Result<()> {
    let proxy = Arc::new(TurnProxy::new(config));

    let mut runner = {
        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move { proxy.start().await })
    };

    tokio::select! {
        result = &mut runner => {
            result.context("proxy task failed")??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            proxy.stop().await;
            runner.await.context("proxy task failed")??;
        }
    }

    Ok(())
}

// ============================================================================
// Presets
// ============================================================================

fn manage_presets(mut settings: Settings, action: PresetAction) -> Result<()> {
    match action {
        PresetAction::Save {
            name,
            peer,
            link,
            listen,
        } => {
            settings.upsert_preset(Preset::new(name.clone(), peer, link, listen));
            settings.save()?;
            println!("Saved preset {}", name);
        }
        PresetAction::List => {
            if settings.presets.is_empty() {
                println!("No presets saved");
            }
            for preset in &settings.presets {
                println!(
                    "{:<16} peer={} link={} listen={}",
                    preset.name, preset.peer, preset.link, preset.listen
                );
            }
        }
        PresetAction::Remove { name } => {
            settings.remove_preset(&name)?;
            settings.save()?;
            println!("Removed preset {}", name);
        }
    }
    Ok(())
}
