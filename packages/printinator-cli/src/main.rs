//! Printinator CLI - Headless agent for cloud and LAN 3D printer fleets
//!
//! This binary drives the printinator core engine and can:
//! - Log in to the vendor cloud with a username and password
//! - Pair with LAN printers through the knob-press flow
//! - Print a one-shot view of both fleets
//! - Run as a background daemon keeping the fleet view fresh

mod daemon;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use printinator_core::cloud::CloudFleet;
use printinator_core::config::{self, AgentConfig};
use printinator_core::discovery::{BrowseEvent, ServiceBrowser};
use printinator_core::store::{self, CredentialStore};
use printinator_core::{
    DeviceAddress, DiscoveryAgent, FleetView, LanFleet, PairingFlow, PairingProgress,
    StaticBrowser,
};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "printinator")]
#[command(author = "Printinator Authors")]
#[command(version)]
#[command(about = "Headless agent for cloud and LAN 3D printer fleets")]
#[command(long_about = "
Printinator keeps a live view of your 3D printers: cloud printers through
the vendor API and LAN printers over their JSON-RPC interface.

Quick start:
  1. Log in to the cloud:  printinator login --username you@example.com
  2. Pair a LAN printer:   printinator pair 192.168.1.50
  3. Show the fleet:       printinator printers
  4. Start daemon:         printinator daemon
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store cloud credentials and acquire a token
    Login {
        #[arg(short, long)]
        username: String,

        /// Read from stdin when omitted
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Revoke the cloud token and forget the stored login
    Logout,

    /// Show cloud session and known printers
    Status,

    /// Sync both fleets once and print the result
    Printers,

    /// Pair with a LAN printer (press the knob when asked)
    Pair {
        /// Printer address, `host` or `host:port`
        address: String,
    },

    /// List known LAN printer addresses
    Devices,

    /// Run continuously, keeping the fleet view fresh
    Daemon,

    /// Show configuration paths and settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("printinator={},printinator_core={}", log_level, log_level).into()),
        )
        .with_target(false)
        .init();

    let config = config::load_config();

    match &cli.command {
        Commands::Login { username, password } => {
            cmd_login(&cli, &config, username, password.clone()).await
        }
        Commands::Logout => cmd_logout(&cli, &config).await,
        Commands::Status => cmd_status(&cli),
        Commands::Printers => cmd_printers(&cli, &config).await,
        Commands::Pair { address } => cmd_pair(&cli, &config, address).await,
        Commands::Devices => cmd_devices(&cli),
        Commands::Daemon => daemon::run_daemon(config).await,
        Commands::Config => cmd_config(&cli, &config),
    }
}

fn open_store() -> Result<CredentialStore> {
    let backend = store::default_backend().context("Failed to open credential storage")?;
    Ok(CredentialStore::open(backend))
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    std::io::stderr().flush()?;

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn cmd_login(
    cli: &Cli,
    config: &AgentConfig,
    username: &str,
    password: Option<String>,
) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => read_password()?,
    };
    if password.is_empty() {
        anyhow::bail!("Password must not be empty");
    }

    let store = open_store()?;
    let fleet = CloudFleet::new(&config.cloud, store.clone());

    store.set_login(username, &password);
    fleet.on_credentials_changed(store.credentials().login()).await;
    fleet
        .ensure_valid_token()
        .await
        .context("Cloud login failed")?;

    let expiry = store.credentials().token_expiry;
    match cli.format {
        OutputFormat::Text => {
            println!("Logged in as {}", username);
            if let Some(expiry) = expiry {
                println!("Token valid until {}", expiry.to_rfc3339());
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "status": "logged_in",
                "username": username,
                "token_expiry": expiry,
            }));
        }
    }

    Ok(())
}

async fn cmd_logout(cli: &Cli, config: &AgentConfig) -> Result<()> {
    let store = open_store()?;

    if !store.credentials().has_login() {
        match cli.format {
            OutputFormat::Text => println!("Not logged in."),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({
                    "status": "not_logged_in",
                }));
            }
        }
        return Ok(());
    }

    let username = store.credentials().username;
    CloudFleet::new(&config.cloud, store).logout().await;

    match cli.format {
        OutputFormat::Text => println!("Logged out {}", username),
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "status": "logged_out",
                "username": username,
            }));
        }
    }

    Ok(())
}

fn cmd_status(cli: &Cli) -> Result<()> {
    let store = open_store()?;
    let creds = store.credentials();
    let devices = store.devices();
    let paired = devices.iter().filter(|d| d.is_paired()).count();
    let token_valid = creds.token_is_valid(Utc::now());

    match cli.format {
        OutputFormat::Text => {
            if creds.has_login() {
                println!("Cloud:   Logged in as {}", creds.username);
                match creds.token_expiry {
                    Some(expiry) if token_valid => {
                        println!("Token:   valid until {}", expiry.to_rfc3339())
                    }
                    _ => println!("Token:   expired (renewed on next sync)"),
                }
            } else {
                println!("Cloud:   Not logged in");
            }
            println!("LAN:     {} known printers, {} paired", devices.len(), paired);
            println!();
            println!("Storage: {}", store.storage_info());
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "logged_in": creds.has_login(),
                "username": creds.username,
                "token_valid": token_valid,
                "token_expiry": creds.token_expiry,
                "known_printers": devices.len(),
                "paired_printers": paired,
                "storage_info": store.storage_info(),
            }));
        }
    }

    Ok(())
}

/// Register the configured hosts the same way discovery would.
async fn register_static_hosts(config: &AgentConfig, store: &CredentialStore) {
    let browser = StaticBrowser::new(config.lan.hosts.clone());
    let agent = DiscoveryAgent::new(&config.lan, store.clone(), Arc::new(browser.clone()));

    let mut events = browser.browse(&config.lan.service_type, &config.lan.domain);
    while let Some(event) = events.next().await {
        let outcome = match event {
            BrowseEvent::Resolved(service) => agent.register(&service).map(|_| ()),
            BrowseEvent::Failed { name, reason } => {
                tracing::warn!("Could not resolve {}: {}", name, reason);
                Ok(())
            }
        };
        if let Err(e) = outcome {
            tracing::warn!("{}", e);
        }
    }
}

async fn cmd_printers(cli: &Cli, config: &AgentConfig) -> Result<()> {
    let store = open_store()?;
    register_static_hosts(config, &store).await;

    let cloud = CloudFleet::new(&config.cloud, store.clone());
    let lan = LanFleet::new(&config.lan, store.clone());

    let (_, lan_printers) = tokio::join!(cloud.sync_printers(), lan.poll_cycle());
    let view = FleetView {
        cloud: cloud.printers(),
        lan: Arc::new(lan_printers.unwrap_or_default()),
        updated_at: Some(Utc::now()),
    };

    match cli.format {
        OutputFormat::Text => print_view(&view),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view)?),
    }

    Ok(())
}

fn print_view(view: &FleetView) {
    println!("Cloud printers ({}):", view.cloud.len());
    for printer in view.cloud.iter() {
        let detail = match printer.current_run() {
            Some(run) => format!("{} {:.0}%", run.name, run.progress() * 100.0),
            None => String::new(),
        };
        println!(
            "  {:14} {:10} {:10} {}",
            printer.serial,
            printer.machine_type_id,
            printer.status().as_str(),
            detail
        );
    }

    println!();
    println!("LAN printers ({}):", view.lan.len());
    for printer in view.lan.iter() {
        let auth = if printer.is_authenticated() { "paired" } else { "unpaired" };
        let temps = printer
            .system_information
            .as_ref()
            .map(|info| {
                info.toolheads
                    .iter()
                    .filter_map(|t| t.current_temperature)
                    .map(|t| format!("{:.0}C", t))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        println!(
            "  {:21} {:20} {:8} fw {}  {}",
            printer.address, printer.machine_name, auth, printer.firmware_version, temps
        );
    }
}

async fn cmd_pair(cli: &Cli, config: &AgentConfig, address: &str) -> Result<()> {
    let store = open_store()?;
    let address = DeviceAddress::parse(address);

    let format = cli.format;
    let flow = PairingFlow::new(&config.lan, &config.pairing, store).with_progress(move |progress| {
        if let OutputFormat::Text = format {
            match progress {
                PairingProgress::RequestingAnswerCode => println!("Contacting printer..."),
                PairingProgress::WaitingForKnob {
                    attempt,
                    max_attempts,
                } => {
                    if attempt == 1 {
                        println!("Press the knob on the printer to accept.");
                    }
                    println!("  waiting ({}/{})", attempt, max_attempts);
                }
                PairingProgress::RequestingToken => println!("Requesting access token..."),
                PairingProgress::Paired => {}
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    flow.pair(&address, &cancel)
        .await
        .with_context(|| format!("Pairing with {} failed", address))?;

    match cli.format {
        OutputFormat::Text => println!("Paired with {}", address),
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "status": "paired",
                "address": address.key(),
            }));
        }
    }

    Ok(())
}

fn cmd_devices(cli: &Cli) -> Result<()> {
    let store = open_store()?;
    let devices = store.devices();

    match cli.format {
        OutputFormat::Text => {
            if devices.is_empty() {
                println!("No known printers. Add hosts under [lan] in the config file or run 'printinator daemon'.");
            }
            for device in &devices {
                let state = if device.is_paired() { "paired" } else { "unpaired" };
                println!("  {:21} {}", device.key(), state);
            }
        }
        OutputFormat::Json => {
            let devices: Vec<_> = devices
                .iter()
                .map(|d| serde_json::json!({
                    "address": d.key(),
                    "paired": d.is_paired(),
                }))
                .collect();
            println!("{}", serde_json::json!({ "devices": devices }));
        }
    }

    Ok(())
}

fn cmd_config(cli: &Cli, config: &AgentConfig) -> Result<()> {
    let config_path = config::get_config_file_path_string();
    let storage = open_store()
        .map(|s| s.storage_info())
        .unwrap_or_else(|e| format!("unavailable ({:#})", e));

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:      {}", config_path);
            println!("API endpoint:     {} (from {})", config.cloud.api_url, config.cloud.source);
            println!("Cloud poll:       every {}s", config.cloud.poll_interval.as_secs());
            println!("Service type:     {}.{}", config.lan.service_type, config.lan.domain);
            println!("Static hosts:     {}", config.lan.hosts.join(", "));
            println!("Credential store: {}", storage);
            println!();
            println!("Environment variables:");
            println!("  PRINTINATOR_CLOUD_URL  - Override API endpoint");
            println!("  FORMLABS_CLIENT_ID     - OAuth client id");
            println!("  FORMLABS_CLIENT_SECRET - OAuth client secret");
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "config_file": config_path,
                "api_url": config.cloud.api_url,
                "api_source": format!("{}", config.cloud.source),
                "poll_interval_secs": config.cloud.poll_interval.as_secs(),
                "service_type": config.lan.service_type,
                "hosts": config.lan.hosts,
                "credential_storage": storage,
            }));
        }
    }

    Ok(())
}
