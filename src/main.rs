use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wifi_scan::{
    config::{self, Config},
    connection, interface, nmcli, scan, server, CoordinatorConfig, LocalChannel, NmcliPermissions,
    NmcliRadio, ScanCoordinator,
};

#[derive(Parser)]
#[command(name = "wifi-scan")]
#[command(about = "Scan for WiFi networks through NetworkManager")]
#[command(version)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available WiFi interfaces
    Interfaces,

    /// Scan for WiFi networks
    Scan {
        /// Interface to use (defaults to the configured or first WiFi interface)
        #[arg(short, long)]
        interface: Option<String>,

        /// Seconds to wait for scan completion
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the current connection
    Status {
        /// Interface to check (defaults to the configured or first WiFi interface)
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Show or switch the WiFi radio state
    Radio {
        /// New radio state
        state: Option<RadioState>,
    },

    /// Show NetworkManager WiFi permissions for the current user
    Permissions,

    /// Start web server exposing scans and the scan result stream
    Serve {
        /// Port to listen on (defaults to the configured port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Interface to use (defaults to the configured or first WiFi interface)
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Save the default interface to the config file
    SetDefaultInterface {
        /// Interface name
        name: String,
    },

    /// Show saved configuration
    ShowConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum RadioState {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cfg = Config::load()?;

    match cli.command {
        Commands::Interfaces => cmd_interfaces(),
        Commands::Scan {
            interface,
            timeout,
            json,
        } => cmd_scan(&cfg, interface.as_deref(), timeout, json).await,
        Commands::Status { interface } => cmd_status(&cfg, interface.as_deref()),
        Commands::Radio { state } => cmd_radio(state),
        Commands::Permissions => cmd_permissions(),
        Commands::Serve { port, interface } => cmd_serve(&cfg, port, interface.as_deref()).await,
        Commands::SetDefaultInterface { name } => cmd_set_default_interface(cfg, &name),
        Commands::ShowConfig => cmd_show_config(&cfg),
    }
}

fn build_coordinator(cfg: &Config, iface: &str, timeout: Duration) -> ScanCoordinator {
    let channel = Arc::new(LocalChannel::new());
    let radio = NmcliRadio::new(iface, Arc::clone(&channel)).with_settle_delay(cfg.settle_delay());
    ScanCoordinator::new(
        Arc::new(radio),
        channel,
        Arc::new(NmcliPermissions::new()),
        CoordinatorConfig::default().with_scan_timeout(timeout),
    )
}

fn cmd_interfaces() -> Result<()> {
    let interfaces = interface::list_wifi_interfaces()?;

    if interfaces.is_empty() {
        println!("No WiFi interfaces found.");
        return Ok(());
    }

    println!("{:<16} {}", "INTERFACE", "STATE");
    println!("{}", "-".repeat(32));

    for iface in interfaces {
        println!("{:<16} {}", iface.name, iface.state);
    }

    Ok(())
}

async fn cmd_scan(cfg: &Config, interface: Option<&str>, timeout: Option<u64>, json: bool) -> Result<()> {
    let iface = interface::resolve_interface(interface, cfg.default_interface.as_deref())?;
    let timeout = timeout.map(Duration::from_secs).unwrap_or_else(|| cfg.scan_timeout());

    if !json {
        println!("Scanning on interface: {}", iface.name);
        println!();
    }

    let coordinator = build_coordinator(cfg, &iface.name, timeout);
    let networks = coordinator.scan().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&networks)?);
    } else {
        scan::display_networks(&networks);
    }

    Ok(())
}

fn cmd_status(cfg: &Config, interface: Option<&str>) -> Result<()> {
    let iface = interface::resolve_interface(interface, cfg.default_interface.as_deref())?;
    let status = connection::status(&iface.name)?;
    connection::display_status(&status);

    Ok(())
}

fn cmd_radio(state: Option<RadioState>) -> Result<()> {
    if let Some(state) = state {
        let enabled = matches!(state, RadioState::On);
        nmcli::set_radio_enabled(enabled)?;
        println!("WiFi radio switched {}.", if enabled { "on" } else { "off" });
        return Ok(());
    }

    let enabled = nmcli::radio_enabled()?;
    println!("WiFi radio: {}", if enabled { "enabled" } else { "disabled" });

    Ok(())
}

fn cmd_permissions() -> Result<()> {
    let permissions = NmcliPermissions::new().report()?;

    if permissions.is_empty() {
        println!("No WiFi permissions reported.");
        return Ok(());
    }

    println!("{:<56} {}", "PERMISSION", "VALUE");
    println!("{}", "-".repeat(64));
    for entry in &permissions {
        println!("{:<56} {}", entry.name, entry.value);
    }

    let can_scan = permissions
        .iter()
        .any(|entry| entry.name == nmcli::WIFI_SCAN_PERMISSION && entry.granted());
    println!();
    println!("Can scan: {}", if can_scan { "yes" } else { "no" });

    Ok(())
}

async fn cmd_serve(cfg: &Config, port: Option<u16>, interface: Option<&str>) -> Result<()> {
    let iface = interface::resolve_interface(interface, cfg.default_interface.as_deref())?;
    let coordinator = Arc::new(build_coordinator(cfg, &iface.name, cfg.scan_timeout()));

    let config = server::ServerConfig {
        interface: iface.name,
        port: port.unwrap_or(cfg.server_port),
    };
    server::run_server(config, coordinator).await
}

fn cmd_set_default_interface(mut cfg: Config, name: &str) -> Result<()> {
    let iface = interface::get_interface(name)?;
    cfg.default_interface = Some(iface.name);
    cfg.save()?;

    let path = config::config_path()?;
    println!("Saved default interface '{}' to {}", name, path.display());

    Ok(())
}

fn cmd_show_config(cfg: &Config) -> Result<()> {
    let path = config::config_path()?;
    println!("Config file: {}", path.display());
    println!();

    println!(
        "Default interface: {}",
        cfg.default_interface.as_deref().unwrap_or("-")
    );
    println!("Scan timeout:      {}s", cfg.scan_timeout_secs);
    println!("Settle delay:      {}ms", cfg.settle_delay_ms);
    println!("Server port:       {}", cfg.server_port);

    Ok(())
}
