//! Edgehop server entry point.
//!
//! Parses the CLI, loads the screen configuration, prepares the TLS
//! identity, then runs the engine task and the client listener on a
//! current-thread runtime. Platform capture drivers deliver input through
//! the [`edgehop_server::PrimaryScreen`] seam; without one the server still
//! accepts clients and replicates clipboards, which is what headless and
//! test deployments use.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use edgehop_core::config::ServerConfig;
use edgehop_core::environment::Environment;
use edgehop_server::engine::{ServerEngine, ServerEvent};
use edgehop_server::net::listener::{run_listener, ListenerSettings, HANDSHAKE_TIMEOUT};
use edgehop_server::net::tls;
use edgehop_server::screen::MockPrimaryScreen;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Default TCP port.
const DEFAULT_PORT: u16 = 24800;

#[derive(Debug, Parser)]
#[command(name = "edgehop-server", about = "Share this machine's keyboard and mouse across the screen topology")]
struct Args {
    /// Run in the foreground (no daemonizing is attempted either way).
    #[arg(short = 'f', long)]
    foreground: bool,

    /// Do not show a system tray icon.
    #[arg(long)]
    no_tray: bool,

    /// Log filter, e.g. `debug` or `edgehop_server=trace`.
    #[arg(long, value_name = "LEVEL")]
    debug: Option<String>,

    /// Screen name of this server; defaults to the host name.
    #[arg(long, value_name = "SCREEN")]
    name: Option<String>,

    /// Enable the IPC control channel.
    #[arg(long)]
    ipc: bool,

    /// Speak plain TCP instead of TLS.
    #[arg(long)]
    disable_crypto: bool,

    /// Append logs to this file instead of stderr.
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Override the profile directory.
    #[arg(long, value_name = "PATH")]
    profile_dir: Option<PathBuf>,

    /// Stop relaying input when the local desk switches.
    #[arg(long)]
    stop_on_desk_switch: bool,

    /// Enable drag-and-drop file transfer framing.
    #[arg(long)]
    enable_drag_drop: bool,

    /// Screen configuration file; `-` reads stdin.
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address as `[interface]:port`.
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// Accept clients whose certificate fingerprint is not yet trusted.
    #[arg(long)]
    disable_client_cert_checking: bool,
}

fn main() {
    let args = Args::parse();
    init_logging(&args);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("cannot start runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(args)) {
        tracing::error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(args: &Args) {
    let filter = args
        .debug
        .clone()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &args.log {
        Some(path) => {
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => builder
                    .with_writer(std::sync::Arc::new(file))
                    .with_ansi(false)
                    .init(),
                Err(e) => {
                    eprintln!("cannot open log file {}: {e}", path.display());
                    std::process::exit(1);
                }
            }
        }
        None => builder.init(),
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let environment = Environment::new(args.profile_dir.clone(), !args.disable_crypto)
        .context("resolving profile directory")?;
    let screen_name = args
        .name
        .clone()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "edgehop".to_string());

    let config = load_config(&args, &screen_name)?;
    let address = parse_listen_address(args.address.as_deref())?;

    let tls_acceptor = if args.disable_crypto {
        info!("crypto disabled; speaking plain TCP");
        None
    } else {
        let identity =
            tls::load_or_generate_identity(&environment).context("preparing TLS identity")?;
        info!(fingerprint = %identity.fingerprint, "server certificate ready");
        Some(
            tls::server_acceptor(identity, !args.disable_client_cert_checking)
                .context("building TLS acceptor")?,
        )
    };

    if args.ipc {
        warn!("IPC control channel requested but no frontend is attached");
    }
    if args.enable_drag_drop {
        info!("drag-and-drop framing enabled");
    }
    if args.stop_on_desk_switch {
        info!("relaying will stop on desk switch");
    }
    if args.foreground || args.no_tray {
        // Daemonizing and the tray icon belong to the frontend wrapper.
        info!("foreground/tray flags accepted");
    }

    info!(screen = %screen_name, "edgehop server starting");

    // The engine owns all state; everything else talks to it over this
    // channel.
    let (engine_tx, engine_rx) = mpsc::channel::<ServerEvent>(256);
    let engine = ServerEngine::new(config, screen_name, MockPrimaryScreen::new(1920, 1080));
    let engine_task = tokio::spawn(engine.run(engine_rx));

    let settings = ListenerSettings {
        address,
        tls: tls_acceptor,
        verify_client_fingerprints: !args.disable_crypto && !args.disable_client_cert_checking,
        environment,
        handshake_timeout: HANDSHAKE_TIMEOUT,
    };

    tokio::select! {
        result = run_listener(settings, engine_tx) => {
            result.context("listener failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    engine_task.abort();
    info!("edgehop server stopped");
    Ok(())
}

fn load_config(args: &Args, screen_name: &str) -> anyhow::Result<ServerConfig> {
    let config = match &args.config {
        Some(path) => {
            let config = ServerConfig::load(path)
                .with_context(|| format!("loading configuration {}", path.display()))?;
            config
                .require_screen(screen_name)
                .context("validating configuration")?;
            config
        }
        None => {
            // No file: a lone-screen topology that clients cannot join until
            // one is provided, but the server still comes up.
            let mut config = ServerConfig::default();
            config
                .topology
                .add_screen(screen_name)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            warn!("no configuration file; only the server screen is known");
            config
        }
    };
    Ok(config)
}

/// Parses `[interface]:port`, `interface`, or `:port`; unspecified parts
/// default to all interfaces and the standard port.
fn parse_listen_address(text: Option<&str>) -> anyhow::Result<SocketAddr> {
    let Some(text) = text else {
        return Ok(SocketAddr::new(IpAddr::from([0, 0, 0, 0]), DEFAULT_PORT));
    };
    if let Ok(addr) = text.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Some(port) = text.strip_prefix(':') {
        let port: u16 = port.parse().context("bad port")?;
        return Ok(SocketAddr::new(IpAddr::from([0, 0, 0, 0]), port));
    }
    let ip: IpAddr = text.parse().context("bad listen interface")?;
    Ok(SocketAddr::new(ip, DEFAULT_PORT))
}
