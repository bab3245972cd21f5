//! Edgehop client entry point.
//!
//! Parses the CLI, resolves the profile environment, then runs the
//! connection loop on a current-thread runtime. Platform synthesis drivers
//! attach through the [`edgehop_client::SecondaryScreen`] seam; headless
//! runs use the recording screen, which still exercises the full protocol.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use edgehop_core::environment::Environment;
use edgehop_client::connection::{
    run_client, ClientSettings, NeverTrust, CONNECT_TIMEOUT, RETRY_DELAY,
};
use edgehop_client::screen::MockSecondaryScreen;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Default server TCP port.
const DEFAULT_PORT: u16 = 24800;

#[derive(Debug, Parser)]
#[command(name = "edgehop-client", about = "Receive keyboard, mouse, and clipboard from an Edgehop server")]
struct Args {
    /// Run in the foreground (no daemonizing is attempted either way).
    #[arg(short = 'f', long)]
    foreground: bool,

    /// Do not show a system tray icon.
    #[arg(long)]
    no_tray: bool,

    /// Log filter, e.g. `debug` or `edgehop_client=trace`.
    #[arg(long, value_name = "LEVEL")]
    debug: Option<String>,

    /// Screen name of this client; defaults to the host name.
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

    /// Stop applying input when the local desk switches.
    #[arg(long)]
    stop_on_desk_switch: bool,

    /// Enable drag-and-drop file transfer framing.
    #[arg(long)]
    enable_drag_drop: bool,

    /// Server to connect to, as `host`, `host:port`, or `[ipv6]:port`.
    #[arg(value_name = "SERVER")]
    server: String,
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
    let name = args
        .name
        .clone()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "edgehop".to_string());
    let (host, port) = parse_server(&args.server)?;

    if args.ipc {
        warn!("IPC control channel requested but no frontend is attached");
    }
    if args.enable_drag_drop {
        info!("drag-and-drop framing enabled");
    }
    if args.stop_on_desk_switch {
        info!("input will stop on desk switch");
    }
    if args.foreground || args.no_tray {
        // Daemonizing and the tray icon belong to the frontend wrapper.
        info!("foreground/tray flags accepted");
    }

    info!(screen = %name, server = %host, port, "edgehop client starting");

    let settings = ClientSettings {
        host,
        port,
        name,
        environment,
        connect_timeout: CONNECT_TIMEOUT,
        retry_delay: RETRY_DELAY,
    };

    // Local capture drivers would feed this channel; headless runs keep it
    // open but idle.
    let (events_tx, events_rx) = mpsc::channel(32);
    let screen = MockSecondaryScreen::new(1920, 1080);

    tokio::select! {
        result = run_client(settings, screen, NeverTrust, events_rx) => {
            result.context("client stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            drop(events_tx);
        }
    }

    info!("edgehop client stopped");
    Ok(())
}

/// Parses `host`, `host:port`, or `[ipv6]:port`.
fn parse_server(text: &str) -> anyhow::Result<(String, u16)> {
    if let Some(rest) = text.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .context("unterminated IPv6 address bracket")?;
        let port = match rest.strip_prefix(':') {
            Some(port) => port.parse().context("bad port")?,
            None => DEFAULT_PORT,
        };
        return Ok((host.to_string(), port));
    }
    match text.rsplit_once(':') {
        // A bare IPv6 address without brackets has several colons; treat it
        // as a host with the default port.
        Some((host, port)) if !host.contains(':') => {
            Ok((host.to_string(), port.parse().context("bad port")?))
        }
        _ => Ok((text.to_string(), DEFAULT_PORT)),
    }
}
