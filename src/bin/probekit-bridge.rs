//! # probekit-bridge - Standalone Container Process
//!
//! Hosts a [`Framework`] and publishes its bridge so a driver can reach it
//! through `RemoteTestContainer`.
//!
//! ```text
//! probekit-bridge
//!  ├─► read PROBEKIT_BRIDGE_PORT (+ HOST, DRAIN_MS)
//!  ├─► start framework
//!  ├─► publish bridge on host:port
//!  │
//!  └─► on SIGTERM / SIGINT: withdraw bridge, stop framework
//! ```
//!
//! ## Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | clean shutdown |
//! | 1 | logging could not be initialised |
//! | 2 | configuration error |
//! | 3 | bridge could not be published or withdrawn |

use std::process::ExitCode;
use std::sync::Arc;

use probekit::bridge::BridgeActivator;
use probekit::framework::Framework;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

const EXIT_SUCCESS: u8 = 0;
const EXIT_INIT_FAILED: u8 = 1;
const EXIT_CONFIG_FAILED: u8 = 2;
const EXIT_BRIDGE_FAILED: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_ansi(false)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
        return ExitCode::from(EXIT_INIT_FAILED);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "probekit-bridge starting"
    );

    let mut activator = match BridgeActivator::from_env() {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, "invalid bridge configuration");
            return ExitCode::from(EXIT_CONFIG_FAILED);
        }
    };

    match run(&mut activator).await {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            error!(error = %e, "bridge failed");
            ExitCode::from(EXIT_BRIDGE_FAILED)
        }
    }
}

async fn run(activator: &mut BridgeActivator) -> anyhow::Result<()> {
    let framework = Arc::new(Framework::new("probekit-bridge"));
    framework.start()?;

    let addr = activator.start(Arc::clone(&framework)).await?;
    info!(addr = %addr, "bridge ready");

    wait_for_shutdown().await?;

    activator.stop().await?;
    framework.stop()?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, initiating shutdown"),
        _ = sigint.recv() => info!("received SIGINT, initiating shutdown"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C, initiating shutdown");
    Ok(())
}
