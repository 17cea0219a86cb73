//! vigil service binary.
//!
//! Standalone HTTP service that monitors one platform service's memory
//! and issues remote restarts.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vigil::config::Config;
use vigil::controller::Controller;
use vigil::platform::{MetricFetcher, PlatformClient};
use vigil::server::{self, AppState};

/// Remediation controller for a platform-hosted service.
#[derive(Parser)]
#[command(name = "vigil", version, about)]
struct Args {
    /// Listen port; overrides PORT from the environment.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("vigil=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = Config::from_env().context("configuration error")?;
    if let Some(port) = args.port {
        config.port = port;
    }

    info!(
        service = %config.target.service_name,
        environment = %config.target.environment_name,
        check_interval = ?config.check_interval,
        forced_restart_interval = ?config.forced_restart_interval,
        "starting remediation controller"
    );

    let client = Arc::new(
        PlatformClient::new(config.platform.clone())
            .context("failed to build platform client")?,
    );
    let controller = Arc::new(Controller::new(
        &config,
        Arc::clone(&client) as Arc<dyn MetricFetcher>,
        client,
    ));

    tokio::spawn(Arc::clone(&controller).run_check_loop());
    tokio::spawn(Arc::clone(&controller).run_forced_restart_loop());

    let port = config.port;
    let state = AppState::new(controller, Arc::new(config));
    server::run_server(state, port).await
}
