//! OneNET device client - command line entry point

use clap::Parser;
use onenet_device::auth::{AuthScope, Credential, EncodedSecret};
use onenet_device::config::{ClientConfig, DEFAULT_BROKER_URL};
use onenet_device::observability::init_default_logging;
use onenet_device::{ClientError, LoggingHandler, RumqttcLink, SessionManager};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Connect a device to OneNET over MQTT/TLS and log what it receives
#[derive(Parser, Debug)]
#[command(name = "onenet-device")]
#[command(version)]
struct Cli {
    /// Product id
    #[arg(short = 'p', long, env = "ONENET_PRODUCT_ID")]
    product_id: String,

    /// Product secret, base64
    #[arg(short = 's', long, env = "ONENET_PRODUCT_SECRET", hide_env_values = true)]
    product_secret: String,

    /// Device name
    #[arg(short = 'd', long, env = "ONENET_DEVICE_NAME")]
    device_name: String,

    /// Device secret, base64
    #[arg(short = 't', long, env = "ONENET_DEVICE_SECRET", hide_env_values = true)]
    device_secret: String,

    /// Which secret signs the token
    #[arg(short = 'a', long, env = "ONENET_AUTH_SCOPE", default_value_t = AuthScope::Device)]
    auth_scope: AuthScope,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker URL, overrides the configuration file
    #[arg(long, value_name = "URL")]
    broker_url: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            process::exit(1);
        }
        Err(e) => e.exit(),
    };

    init_default_logging();

    info!("Starting onenet-device v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e.user_message());
            process::exit(1);
        }
    };

    if let Err(e) = run_device(cli, config).await {
        error!("Device session failed: {}", e.user_message());
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(cli: &Cli) -> Result<ClientConfig, ClientError> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            ClientConfig::load_from_file(path)?
        }
        None => ClientConfig::default(),
    };

    if let Some(url) = &cli.broker_url {
        config.broker.url = url.clone();
        config.validate()?;
    }
    if config.broker.url != DEFAULT_BROKER_URL {
        info!(url = %config.broker.url, "using non-default broker");
    }

    Ok(config)
}

async fn run_device(cli: Cli, config: ClientConfig) -> Result<(), ClientError> {
    let credential = Credential::new(
        cli.product_id,
        EncodedSecret::new(cli.product_secret),
        cli.device_name,
        EncodedSecret::new(cli.device_secret),
        cli.auth_scope,
    );

    let link = RumqttcLink::new(config.broker.clone(), config.reconnect_config());
    let mut session = SessionManager::from_config(credential, &config, link)?;

    session.connect().await?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    let mut handler = LoggingHandler;
    let result = session.run(cancel, &mut handler).await;

    // Leaves the session closed whichever way the loop ended
    session.disconnect().await?;
    result
}

/// Cancel `token` on SIGINT or SIGTERM
async fn shutdown_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }

    token.cancel();
}
