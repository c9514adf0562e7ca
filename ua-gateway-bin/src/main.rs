mod publishers;

use clap::Parser;
use publishers::SchemePublisherFactory;
use std::{path::PathBuf, sync::Arc};
use tracing::{error, info, warn};
use ua_gateway_common::{parse_level, Logger};
use ua_gateway_core::Gateway;
use ua_gateway_error::{GatewayError, GatewayResult};
use ua_gateway_models::Settings;
use ua_gateway_opcua::OpcUaConnector;

const DEFAULT_CONFIG_FILE_NAME: &str = "gateway.toml";

/// UA Gateway - OPC UA to REST/JSON and pub/sub bridge
///
/// Reads, writes and browses registered OPC UA servers on behalf of callers
/// that only speak JSON, and forwards data changes to MQTT brokers and
/// SignalR-style hubs.
#[derive(Parser)]
#[command(name = "ua-gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "UA Gateway", long_about = None)]
struct Cli {
    /// Sets a custom config file with full path
    ///
    /// If not specified, the gateway will look for 'gateway.toml'
    /// in the current working directory.
    #[arg(short, long, env = "UAGW_CONFIG")]
    config: Option<PathBuf>,

    /// Check the server registered under this data set id and exit
    #[arg(long, value_name = "DATASET_ID")]
    check: Option<usize>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> GatewayResult<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE_NAME));
    let settings = Settings::new(&config_path.to_string_lossy())?;

    let mut logger = Logger::new(Some(parse_level(&settings.log.level)?));
    logger.initialize(&settings.log.dir)?;

    let gateway = Gateway::new(
        &settings,
        Arc::new(OpcUaConnector::new(settings.client.clone())),
        Arc::new(SchemePublisherFactory::new(&settings.publisher)),
    );

    if let Some(id) = cli.check {
        return check(&gateway, id).await;
    }

    if gateway.data_sets().is_empty() {
        warn!(config = %config_path.display(), "No servers registered");
    }
    for data_set in gateway.data_sets().all() {
        info!(id = data_set.id, name = %data_set.name, url = %data_set.url, "Registered server");
    }
    info!("Gateway started");

    let waited = wait_for_shutdown().await;
    gateway.shutdown().await;
    waited
}

/// Open (or reuse) a session to one registered server and report the result.
async fn check(gateway: &Gateway, id: usize) -> GatewayResult<()> {
    let url = gateway.server_url(id)?.to_string();
    let available = gateway.is_server_available(&url).await;
    gateway.shutdown().await;
    if available {
        info!(id, url = %url, "Server available");
        Ok(())
    } else {
        error!(id, url = %url, "Server unavailable");
        Err(GatewayError::server_unavailable(url, "check failed"))
    }
}

async fn wait_for_shutdown() -> GatewayResult<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM signal");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT signal");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received ctrl-c signal");
    }
    Ok(())
}
