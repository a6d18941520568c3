mod config;
mod error;
mod models;
mod network;
mod node;
mod power;
mod sensor;
mod store;
mod utils;

use log::{error, info};

use config::NodeSettings;
use network::{HostLink, HttpPortal, HttpTransport};
use node::NodeParts;
use power::HostPlatform;
use sensor::FileSensor;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let settings = match NodeSettings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };
    info!("Starting telemetry node, power mode {:?}", settings.power_mode);

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(());
        }
    });

    let mut platform = HostPlatform::new();
    let build = |settings: &NodeSettings| -> Result<
        NodeParts<FileSensor, HostLink, HttpPortal, HttpTransport>,
        Box<dyn std::error::Error>,
    > {
        Ok(NodeParts {
            sensor: FileSensor::new(&settings.sensor_path),
            link: HostLink::new(),
            portal: HttpPortal::new(settings.portal_bind),
            transport: HttpTransport::new(settings.upload_timeout)?,
        })
    };

    // Run the node or wait for shutdown signal
    tokio::select! {
        result = node::run(settings, &mut platform, build) => {
            if let Err(e) = result {
                error!("Fatal error: {}", e);
            }
        }
        _ = &mut rx => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    Ok(())
}
