/// Network interface seen by the provisioning manager
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use crate::config::DeviceConfiguration;

/// Association with the network and the local access point used for provisioning
#[allow(async_fn_in_trait)]
pub trait NetworkLink {
    /// Try to come up with the credentials in `config`, giving up after `grace`
    async fn associate(&mut self, config: &DeviceConfiguration, grace: Duration) -> bool;

    /// Whether the association made by `associate` still holds
    async fn is_connected(&mut self) -> bool;

    async fn start_access_point(&mut self, ap_name: &str);

    async fn stop_access_point(&mut self);
}

/// Link for a host with a regular network stack.
///
/// A host has no radio to associate with, so the collector endpoint being
/// reachable over TCP stands in for association. The access point is only a
/// label; the portal listener is what users connect to.
#[derive(Debug, Default)]
pub struct HostLink {
    /// Collector endpoint and grace period of the last successful association
    associated: Option<(String, u16, Duration)>,
    access_point: Option<String>,
}

impl HostLink {
    pub fn new() -> Self {
        HostLink::default()
    }
}

impl NetworkLink for HostLink {
    async fn associate(&mut self, config: &DeviceConfiguration, grace: Duration) -> bool {
        self.associated = None;
        let Ok(port) = config.collector_port().parse::<u16>() else {
            warn!("Collector port '{}' is not a port number", config.collector_port());
            return false;
        };

        if reachable(config.collector_address(), port, grace).await {
            self.associated = Some((config.collector_address().to_string(), port, grace));
            true
        } else {
            false
        }
    }

    async fn is_connected(&mut self) -> bool {
        let Some((address, port, grace)) = self.associated.clone() else {
            return false;
        };
        if !reachable(&address, port, grace).await {
            info!("Lost collector {}:{}", address, port);
            self.associated = None;
        }
        self.associated.is_some()
    }

    async fn start_access_point(&mut self, ap_name: &str) {
        info!("Access point '{}' up", ap_name);
        self.access_point = Some(ap_name.to_string());
    }

    async fn stop_access_point(&mut self) {
        if let Some(name) = self.access_point.take() {
            info!("Access point '{}' down", name);
        }
    }
}

async fn reachable(address: &str, port: u16, grace: Duration) -> bool {
    match timeout(grace, TcpStream::connect((address, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!("Collector {}:{} unreachable: {}", address, port, e);
            false
        }
        Err(_) => {
            debug!("No answer from collector within {}s", grace.as_secs());
            false
        }
    }
}
