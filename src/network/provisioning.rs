/// Connectivity: stored credentials first, configuration portal as fallback
use log::{error, info, warn};
use std::str::FromStr;
use tokio::time::{timeout_at, Duration, Instant};

use crate::config::DeviceConfiguration;
use crate::error::{ConfigError, ProvisioningError};
use crate::models::ConnectivityState;
use crate::network::link::NetworkLink;
use crate::network::portal::ProvisioningPortal;

/// What a provisioning timeout leads to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningFailurePolicy {
    /// Restart the whole node and start over from boot
    RestartProcess,
    /// Carry on without network for this cycle
    ProceedDegraded,
}

impl FromStr for ProvisioningFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restart" => Ok(ProvisioningFailurePolicy::RestartProcess),
            "degrade" => Ok(ProvisioningFailurePolicy::ProceedDegraded),
            other => Err(ConfigError::UnknownValue {
                name: "PROVISIONING_FAILURE_POLICY",
                value: other.to_string(),
            }),
        }
    }
}

/// Result of `ensure_connected`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// No connection, proceed without network
    Failed,
    /// No connection and the policy asks for a restart
    Restart,
}

pub struct ProvisioningManager<L, P> {
    link: L,
    portal: P,
    ap_name: String,
    grace: Duration,
    state: ConnectivityState,
}

impl<L: NetworkLink, P: ProvisioningPortal> ProvisioningManager<L, P> {
    pub fn new(link: L, portal: P, ap_name: impl Into<String>, grace: Duration) -> Self {
        ProvisioningManager {
            link,
            portal,
            ap_name: ap_name.into(),
            grace,
            state: ConnectivityState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn link(&self) -> &L {
        &self.link
    }

    /// Make sure the node is online.
    ///
    /// Tries `config` as it stands, then opens the portal and waits up to
    /// `deadline` for a submission that connects. A successful submission is
    /// written into `config`; nothing is written otherwise.
    pub async fn ensure_connected(
        &mut self,
        config: &mut DeviceConfiguration,
        deadline: Duration,
        on_failure: ProvisioningFailurePolicy,
    ) -> ConnectOutcome {
        if self.state == ConnectivityState::Connected && self.link.is_connected().await {
            return ConnectOutcome::Connected;
        }

        self.state = ConnectivityState::Disconnected;
        info!(
            "Connecting with stored configuration ({}:{})",
            config.collector_address(),
            config.collector_port()
        );
        if self.link.associate(config, self.grace).await {
            info!("Connected");
            self.state = ConnectivityState::Connected;
            return ConnectOutcome::Connected;
        }

        self.state = ConnectivityState::Provisioning;
        match self.provision(config, deadline).await {
            Ok(provisioned) => {
                *config = provisioned;
                self.state = ConnectivityState::Connected;
                info!("Connected, parameters configured:");
                info!("  Collector address: {}", config.collector_address());
                info!("  Collector port: {}", config.collector_port());
                info!("  Device id: {}", config.device_id());
                ConnectOutcome::Connected
            }
            Err(e) => {
                self.state = ConnectivityState::Failed;
                error!("Failed to connect: {}", e);
                match on_failure {
                    ProvisioningFailurePolicy::RestartProcess => ConnectOutcome::Restart,
                    ProvisioningFailurePolicy::ProceedDegraded => ConnectOutcome::Failed,
                }
            }
        }
    }

    async fn provision(
        &mut self,
        current: &DeviceConfiguration,
        deadline: Duration,
    ) -> Result<DeviceConfiguration, ProvisioningError> {
        let until = Instant::now() + deadline;

        self.link.start_access_point(&self.ap_name).await;
        if let Err(e) = self.portal.open(&self.ap_name, current).await {
            self.link.stop_access_point().await;
            return Err(e);
        }
        info!(
            "Waiting up to {}s for configuration on '{}'",
            deadline.as_secs(),
            self.ap_name
        );

        let link = &mut self.link;
        let portal = &mut self.portal;
        let grace = self.grace;
        let result = timeout_at(until, async {
            while let Some(submission) = portal.next_submission().await {
                let candidate = match submission.apply_to(current) {
                    Ok(candidate) => candidate,
                    Err(e) => {
                        warn!("Ignoring submission: {}", e);
                        continue;
                    }
                };
                if link.associate(&candidate, grace).await {
                    return Some(candidate);
                }
                warn!(
                    "Could not connect with {}:{}, waiting for another submission",
                    candidate.collector_address(),
                    candidate.collector_port()
                );
            }
            None
        })
        .await;

        self.portal.close().await;
        self.link.stop_access_point().await;

        match result {
            Ok(Some(config)) => Ok(config),
            Ok(None) => Err(ProvisioningError::Portal("portal stopped".to_string())),
            Err(_) => Err(ProvisioningError::Timeout(deadline.as_secs())),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::network::portal::PortalSubmission;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Link double that connects only for the listed collector addresses
    #[derive(Default)]
    pub(crate) struct FakeLink {
        pub reachable: Vec<String>,
        pub connected: bool,
        pub attempts: Vec<String>,
        pub ap_starts: usize,
        pub ap_stops: usize,
    }

    impl NetworkLink for FakeLink {
        async fn associate(&mut self, config: &DeviceConfiguration, _grace: Duration) -> bool {
            self.attempts.push(config.collector_address().to_string());
            self.connected = self
                .reachable
                .iter()
                .any(|a| a == config.collector_address());
            self.connected
        }

        async fn is_connected(&mut self) -> bool {
            // Drops out when the last associated collector becomes unreachable
            if let Some(last) = self.attempts.last() {
                self.connected = self.connected && self.reachable.contains(last);
            }
            self.connected
        }

        async fn start_access_point(&mut self, _ap_name: &str) {
            self.ap_starts += 1;
        }

        async fn stop_access_point(&mut self) {
            self.ap_stops += 1;
        }
    }

    /// Portal double that hands out queued submissions, then waits forever
    #[derive(Default)]
    pub(crate) struct FakePortal {
        pub submissions: VecDeque<PortalSubmission>,
        pub opened: usize,
        pub closed: usize,
        pub fail_open: bool,
        /// Open count shared with clones handed to later boots
        pub opens_total: Arc<AtomicUsize>,
    }

    impl ProvisioningPortal for FakePortal {
        async fn open(
            &mut self,
            _ap_name: &str,
            _current: &DeviceConfiguration,
        ) -> Result<(), ProvisioningError> {
            if self.fail_open {
                return Err(ProvisioningError::Portal("bind failed".to_string()));
            }
            self.opened += 1;
            self.opens_total.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn next_submission(&mut self) -> Option<PortalSubmission> {
            match self.submissions.pop_front() {
                Some(s) => Some(s),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {
            self.closed += 1;
        }
    }

    pub(crate) fn submission(address: &str) -> PortalSubmission {
        PortalSubmission {
            collector_address: address.to_string(),
            collector_port: "5002".to_string(),
            device_id: "9".to_string(),
        }
    }

    fn manager(link: FakeLink, portal: FakePortal) -> ProvisioningManager<FakeLink, FakePortal> {
        ProvisioningManager::new(link, portal, "LarkWeatherStationAP", Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn stored_configuration_connects_without_portal() {
        let link = FakeLink {
            reachable: vec!["192.168.1.20".to_string()],
            ..Default::default()
        };
        let mut mgr = manager(link, FakePortal::default());
        let mut config = DeviceConfiguration::default();

        let outcome = mgr
            .ensure_connected(
                &mut config,
                Duration::from_secs(180),
                ProvisioningFailurePolicy::RestartProcess,
            )
            .await;

        assert_eq!(outcome, ConnectOutcome::Connected);
        assert_eq!(mgr.state(), ConnectivityState::Connected);
        assert_eq!(mgr.portal.opened, 0);
        assert_eq!(config, DeviceConfiguration::default());
    }

    #[tokio::test(start_paused = true)]
    async fn cached_connection_skips_association() {
        let link = FakeLink {
            reachable: vec!["192.168.1.20".to_string()],
            ..Default::default()
        };
        let mut mgr = manager(link, FakePortal::default());
        let mut config = DeviceConfiguration::default();
        let policy = ProvisioningFailurePolicy::RestartProcess;

        mgr.ensure_connected(&mut config, Duration::from_secs(180), policy)
            .await;
        mgr.ensure_connected(&mut config, Duration::from_secs(180), policy)
            .await;

        assert_eq!(mgr.link.attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_runs_the_full_procedure_again() {
        let link = FakeLink {
            reachable: vec!["192.168.1.20".to_string()],
            ..Default::default()
        };
        let mut mgr = manager(link, FakePortal::default());
        let mut config = DeviceConfiguration::default();
        let policy = ProvisioningFailurePolicy::ProceedDegraded;

        let first = mgr
            .ensure_connected(&mut config, Duration::from_secs(60), policy)
            .await;
        assert_eq!(first, ConnectOutcome::Connected);

        mgr.link.reachable.clear();
        let second = mgr
            .ensure_connected(&mut config, Duration::from_secs(60), policy)
            .await;

        assert_eq!(second, ConnectOutcome::Failed);
        assert_eq!(mgr.link.attempts.len(), 2);
        assert_eq!(mgr.portal.opened, 1);
        assert_eq!(mgr.state(), ConnectivityState::Failed);
    }

    #[tokio::test]
    async fn host_link_reprovisions_when_collector_disappears() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        let mut config = DeviceConfiguration::new("127.0.0.1", &port, "1").unwrap();
        let portal = FakePortal {
            fail_open: true,
            ..Default::default()
        };
        let mut mgr = ProvisioningManager::new(
            crate::network::link::HostLink::new(),
            portal,
            "LarkWeatherStationAP",
            Duration::from_secs(2),
        );
        let policy = ProvisioningFailurePolicy::ProceedDegraded;

        let first = mgr
            .ensure_connected(&mut config, Duration::from_secs(5), policy)
            .await;
        assert_eq!(first, ConnectOutcome::Connected);

        drop(listener);
        let second = mgr
            .ensure_connected(&mut config, Duration::from_secs(5), policy)
            .await;

        assert_eq!(second, ConnectOutcome::Failed);
        assert_eq!(mgr.state(), ConnectivityState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn portal_submission_is_copied_into_configuration() {
        let link = FakeLink {
            reachable: vec!["10.0.0.5".to_string()],
            ..Default::default()
        };
        let portal = FakePortal {
            submissions: VecDeque::from(vec![submission("10.0.0.99"), submission("10.0.0.5")]),
            ..Default::default()
        };
        let mut mgr = manager(link, portal);
        let mut config = DeviceConfiguration::default();

        let outcome = mgr
            .ensure_connected(
                &mut config,
                Duration::from_secs(120),
                ProvisioningFailurePolicy::ProceedDegraded,
            )
            .await;

        assert_eq!(outcome, ConnectOutcome::Connected);
        assert_eq!(config.collector_address(), "10.0.0.5");
        assert_eq!(config.collector_port(), "5002");
        assert_eq!(config.device_id(), "9");
        assert_eq!(mgr.link.attempts, vec!["192.168.1.20", "10.0.0.99", "10.0.0.5"]);
        assert_eq!(mgr.portal.closed, 1);
        assert_eq!(mgr.link.ap_starts, 1);
        assert_eq!(mgr.link.ap_stops, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_with_restart_policy_asks_for_restart() {
        let mut mgr = manager(FakeLink::default(), FakePortal::default());
        let mut config = DeviceConfiguration::default();

        let start = Instant::now();
        let outcome = mgr
            .ensure_connected(
                &mut config,
                Duration::from_secs(180),
                ProvisioningFailurePolicy::RestartProcess,
            )
            .await;

        assert_eq!(outcome, ConnectOutcome::Restart);
        assert_eq!(mgr.state(), ConnectivityState::Failed);
        assert!(start.elapsed() >= Duration::from_secs(180));
        assert_eq!(mgr.portal.closed, 1);
        assert_eq!(mgr.link.ap_stops, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_with_degraded_policy_fails_without_touching_configuration() {
        let portal = FakePortal {
            submissions: VecDeque::from(vec![submission("10.0.0.99")]),
            ..Default::default()
        };
        let mut mgr = manager(FakeLink::default(), portal);
        let mut config = DeviceConfiguration::default();

        let outcome = mgr
            .ensure_connected(
                &mut config,
                Duration::from_secs(120),
                ProvisioningFailurePolicy::ProceedDegraded,
            )
            .await;

        assert_eq!(outcome, ConnectOutcome::Failed);
        assert_eq!(config, DeviceConfiguration::default());
    }

    #[tokio::test(start_paused = true)]
    async fn portal_that_cannot_open_follows_failure_policy() {
        let portal = FakePortal {
            fail_open: true,
            ..Default::default()
        };
        let mut mgr = manager(FakeLink::default(), portal);
        let mut config = DeviceConfiguration::default();

        let outcome = mgr
            .ensure_connected(
                &mut config,
                Duration::from_secs(120),
                ProvisioningFailurePolicy::ProceedDegraded,
            )
            .await;

        assert_eq!(outcome, ConnectOutcome::Failed);
        assert_eq!(mgr.link.ap_stops, 1);
    }

    #[test]
    fn policy_parses_from_settings_text() {
        assert_eq!(
            "restart".parse::<ProvisioningFailurePolicy>(),
            Ok(ProvisioningFailurePolicy::RestartProcess)
        );
        assert_eq!(
            "degrade".parse::<ProvisioningFailurePolicy>(),
            Ok(ProvisioningFailurePolicy::ProceedDegraded)
        );
        assert!("reboot".parse::<ProvisioningFailurePolicy>().is_err());
    }
}
