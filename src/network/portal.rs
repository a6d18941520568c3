/// Configuration portal served while the access point is up
use askama::Template;
use axum::extract::Form;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use log::{info, warn};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{
    check_host, truncate_chars, DeviceConfiguration, MAX_ADDRESS_LEN, MAX_DEVICE_ID_LEN,
    MAX_PORT_LEN,
};
use crate::error::{ConfigError, ProvisioningError};

// Form field names
const FIELD_ADDRESS: &str = "server_ip";
const FIELD_PORT: &str = "server_port";
const FIELD_DEVICE_ID: &str = "device_id";

/// Fields as posted by the portal page. Missing fields decode as empty.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PortalForm {
    pub server_ip: String,
    pub server_port: String,
    pub device_id: String,
}

/// Values submitted through the portal form, already cut to the field limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalSubmission {
    pub collector_address: String,
    pub collector_port: String,
    pub device_id: String,
}

impl PortalSubmission {
    /// Check a posted form.
    ///
    /// Each value is truncated to its field's maximum length, the same way a
    /// `maxlength` input would, then checked: the address must be a bare host,
    /// the port 1-65535 and the device id an integer.
    pub fn from_form(form: &PortalForm) -> Result<Self, ConfigError> {
        let collector_address =
            required(FIELD_ADDRESS, bounded_field(&form.server_ip, MAX_ADDRESS_LEN))?;
        let collector_port = required(FIELD_PORT, bounded_field(&form.server_port, MAX_PORT_LEN))?;
        let device_id = required(
            FIELD_DEVICE_ID,
            bounded_field(&form.device_id, MAX_DEVICE_ID_LEN),
        )?;

        check_host(FIELD_ADDRESS, &collector_address)?;
        match collector_port.parse::<u16>() {
            Ok(p) if p > 0 => {}
            _ => {
                return Err(ConfigError::InvalidNumber {
                    field: FIELD_PORT,
                    value: collector_port,
                })
            }
        }
        if device_id.parse::<u32>().is_err() {
            return Err(ConfigError::InvalidNumber {
                field: FIELD_DEVICE_ID,
                value: device_id,
            });
        }

        Ok(PortalSubmission {
            collector_address,
            collector_port,
            device_id,
        })
    }

    /// Copy of `config` with the submitted values applied
    pub fn apply_to(&self, config: &DeviceConfiguration) -> Result<DeviceConfiguration, ConfigError> {
        let mut updated = config.clone();
        updated.set_collector_address(&self.collector_address)?;
        updated.set_collector_port(&self.collector_port)?;
        updated.set_device_id(&self.device_id)?;
        Ok(updated)
    }
}

fn bounded_field(value: &str, max: usize) -> String {
    truncate_chars(value.trim(), max).to_string()
}

fn required(field: &'static str, value: String) -> Result<String, ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::EmptyField { field });
    }
    Ok(value)
}

/// Source of provisioning submissions
#[allow(async_fn_in_trait)]
pub trait ProvisioningPortal {
    async fn open(
        &mut self,
        ap_name: &str,
        current: &DeviceConfiguration,
    ) -> Result<(), ProvisioningError>;

    /// Wait for the next accepted submission; `None` once the portal is gone
    async fn next_submission(&mut self) -> Option<PortalSubmission>;

    async fn close(&mut self);
}

/// Portal served over plain HTTP
pub struct HttpPortal {
    bind: SocketAddr,
    local_addr: Option<SocketAddr>,
    server: Option<JoinHandle<()>>,
    submissions: Option<mpsc::Receiver<PortalSubmission>>,
}

impl HttpPortal {
    pub fn new(bind: SocketAddr) -> Self {
        HttpPortal {
            bind,
            local_addr: None,
            server: None,
            submissions: None,
        }
    }

    /// Address the portal is listening on while open
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl ProvisioningPortal for HttpPortal {
    async fn open(
        &mut self,
        ap_name: &str,
        current: &DeviceConfiguration,
    ) -> Result<(), ProvisioningError> {
        self.close().await;

        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|e| ProvisioningError::Portal(format!("bind {}: {}", self.bind, e)))?;
        self.local_addr = listener.local_addr().ok();

        let (tx, rx) = mpsc::channel(4);
        let page = Arc::new(PortalPage::new(ap_name, current));
        let app = Router::new().route(
            "/",
            get(move || show_form(page)).post(move |form| submit(tx, form)),
        );

        self.server = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!("Configuration portal stopped: {}", e);
            }
        }));
        self.submissions = Some(rx);

        info!(
            "Configuration portal for '{}' listening on {}",
            ap_name,
            self.local_addr().unwrap_or(self.bind)
        );
        Ok(())
    }

    async fn next_submission(&mut self) -> Option<PortalSubmission> {
        match self.submissions.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    async fn close(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
            info!("Configuration portal closed");
        }
        self.submissions = None;
        self.local_addr = None;
    }
}

impl Drop for HttpPortal {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

#[derive(Template)]
#[template(path = "portal.html")]
struct PortalPage {
    ap_name: String,
    collector_address: String,
    collector_port: String,
    device_id: String,
    max_address: usize,
    max_port: usize,
    max_device_id: usize,
}

impl PortalPage {
    fn new(ap_name: &str, current: &DeviceConfiguration) -> Self {
        PortalPage {
            ap_name: ap_name.to_string(),
            collector_address: current.collector_address().to_string(),
            collector_port: current.collector_port().to_string(),
            device_id: current.device_id().to_string(),
            max_address: MAX_ADDRESS_LEN,
            max_port: MAX_PORT_LEN,
            max_device_id: MAX_DEVICE_ID_LEN,
        }
    }
}

/// GET `/`
async fn show_form(page: Arc<PortalPage>) -> Result<Html<String>, StatusCode> {
    page.render().map(Html).map_err(|e| {
        warn!("Failed to render portal page: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// POST `/`
///
/// Accepted submissions are handed to whoever waits on the portal.
async fn submit(
    tx: mpsc::Sender<PortalSubmission>,
    Form(form): Form<PortalForm>,
) -> (StatusCode, String) {
    let submission = match PortalSubmission::from_form(&form) {
        Ok(submission) => submission,
        Err(e) => {
            warn!("Rejected portal submission: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    info!(
        "Portal submission: collector {}:{}, device id {}",
        submission.collector_address, submission.collector_port, submission.device_id
    );
    match tx.send(submission).await {
        Ok(()) => (StatusCode::OK, "Saved, connecting to collector".to_string()),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Portal is closing".to_string(),
        ),
    }
}
