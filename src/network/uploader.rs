/// Single-attempt delivery of readings to the collector
use log::{error, info, warn};
use tokio::time::Duration;
use url::Url;

use crate::config::DeviceConfiguration;
use crate::error::DeliveryError;
use crate::models::{DeliveryOutcome, SensorReading, TelemetryPayload};

const COLLECTOR_PATH: &str = "/api/data";

/// Something that can POST a JSON payload and report the response status
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn post_json(&self, url: &Url, payload: &TelemetryPayload)
        -> Result<u16, DeliveryError>;
}

/// Plain HTTP transport
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(HttpTransport { client })
    }
}

impl Transport for HttpTransport {
    async fn post_json(
        &self,
        url: &Url,
        payload: &TelemetryPayload,
    ) -> Result<u16, DeliveryError> {
        // .json() sets Content-Type: application/json
        let response = self.client.post(url.clone()).json(payload).send().await?;
        Ok(response.status().as_u16())
    }
}

pub struct TelemetryUploader<T> {
    transport: T,
}

/// `http://{address}:{port}/api/data`
pub fn collector_url(config: &DeviceConfiguration) -> Result<Url, DeliveryError> {
    let base = format!(
        "http://{}:{}",
        config.collector_address(),
        config.collector_port()
    );
    Ok(Url::parse(&base)?.join(COLLECTOR_PATH)?)
}

impl<T: Transport> TelemetryUploader<T> {
    pub fn new(transport: T) -> Self {
        TelemetryUploader { transport }
    }

    /// Deliver one reading. Failures are logged and the payload is dropped.
    pub async fn send(
        &self,
        config: &DeviceConfiguration,
        reading: &SensorReading,
    ) -> DeliveryOutcome {
        match self.try_send(config, reading).await {
            Ok(code) if code > 0 => {
                if (200..300).contains(&code) {
                    info!("Data sent, response code {}", code);
                } else {
                    warn!("Collector answered with status {}", code);
                }
                DeliveryOutcome::Delivered(code)
            }
            Ok(code) => {
                error!("Send failed, response code {}", code);
                DeliveryOutcome::NetworkFailure
            }
            Err(e) => {
                error!("Send failed: {}", e);
                DeliveryOutcome::NetworkFailure
            }
        }
    }

    async fn try_send(
        &self,
        config: &DeviceConfiguration,
        reading: &SensorReading,
    ) -> Result<u16, DeliveryError> {
        let device_id = config
            .device_id()
            .parse::<i32>()
            .map_err(|_| DeliveryError::InvalidDeviceId(config.device_id().to_string()))?;
        let url = collector_url(config)?;
        let payload = TelemetryPayload::new(device_id, reading);

        self.transport.post_json(&url, &payload).await
    }
}
