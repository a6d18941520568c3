/// Non-volatile copy of the device configuration, so a provisioned
/// configuration survives suspend and restart
use log::{info, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::config::DeviceConfiguration;
use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ConfigStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored configuration, `None` if nothing has been saved yet
    pub async fn load(&self) -> Result<Option<DeviceConfiguration>, ConfigError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConfigError::Store(format!("{}: {}", self.path.display(), e))),
        };
        let stored: DeviceConfiguration = serde_json::from_slice(&data)
            .map_err(|e| ConfigError::Store(format!("{}: {}", self.path.display(), e)))?;
        // Fields bypassed the setters on the way in
        stored.validated().map(Some)
    }

    pub async fn save(&self, config: &DeviceConfiguration) -> Result<(), ConfigError> {
        let data = serde_json::to_vec_pretty(config)
            .map_err(|e| ConfigError::Store(e.to_string()))?;

        // Write then rename so a cut-off write never leaves a half file
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| ConfigError::Store(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| ConfigError::Store(format!("{}: {}", self.path.display(), e)))?;

        info!("Configuration saved to {}", self.path.display());
        Ok(())
    }

    /// Configuration to boot with: the stored one when usable, else `defaults`
    pub async fn load_or(&self, defaults: &DeviceConfiguration) -> DeviceConfiguration {
        match self.load().await {
            Ok(Some(config)) => {
                info!("Loaded configuration from {}", self.path.display());
                config
            }
            Ok(None) => defaults.clone(),
            Err(e) => {
                warn!("Ignoring stored configuration: {}", e);
                defaults.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lark-store-{}-{}.json", name, std::process::id()))
    }

    #[tokio::test]
    async fn saved_configuration_loads_back() {
        let store = ConfigStore::new(temp_path("roundtrip"));
        let config = DeviceConfiguration::new("10.0.0.5", "8080", "12").unwrap();

        store.save(&config).await.unwrap();
        let loaded = store.load().await.unwrap();
        tokio::fs::remove_file(store.path()).await.ok();

        assert_eq!(loaded, Some(config));
    }

    #[tokio::test]
    async fn missing_file_is_not_an_error() {
        let store = ConfigStore::new(temp_path("missing"));
        assert_eq!(store.load().await, Ok(None));
        assert_eq!(
            store.load_or(&DeviceConfiguration::default()).await,
            DeviceConfiguration::default()
        );
    }

    #[tokio::test]
    async fn oversized_stored_field_falls_back_to_defaults() {
        let path = temp_path("oversized");
        tokio::fs::write(
            &path,
            r#"{"collector_address":"123456789012345678901234567890","collector_port":"5001","device_id":"1"}"#,
        )
        .await
        .unwrap();
        let store = ConfigStore::new(&path);

        assert!(matches!(
            store.load().await,
            Err(ConfigError::FieldTooLong { .. })
        ));
        assert_eq!(
            store.load_or(&DeviceConfiguration::default()).await,
            DeviceConfiguration::default()
        );
        tokio::fs::remove_file(&path).await.ok();
    }
}
