pub mod link;
pub mod portal;
pub mod provisioning;
pub mod uploader;

pub use link::{HostLink, NetworkLink};
pub use portal::{HttpPortal, ProvisioningPortal};
pub use provisioning::{ConnectOutcome, ProvisioningManager};
pub use uploader::{HttpTransport, TelemetryUploader, Transport};
