//! Core registry: things and shadows.
//!
//! Only the interface lives here; embedders supply an implementation backed by
//! their cloud SDK of choice.

use iot_core::{AwsCredentials, DeviceState, Status};

/// Thing status in the core registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CoreStatus {
    Active,
    Inactive,
}

impl CoreStatus {
    /// Active only for statuses that may connect.
    pub fn from_status(status: Status) -> Self {
        if status.is_enabled() {
            CoreStatus::Active
        } else {
            CoreStatus::Inactive
        }
    }

    /// Canonical device status for a core status.
    pub fn to_status(self) -> Status {
        match self {
            CoreStatus::Active => Status::Accepted,
            CoreStatus::Inactive => Status::Rejected,
        }
    }
}

/// A thing as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thing {
    pub id: String,
    pub status: CoreStatus,
    /// PEM certificate, only returned when the thing was created.
    pub certificate: Option<String>,
    /// PEM private key, only returned when the thing was created.
    pub private_key: Option<String>,
    /// Data endpoint devices connect to.
    pub endpoint: Option<String>,
}

impl Thing {
    /// Certificate, key and endpoint, when all three were issued.
    pub fn issued_credentials(&self) -> Option<(&str, &str, &str)> {
        match (&self.certificate, &self.private_key, &self.endpoint) {
            (Some(cert), Some(key), Some(endpoint))
                if !cert.is_empty() && !key.is_empty() && !endpoint.is_empty() =>
            {
                Some((cert.as_str(), key.as_str(), endpoint.as_str()))
            }
            _ => None,
        }
    }
}

/// Core registry operations. A missing thing is reported as `None` on reads
/// and as [`crate::HttpError`] 404 on deletes.
#[async_trait::async_trait]
pub trait CoreClient: Send + Sync {
    async fn get_device(
        &self,
        creds: &AwsCredentials,
        device_id: &str,
    ) -> color_eyre::eyre::Result<Option<Thing>>;

    /// Create the thing with certificate and policy, or update its status.
    async fn upsert_device(
        &self,
        creds: &AwsCredentials,
        device_id: &str,
        status: CoreStatus,
        policy_name: &str,
    ) -> color_eyre::eyre::Result<Thing>;

    async fn delete_device(
        &self,
        creds: &AwsCredentials,
        device_id: &str,
    ) -> color_eyre::eyre::Result<()>;

    async fn get_device_shadow(
        &self,
        creds: &AwsCredentials,
        device_id: &str,
    ) -> color_eyre::eyre::Result<Option<DeviceState>>;

    /// Overwrite the desired state, returning the resulting shadow.
    async fn update_device_shadow(
        &self,
        creds: &AwsCredentials,
        device_id: &str,
        desired: &serde_json::Map<String, serde_json::Value>,
    ) -> color_eyre::eyre::Result<Option<DeviceState>>;
}
