//! Device records, statuses and twin/shadow state.

use uuid::Uuid;

/// Authentication status of a device as known to the device registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Waiting for an operator decision.
    Pending,
    /// Authorized to connect.
    Accepted,
    /// Explicitly refused.
    Rejected,
    /// Authorized ahead of first contact.
    Preauthorized,
    /// Authentication disabled for this device.
    Noauth,
    /// Removed from the fleet.
    Decommissioned,
}

impl Status {
    /// Every status, in declaration order.
    pub const ALL: [Status; 6] = [
        Status::Pending,
        Status::Accepted,
        Status::Rejected,
        Status::Preauthorized,
        Status::Noauth,
        Status::Decommissioned,
    ];

    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Accepted => "accepted",
            Status::Rejected => "rejected",
            Status::Preauthorized => "preauthorized",
            Status::Noauth => "noauth",
            Status::Decommissioned => "decommissioned",
        }
    }

    /// Whether a device in this status may connect to an external registry.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Status::Accepted | Status::Preauthorized)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = color_eyre::eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| color_eyre::eyre::eyre!("unknown device status: {s}"))
    }
}

/// A device and the integrations it has been connected to.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Device {
    /// Device ID, opaque outside the device registry.
    pub id: String,

    /// Integrations the device was provisioned into.
    #[serde(default)]
    pub integration_ids: Vec<Uuid>,
}

impl Device {
    /// Create a device with no integrations.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            integration_ids: Vec::new(),
        }
    }

    /// Attach integration IDs.
    pub fn with_integrations(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.integration_ids.extend(ids);
        self
    }

    /// Whether the device is connected to the integration.
    pub fn has_integration(&self, id: Uuid) -> bool {
        self.integration_ids.contains(&id)
    }
}

/// A device as returned by a store-wide scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantDevice {
    /// Owning tenant.
    pub tenant: String,
    /// The device record.
    pub device: Device,
}

/// Desired and reported configuration of a device in an external registry.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct DeviceState {
    /// Configuration requested by the backend.
    #[serde(default)]
    pub desired: serde_json::Map<String, serde_json::Value>,

    /// Configuration last reported by the device.
    #[serde(default)]
    pub reported: serde_json::Map<String, serde_json::Value>,
}

impl DeviceState {
    /// Keys maintained by registries that are never exposed to callers.
    pub const METADATA_KEYS: [&'static str; 2] = ["$metadata", "$version"];

    /// Build a state with provider metadata removed from both halves.
    pub fn from_provider(
        mut desired: serde_json::Map<String, serde_json::Value>,
        mut reported: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        for key in Self::METADATA_KEYS {
            desired.remove(key);
            reported.remove(key);
        }
        Self { desired, reported }
    }
}

/// An authentication set attached to a device event.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AuthSet {
    /// Auth set ID.
    pub id: String,

    /// Device the auth set belongs to.
    pub device_id: String,

    /// Identity attributes.
    #[serde(default)]
    pub identity_data: serde_json::Map<String, serde_json::Value>,

    /// PEM-encoded public key.
    #[serde(rename = "pubkey")]
    pub public_key: String,

    /// Auth set status.
    pub status: String,

    /// Creation time.
    #[serde(default, rename = "ts", skip_serializing_if = "Option::is_none")]
    pub created_ts: Option<chrono::DateTime<chrono::Utc>>,
}

/// Payload describing the device a lifecycle event is about.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct DeviceEvent {
    /// Device ID.
    pub id: String,

    /// Status at the time of the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,

    /// Authentication sets, when provisioning.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auth_sets: Vec<AuthSet>,

    /// When the device was first seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_ts: Option<chrono::DateTime<chrono::Utc>>,
}

impl DeviceEvent {
    /// Create an event payload for a device.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set the status.
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }
}
