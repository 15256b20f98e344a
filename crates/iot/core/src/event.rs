//! Lifecycle events and their delivery outcomes.

use uuid::Uuid;

use crate::DeviceEvent;

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    DeviceProvisioned,
    DeviceDecommissioned,
    DeviceStatusChanged,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EventType::DeviceProvisioned => "device-provisioned",
            EventType::DeviceDecommissioned => "device-decommissioned",
            EventType::DeviceStatusChanged => "device-status-changed",
        })
    }
}

/// Event payload as delivered to webhooks.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: DeviceEvent,
    #[serde(rename = "time")]
    pub event_ts: chrono::DateTime<chrono::Utc>,
}

impl WebhookEvent {
    /// Create an event stamped now with a fresh ID.
    pub fn new(event_type: EventType, data: DeviceEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            data,
            event_ts: chrono::Utc::now(),
        }
    }
}

/// Outcome of delivering an event to one integration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeliveryStatus {
    pub integration_id: Uuid,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl DeliveryStatus {
    /// A successful delivery.
    pub fn succeeded(integration_id: Uuid, status_code: Option<u16>) -> Self {
        Self {
            integration_id,
            success: true,
            error: None,
            status_code,
        }
    }

    /// A failed delivery.
    pub fn failed(integration_id: Uuid, error: impl Into<String>, status_code: Option<u16>) -> Self {
        Self {
            integration_id,
            success: false,
            error: Some(error.into()),
            status_code,
        }
    }
}

/// Audit record of a lifecycle operation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub webhook: WebhookEvent,

    /// When the store may discard the record.
    #[serde(skip)]
    pub expire_ts: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delivery_statuses: Vec<DeliveryStatus>,
}

impl Event {
    /// Wrap a webhook event with its delivery outcomes.
    pub fn new(webhook: WebhookEvent, delivery_statuses: Vec<DeliveryStatus>) -> Self {
        Self {
            webhook,
            expire_ts: None,
            delivery_statuses,
        }
    }

    /// Set the expiry relative to the event time.
    pub fn expires_after(mut self, ttl: chrono::Duration) -> Self {
        self.expire_ts = Some(self.webhook.event_ts + ttl);
        self
    }
}

/// Page of events to list, newest first.
#[derive(Debug, Clone, Default)]
pub struct EventsFilter {
    pub skip: usize,
    pub limit: Option<usize>,
}
