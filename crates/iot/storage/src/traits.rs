//! Storage traits.

use iot_core::{
    Credentials, Device, Event, EventsFilter, Identity, Integration, IntegrationFilter,
    TenantDevice,
};
use uuid::Uuid;

/// Store-level failures that callers translate into domain errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,
    #[error("object exists")]
    Exists,
}

/// Position in a store-wide device scan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DeviceCursor {
    pub tenant: String,
    pub device_id: String,
}

impl From<&TenantDevice> for DeviceCursor {
    fn from(dev: &TenantDevice) -> Self {
        Self {
            tenant: dev.tenant.clone(),
            device_id: dev.device.id.clone(),
        }
    }
}

/// Integration storage operations.
#[trait_variant::make(Send)]
pub trait IntegrationStore: Send + Sync {
    /// List a tenant's integrations.
    async fn get_integrations(
        &self,
        identity: &Identity,
        filter: &IntegrationFilter,
    ) -> color_eyre::eyre::Result<Vec<Integration>>;

    /// Get one integration.
    async fn get_integration_by_id(
        &self,
        identity: &Identity,
        id: Uuid,
    ) -> color_eyre::eyre::Result<Option<Integration>>;

    /// Store a new integration, assigning an ID. Fails with [`StoreError::Exists`].
    async fn create_integration(
        &self,
        identity: &Identity,
        integration: Integration,
    ) -> color_eyre::eyre::Result<Integration>;

    /// Replace an integration's credentials. Fails with [`StoreError::NotFound`].
    async fn set_integration_credentials(
        &self,
        identity: &Identity,
        id: Uuid,
        credentials: Credentials,
    ) -> color_eyre::eyre::Result<()>;

    /// Delete an integration. Fails with [`StoreError::NotFound`].
    async fn remove_integration(&self, identity: &Identity, id: Uuid)
    -> color_eyre::eyre::Result<()>;

    /// Check whether any device is connected to the integration.
    async fn do_devices_exist_by_integration_id(
        &self,
        identity: &Identity,
        id: Uuid,
    ) -> color_eyre::eyre::Result<bool>;
}

/// Device storage operations.
#[trait_variant::make(Send)]
pub trait DeviceStore: Send + Sync {
    /// Get a device.
    async fn get_device(
        &self,
        identity: &Identity,
        device_id: &str,
    ) -> color_eyre::eyre::Result<Option<Device>>;

    /// Get a device only if it is connected to the integration.
    async fn get_device_by_integration_id(
        &self,
        identity: &Identity,
        device_id: &str,
        integration_id: Uuid,
    ) -> color_eyre::eyre::Result<Option<Device>>;

    /// Add integrations to a device, creating it if needed.
    async fn upsert_device_integrations(
        &self,
        identity: &Identity,
        device_id: &str,
        integration_ids: &[Uuid],
    ) -> color_eyre::eyre::Result<Device>;

    /// Delete a device. Fails with [`StoreError::NotFound`].
    async fn delete_device(&self, identity: &Identity, device_id: &str)
    -> color_eyre::eyre::Result<()>;

    /// Disconnect every device from an integration, returning how many changed.
    async fn remove_devices_from_integration(
        &self,
        identity: &Identity,
        integration_id: Uuid,
    ) -> color_eyre::eyre::Result<u64>;

    /// Scan devices of all tenants ordered by tenant then device ID,
    /// starting after `after`.
    async fn get_all_devices(
        &self,
        after: Option<&DeviceCursor>,
        limit: usize,
    ) -> color_eyre::eyre::Result<Vec<TenantDevice>>;
}

/// Event storage operations.
#[trait_variant::make(Send)]
pub trait EventStore: Send + Sync {
    /// Persist an audit event.
    async fn save_event(&self, identity: &Identity, event: &Event) -> color_eyre::eyre::Result<()>;

    /// List unexpired events, newest first.
    async fn get_events(
        &self,
        identity: &Identity,
        filter: &EventsFilter,
    ) -> color_eyre::eyre::Result<Vec<Event>>;
}

/// Tenant-wide maintenance.
#[trait_variant::make(Send)]
pub trait TenantStore: Send + Sync {
    /// Delete everything stored for a tenant.
    async fn delete_tenant_data(&self, identity: &Identity) -> color_eyre::eyre::Result<()>;

    /// Check that the store is reachable.
    async fn ping(&self) -> color_eyre::eyre::Result<()>;
}

/// Combined storage trait.
pub trait DataStore: IntegrationStore + DeviceStore + EventStore + TenantStore {}

impl<T> DataStore for T where T: IntegrationStore + DeviceStore + EventStore + TenantStore {}
