//! In-memory storage implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use iot_core::{
    Credentials, Device, Event, EventsFilter, Identity, Integration, IntegrationFilter,
    TenantDevice,
};
use uuid::Uuid;

use crate::traits::*;

#[derive(Default)]
struct State {
    /// Integrations per tenant, in creation order.
    integrations: BTreeMap<String, Vec<Integration>>,
    /// Devices keyed by (tenant, device ID).
    devices: BTreeMap<(String, String), Device>,
    /// Events per tenant, in insertion order.
    events: BTreeMap<String, Vec<Event>>,
}

/// Memory-backed store. Clones share the same data.
///
/// A tenant holds at most one integration per provider.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> color_eyre::eyre::Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| color_eyre::eyre::eyre!("memory store lock poisoned"))
    }
}

fn device_key(identity: &Identity, device_id: &str) -> (String, String) {
    (identity.tenant.clone(), device_id.to_owned())
}

impl IntegrationStore for MemoryStore {
    async fn get_integrations(
        &self,
        identity: &Identity,
        filter: &IntegrationFilter,
    ) -> color_eyre::eyre::Result<Vec<Integration>> {
        let state = self.lock()?;
        let Some(integrations) = state.integrations.get(&identity.tenant) else {
            return Ok(Vec::new());
        };

        Ok(integrations
            .iter()
            .filter(|i| filter.matches(i))
            .skip(filter.skip)
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn get_integration_by_id(
        &self,
        identity: &Identity,
        id: Uuid,
    ) -> color_eyre::eyre::Result<Option<Integration>> {
        let state = self.lock()?;
        Ok(state
            .integrations
            .get(&identity.tenant)
            .and_then(|list| list.iter().find(|i| i.id == id))
            .cloned())
    }

    async fn create_integration(
        &self,
        identity: &Identity,
        mut integration: Integration,
    ) -> color_eyre::eyre::Result<Integration> {
        let mut state = self.lock()?;
        let list = state.integrations.entry(identity.tenant.clone()).or_default();

        if list
            .iter()
            .any(|i| i.provider == integration.provider || i.id == integration.id)
        {
            return Err(StoreError::Exists.into());
        }
        if integration.id.is_nil() {
            integration.id = Uuid::new_v4();
        }

        tracing::debug!(
            tenant = %identity,
            integration_id = %integration.id,
            provider = %integration.provider,
            "stored integration"
        );

        list.push(integration.clone());
        Ok(integration)
    }

    async fn set_integration_credentials(
        &self,
        identity: &Identity,
        id: Uuid,
        credentials: Credentials,
    ) -> color_eyre::eyre::Result<()> {
        let mut state = self.lock()?;
        let integration = state
            .integrations
            .get_mut(&identity.tenant)
            .and_then(|list| list.iter_mut().find(|i| i.id == id))
            .ok_or(StoreError::NotFound)?;

        integration.credentials = credentials;
        Ok(())
    }

    async fn remove_integration(
        &self,
        identity: &Identity,
        id: Uuid,
    ) -> color_eyre::eyre::Result<()> {
        let mut state = self.lock()?;
        let list = state
            .integrations
            .get_mut(&identity.tenant)
            .ok_or(StoreError::NotFound)?;

        let before = list.len();
        list.retain(|i| i.id != id);
        if list.len() == before {
            return Err(StoreError::NotFound.into());
        }
        Ok(())
    }

    async fn do_devices_exist_by_integration_id(
        &self,
        identity: &Identity,
        id: Uuid,
    ) -> color_eyre::eyre::Result<bool> {
        let state = self.lock()?;
        Ok(state
            .devices
            .iter()
            .any(|((tenant, _), dev)| *tenant == identity.tenant && dev.has_integration(id)))
    }
}

impl DeviceStore for MemoryStore {
    async fn get_device(
        &self,
        identity: &Identity,
        device_id: &str,
    ) -> color_eyre::eyre::Result<Option<Device>> {
        let state = self.lock()?;
        Ok(state.devices.get(&device_key(identity, device_id)).cloned())
    }

    async fn get_device_by_integration_id(
        &self,
        identity: &Identity,
        device_id: &str,
        integration_id: Uuid,
    ) -> color_eyre::eyre::Result<Option<Device>> {
        let state = self.lock()?;
        Ok(state
            .devices
            .get(&device_key(identity, device_id))
            .filter(|dev| dev.has_integration(integration_id))
            .cloned())
    }

    async fn upsert_device_integrations(
        &self,
        identity: &Identity,
        device_id: &str,
        integration_ids: &[Uuid],
    ) -> color_eyre::eyre::Result<Device> {
        let mut state = self.lock()?;
        let device = state
            .devices
            .entry(device_key(identity, device_id))
            .or_insert_with(|| Device::new(device_id));

        for id in integration_ids {
            if !device.has_integration(*id) {
                device.integration_ids.push(*id);
            }
        }
        Ok(device.clone())
    }

    async fn delete_device(
        &self,
        identity: &Identity,
        device_id: &str,
    ) -> color_eyre::eyre::Result<()> {
        let mut state = self.lock()?;
        state
            .devices
            .remove(&device_key(identity, device_id))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound.into())
    }

    async fn remove_devices_from_integration(
        &self,
        identity: &Identity,
        integration_id: Uuid,
    ) -> color_eyre::eyre::Result<u64> {
        let mut state = self.lock()?;
        let mut modified = 0;
        for ((tenant, _), dev) in state.devices.iter_mut() {
            if *tenant != identity.tenant || !dev.has_integration(integration_id) {
                continue;
            }
            dev.integration_ids.retain(|id| *id != integration_id);
            modified += 1;
        }
        Ok(modified)
    }

    async fn get_all_devices(
        &self,
        after: Option<&DeviceCursor>,
        limit: usize,
    ) -> color_eyre::eyre::Result<Vec<TenantDevice>> {
        use std::ops::Bound;

        let state = self.lock()?;
        let lower = match after {
            Some(cursor) => Bound::Excluded((cursor.tenant.clone(), cursor.device_id.clone())),
            None => Bound::Unbounded,
        };

        Ok(state
            .devices
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|((tenant, _), device)| TenantDevice {
                tenant: tenant.clone(),
                device: device.clone(),
            })
            .collect())
    }
}

impl EventStore for MemoryStore {
    async fn save_event(&self, identity: &Identity, event: &Event) -> color_eyre::eyre::Result<()> {
        let mut state = self.lock()?;
        state
            .events
            .entry(identity.tenant.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn get_events(
        &self,
        identity: &Identity,
        filter: &EventsFilter,
    ) -> color_eyre::eyre::Result<Vec<Event>> {
        let now = chrono::Utc::now();
        let state = self.lock()?;
        let Some(events) = state.events.get(&identity.tenant) else {
            return Ok(Vec::new());
        };

        Ok(events
            .iter()
            .rev()
            .filter(|e| e.expire_ts.is_none_or(|exp| exp > now))
            .skip(filter.skip)
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

impl TenantStore for MemoryStore {
    async fn delete_tenant_data(&self, identity: &Identity) -> color_eyre::eyre::Result<()> {
        if identity.tenant.is_empty() {
            color_eyre::eyre::bail!("tenant id is empty");
        }

        let mut state = self.lock()?;
        state.integrations.remove(&identity.tenant);
        state.events.remove(&identity.tenant);
        state.devices.retain(|(tenant, _), _| *tenant != identity.tenant);
        Ok(())
    }

    async fn ping(&self) -> color_eyre::eyre::Result<()> {
        self.lock().map(|_| ())
    }
}
