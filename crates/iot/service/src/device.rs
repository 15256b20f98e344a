//! Per-operation device lookup.

use std::sync::Arc;

use color_eyre::eyre::Report;
use iot_core::{Device, Identity};
use iot_storage::DeviceStore;
use uuid::Uuid;

/// A remembered load failure. The original report stays reachable through
/// [`std::error::Error::source`].
#[derive(Debug, Clone)]
struct LookupFailed(Arc<Report>);

impl std::fmt::Display for LookupFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("failed to retrieve device")
    }
}

impl std::error::Error for LookupFailed {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&**self.0)
    }
}

/// Loads a device at most once per lifecycle operation, however many
/// integrations ask about its membership. A failed load is remembered too.
pub(crate) struct DeviceLookup<'a, S> {
    store: &'a S,
    identity: &'a Identity,
    device_id: &'a str,
    cached: Option<Result<Option<Device>, LookupFailed>>,
}

impl<'a, S: DeviceStore> DeviceLookup<'a, S> {
    pub(crate) fn new(store: &'a S, identity: &'a Identity, device_id: &'a str) -> Self {
        Self {
            store,
            identity,
            device_id,
            cached: None,
        }
    }

    async fn load(&mut self) -> &Result<Option<Device>, LookupFailed> {
        let loaded = match self.cached.take() {
            Some(cached) => cached,
            None => self
                .store
                .get_device(self.identity, self.device_id)
                .await
                .map_err(|err| LookupFailed(Arc::new(err))),
        };
        self.cached.insert(loaded)
    }

    /// Whether the device is linked to the integration. A missing device is
    /// linked to nothing.
    pub(crate) async fn has_integration(&mut self, id: Uuid) -> color_eyre::eyre::Result<bool> {
        match self.load().await {
            Ok(device) => Ok(device.as_ref().is_some_and(|d| d.has_integration(id))),
            Err(failed) => Err(Report::new(failed.clone())),
        }
    }
}
