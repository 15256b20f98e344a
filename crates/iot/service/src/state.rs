//! Twin and shadow state access.

use color_eyre::eyre::WrapErr as _;
use iot_core::{DeviceState, Error, Identity, Integration};
use iot_storage::DataStore;
use uuid::Uuid;

use crate::{IotManager, ProviderAdapter};

impl<S: DataStore + 'static> IotManager<S> {
    /// Read a device's state from one integration it is linked to.
    pub async fn get_device_state(
        &self,
        identity: &Identity,
        device_id: &str,
        integration_id: Uuid,
    ) -> color_eyre::eyre::Result<Option<DeviceState>> {
        let (integration, adapter) = self
            .state_target(identity, device_id, integration_id)
            .await?;
        adapter.get_state(identity, &integration, device_id).await
    }

    /// Replace a device's desired state in one integration it is linked to,
    /// returning the resulting state.
    pub async fn set_device_state(
        &self,
        identity: &Identity,
        device_id: &str,
        integration_id: Uuid,
        state: &DeviceState,
    ) -> color_eyre::eyre::Result<Option<DeviceState>> {
        let (integration, adapter) = self
            .state_target(identity, device_id, integration_id)
            .await?;
        adapter
            .set_state(identity, &integration, device_id, state)
            .await
    }

    async fn state_target(
        &self,
        identity: &Identity,
        device_id: &str,
        integration_id: Uuid,
    ) -> color_eyre::eyre::Result<(Integration, &dyn ProviderAdapter)> {
        let device = self
            .inner
            .store
            .get_device_by_integration_id(identity, device_id, integration_id)
            .await
            .wrap_err("failed to retrieve the device")?;
        if device.is_none() {
            return Err(Error::IntegrationNotFound.into());
        }

        let integration = self
            .inner
            .store
            .get_integration_by_id(identity, integration_id)
            .await
            .wrap_err("failed to retrieve the integration")?
            .ok_or(Error::IntegrationNotFound)?;

        let adapter = self
            .inner
            .adapters
            .get(integration.provider)
            .ok_or(Error::UnknownIntegration)?;

        Ok((integration, adapter.as_ref()))
    }
}
