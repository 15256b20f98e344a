//! Hub adapter.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use color_eyre::eyre::WrapErr as _;
use iot_client::{
    DeviceTwinUpdate, HubAuth, HubClient, HubDevice, HubStatus, UpdateProperties, WorkflowsClient,
    http_status,
};
use iot_core::{
    ConnectionString, DeviceState, Error, Identity, Integration, Provider, Status,
};

use super::{CONF_KEY_CONNECTION_STRING, Dispatch, ProviderAdapter, Receipt};
use crate::SyncPolicy;

const WORKFLOWS_PROVIDER: &str = "Azure";

/// Hub lifecycle operations.
#[derive(Clone)]
pub struct IotHubAdapter {
    client: Arc<dyn HubClient>,
    workflows: Arc<dyn WorkflowsClient>,
}

impl IotHubAdapter {
    pub fn new(client: Arc<dyn HubClient>, workflows: Arc<dyn WorkflowsClient>) -> Self {
        Self { client, workflows }
    }

    /// Register the device, hand its connection string to the workflow
    /// service and tag the twin.
    async fn provision_device(
        &self,
        identity: &Identity,
        cs: &ConnectionString,
        device_id: &str,
        desired: Option<Status>,
    ) -> color_eyre::eyre::Result<()> {
        let request = HubDevice {
            device_id: device_id.to_owned(),
            auth: Some(HubAuth::sas()),
            status: desired.map(HubStatus::from_status),
            etag: None,
        };

        let device = match self.client.upsert_device(cs, device_id, request).await {
            Ok(device) => device,
            Err(err) => {
                return Err(match http_status(&err) {
                    Some(401) => Error::NoCredentials.into(),
                    Some(409) => Error::DeviceAlreadyExists.into(),
                    _ => err.wrap_err("failed to update iothub devices"),
                });
            }
        };

        let key = device.primary_key().ok_or(Error::NoDeviceConnectionString)?;
        let device_cs = ConnectionString::for_device(cs.host_name.clone(), device_id, key.to_vec());

        let configuration =
            BTreeMap::from([(CONF_KEY_CONNECTION_STRING.to_string(), device_cs.to_string())]);
        self.workflows
            .provision_external_device(identity, device_id, WORKFLOWS_PROVIDER, &configuration)
            .await
            .wrap_err("failed to submit iothub authn to deviceconfig")?;

        let mut tags = serde_json::Map::new();
        tags.insert("mender".into(), serde_json::Value::Bool(true));
        let update = DeviceTwinUpdate {
            tags,
            ..Default::default()
        };
        self.client
            .update_device_twin(cs, device_id, &update)
            .await
            .wrap_err("failed to update iothub device twin")
    }

    /// Update the registry status unless it already matches.
    async fn set_device_status(
        &self,
        cs: &ConnectionString,
        device_id: &str,
        status: HubStatus,
    ) -> color_eyre::eyre::Result<()> {
        let mut device = self
            .client
            .get_device(cs, device_id)
            .await
            .wrap_err("failed to retrieve device from iothub")?;

        if device.status == Some(status) {
            return Ok(());
        }

        device.status = Some(status);
        self.client
            .upsert_device(cs, device_id, device)
            .await
            .wrap_err("failed to update device status")?;
        Ok(())
    }
}

fn connection_string(integration: &Integration) -> color_eyre::eyre::Result<&ConnectionString> {
    integration
        .credentials
        .connection_string()
        .ok_or_else(|| Error::NoCredentials.into())
}

#[async_trait::async_trait]
impl ProviderAdapter for IotHubAdapter {
    fn provider(&self) -> Provider {
        Provider::IotHub
    }

    async fn provision(
        &self,
        call: &Dispatch<'_>,
        desired: Option<Status>,
    ) -> color_eyre::eyre::Result<Receipt> {
        let cs = connection_string(call.integration)?;
        self.provision_device(call.identity, cs, call.device_id, desired)
            .await?;
        Ok(Receipt::default())
    }

    async fn set_status(
        &self,
        call: &Dispatch<'_>,
        status: Status,
    ) -> color_eyre::eyre::Result<Receipt> {
        let cs = connection_string(call.integration)?;
        self.set_device_status(cs, call.device_id, HubStatus::from_status(status))
            .await?;
        Ok(Receipt::default())
    }

    async fn decommission(&self, call: &Dispatch<'_>) -> color_eyre::eyre::Result<Receipt> {
        let cs = connection_string(call.integration)?;
        match self.client.delete_device(cs, call.device_id).await {
            Ok(()) => Ok(Receipt::default()),
            Err(err) if http_status(&err) == Some(404) => Ok(Receipt::default()),
            Err(err) => Err(err.wrap_err("failed to delete IoT Hub device")),
        }
    }

    async fn get_state(
        &self,
        _identity: &Identity,
        integration: &Integration,
        device_id: &str,
    ) -> color_eyre::eyre::Result<Option<DeviceState>> {
        let cs = connection_string(integration)?;
        let twin = self
            .client
            .get_device_twin(cs, device_id)
            .await
            .wrap_err("failed to get the device twin")?;

        Ok(Some(DeviceState::from_provider(
            twin.properties.desired,
            twin.properties.reported,
        )))
    }

    async fn set_state(
        &self,
        identity: &Identity,
        integration: &Integration,
        device_id: &str,
        state: &DeviceState,
    ) -> color_eyre::eyre::Result<Option<DeviceState>> {
        let cs = connection_string(integration)?;

        let result = async {
            let twin = self.client.get_device_twin(cs, device_id).await?;
            let update = DeviceTwinUpdate {
                properties: UpdateProperties {
                    desired: state.desired.clone(),
                },
                tags: twin.tags,
                etag: twin.etag,
                replace: true,
            };
            self.client.update_device_twin(cs, device_id, &update).await
        }
        .await;

        if let Err(err) = result {
            if http_status(&err) == Some(412) {
                return Err(Error::DeviceStateConflict.into());
            }
            return Err(err.wrap_err("failed to update the device twin"));
        }

        self.get_state(identity, integration, device_id).await
    }

    async fn reconcile(
        &self,
        identity: &Identity,
        integration: &Integration,
        statuses: &BTreeMap<String, Status>,
        policy: SyncPolicy,
    ) -> color_eyre::eyre::Result<()> {
        let cs = connection_string(integration)?;
        let ids: Vec<String> = statuses.keys().cloned().collect();

        let twins = self
            .client
            .get_device_twins(cs, &ids)
            .await
            .wrap_err("failed to get devices from IoT Hub")?;

        let mut present = HashSet::with_capacity(twins.len());
        for twin in &twins {
            present.insert(twin.device_id.as_str());

            let Some(status) = statuses.get(&twin.device_id) else {
                continue;
            };
            let expected = HubStatus::from_status(*status);
            if twin.status == Some(expected) {
                continue;
            }

            tracing::warn!(
                tenant = %identity.tenant,
                device_id = %twin.device_id,
                expected = ?expected,
                actual = ?twin.status,
                "device status does not match, correcting"
            );
            let result = self.set_device_status(cs, &twin.device_id, expected).await;
            policy.tolerate(result, "failed to update IoT Hub device status")?;
        }

        for (device_id, status) in statuses {
            if present.contains(device_id.as_str()) {
                continue;
            }

            tracing::warn!(
                tenant = %identity.tenant,
                device_id = %device_id,
                "device not present in IoT Hub, provisioning"
            );
            let result = self
                .provision_device(identity, cs, device_id, Some(*status))
                .await;
            policy.tolerate(result, "failed to provision device to IoT Hub")?;
        }

        Ok(())
    }
}
