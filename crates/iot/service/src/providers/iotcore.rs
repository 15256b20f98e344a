//! Core adapter.

use std::collections::BTreeMap;
use std::sync::Arc;

use color_eyre::eyre::WrapErr as _;
use iot_client::{CoreClient, CoreStatus, WorkflowsClient, http_status};
use iot_core::{AwsCredentials, DeviceState, Error, Identity, Integration, Provider, Status};

use super::{
    CONF_KEY_AWS_CERTIFICATE, CONF_KEY_AWS_ENDPOINT, CONF_KEY_AWS_PRIVATE_KEY, Dispatch,
    ProviderAdapter, Receipt,
};
use crate::SyncPolicy;

const WORKFLOWS_PROVIDER: &str = "AWS";

/// Core lifecycle operations.
#[derive(Clone)]
pub struct IotCoreAdapter {
    client: Arc<dyn CoreClient>,
    workflows: Arc<dyn WorkflowsClient>,
}

impl IotCoreAdapter {
    pub fn new(client: Arc<dyn CoreClient>, workflows: Arc<dyn WorkflowsClient>) -> Self {
        Self { client, workflows }
    }

    /// Create the thing and, when credentials were issued, push them to the
    /// device through the workflow service.
    async fn provision_device(
        &self,
        identity: &Identity,
        aws: &AwsCredentials,
        device_id: &str,
        status: CoreStatus,
    ) -> color_eyre::eyre::Result<()> {
        let thing = self
            .client
            .upsert_device(aws, device_id, status, &aws.device_policy_name)
            .await
            .wrap_err("failed to update iotcore devices")?;

        let Some((certificate, private_key, endpoint)) = thing.issued_credentials() else {
            return Ok(());
        };

        let configuration = BTreeMap::from([
            (CONF_KEY_AWS_CERTIFICATE.to_string(), certificate.to_string()),
            (CONF_KEY_AWS_PRIVATE_KEY.to_string(), private_key.to_string()),
            (CONF_KEY_AWS_ENDPOINT.to_string(), endpoint.to_string()),
        ]);
        self.workflows
            .provision_external_device(identity, device_id, WORKFLOWS_PROVIDER, &configuration)
            .await
            .wrap_err("failed to submit iotcore credentials to deviceconfig")
    }

    async fn set_device_status(
        &self,
        aws: &AwsCredentials,
        device_id: &str,
        status: CoreStatus,
    ) -> color_eyre::eyre::Result<()> {
        self.client
            .upsert_device(aws, device_id, status, &aws.device_policy_name)
            .await
            .wrap_err("failed to update iotcore device status")?;
        Ok(())
    }
}

fn aws_credentials(integration: &Integration) -> color_eyre::eyre::Result<&AwsCredentials> {
    integration
        .credentials
        .aws()
        .ok_or_else(|| Error::NoCredentials.into())
}

#[async_trait::async_trait]
impl ProviderAdapter for IotCoreAdapter {
    fn provider(&self) -> Provider {
        Provider::IotCore
    }

    async fn provision(
        &self,
        call: &Dispatch<'_>,
        desired: Option<Status>,
    ) -> color_eyre::eyre::Result<Receipt> {
        let aws = aws_credentials(call.integration)?;
        let status = desired.map_or(CoreStatus::Active, CoreStatus::from_status);
        self.provision_device(call.identity, aws, call.device_id, status)
            .await?;
        Ok(Receipt::default())
    }

    async fn set_status(
        &self,
        call: &Dispatch<'_>,
        status: Status,
    ) -> color_eyre::eyre::Result<Receipt> {
        let aws = aws_credentials(call.integration)?;
        self.set_device_status(aws, call.device_id, CoreStatus::from_status(status))
            .await?;
        Ok(Receipt::default())
    }

    async fn decommission(&self, call: &Dispatch<'_>) -> color_eyre::eyre::Result<Receipt> {
        let aws = aws_credentials(call.integration)?;
        match self.client.delete_device(aws, call.device_id).await {
            Ok(()) => Ok(Receipt::default()),
            Err(err) if http_status(&err) == Some(404) => Ok(Receipt::default()),
            Err(err) => Err(err.wrap_err("failed to delete IoT Core device")),
        }
    }

    async fn get_state(
        &self,
        _identity: &Identity,
        integration: &Integration,
        device_id: &str,
    ) -> color_eyre::eyre::Result<Option<DeviceState>> {
        let aws = aws_credentials(integration)?;
        self.client
            .get_device_shadow(aws, device_id)
            .await
            .wrap_err("failed to get the device shadow")
    }

    async fn set_state(
        &self,
        _identity: &Identity,
        integration: &Integration,
        device_id: &str,
        state: &DeviceState,
    ) -> color_eyre::eyre::Result<Option<DeviceState>> {
        let aws = aws_credentials(integration)?;
        self.client
            .update_device_shadow(aws, device_id, &state.desired)
            .await
            .wrap_err("failed to update the device shadow")
    }

    async fn reconcile(
        &self,
        identity: &Identity,
        integration: &Integration,
        statuses: &BTreeMap<String, Status>,
        policy: SyncPolicy,
    ) -> color_eyre::eyre::Result<()> {
        let aws = aws_credentials(integration)?;

        for (device_id, status) in statuses {
            let expected = CoreStatus::from_status(*status);

            let thing = match self.client.get_device(aws, device_id).await {
                Ok(thing) => thing,
                Err(err) => {
                    policy.tolerate(Err(err), "failed to get device from IoT Core")?;
                    continue;
                }
            };

            let result = match thing {
                None => {
                    tracing::warn!(
                        tenant = %identity.tenant,
                        device_id = %device_id,
                        "device not present in IoT Core, provisioning"
                    );
                    self.provision_device(identity, aws, device_id, expected)
                        .await
                        .wrap_err("failed to provision device to IoT Core")
                }
                Some(thing) if thing.status != expected => {
                    tracing::warn!(
                        tenant = %identity.tenant,
                        device_id = %device_id,
                        expected = ?expected,
                        actual = ?thing.status,
                        "device status does not match, correcting"
                    );
                    self.set_device_status(aws, device_id, expected).await
                }
                Some(_) => Ok(()),
            };
            policy.tolerate(result, "failed to reconcile IoT Core device")?;
        }

        Ok(())
    }
}
