//! Configuration workflow service client.

use std::collections::BTreeMap;
use std::time::Duration;

use color_eyre::eyre::WrapErr as _;
use iot_core::Identity;

use crate::error::check_status;

const URI_HEALTH: &str = "/api/v1/health";
const URI_PROVISION_DEVICE: &str = "/api/v1/workflow/provision_external_device";

/// Pushes provider configuration down to devices.
#[async_trait::async_trait]
pub trait WorkflowsClient: Send + Sync {
    /// Hand configuration attributes for a device to the configuration service.
    async fn provision_external_device(
        &self,
        identity: &Identity,
        device_id: &str,
        provider: &str,
        configuration: &BTreeMap<String, String>,
    ) -> color_eyre::eyre::Result<()>;

    /// Check that the service is healthy.
    async fn check_health(&self) -> color_eyre::eyre::Result<()>;
}

#[derive(serde::Serialize)]
struct ProvisionRequest<'a> {
    tenant_id: &'a str,
    device_id: &'a str,
    provider: &'a str,
    configuration: &'a BTreeMap<String, String>,
}

/// HTTP workflows client.
#[derive(Clone)]
pub struct HttpWorkflowsClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWorkflowsClient {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> color_eyre::eyre::Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_owned();
        url::Url::parse(&base_url).wrap_err("invalid workflows address")?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .wrap_err("failed to build workflows client")?;

        Ok(Self { client, base_url })
    }
}

#[async_trait::async_trait]
impl WorkflowsClient for HttpWorkflowsClient {
    async fn provision_external_device(
        &self,
        identity: &Identity,
        device_id: &str,
        provider: &str,
        configuration: &BTreeMap<String, String>,
    ) -> color_eyre::eyre::Result<()> {
        let body = ProvisionRequest {
            tenant_id: &identity.tenant,
            device_id,
            provider,
            configuration,
        };

        let rsp = self
            .client
            .post(format!("{}{URI_PROVISION_DEVICE}", self.base_url))
            .json(&body)
            .send()
            .await
            .wrap_err("workflows: failed to execute request")?;
        check_status(rsp)?;
        Ok(())
    }

    async fn check_health(&self) -> color_eyre::eyre::Result<()> {
        let rsp = self
            .client
            .get(format!("{}{URI_HEALTH}", self.base_url))
            .send()
            .await
            .wrap_err("workflows: health check failed")?;

        let status = rsp.status();
        if !status.is_success() {
            color_eyre::eyre::bail!("health check HTTP error: {status}");
        }
        Ok(())
    }
}
