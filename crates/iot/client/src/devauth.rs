//! Device authentication service client.

use std::time::Duration;

use color_eyre::eyre::WrapErr as _;
use iot_core::{Identity, Status};

use crate::error::check_status;

const URI_INTERNAL: &str = "/api/internal/v1/devauth";

/// Authentication status of a device as reported by devauth.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DevauthDevice {
    pub id: String,
    pub status: Status,
}

/// Source of truth for device authentication status.
#[async_trait::async_trait]
pub trait DevauthClient: Send + Sync {
    /// Look up devices by ID. Unknown IDs are absent from the result.
    async fn get_devices(
        &self,
        identity: &Identity,
        device_ids: &[String],
    ) -> color_eyre::eyre::Result<Vec<DevauthDevice>>;

    /// Check that the service is alive.
    async fn ping(&self) -> color_eyre::eyre::Result<()>;
}

/// HTTP devauth client.
#[derive(Clone)]
pub struct HttpDevauthClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDevauthClient {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> color_eyre::eyre::Result<Self> {
        let mut base_url = base_url.trim_end_matches('/').to_owned();
        if !base_url.contains("://") {
            base_url = format!("http://{base_url}");
        }
        url::Url::parse(&base_url).wrap_err("invalid devauth address")?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .wrap_err("failed to build devauth client")?;

        Ok(Self { client, base_url })
    }
}

#[async_trait::async_trait]
impl DevauthClient for HttpDevauthClient {
    async fn get_devices(
        &self,
        identity: &Identity,
        device_ids: &[String],
    ) -> color_eyre::eyre::Result<Vec<DevauthDevice>> {
        let url = format!(
            "{}{URI_INTERNAL}/tenants/{}/devices",
            self.base_url,
            urlencoding::encode(&identity.tenant)
        );
        let per_page = device_ids.len().to_string();
        let query: Vec<(&str, &str)> = device_ids
            .iter()
            .map(|id| ("id", id.as_str()))
            .chain(std::iter::once(("per_page", per_page.as_str())))
            .collect();

        let rsp = self
            .client
            .get(url)
            .query(&query)
            .send()
            .await
            .wrap_err("devauth: error performing request")?;
        let rsp = check_status(rsp)?;

        rsp.json()
            .await
            .wrap_err("devauth: error decoding HTTP response body")
    }

    async fn ping(&self) -> color_eyre::eyre::Result<()> {
        let rsp = self
            .client
            .get(format!("{}{URI_INTERNAL}/alive", self.base_url))
            .send()
            .await
            .wrap_err("error checking deviceauth liveliness")?;
        check_status(rsp)?;
        Ok(())
    }
}
