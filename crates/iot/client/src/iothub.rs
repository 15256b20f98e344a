//! Hub registry: device identities and device twins.

use std::time::Duration;

use color_eyre::eyre::WrapErr as _;
use iot_core::{ConnectionString, Status};

use crate::error::check_status;

/// REST API version sent with every hub request.
pub const HUB_API_VERSION: &str = "2021-04-12";

const HEADER_MAX_ITEM_COUNT: &str = "X-Ms-Max-Item-Count";

/// Lifetime of the SAS token attached to each request, in seconds.
const TOKEN_TTL_SECS: i64 = 60;

/// Device status in the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HubStatus {
    Enabled,
    Disabled,
}

impl HubStatus {
    /// Enabled only for statuses that may connect.
    pub fn from_status(status: Status) -> Self {
        if status.is_enabled() {
            HubStatus::Enabled
        } else {
            HubStatus::Disabled
        }
    }

    /// Canonical device status for a hub status.
    pub fn to_status(self) -> Status {
        match self {
            HubStatus::Enabled => Status::Accepted,
            HubStatus::Disabled => Status::Rejected,
        }
    }
}

mod base64_bytes {
    use base64::Engine as _;

    pub fn serialize<S: serde::Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

/// Symmetric keys issued for a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymmetricKey {
    #[serde(default, with = "base64_bytes")]
    pub primary_key: Vec<u8>,
    #[serde(default, with = "base64_bytes")]
    pub secondary_key: Vec<u8>,
}

/// Device authentication settings.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubAuth {
    #[serde(rename = "type")]
    pub auth_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symmetric_key: Option<SymmetricKey>,
}

impl HubAuth {
    /// Symmetric-key authentication with keys generated by the hub.
    pub fn sas() -> Self {
        Self {
            auth_type: "sas".into(),
            symmetric_key: None,
        }
    }
}

/// Device identity in the hub.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubDevice {
    #[serde(default)]
    pub device_id: String,
    #[serde(default, rename = "authentication", skip_serializing_if = "Option::is_none")]
    pub auth: Option<HubAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<HubStatus>,
    #[serde(default, skip_serializing)]
    pub etag: Option<String>,
}

impl HubDevice {
    /// Primary symmetric key, if the hub issued one.
    pub fn primary_key(&self) -> Option<&[u8]> {
        self.auth
            .as_ref()
            .and_then(|a| a.symmetric_key.as_ref())
            .map(|k| k.primary_key.as_slice())
            .filter(|k| !k.is_empty())
    }
}

/// Desired and reported twin properties.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TwinProperties {
    #[serde(default)]
    pub desired: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub reported: serde_json::Map<String, serde_json::Value>,
}

/// Device twin.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTwin {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub status: Option<HubStatus>,
    #[serde(default)]
    pub properties: TwinProperties,
    #[serde(default)]
    pub tags: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct UpdateProperties {
    pub desired: serde_json::Map<String, serde_json::Value>,
}

/// Twin update request.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct DeviceTwinUpdate {
    pub properties: UpdateProperties,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub tags: serde_json::Map<String, serde_json::Value>,
    /// Sent as `If-Match`; the update fails with 412 when stale.
    #[serde(skip)]
    pub etag: Option<String>,
    /// Replace the twin instead of patching it.
    #[serde(skip)]
    pub replace: bool,
}

/// Hub registry operations. Unsuccessful responses are reported as
/// [`crate::HttpError`].
#[async_trait::async_trait]
pub trait HubClient: Send + Sync {
    /// Fetch the twins of several devices. Unknown devices are absent.
    async fn get_device_twins(
        &self,
        cs: &ConnectionString,
        device_ids: &[String],
    ) -> color_eyre::eyre::Result<Vec<DeviceTwin>>;

    async fn get_device_twin(
        &self,
        cs: &ConnectionString,
        device_id: &str,
    ) -> color_eyre::eyre::Result<DeviceTwin>;

    async fn update_device_twin(
        &self,
        cs: &ConnectionString,
        device_id: &str,
        update: &DeviceTwinUpdate,
    ) -> color_eyre::eyre::Result<()>;

    async fn get_device(
        &self,
        cs: &ConnectionString,
        device_id: &str,
    ) -> color_eyre::eyre::Result<HubDevice>;

    /// Create or update a device identity, returning the stored identity.
    async fn upsert_device(
        &self,
        cs: &ConnectionString,
        device_id: &str,
        device: HubDevice,
    ) -> color_eyre::eyre::Result<HubDevice>;

    async fn delete_device(
        &self,
        cs: &ConnectionString,
        device_id: &str,
    ) -> color_eyre::eyre::Result<()>;
}

/// REST hub client authenticated with SAS tokens.
#[derive(Clone)]
pub struct HttpHubClient {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpHubClient {
    /// Create a client; requests go to `https://<hub host>`.
    pub fn new(timeout: Duration) -> color_eyre::eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .wrap_err("failed to build hub client")?;

        Ok(Self {
            client,
            base_url: None,
        })
    }

    /// Send requests to a fixed base URL instead of the hub host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_owned());
        self
    }

    fn request(
        &self,
        cs: &ConnectionString,
        method: reqwest::Method,
        path: &str,
    ) -> color_eyre::eyre::Result<reqwest::RequestBuilder> {
        cs.validate_shape().wrap_err("invalid connection string")?;

        let base = match &self.base_url {
            Some(base) => base.clone(),
            None => format!("https://{}", cs.endpoint_host()),
        };
        let url = format!("{base}/{}", path.trim_start_matches('/'));
        let token = cs.sas_token(chrono::Utc::now() + chrono::Duration::seconds(TOKEN_TTL_SECS));

        let mut req = self
            .client
            .request(method, url)
            .query(&[("api-version", HUB_API_VERSION)])
            .header(reqwest::header::AUTHORIZATION, token);
        if cs.gateway_host_name.is_some() {
            req = req.header(reqwest::header::HOST, cs.host_name.as_str());
        }
        Ok(req)
    }
}

fn device_path(device_id: &str) -> String {
    format!("/devices/{}", urlencoding::encode(device_id))
}

fn twin_path(device_id: &str) -> String {
    format!("/twins/{}", urlencoding::encode(device_id))
}

fn quoted_etag(etag: &str) -> String {
    format!("\"{}\"", etag.trim_matches('"'))
}

#[async_trait::async_trait]
impl HubClient for HttpHubClient {
    async fn get_device_twins(
        &self,
        cs: &ConnectionString,
        device_ids: &[String],
    ) -> color_eyre::eyre::Result<Vec<DeviceTwin>> {
        if device_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = device_ids
            .iter()
            .map(|id| format!("'{}'", id.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(",");
        let query = serde_json::json!({
            "query": format!("SELECT * FROM devices WHERE devices.deviceid IN [{ids}]"),
        });

        let rsp = self
            .request(cs, reqwest::Method::POST, "/devices/query")?
            .header(HEADER_MAX_ITEM_COUNT, device_ids.len())
            .json(&query)
            .send()
            .await
            .wrap_err("iothub: failed to fetch device twins")?;

        check_status(rsp)?
            .json()
            .await
            .wrap_err("iothub: failed to decode API response")
    }

    async fn get_device_twin(
        &self,
        cs: &ConnectionString,
        device_id: &str,
    ) -> color_eyre::eyre::Result<DeviceTwin> {
        let rsp = self
            .request(cs, reqwest::Method::GET, &twin_path(device_id))?
            .send()
            .await
            .wrap_err("iothub: failed to fetch device twin")?;

        check_status(rsp)?
            .json()
            .await
            .wrap_err("iothub: failed to decode API response")
    }

    async fn update_device_twin(
        &self,
        cs: &ConnectionString,
        device_id: &str,
        update: &DeviceTwinUpdate,
    ) -> color_eyre::eyre::Result<()> {
        let method = if update.replace {
            reqwest::Method::PUT
        } else {
            reqwest::Method::PATCH
        };

        let mut req = self.request(cs, method, &twin_path(device_id))?.json(update);
        if let Some(etag) = &update.etag {
            req = req.header(reqwest::header::IF_MATCH, quoted_etag(etag));
        }

        let rsp = req
            .send()
            .await
            .wrap_err("iothub: failed to submit device twin update")?;
        check_status(rsp)?;
        Ok(())
    }

    async fn get_device(
        &self,
        cs: &ConnectionString,
        device_id: &str,
    ) -> color_eyre::eyre::Result<HubDevice> {
        let rsp = self
            .request(cs, reqwest::Method::GET, &device_path(device_id))?
            .send()
            .await
            .wrap_err("iothub: failed to execute request")?;

        check_status(rsp)?
            .json()
            .await
            .wrap_err("iothub: failed to decode device")
    }

    async fn upsert_device(
        &self,
        cs: &ConnectionString,
        device_id: &str,
        mut device: HubDevice,
    ) -> color_eyre::eyre::Result<HubDevice> {
        device.device_id = device_id.to_owned();

        let mut req = self
            .request(cs, reqwest::Method::PUT, &device_path(device_id))?
            .json(&device);
        if let Some(etag) = &device.etag {
            req = req.header(reqwest::header::IF_MATCH, quoted_etag(etag));
        }

        let rsp = req
            .send()
            .await
            .wrap_err("iothub: failed to execute request")?;

        check_status(rsp)?
            .json()
            .await
            .wrap_err("iothub: failed to decode updated device")
    }

    async fn delete_device(
        &self,
        cs: &ConnectionString,
        device_id: &str,
    ) -> color_eyre::eyre::Result<()> {
        let rsp = self
            .request(cs, reqwest::Method::DELETE, &device_path(device_id))?
            .header(reqwest::header::IF_MATCH, "*")
            .send()
            .await
            .wrap_err("iothub: failed to execute request")?;
        check_status(rsp)?;
        Ok(())
    }
}
