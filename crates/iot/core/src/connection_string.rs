//! Hub connection strings.
//!
//! A connection string is a `;`-separated list of `Key=Value` pairs, e.g.
//! `HostName=hub.azure-devices.net;SharedAccessKeyName=owner;SharedAccessKey=<base64>`.

use base64::Engine as _;

use crate::TrustedHostnames;

const KEY_HOST_NAME: &str = "HostName";
const KEY_GATEWAY_HOST_NAME: &str = "GatewayHostName";
const KEY_SHARED_ACCESS_KEY_NAME: &str = "SharedAccessKeyName";
const KEY_DEVICE_ID: &str = "DeviceId";
const KEY_MODULE_ID: &str = "ModuleId";
const KEY_SHARED_ACCESS_KEY: &str = "SharedAccessKey";
const KEY_SHARED_ACCESS_SIGNATURE: &str = "SharedAccessSignature";

const OMITTED: &str = "...<omitted>";

/// Longest accepted connection string.
pub const MAX_CONNECTION_STRING_LEN: usize = 4096;

/// Connection string parse and validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionStringError {
    #[error("invalid connection string format")]
    Format,
    #[error("invalid connection string key: {0}")]
    UnknownKey(String),
    #[error("shared access key format")]
    KeyEncoding(#[source] base64::DecodeError),
    #[error("connection string is missing {0}")]
    Missing(&'static str),
    #[error("one of 'DeviceId' or 'SharedAccessKeyName' must be set")]
    MissingIdentity,
    #[error("connection string can be no longer than {MAX_CONNECTION_STRING_LEN} characters")]
    TooLong,
    #[error("hostname {0} does not refer to a trusted domain")]
    UntrustedHost(String),
}

/// Credentials for a hub, or for a single device on a hub.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ConnectionString {
    /// Hub hostname.
    pub host_name: String,
    /// Gateway that requests are routed through, if any.
    pub gateway_host_name: Option<String>,
    /// Shared access policy name (hub-level credentials).
    pub key_name: Option<String>,
    /// Device ID (device-level credentials).
    pub device_id: Option<String>,
    /// Module ID.
    pub module_id: Option<String>,
    /// Shared access key (raw bytes).
    pub key: Vec<u8>,
    /// Pre-computed shared access signature.
    pub signature: Option<String>,
}

impl ConnectionString {
    /// Build device-level credentials on a hub.
    pub fn for_device(host_name: impl Into<String>, device_id: impl Into<String>, key: Vec<u8>) -> Self {
        Self {
            host_name: host_name.into(),
            device_id: Some(device_id.into()),
            key,
            ..Default::default()
        }
    }

    /// Host that requests should be sent to.
    pub fn endpoint_host(&self) -> &str {
        self.gateway_host_name.as_deref().unwrap_or(&self.host_name)
    }

    /// Check required fields and length.
    pub fn validate_shape(&self) -> Result<(), ConnectionStringError> {
        if self.host_name.is_empty() {
            return Err(ConnectionStringError::Missing(KEY_HOST_NAME));
        }
        if self.key.is_empty() {
            return Err(ConnectionStringError::Missing(KEY_SHARED_ACCESS_KEY));
        }
        if self.device_id.is_none() && self.key_name.is_none() {
            return Err(ConnectionStringError::MissingIdentity);
        }
        if self.render(false).len() > MAX_CONNECTION_STRING_LEN {
            return Err(ConnectionStringError::TooLong);
        }
        Ok(())
    }

    /// Check shape and that every hostname is on the allowlist.
    pub fn validate(&self, trusted: &TrustedHostnames) -> Result<(), ConnectionStringError> {
        self.validate_shape()?;
        for host in std::iter::once(self.host_name.as_str()).chain(self.gateway_host_name.as_deref())
        {
            if !trusted.is_trusted(host) {
                return Err(ConnectionStringError::UntrustedHost(host.to_owned()));
            }
        }
        Ok(())
    }

    /// Shared access signature authorizing requests until `expires_at`.
    pub fn sas_token(&self, expires_at: chrono::DateTime<chrono::Utc>) -> String {
        iot_crypto::sas_token(
            &self.host_name,
            &self.key,
            expires_at.timestamp(),
            self.key_name.as_deref(),
        )
    }

    /// Render with the key truncated, safe for logs and API responses.
    pub fn redacted(&self) -> String {
        self.render(true)
    }

    fn render(&self, omit_key: bool) -> String {
        let engine = &base64::engine::general_purpose::STANDARD;
        let key = if self.key.is_empty() {
            None
        } else if omit_key {
            let prefix = &self.key[..self.key.len().min(3)];
            Some(format!("{}{OMITTED}", engine.encode(prefix)))
        } else {
            Some(engine.encode(&self.key))
        };

        let fields = [
            (KEY_HOST_NAME, Some(self.host_name.clone()).filter(|h| !h.is_empty())),
            (KEY_GATEWAY_HOST_NAME, self.gateway_host_name.clone()),
            (KEY_SHARED_ACCESS_KEY_NAME, self.key_name.clone()),
            (KEY_DEVICE_ID, self.device_id.clone()),
            (KEY_MODULE_ID, self.module_id.clone()),
            (KEY_SHARED_ACCESS_KEY, key),
            (KEY_SHARED_ACCESS_SIGNATURE, self.signature.clone()),
        ];

        fields
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| format!("{name}={v}")))
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl std::str::FromStr for ConnectionString {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut cs = ConnectionString::default();
        for pair in s.split(';') {
            let (key, value) = pair.split_once('=').ok_or(ConnectionStringError::Format)?;
            let value = value.to_owned();
            match key {
                KEY_HOST_NAME => cs.host_name = value,
                KEY_GATEWAY_HOST_NAME => cs.gateway_host_name = Some(value),
                KEY_SHARED_ACCESS_KEY_NAME => cs.key_name = Some(value),
                KEY_DEVICE_ID => cs.device_id = Some(value),
                KEY_MODULE_ID => cs.module_id = Some(value),
                KEY_SHARED_ACCESS_SIGNATURE => cs.signature = Some(value),
                KEY_SHARED_ACCESS_KEY => {
                    cs.key = base64::engine::general_purpose::STANDARD
                        .decode(value)
                        .map_err(ConnectionStringError::KeyEncoding)?;
                }
                other => return Err(ConnectionStringError::UnknownKey(other.to_owned())),
            }
        }
        cs.validate_shape()?;
        Ok(cs)
    }
}

impl std::fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render(false))
    }
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ConnectionString")
            .field(&self.redacted())
            .finish()
    }
}

// Serialized form never carries the full key.
impl serde::Serialize for ConnectionString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.redacted())
    }
}

impl<'de> serde::Deserialize<'de> for ConnectionString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
