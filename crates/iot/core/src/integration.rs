//! Integrations with external device registries and webhooks.

use uuid::Uuid;

use crate::{ConnectionString, CredentialError};

/// Longest accepted integration description.
pub const MAX_DESCRIPTION_LEN: usize = 1024;

/// External system an integration talks to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
pub enum Provider {
    /// Azure-IoT-Hub-like registry (device twins).
    #[serde(rename = "iot-hub")]
    IotHub,
    /// AWS-IoT-Core-like registry (things and shadows).
    #[serde(rename = "iot-core")]
    IotCore,
    /// HTTP webhook receiver.
    #[serde(rename = "webhook")]
    Webhook,
    /// Disabled integration.
    #[default]
    #[serde(rename = "")]
    Empty,
}

impl Provider {
    /// Wire name of the provider.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::IotHub => "iot-hub",
            Provider::IotCore => "iot-core",
            Provider::Webhook => "webhook",
            Provider::Empty => "",
        }
    }

    /// Credential type the provider requires, if any.
    pub fn credential_type(&self) -> Option<&'static str> {
        match self {
            Provider::IotHub => Some("sas"),
            Provider::IotCore => Some("aws"),
            Provider::Webhook => Some("http"),
            Provider::Empty => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AWS access credentials for a core registry.
#[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    /// Policy attached to every thing provisioned through this integration.
    pub device_policy_name: String,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<omitted>")
            .field("region", &self.region)
            .field("device_policy_name", &self.device_policy_name)
            .finish()
    }
}

/// Webhook endpoint and signing secret.
#[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HttpCredentials {
    pub url: String,
    /// HMAC key for payload signatures; requests are unsigned when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl std::fmt::Debug for HttpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCredentials")
            .field("url", &self.url)
            .field("secret", &self.secret.as_ref().map(|_| "<omitted>"))
            .finish()
    }
}

/// Integration credentials, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Credentials {
    /// Hub connection string.
    Sas { connection_string: ConnectionString },
    /// Core access keys.
    Aws { aws: AwsCredentials },
    /// Webhook endpoint.
    Http { http: HttpCredentials },
}

impl Credentials {
    /// Wire name of the credential type.
    pub fn credential_type(&self) -> &'static str {
        match self {
            Credentials::Sas { .. } => "sas",
            Credentials::Aws { .. } => "aws",
            Credentials::Http { .. } => "http",
        }
    }

    /// The hub connection string, if these are hub credentials.
    pub fn connection_string(&self) -> Option<&ConnectionString> {
        match self {
            Credentials::Sas { connection_string } => Some(connection_string),
            _ => None,
        }
    }

    /// The AWS keys, if these are core credentials.
    pub fn aws(&self) -> Option<&AwsCredentials> {
        match self {
            Credentials::Aws { aws } => Some(aws),
            _ => None,
        }
    }

    /// The webhook endpoint, if these are webhook credentials.
    pub fn http(&self) -> Option<&HttpCredentials> {
        match self {
            Credentials::Http { http } => Some(http),
            _ => None,
        }
    }
}

/// A tenant's connection to one external system.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Integration {
    /// Integration ID. Assigned by the store when nil.
    #[serde(default)]
    pub id: Uuid,

    /// External system.
    pub provider: Provider,

    /// Credentials matching the provider.
    pub credentials: Credentials,

    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Integration {
    /// Create an integration with a nil ID.
    pub fn new(provider: Provider, credentials: Credentials) -> Self {
        Self {
            id: Uuid::nil(),
            provider,
            credentials,
            description: None,
        }
    }

    /// Set the ID.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check that the credentials fit the provider and the description length.
    pub fn validate(&self) -> Result<(), CredentialError> {
        check_compatible(self.provider, &self.credentials)?;
        if self
            .description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
        {
            return Err(CredentialError::DescriptionTooLong);
        }
        Ok(())
    }
}

/// Check that a credential type is the one a provider requires.
pub fn check_compatible(provider: Provider, credentials: &Credentials) -> Result<(), CredentialError> {
    if provider.credential_type() == Some(credentials.credential_type()) {
        Ok(())
    } else {
        Err(CredentialError::Incompatible {
            provider,
            credential_type: credentials.credential_type(),
        })
    }
}

/// Selection of integrations to list.
#[derive(Debug, Clone, Default)]
pub struct IntegrationFilter {
    pub skip: usize,
    /// Maximum number of results; unbounded when `None`.
    pub limit: Option<usize>,
    pub provider: Option<Provider>,
    /// Restrict to these IDs; unrestricted when `None`.
    pub ids: Option<Vec<Uuid>>,
}

impl IntegrationFilter {
    /// Limit the number of results.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Restrict to a set of IDs.
    pub fn with_ids(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    /// Restrict to a provider.
    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Whether an integration passes the provider and ID restrictions.
    pub fn matches(&self, integration: &Integration) -> bool {
        self.provider.is_none_or(|p| p == integration.provider)
            && self
                .ids
                .as_ref()
                .is_none_or(|ids| ids.contains(&integration.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webhook() -> Credentials {
        Credentials::Http {
            http: HttpCredentials {
                url: "https://example.com/hook".into(),
                secret: Some("s3cr3t".into()),
            },
        }
    }

    #[test]
    fn test_credentials_wire_format() {
        let json = serde_json::to_value(webhook()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "http",
                "http": {"url": "https://example.com/hook", "secret": "s3cr3t"}
            })
        );

        let aws: Credentials = serde_json::from_value(serde_json::json!({
            "type": "aws",
            "aws": {
                "access_key_id": "AKIA",
                "secret_access_key": "shh",
                "region": "eu-west-1",
                "device_policy_name": "mender"
            }
        }))
        .unwrap();
        assert_eq!(aws.aws().unwrap().region, "eu-west-1");
        assert!(!format!("{aws:?}").contains("shh"));
    }

    #[test]
    fn test_provider_wire_names() {
        let providers: Vec<Provider> =
            serde_json::from_str(r#"["iot-hub", "iot-core", "webhook", ""]"#).unwrap();
        assert_eq!(
            providers,
            vec![Provider::IotHub, Provider::IotCore, Provider::Webhook, Provider::Empty]
        );
    }

    #[test]
    fn test_validate_compatibility() {
        assert!(Integration::new(Provider::Webhook, webhook()).validate().is_ok());
        assert!(matches!(
            Integration::new(Provider::IotHub, webhook()).validate(),
            Err(CredentialError::Incompatible { provider: Provider::IotHub, credential_type: "http" })
        ));
        assert!(Integration::new(Provider::Empty, webhook()).validate().is_err());
    }

    #[test]
    fn test_validate_description() {
        let ok = Integration::new(Provider::Webhook, webhook()).with_description("x".repeat(1024));
        assert!(ok.validate().is_ok());
        let long = ok.with_description("x".repeat(1025));
        assert!(matches!(long.validate(), Err(CredentialError::DescriptionTooLong)));
    }

    #[test]
    fn test_filter_matches() {
        let id = Uuid::new_v4();
        let integration = Integration::new(Provider::Webhook, webhook()).with_id(id);
        assert!(IntegrationFilter::default().matches(&integration));
        assert!(IntegrationFilter::default().with_ids([id]).matches(&integration));
        assert!(!IntegrationFilter::default().with_ids([Uuid::new_v4()]).matches(&integration));
        assert!(!IntegrationFilter::default()
            .with_provider(Provider::IotHub)
            .matches(&integration));
    }
}
