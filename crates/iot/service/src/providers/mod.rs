//! Provider adapters.
//!
//! Each adapter translates lifecycle operations into calls against one kind
//! of external integration.

mod iotcore;
mod iothub;
mod webhook;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use iot_core::{DeviceState, Error, Identity, Integration, Provider, Status, WebhookEvent};

pub use iotcore::IotCoreAdapter;
pub use iothub::IotHubAdapter;
pub use webhook::WebhookAdapter;

use crate::SyncPolicy;

/// Configuration key carrying a hub device connection string.
pub const CONF_KEY_CONNECTION_STRING: &str = "azureConnectionString";
/// Configuration keys carrying core device credentials.
pub const CONF_KEY_AWS_CERTIFICATE: &str = "awsCertificate";
pub const CONF_KEY_AWS_PRIVATE_KEY: &str = "awsPrivateKey";
pub const CONF_KEY_AWS_ENDPOINT: &str = "awsEndpoint";

/// One lifecycle operation directed at one integration.
#[derive(Debug, Clone, Copy)]
pub struct Dispatch<'a> {
    pub identity: &'a Identity,
    pub integration: &'a Integration,
    pub device_id: &'a str,
    pub event: &'a WebhookEvent,
}

/// What an adapter reports about a successful dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Receipt {
    pub status_code: Option<u16>,
}

impl Receipt {
    pub fn with_status(status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
        }
    }
}

/// Lifecycle operations for one provider.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Whether devices are linked to integrations of this provider. Linked
    /// devices only receive decommission and status changes when they are
    /// members of the integration.
    fn tracks_membership(&self) -> bool {
        true
    }

    /// Create the device, using `desired` as its initial status when given.
    async fn provision(
        &self,
        call: &Dispatch<'_>,
        desired: Option<Status>,
    ) -> color_eyre::eyre::Result<Receipt>;

    async fn set_status(
        &self,
        call: &Dispatch<'_>,
        status: Status,
    ) -> color_eyre::eyre::Result<Receipt>;

    async fn decommission(&self, call: &Dispatch<'_>) -> color_eyre::eyre::Result<Receipt>;

    async fn get_state(
        &self,
        _identity: &Identity,
        _integration: &Integration,
        _device_id: &str,
    ) -> color_eyre::eyre::Result<Option<DeviceState>> {
        Err(Error::UnknownIntegration.into())
    }

    async fn set_state(
        &self,
        _identity: &Identity,
        _integration: &Integration,
        _device_id: &str,
        _state: &DeviceState,
    ) -> color_eyre::eyre::Result<Option<DeviceState>> {
        Err(Error::UnknownIntegration.into())
    }

    /// Bring the provider's view of `statuses` in line with it: create
    /// missing devices and correct mismatched statuses.
    async fn reconcile(
        &self,
        _identity: &Identity,
        _integration: &Integration,
        _statuses: &BTreeMap<String, Status>,
        _policy: SyncPolicy,
    ) -> color_eyre::eyre::Result<()> {
        Ok(())
    }
}

/// Adapters keyed by the provider they serve.
#[derive(Clone, Default)]
pub struct Adapters {
    by_provider: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl Adapters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for its provider.
    pub fn insert(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.by_provider.insert(adapter.provider(), adapter);
    }

    pub fn get(&self, provider: Provider) -> Option<&Arc<dyn ProviderAdapter>> {
        self.by_provider.get(&provider)
    }
}
