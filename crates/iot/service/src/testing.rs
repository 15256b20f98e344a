//! In-memory collaborators for service tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use color_eyre::eyre::eyre;
use iot_client::{
    CoreClient, CoreStatus, DevauthClient, DevauthDevice, DeviceTwin, DeviceTwinUpdate, HttpError,
    HubClient, HubDevice, HubStatus, SymmetricKey, Thing, WebhookSender, WorkflowsClient,
};
use iot_core::{
    AwsCredentials, ConnectionString, Credentials, Device, DeviceState, Event, EventsFilter,
    HttpCredentials, Identity, Integration, IntegrationFilter, Provider, Status, TenantDevice,
};
use iot_storage::{
    DeviceCursor, DeviceStore, EventStore, IntegrationStore, MemoryStore, TenantStore,
};
use uuid::Uuid;

use crate::{Config, InlineRunner, IotManager};

pub(crate) const HUB_CONNECTION_STRING: &str =
    "HostName=hub.azure-devices.net;SharedAccessKeyName=owner;SharedAccessKey=c2VjcmV0";

pub(crate) const CORE_ENDPOINT: &str = "abc123.iot.us-east-1.amazonaws.com";

fn is_mutation(call: &str) -> bool {
    ["upsert_device", "update_device_twin", "delete_device", "update_device_shadow"]
        .iter()
        .any(|op| call.starts_with(op))
}

/// Records calls and fails configured operations with an HTTP status.
#[derive(Default)]
struct CallLog {
    calls: Vec<String>,
    failures: HashMap<&'static str, u16>,
}

impl CallLog {
    fn record(&mut self, op: &'static str, device_id: &str) -> color_eyre::eyre::Result<()> {
        self.calls.push(format!("{op}:{device_id}"));
        match self.failures.get(op) {
            Some(status) => Err(HttpError::new(*status).into()),
            None => Ok(()),
        }
    }

    fn mutations(&self) -> usize {
        self.calls.iter().filter(|c| is_mutation(c)).count()
    }
}

#[derive(Default)]
struct HubState {
    log: CallLog,
    devices: BTreeMap<String, HubDevice>,
    twins: BTreeMap<String, DeviceTwin>,
    version: u64,
    withhold_keys: bool,
}

impl HubState {
    fn next_etag(&mut self) -> String {
        self.version += 1;
        format!("etag-{}", self.version)
    }
}

/// Hub registry held in memory.
#[derive(Default)]
pub(crate) struct FakeHub {
    state: Mutex<HubState>,
}

impl FakeHub {
    pub(crate) fn insert_device(&self, device_id: &str, status: HubStatus) {
        let mut state = self.state.lock().unwrap();
        let etag = state.next_etag();
        state.devices.insert(
            device_id.to_owned(),
            HubDevice {
                device_id: device_id.to_owned(),
                auth: None,
                status: Some(status),
                etag: Some(etag.clone()),
            },
        );
        state.twins.insert(
            device_id.to_owned(),
            DeviceTwin {
                device_id: device_id.to_owned(),
                etag: Some(etag),
                status: Some(status),
                ..Default::default()
            },
        );
    }

    /// Fail every call of `op` with `status`.
    pub(crate) fn fail(&self, op: &'static str, status: u16) {
        self.state.lock().unwrap().log.failures.insert(op, status);
    }

    /// Stop issuing symmetric keys for new devices.
    pub(crate) fn withhold_keys(&self) {
        self.state.lock().unwrap().withhold_keys = true;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().log.calls.clone()
    }

    pub(crate) fn mutations(&self) -> usize {
        self.state.lock().unwrap().log.mutations()
    }

    pub(crate) fn device(&self, device_id: &str) -> Option<HubDevice> {
        self.state.lock().unwrap().devices.get(device_id).cloned()
    }

    pub(crate) fn twin(&self, device_id: &str) -> Option<DeviceTwin> {
        self.state.lock().unwrap().twins.get(device_id).cloned()
    }

    pub(crate) fn set_reported(&self, device_id: &str, reported: serde_json::Value) {
        let mut state = self.state.lock().unwrap();
        if let (Some(twin), serde_json::Value::Object(map)) =
            (state.twins.get_mut(device_id), reported)
        {
            twin.properties.reported = map;
        }
    }
}

#[async_trait::async_trait]
impl HubClient for FakeHub {
    async fn get_device_twins(
        &self,
        _cs: &ConnectionString,
        device_ids: &[String],
    ) -> color_eyre::eyre::Result<Vec<DeviceTwin>> {
        let mut state = self.state.lock().unwrap();
        state.log.record("get_device_twins", &device_ids.join(","))?;
        Ok(device_ids
            .iter()
            .filter_map(|id| state.twins.get(id).cloned())
            .collect())
    }

    async fn get_device_twin(
        &self,
        _cs: &ConnectionString,
        device_id: &str,
    ) -> color_eyre::eyre::Result<DeviceTwin> {
        let mut state = self.state.lock().unwrap();
        state.log.record("get_device_twin", device_id)?;
        let mut twin = state
            .twins
            .get(device_id)
            .cloned()
            .ok_or(HttpError::new(404))?;
        twin.properties
            .desired
            .insert("$version".into(), serde_json::json!(state.version));
        Ok(twin)
    }

    async fn update_device_twin(
        &self,
        _cs: &ConnectionString,
        device_id: &str,
        update: &DeviceTwinUpdate,
    ) -> color_eyre::eyre::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.record("update_device_twin", device_id)?;
        let etag = state.next_etag();
        let twin = state
            .twins
            .get_mut(device_id)
            .ok_or(HttpError::new(404))?;

        if update.etag.is_some() && update.etag != twin.etag {
            return Err(HttpError::new(412).into());
        }
        if update.replace {
            twin.properties.desired = update.properties.desired.clone();
            twin.tags = update.tags.clone();
        } else {
            twin.properties
                .desired
                .extend(update.properties.desired.clone());
            twin.tags.extend(update.tags.clone());
        }
        twin.etag = Some(etag);
        Ok(())
    }

    async fn get_device(
        &self,
        _cs: &ConnectionString,
        device_id: &str,
    ) -> color_eyre::eyre::Result<HubDevice> {
        let mut state = self.state.lock().unwrap();
        state.log.record("get_device", device_id)?;
        Ok(state
            .devices
            .get(device_id)
            .cloned()
            .ok_or(HttpError::new(404))?)
    }

    async fn upsert_device(
        &self,
        _cs: &ConnectionString,
        device_id: &str,
        mut device: HubDevice,
    ) -> color_eyre::eyre::Result<HubDevice> {
        let mut state = self.state.lock().unwrap();
        state.log.record("upsert_device", device_id)?;
        let etag = state.next_etag();

        device.device_id = device_id.to_owned();
        device.status = Some(device.status.unwrap_or(HubStatus::Enabled));
        device.etag = Some(etag.clone());
        let issue_keys = !state.withhold_keys;
        if let Some(auth) = device.auth.as_mut().filter(|_| issue_keys) {
            if auth.symmetric_key.is_none() {
                auth.symmetric_key = Some(SymmetricKey {
                    primary_key: format!("primary-{device_id}").into_bytes(),
                    secondary_key: format!("secondary-{device_id}").into_bytes(),
                });
            }
        }

        let twin = state
            .twins
            .entry(device_id.to_owned())
            .or_insert_with(|| DeviceTwin {
                device_id: device_id.to_owned(),
                ..Default::default()
            });
        twin.status = device.status;
        twin.etag = Some(etag);

        state.devices.insert(device_id.to_owned(), device.clone());
        Ok(device)
    }

    async fn delete_device(
        &self,
        _cs: &ConnectionString,
        device_id: &str,
    ) -> color_eyre::eyre::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.record("delete_device", device_id)?;
        state.twins.remove(device_id);
        state
            .devices
            .remove(device_id)
            .map(|_| ())
            .ok_or_else(|| HttpError::new(404).into())
    }
}

#[derive(Default)]
struct CoreState {
    log: CallLog,
    things: BTreeMap<String, Thing>,
    shadows: BTreeMap<String, DeviceState>,
}

/// Core registry held in memory.
#[derive(Default)]
pub(crate) struct FakeCore {
    state: Mutex<CoreState>,
}

impl FakeCore {
    pub(crate) fn insert_thing(&self, device_id: &str, status: CoreStatus) {
        self.state.lock().unwrap().things.insert(
            device_id.to_owned(),
            Thing {
                id: device_id.to_owned(),
                status,
                certificate: None,
                private_key: None,
                endpoint: None,
            },
        );
    }

    pub(crate) fn fail(&self, op: &'static str, status: u16) {
        self.state.lock().unwrap().log.failures.insert(op, status);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().log.calls.clone()
    }

    pub(crate) fn mutations(&self) -> usize {
        self.state.lock().unwrap().log.mutations()
    }

    pub(crate) fn thing(&self, device_id: &str) -> Option<Thing> {
        self.state.lock().unwrap().things.get(device_id).cloned()
    }
}

#[async_trait::async_trait]
impl CoreClient for FakeCore {
    async fn get_device(
        &self,
        _creds: &AwsCredentials,
        device_id: &str,
    ) -> color_eyre::eyre::Result<Option<Thing>> {
        let mut state = self.state.lock().unwrap();
        state.log.record("get_device", device_id)?;
        Ok(state.things.get(device_id).cloned())
    }

    async fn upsert_device(
        &self,
        _creds: &AwsCredentials,
        device_id: &str,
        status: CoreStatus,
        _policy_name: &str,
    ) -> color_eyre::eyre::Result<Thing> {
        let mut state = self.state.lock().unwrap();
        state.log.record("upsert_device", device_id)?;

        if let Some(thing) = state.things.get_mut(device_id) {
            thing.status = status;
            return Ok(thing.clone());
        }

        let stored = Thing {
            id: device_id.to_owned(),
            status,
            certificate: None,
            private_key: None,
            endpoint: None,
        };
        state.things.insert(device_id.to_owned(), stored.clone());
        Ok(Thing {
            certificate: Some(format!("cert-{device_id}")),
            private_key: Some(format!("key-{device_id}")),
            endpoint: Some(CORE_ENDPOINT.to_string()),
            ..stored
        })
    }

    async fn delete_device(
        &self,
        _creds: &AwsCredentials,
        device_id: &str,
    ) -> color_eyre::eyre::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.record("delete_device", device_id)?;
        state.shadows.remove(device_id);
        state
            .things
            .remove(device_id)
            .map(|_| ())
            .ok_or_else(|| HttpError::new(404).into())
    }

    async fn get_device_shadow(
        &self,
        _creds: &AwsCredentials,
        device_id: &str,
    ) -> color_eyre::eyre::Result<Option<DeviceState>> {
        let mut state = self.state.lock().unwrap();
        state.log.record("get_device_shadow", device_id)?;
        Ok(state.shadows.get(device_id).cloned())
    }

    async fn update_device_shadow(
        &self,
        _creds: &AwsCredentials,
        device_id: &str,
        desired: &serde_json::Map<String, serde_json::Value>,
    ) -> color_eyre::eyre::Result<Option<DeviceState>> {
        let mut state = self.state.lock().unwrap();
        state.log.record("update_device_shadow", device_id)?;
        if !state.things.contains_key(device_id) {
            return Ok(None);
        }
        let shadow = state.shadows.entry(device_id.to_owned()).or_default();
        shadow.desired = desired.clone();
        Ok(Some(shadow.clone()))
    }
}

/// Device authentication source of truth.
#[derive(Default)]
pub(crate) struct FakeDevauth {
    statuses: Mutex<BTreeMap<String, Status>>,
    calls: AtomicUsize,
}

impl FakeDevauth {
    pub(crate) fn set(&self, device_id: &str, status: Status) {
        self.statuses
            .lock()
            .unwrap()
            .insert(device_id.to_owned(), status);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DevauthClient for FakeDevauth {
    async fn get_devices(
        &self,
        _identity: &Identity,
        device_ids: &[String],
    ) -> color_eyre::eyre::Result<Vec<DevauthDevice>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let statuses = self.statuses.lock().unwrap();
        Ok(device_ids
            .iter()
            .filter_map(|id| {
                statuses.get(id).map(|status| DevauthDevice {
                    id: id.clone(),
                    status: *status,
                })
            })
            .collect())
    }

    async fn ping(&self) -> color_eyre::eyre::Result<()> {
        Ok(())
    }
}

/// A configuration push recorded by [`FakeWorkflows`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Pushed {
    pub(crate) device_id: String,
    pub(crate) provider: String,
    pub(crate) configuration: BTreeMap<String, String>,
}

#[derive(Default)]
pub(crate) struct FakeWorkflows {
    pushed: Mutex<Vec<Pushed>>,
}

impl FakeWorkflows {
    pub(crate) fn pushed(&self) -> Vec<Pushed> {
        self.pushed.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl WorkflowsClient for FakeWorkflows {
    async fn provision_external_device(
        &self,
        _identity: &Identity,
        device_id: &str,
        provider: &str,
        configuration: &BTreeMap<String, String>,
    ) -> color_eyre::eyre::Result<()> {
        self.pushed.lock().unwrap().push(Pushed {
            device_id: device_id.to_owned(),
            provider: provider.to_owned(),
            configuration: configuration.clone(),
        });
        Ok(())
    }

    async fn check_health(&self) -> color_eyre::eyre::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Faults {
    fail_upsert: AtomicBool,
    fail_get_device: AtomicBool,
    get_device_calls: AtomicUsize,
}

/// [`MemoryStore`] wrapper that can be told to fail selected operations.
#[derive(Clone, Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    faults: Arc<Faults>,
}

impl FlakyStore {
    pub(crate) fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            faults: Arc::default(),
        }
    }

    pub(crate) fn fail_upsert(&self, fail: bool) {
        self.faults.fail_upsert.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_get_device(&self, fail: bool) {
        self.faults.fail_get_device.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn get_device_calls(&self) -> usize {
        self.faults.get_device_calls.load(Ordering::SeqCst)
    }
}

impl IntegrationStore for FlakyStore {
    async fn get_integrations(
        &self,
        identity: &Identity,
        filter: &IntegrationFilter,
    ) -> color_eyre::eyre::Result<Vec<Integration>> {
        self.inner.get_integrations(identity, filter).await
    }

    async fn get_integration_by_id(
        &self,
        identity: &Identity,
        id: Uuid,
    ) -> color_eyre::eyre::Result<Option<Integration>> {
        self.inner.get_integration_by_id(identity, id).await
    }

    async fn create_integration(
        &self,
        identity: &Identity,
        integration: Integration,
    ) -> color_eyre::eyre::Result<Integration> {
        self.inner.create_integration(identity, integration).await
    }

    async fn set_integration_credentials(
        &self,
        identity: &Identity,
        id: Uuid,
        credentials: Credentials,
    ) -> color_eyre::eyre::Result<()> {
        self.inner
            .set_integration_credentials(identity, id, credentials)
            .await
    }

    async fn remove_integration(
        &self,
        identity: &Identity,
        id: Uuid,
    ) -> color_eyre::eyre::Result<()> {
        self.inner.remove_integration(identity, id).await
    }

    async fn do_devices_exist_by_integration_id(
        &self,
        identity: &Identity,
        id: Uuid,
    ) -> color_eyre::eyre::Result<bool> {
        self.inner.do_devices_exist_by_integration_id(identity, id).await
    }
}

impl DeviceStore for FlakyStore {
    async fn get_device(
        &self,
        identity: &Identity,
        device_id: &str,
    ) -> color_eyre::eyre::Result<Option<Device>> {
        self.faults.get_device_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_get_device.load(Ordering::SeqCst) {
            return Err(color_eyre::eyre::Report::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "store unavailable",
            )));
        }
        self.inner.get_device(identity, device_id).await
    }

    async fn get_device_by_integration_id(
        &self,
        identity: &Identity,
        device_id: &str,
        integration_id: Uuid,
    ) -> color_eyre::eyre::Result<Option<Device>> {
        self.inner
            .get_device_by_integration_id(identity, device_id, integration_id)
            .await
    }

    async fn upsert_device_integrations(
        &self,
        identity: &Identity,
        device_id: &str,
        integration_ids: &[Uuid],
    ) -> color_eyre::eyre::Result<Device> {
        if self.faults.fail_upsert.load(Ordering::SeqCst) {
            return Err(eyre!("store unavailable"));
        }
        self.inner
            .upsert_device_integrations(identity, device_id, integration_ids)
            .await
    }

    async fn delete_device(
        &self,
        identity: &Identity,
        device_id: &str,
    ) -> color_eyre::eyre::Result<()> {
        self.inner.delete_device(identity, device_id).await
    }

    async fn remove_devices_from_integration(
        &self,
        identity: &Identity,
        integration_id: Uuid,
    ) -> color_eyre::eyre::Result<u64> {
        self.inner
            .remove_devices_from_integration(identity, integration_id)
            .await
    }

    async fn get_all_devices(
        &self,
        after: Option<&DeviceCursor>,
        limit: usize,
    ) -> color_eyre::eyre::Result<Vec<TenantDevice>> {
        self.inner.get_all_devices(after, limit).await
    }
}

impl EventStore for FlakyStore {
    async fn save_event(&self, identity: &Identity, event: &Event) -> color_eyre::eyre::Result<()> {
        self.inner.save_event(identity, event).await
    }

    async fn get_events(
        &self,
        identity: &Identity,
        filter: &EventsFilter,
    ) -> color_eyre::eyre::Result<Vec<Event>> {
        self.inner.get_events(identity, filter).await
    }
}

impl TenantStore for FlakyStore {
    async fn delete_tenant_data(&self, identity: &Identity) -> color_eyre::eyre::Result<()> {
        self.inner.delete_tenant_data(identity).await
    }

    async fn ping(&self) -> color_eyre::eyre::Result<()> {
        self.inner.ping().await
    }
}

/// Configuration letting webhooks reach local mock servers.
pub(crate) fn test_config() -> Config {
    Config {
        webhooks_timeout_seconds: 5,
        webhooks_ip_filter_whitelist_cidrs: vec!["127.0.0.0/8".into()],
        ..Default::default()
    }
}

pub(crate) fn hub_credentials() -> Credentials {
    Credentials::Sas {
        connection_string: HUB_CONNECTION_STRING.parse().unwrap(),
    }
}

pub(crate) fn aws_credentials() -> Credentials {
    Credentials::Aws {
        aws: AwsCredentials {
            access_key_id: "AKIAEXAMPLE".into(),
            secret_access_key: "secret".into(),
            region: "us-east-1".into(),
            device_policy_name: "device-policy".into(),
        },
    }
}

pub(crate) fn http_credentials(url: &str, secret: Option<&str>) -> Credentials {
    Credentials::Http {
        http: HttpCredentials {
            url: url.to_owned(),
            secret: secret.map(str::to_owned),
        },
    }
}

/// A manager wired to fakes, running lifecycle tasks inline.
pub(crate) struct Harness {
    pub(crate) manager: IotManager<FlakyStore>,
    pub(crate) store: FlakyStore,
    pub(crate) hub: Arc<FakeHub>,
    pub(crate) core: Arc<FakeCore>,
    pub(crate) devauth: Arc<FakeDevauth>,
    pub(crate) workflows: Arc<FakeWorkflows>,
    pub(crate) identity: Identity,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_config(test_config())
    }

    pub(crate) fn with_config(config: Config) -> Self {
        let store = FlakyStore::default();
        let hub = Arc::new(FakeHub::default());
        let core = Arc::new(FakeCore::default());
        let devauth = Arc::new(FakeDevauth::default());
        let workflows = Arc::new(FakeWorkflows::default());
        let webhooks =
            WebhookSender::new(config.ip_filter().unwrap(), config.webhooks_timeout()).unwrap();

        let manager = IotManager::builder(store.clone(), config)
            .with_iot_hub(hub.clone())
            .with_iot_core(core.clone())
            .with_devauth(devauth.clone())
            .with_workflows(workflows.clone())
            .with_webhooks(webhooks)
            .with_runner(Arc::new(InlineRunner::new(Duration::from_secs(5))))
            .build()
            .unwrap();

        Self {
            manager,
            store,
            hub,
            core,
            devauth,
            workflows,
            identity: Identity::new("tenant-1"),
        }
    }

    /// Store an integration directly, bypassing credential checks.
    pub(crate) async fn add_integration(
        &self,
        provider: Provider,
        credentials: Credentials,
    ) -> Integration {
        self.store
            .create_integration(&self.identity, Integration::new(provider, credentials))
            .await
            .unwrap()
    }

    pub(crate) async fn add_hub(&self) -> Integration {
        self.add_integration(Provider::IotHub, hub_credentials()).await
    }

    pub(crate) async fn add_core(&self) -> Integration {
        self.add_integration(Provider::IotCore, aws_credentials()).await
    }

    pub(crate) async fn add_webhook(&self, url: &str, secret: Option<&str>) -> Integration {
        self.add_integration(Provider::Webhook, http_credentials(url, secret))
            .await
    }

    pub(crate) async fn link(&self, device_id: &str, integration_ids: &[Uuid]) {
        self.store
            .upsert_device_integrations(&self.identity, device_id, integration_ids)
            .await
            .unwrap();
    }

    pub(crate) async fn stored_device(&self, device_id: &str) -> Option<Device> {
        self.store
            .get_device(&self.identity, device_id)
            .await
            .unwrap()
    }

    pub(crate) async fn events(&self) -> Vec<Event> {
        self.store
            .get_events(&self.identity, &EventsFilter::default())
            .await
            .unwrap()
    }
}
