//! Reconciliation sweep.
//!
//! Walks every stored device, tenant by tenant, and repairs drift between the
//! device authentication service and each external registry.

use std::collections::{BTreeMap, HashMap, HashSet};

use color_eyre::eyre::WrapErr as _;
use iot_core::{Identity, Integration, IntegrationFilter, Status, TenantDevice};
use iot_storage::{DataStore, DeviceCursor};
use uuid::Uuid;

use crate::IotManager;

/// Integrations loaded up front for each tenant.
pub const INTEGRATION_CACHE_LIMIT: usize = 20;

/// How the sweep treats errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Abort on the first error instead of logging it and moving on.
    pub fail_early: bool,
}

impl SyncPolicy {
    pub fn new(fail_early: bool) -> Self {
        Self { fail_early }
    }

    /// Pass an error through when failing early, otherwise log it.
    pub fn tolerate(
        &self,
        result: color_eyre::eyre::Result<()>,
        context: &'static str,
    ) -> color_eyre::eyre::Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(err) if self.fail_early => Err(err.wrap_err(context)),
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "{context}");
                Ok(())
            }
        }
    }
}

/// A tenant's integrations as seen by one sweep. IDs that turned out not to
/// exist are remembered as `None`.
struct IntegrationCache {
    entries: HashMap<Uuid, Option<Integration>>,
}

impl IntegrationCache {
    async fn load<S: DataStore>(store: &S, identity: &Identity) -> color_eyre::eyre::Result<Self> {
        let integrations = store
            .get_integrations(
                identity,
                &IntegrationFilter::default().with_limit(INTEGRATION_CACHE_LIMIT),
            )
            .await
            .wrap_err("failed to retrieve integrations")?;

        Ok(Self {
            entries: integrations
                .into_iter()
                .map(|integration| (integration.id, Some(integration)))
                .collect(),
        })
    }

    async fn get<S: DataStore>(
        &mut self,
        store: &S,
        identity: &Identity,
        id: Uuid,
    ) -> color_eyre::eyre::Result<Option<Integration>> {
        if let Some(entry) = self.entries.get(&id) {
            return Ok(entry.clone());
        }

        let integration = store
            .get_integration_by_id(identity, id)
            .await
            .wrap_err("failed to retrieve integration")?;
        self.entries.insert(id, integration.clone());
        Ok(integration)
    }
}

impl<S: DataStore + 'static> IotManager<S> {
    /// Reconcile every device in batches of at most `batch_size` devices of
    /// one tenant.
    pub async fn sync_devices(
        &self,
        batch_size: usize,
        policy: SyncPolicy,
    ) -> color_eyre::eyre::Result<()> {
        let batch_size = batch_size.max(1);
        let store = &self.inner.store;

        let mut cursor: Option<DeviceCursor> = None;
        let mut batch: Vec<String> = Vec::with_capacity(batch_size);
        let mut tenant: Option<Identity> = None;
        let mut cache: Option<IntegrationCache> = None;
        let mut swept = 0usize;

        loop {
            let page = store
                .get_all_devices(cursor.as_ref(), batch_size)
                .await
                .wrap_err("failed to retrieve devices")?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(DeviceCursor::from(last));

            for TenantDevice { tenant: owner, device } in page {
                let switching = tenant.as_ref().is_none_or(|t| t.tenant != owner);
                if switching || batch.len() >= batch_size {
                    if let (Some(identity), Some(cache)) = (&tenant, cache.as_mut()) {
                        let devices = std::mem::take(&mut batch);
                        swept += devices.len();
                        self.sync_batch(identity, cache, devices, policy).await?;
                    }
                }
                if switching {
                    let identity = Identity::new(owner);
                    cache = Some(IntegrationCache::load(store, &identity).await?);
                    tenant = Some(identity);
                }
                batch.push(device.id);
            }
        }

        if let (Some(identity), Some(cache)) = (&tenant, cache.as_mut()) {
            if !batch.is_empty() {
                swept += batch.len();
                self.sync_batch(identity, cache, batch, policy).await?;
            }
        }

        tracing::info!(devices = swept, "device sync complete");
        Ok(())
    }

    async fn sync_batch(
        &self,
        identity: &Identity,
        cache: &mut IntegrationCache,
        device_ids: Vec<String>,
        policy: SyncPolicy,
    ) -> color_eyre::eyre::Result<()> {
        let store = &self.inner.store;

        // The device records are re-read so links dropped earlier in the
        // sweep are not acted on.
        let mut by_integration: BTreeMap<Uuid, Vec<String>> = BTreeMap::new();
        for device_id in &device_ids {
            let device = store
                .get_device(identity, device_id)
                .await
                .wrap_err("failed to retrieve device")?;
            for id in device.into_iter().flat_map(|d| d.integration_ids) {
                by_integration.entry(id).or_default().push(device_id.clone());
            }
        }

        let mut decommissioned: HashSet<String> = HashSet::new();

        for (integration_id, mut device_ids) in by_integration {
            device_ids.retain(|id| !decommissioned.contains(id));
            if device_ids.is_empty() {
                continue;
            }

            let result = self
                .sync_integration(
                    identity,
                    cache,
                    integration_id,
                    &device_ids,
                    &mut decommissioned,
                    policy,
                )
                .await;
            policy.tolerate(result, "failed to synchronize devices")?;
        }

        Ok(())
    }

    async fn sync_integration(
        &self,
        identity: &Identity,
        cache: &mut IntegrationCache,
        integration_id: Uuid,
        device_ids: &[String],
        decommissioned: &mut HashSet<String>,
        policy: SyncPolicy,
    ) -> color_eyre::eyre::Result<()> {
        let store = &self.inner.store;

        let Some(integration) = cache.get(store, identity, integration_id).await? else {
            let modified = store
                .remove_devices_from_integration(identity, integration_id)
                .await
                .wrap_err("failed to remove devices from integration")?;
            tracing::warn!(
                tenant = %identity.tenant,
                integration_id = %integration_id,
                devices = modified,
                "integration no longer exists, dropped device links"
            );
            return Ok(());
        };

        let Some(adapter) = self.inner.adapters.get(integration.provider) else {
            tracing::debug!(
                tenant = %identity.tenant,
                integration_id = %integration_id,
                provider = %integration.provider,
                "no adapter for provider, skipping"
            );
            return Ok(());
        };
        if !adapter.tracks_membership() {
            return Ok(());
        }

        let known = self
            .inner
            .devauth
            .get_devices(identity, device_ids)
            .await
            .wrap_err("failed to get devices from device authentication")?;
        let statuses: BTreeMap<String, Status> =
            known.into_iter().map(|d| (d.id, d.status)).collect();

        for device_id in device_ids {
            if statuses.contains_key(device_id) || !decommissioned.insert(device_id.clone()) {
                continue;
            }

            tracing::warn!(
                tenant = %identity.tenant,
                device_id = %device_id,
                "device not found in device authentication, decommissioning"
            );
            let result = self.run_decommission(identity, device_id).await;
            policy.tolerate(result, "failed to decommission device")?;
        }

        if statuses.is_empty() {
            return Ok(());
        }

        adapter
            .reconcile(identity, &integration, &statuses, policy)
            .await
    }
}
