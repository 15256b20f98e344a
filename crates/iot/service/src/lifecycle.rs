//! Device lifecycle fan-out.
//!
//! Provisioning, decommissioning and status changes are dispatched to every
//! integration of the tenant on a supervised task. Each attempt yields a
//! [`DeliveryStatus`] and the audit [`Event`] is written once all attempts
//! are done.

use color_eyre::eyre::WrapErr as _;
use iot_client::http_status;
use iot_core::{
    DeliveryStatus, DeviceEvent, Error, Event, EventType, Identity, Integration,
    IntegrationFilter, Provider, Status, WebhookEvent, find_cause,
};
use iot_storage::{DataStore, StoreError};
use uuid::Uuid;

use crate::device::DeviceLookup;
use crate::{Dispatch, IotManager, Receipt};

/// Error recorded for deliveries that succeeded before the device links
/// could not be written.
pub const ERR_CONNECT_DEVICE: &str = "failed to connect device to integration";
/// Status code recorded alongside [`ERR_CONNECT_DEVICE`].
pub const STATUS_CODE_CONNECT_DEVICE: u16 = 1500;

#[derive(Debug, Clone, Copy)]
enum Operation {
    Provision,
    Decommission,
    SetStatus(Status),
}

impl Operation {
    fn event_type(self) -> EventType {
        match self {
            Operation::Provision => EventType::DeviceProvisioned,
            Operation::Decommission => EventType::DeviceDecommissioned,
            Operation::SetStatus(_) => EventType::DeviceStatusChanged,
        }
    }
}

/// Outcome of dispatching one operation to every integration.
struct FanOut {
    statuses: Vec<DeliveryStatus>,
    /// Hub and core integrations a provisioning attempt was made against.
    attempted: Vec<Uuid>,
}

fn delivery_status(
    integration_id: Uuid,
    result: color_eyre::eyre::Result<Receipt>,
) -> DeliveryStatus {
    match result {
        Ok(receipt) => DeliveryStatus::succeeded(integration_id, receipt.status_code),
        Err(err) => {
            DeliveryStatus::failed(integration_id, format!("{err:#}"), http_status(&err))
        }
    }
}

/// Mark every delivery failed after the device links could not be stored.
fn flag_unlinked(statuses: &mut [DeliveryStatus]) {
    for status in statuses {
        if status.error.is_none() {
            status.error = Some(ERR_CONNECT_DEVICE.to_string());
            status.status_code = Some(STATUS_CODE_CONNECT_DEVICE);
        }
        status.success = false;
    }
}

impl<S: DataStore + 'static> IotManager<S> {
    /// Provision a device to every integration of the tenant.
    ///
    /// The work runs on the task runner; this returns once it is submitted.
    pub async fn provision_device(
        &self,
        identity: &Identity,
        device: DeviceEvent,
    ) -> color_eyre::eyre::Result<()> {
        let this = self.clone();
        let identity = identity.clone();
        self.inner
            .runner
            .submit(
                "provision_device",
                Box::pin(async move { this.run_provision(&identity, device).await }),
            )
            .await;
        Ok(())
    }

    /// Remove a device from every integration it is linked to and notify
    /// webhooks.
    pub async fn decommission_device(
        &self,
        identity: &Identity,
        device_id: &str,
    ) -> color_eyre::eyre::Result<()> {
        let this = self.clone();
        let identity = identity.clone();
        let device_id = device_id.to_owned();
        self.inner
            .runner
            .submit(
                "decommission_device",
                Box::pin(async move { this.run_decommission(&identity, &device_id).await }),
            )
            .await;
        Ok(())
    }

    /// Propagate a status change to every integration the device is linked
    /// to and notify webhooks.
    pub async fn set_device_status(
        &self,
        identity: &Identity,
        device_id: &str,
        status: Status,
    ) -> color_eyre::eyre::Result<()> {
        let this = self.clone();
        let identity = identity.clone();
        let device_id = device_id.to_owned();
        self.inner
            .runner
            .submit(
                "set_device_status",
                Box::pin(async move { this.run_set_status(&identity, &device_id, status).await }),
            )
            .await;
        Ok(())
    }

    /// All integrations of the tenant. An unknown tenant has none.
    async fn tenant_integrations(
        &self,
        identity: &Identity,
    ) -> color_eyre::eyre::Result<Vec<Integration>> {
        match self
            .inner
            .store
            .get_integrations(identity, &IntegrationFilter::default())
            .await
        {
            Ok(integrations) => Ok(integrations),
            Err(err) if find_cause::<StoreError>(&err) == Some(&StoreError::NotFound) => {
                Ok(Vec::new())
            }
            Err(err) => Err(err.wrap_err("failed to retrieve integrations")),
        }
    }

    async fn fan_out(
        &self,
        identity: &Identity,
        integrations: &[Integration],
        device_id: &str,
        event: &WebhookEvent,
        operation: Operation,
    ) -> FanOut {
        let mut lookup = DeviceLookup::new(&self.inner.store, identity, device_id);
        let mut out = FanOut {
            statuses: Vec::with_capacity(integrations.len()),
            attempted: Vec::new(),
        };

        for integration in integrations {
            let adapter = self.inner.adapters.get(integration.provider);
            // Without an adapter, only webhooks are delivered regardless of links.
            let tracks_membership = adapter.map_or(integration.provider != Provider::Webhook, |a| {
                a.tracks_membership()
            });

            let linked = match operation {
                Operation::Provision => Ok(true),
                _ if !tracks_membership => Ok(true),
                _ => lookup.has_integration(integration.id).await,
            };

            let result = match (linked, adapter) {
                (Ok(false), _) => continue,
                (Err(err), _) => Err(err),
                (Ok(true), None) => {
                    Err(color_eyre::eyre::Report::new(Error::UnknownIntegration))
                }
                (Ok(true), Some(adapter)) => {
                    let call = Dispatch {
                        identity,
                        integration,
                        device_id,
                        event,
                    };
                    match operation {
                        Operation::Provision => {
                            if tracks_membership {
                                out.attempted.push(integration.id);
                            }
                            adapter.provision(&call, None).await
                        }
                        Operation::SetStatus(status) => adapter.set_status(&call, status).await,
                        Operation::Decommission => adapter.decommission(&call).await,
                    }
                }
            };

            if let Err(err) = &result {
                tracing::warn!(
                    tenant = %identity.tenant,
                    device_id = %device_id,
                    integration_id = %integration.id,
                    provider = %integration.provider,
                    error = %format!("{err:#}"),
                    "integration delivery failed"
                );
            }
            out.statuses.push(delivery_status(integration.id, result));
        }

        out
    }

    async fn save_event(
        &self,
        identity: &Identity,
        webhook: WebhookEvent,
        statuses: Vec<DeliveryStatus>,
    ) -> color_eyre::eyre::Result<()> {
        let event =
            Event::new(webhook, statuses).expires_after(self.inner.config.event_expiration());
        self.inner
            .store
            .save_event(identity, &event)
            .await
            .wrap_err("failed to save event")
    }

    pub(crate) async fn run_provision(
        &self,
        identity: &Identity,
        device: DeviceEvent,
    ) -> color_eyre::eyre::Result<()> {
        let integrations = self.tenant_integrations(identity).await?;
        if integrations.is_empty() {
            return Ok(());
        }

        let device_id = device.id.clone();
        tracing::info!(tenant = %identity.tenant, device_id = %device_id, "provisioning device");

        let webhook = WebhookEvent::new(Operation::Provision.event_type(), device);
        let mut out = self
            .fan_out(identity, &integrations, &device_id, &webhook, Operation::Provision)
            .await;

        if let Err(err) = self
            .inner
            .store
            .upsert_device_integrations(identity, &device_id, &out.attempted)
            .await
        {
            tracing::error!(
                tenant = %identity.tenant,
                device_id = %device_id,
                alert = true,
                error = %format!("{err:#}"),
                "failed to connect device to integrations"
            );
            flag_unlinked(&mut out.statuses);
        }

        self.save_event(identity, webhook, out.statuses).await
    }

    pub(crate) async fn run_decommission(
        &self,
        identity: &Identity,
        device_id: &str,
    ) -> color_eyre::eyre::Result<()> {
        let integrations = self.tenant_integrations(identity).await?;
        if integrations.is_empty() {
            self.forget_device(identity, device_id).await;
            return Ok(());
        }

        tracing::info!(tenant = %identity.tenant, device_id = %device_id, "decommissioning device");

        let webhook = WebhookEvent::new(
            Operation::Decommission.event_type(),
            DeviceEvent::new(device_id),
        );
        let out = self
            .fan_out(identity, &integrations, device_id, &webhook, Operation::Decommission)
            .await;

        self.forget_device(identity, device_id).await;

        self.save_event(identity, webhook, out.statuses).await
    }

    /// Drop the device record. Failures are logged, never returned.
    async fn forget_device(&self, identity: &Identity, device_id: &str) {
        match self.inner.store.delete_device(identity, device_id).await {
            Ok(()) => {}
            Err(err) if find_cause::<StoreError>(&err) == Some(&StoreError::NotFound) => {}
            Err(err) => {
                tracing::error!(
                    tenant = %identity.tenant,
                    device_id = %device_id,
                    alert = true,
                    error = %format!("{err:#}"),
                    "failed to delete device"
                );
            }
        }
    }

    pub(crate) async fn run_set_status(
        &self,
        identity: &Identity,
        device_id: &str,
        status: Status,
    ) -> color_eyre::eyre::Result<()> {
        let integrations = self.tenant_integrations(identity).await?;
        if integrations.is_empty() {
            return Ok(());
        }

        tracing::info!(
            tenant = %identity.tenant,
            device_id = %device_id,
            status = %status,
            "updating device status"
        );

        let operation = Operation::SetStatus(status);
        let webhook = WebhookEvent::new(
            operation.event_type(),
            DeviceEvent::new(device_id).with_status(status),
        );
        let out = self
            .fan_out(identity, &integrations, device_id, &webhook, operation)
            .await;

        self.save_event(identity, webhook, out.statuses).await
    }
}
