//! Webhook adapter.

use iot_client::WebhookSender;
use iot_core::{Error, Provider, Status};

use super::{Dispatch, ProviderAdapter, Receipt};

/// Delivers every lifecycle operation as a signed event. Webhooks have no
/// device membership, no state and nothing to reconcile.
#[derive(Clone)]
pub struct WebhookAdapter {
    sender: WebhookSender,
}

impl WebhookAdapter {
    pub fn new(sender: WebhookSender) -> Self {
        Self { sender }
    }

    async fn deliver(&self, call: &Dispatch<'_>) -> color_eyre::eyre::Result<Receipt> {
        let http = call
            .integration
            .credentials
            .http()
            .ok_or(Error::NoCredentials)?;

        let status = self.sender.send(http, call.event).await?;
        tracing::debug!(
            tenant = %call.identity.tenant,
            integration_id = %call.integration.id,
            event_id = %call.event.id,
            status,
            "event delivered to webhook integration"
        );
        Ok(Receipt::with_status(status))
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for WebhookAdapter {
    fn provider(&self) -> Provider {
        Provider::Webhook
    }

    fn tracks_membership(&self) -> bool {
        false
    }

    async fn provision(
        &self,
        call: &Dispatch<'_>,
        _desired: Option<Status>,
    ) -> color_eyre::eyre::Result<Receipt> {
        self.deliver(call).await
    }

    async fn set_status(
        &self,
        call: &Dispatch<'_>,
        _status: Status,
    ) -> color_eyre::eyre::Result<Receipt> {
        self.deliver(call).await
    }

    async fn decommission(&self, call: &Dispatch<'_>) -> color_eyre::eyre::Result<Receipt> {
        self.deliver(call).await
    }
}
