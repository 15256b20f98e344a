//! Integration registry.

use color_eyre::eyre::WrapErr as _;
use iot_core::{
    CredentialError, Credentials, Device, Error, Event, EventsFilter, Identity, Integration,
    IntegrationFilter, Provider, check_compatible, find_cause,
};
use iot_storage::{DataStore, StoreError};
use uuid::Uuid;

use crate::IotManager;

/// Port used to resolve hub hostnames.
const HUB_PORT: u16 = 443;

fn is_store_error(err: &color_eyre::eyre::Report, kind: StoreError) -> bool {
    find_cause::<StoreError>(err) == Some(&kind)
}

impl<S: DataStore + 'static> IotManager<S> {
    pub async fn get_integrations(
        &self,
        identity: &Identity,
        filter: &IntegrationFilter,
    ) -> color_eyre::eyre::Result<Vec<Integration>> {
        self.inner
            .store
            .get_integrations(identity, filter)
            .await
            .wrap_err("failed to retrieve integrations")
    }

    pub async fn get_integration_by_id(
        &self,
        identity: &Identity,
        id: Uuid,
    ) -> color_eyre::eyre::Result<Integration> {
        self.inner
            .store
            .get_integration_by_id(identity, id)
            .await
            .wrap_err("failed to retrieve integration")?
            .ok_or_else(|| Error::IntegrationNotFound.into())
    }

    /// Validate and store a new integration.
    pub async fn create_integration(
        &self,
        identity: &Identity,
        integration: Integration,
    ) -> color_eyre::eyre::Result<Integration> {
        integration.validate().map_err(Error::InvalidCredentials)?;
        self.check_credentials(&integration.credentials)
            .await
            .map_err(Error::InvalidCredentials)?;

        let created = match self
            .inner
            .store
            .create_integration(identity, integration)
            .await
        {
            Ok(created) => created,
            Err(err) if is_store_error(&err, StoreError::Exists) => {
                return Err(Error::IntegrationExists.into());
            }
            Err(err) => return Err(err.wrap_err("failed to create integration")),
        };

        tracing::info!(
            tenant = %identity.tenant,
            integration_id = %created.id,
            provider = %created.provider,
            "integration created"
        );
        Ok(created)
    }

    /// Replace the credentials of an integration. They must fit its provider.
    pub async fn set_integration_credentials(
        &self,
        identity: &Identity,
        id: Uuid,
        credentials: Credentials,
    ) -> color_eyre::eyre::Result<()> {
        let integration = self.get_integration_by_id(identity, id).await?;
        check_compatible(integration.provider, &credentials).map_err(Error::InvalidCredentials)?;
        self.check_credentials(&credentials)
            .await
            .map_err(Error::InvalidCredentials)?;

        match self
            .inner
            .store
            .set_integration_credentials(identity, id, credentials)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if is_store_error(&err, StoreError::NotFound) => {
                Err(Error::IntegrationNotFound.into())
            }
            Err(err) => Err(err.wrap_err("failed to update integration credentials")),
        }
    }

    /// Delete an integration. Hub and core integrations must not have devices
    /// linked to them.
    pub async fn remove_integration(
        &self,
        identity: &Identity,
        id: Uuid,
    ) -> color_eyre::eyre::Result<()> {
        let integration = self.get_integration_by_id(identity, id).await?;

        if integration.provider != Provider::Webhook {
            let linked = self
                .inner
                .store
                .do_devices_exist_by_integration_id(identity, id)
                .await
                .wrap_err("failed to look up devices of integration")?;
            if linked {
                return Err(Error::CannotRemoveIntegration.into());
            }
        }

        match self.inner.store.remove_integration(identity, id).await {
            Ok(()) => {}
            Err(err) if is_store_error(&err, StoreError::NotFound) => {
                return Err(Error::IntegrationNotFound.into());
            }
            Err(err) => return Err(err.wrap_err("failed to remove integration")),
        }

        tracing::info!(tenant = %identity.tenant, integration_id = %id, "integration removed");
        Ok(())
    }

    pub async fn get_device(
        &self,
        identity: &Identity,
        device_id: &str,
    ) -> color_eyre::eyre::Result<Device> {
        self.inner
            .store
            .get_device(identity, device_id)
            .await
            .wrap_err("failed to retrieve device")?
            .ok_or_else(|| Error::DeviceNotFound.into())
    }

    /// Integrations a device is linked to.
    pub async fn get_device_integrations(
        &self,
        identity: &Identity,
        device_id: &str,
    ) -> color_eyre::eyre::Result<Vec<Integration>> {
        let device = self.get_device(identity, device_id).await?;
        if device.integration_ids.is_empty() {
            return Ok(Vec::new());
        }

        let filter = IntegrationFilter::default().with_ids(device.integration_ids);
        self.get_integrations(identity, &filter).await
    }

    pub async fn get_events(
        &self,
        identity: &Identity,
        filter: &EventsFilter,
    ) -> color_eyre::eyre::Result<Vec<Event>> {
        self.inner
            .store
            .get_events(identity, filter)
            .await
            .wrap_err("failed to retrieve events")
    }

    /// Delete all integrations, devices and events of a tenant.
    pub async fn delete_tenant(&self, identity: &Identity) -> color_eyre::eyre::Result<()> {
        self.inner
            .store
            .delete_tenant_data(identity)
            .await
            .wrap_err("failed to delete tenant data")?;
        tracing::info!(tenant = %identity.tenant, "tenant data deleted");
        Ok(())
    }

    /// Refuse credentials pointing at untrusted hosts or filtered addresses.
    async fn check_credentials(&self, credentials: &Credentials) -> Result<(), CredentialError> {
        match credentials {
            Credentials::Http { http } => {
                self.inner.ip_filter.check_url(&http.url).await?;
            }
            Credentials::Sas { connection_string } => {
                connection_string.validate(&self.inner.trusted_hostnames)?;
                self.inner
                    .ip_filter
                    .check_host(connection_string.endpoint_host(), HUB_PORT)
                    .await?;
            }
            Credentials::Aws { aws } => {
                if aws.access_key_id.is_empty() {
                    return Err(CredentialError::Missing("access key id"));
                }
                if aws.secret_access_key.is_empty() {
                    return Err(CredentialError::Missing("secret access key"));
                }
                if aws.region.is_empty() {
                    return Err(CredentialError::Missing("region"));
                }
                if aws.device_policy_name.is_empty() {
                    return Err(CredentialError::Missing("device policy name"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use iot_core::{ConnectionStringError, DeviceEvent};
    use iot_storage::IntegrationStore;

    use super::*;
    use crate::testing::{Harness, aws_credentials, http_credentials, hub_credentials};

    fn credential_error(err: &color_eyre::eyre::Report) -> &CredentialError {
        match Error::of(err) {
            Some(Error::InvalidCredentials(cause)) => cause,
            other => panic!("expected invalid credentials, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_webhook() {
        let h = Harness::new();

        let created = h
            .manager
            .create_integration(
                &h.identity,
                Integration::new(
                    Provider::Webhook,
                    http_credentials("https://93.184.216.34/hook", Some("secret")),
                ),
            )
            .await
            .unwrap();
        assert!(!created.id.is_nil());
        assert_eq!(
            h.manager
                .get_integration_by_id(&h.identity, created.id)
                .await
                .unwrap(),
            created
        );

        let err = h
            .manager
            .create_integration(
                &h.identity,
                Integration::new(
                    Provider::Webhook,
                    http_credentials("https://93.184.216.35/hook", None),
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(Error::of(&err), Some(Error::IntegrationExists)));
    }

    #[tokio::test]
    async fn test_create_rejects_internal_webhook() {
        let h = Harness::new();

        for url in ["http://10.0.0.5/hook", "http://[::1]/hook", "http://169.254.169.254/"] {
            let err = h
                .manager
                .create_integration(
                    &h.identity,
                    Integration::new(Provider::Webhook, http_credentials(url, None)),
                )
                .await
                .unwrap_err();
            assert!(
                matches!(credential_error(&err), CredentialError::ForbiddenAddress { .. }),
                "{url}"
            );
        }

        let err = h
            .manager
            .create_integration(
                &h.identity,
                Integration::new(Provider::Webhook, http_credentials("ftp://93.184.216.34/", None)),
            )
            .await
            .unwrap_err();
        assert!(matches!(credential_error(&err), CredentialError::InvalidUrl(_)));
        assert!(
            h.manager
                .get_integrations(&h.identity, &IntegrationFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_create_rejects_untrusted_hub() {
        let h = Harness::new();
        let credentials = Credentials::Sas {
            connection_string: "HostName=hub.example.com;SharedAccessKeyName=owner;SharedAccessKey=c2VjcmV0"
                .parse()
                .unwrap(),
        };

        let err = h
            .manager
            .create_integration(&h.identity, Integration::new(Provider::IotHub, credentials))
            .await
            .unwrap_err();
        assert!(matches!(
            credential_error(&err),
            CredentialError::ConnectionString(ConnectionStringError::UntrustedHost(_))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_mismatched_credentials() {
        let h = Harness::new();

        let err = h
            .manager
            .create_integration(&h.identity, Integration::new(Provider::IotCore, hub_credentials()))
            .await
            .unwrap_err();
        assert!(matches!(credential_error(&err), CredentialError::Incompatible { .. }));

        let mut aws = aws_credentials();
        if let Credentials::Aws { aws } = &mut aws {
            aws.region.clear();
        }
        let err = h
            .manager
            .create_integration(&h.identity, Integration::new(Provider::IotCore, aws))
            .await
            .unwrap_err();
        assert!(matches!(credential_error(&err), CredentialError::Missing("region")));

        h.manager
            .create_integration(
                &h.identity,
                Integration::new(Provider::IotCore, aws_credentials()).with_description("fleet"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_credentials() {
        let h = Harness::new();
        let core = h.add_core().await;

        let err = h
            .manager
            .set_integration_credentials(&h.identity, Uuid::new_v4(), aws_credentials())
            .await
            .unwrap_err();
        assert!(matches!(Error::of(&err), Some(Error::IntegrationNotFound)));

        let err = h
            .manager
            .set_integration_credentials(
                &h.identity,
                core.id,
                http_credentials("https://93.184.216.34/", None),
            )
            .await
            .unwrap_err();
        assert!(matches!(credential_error(&err), CredentialError::Incompatible { .. }));

        let mut rotated = aws_credentials();
        if let Credentials::Aws { aws } = &mut rotated {
            aws.secret_access_key = "rotated".into();
        }
        h.manager
            .set_integration_credentials(&h.identity, core.id, rotated.clone())
            .await
            .unwrap();
        let stored = h
            .manager
            .get_integration_by_id(&h.identity, core.id)
            .await
            .unwrap();
        assert_eq!(stored.credentials, rotated);
    }

    #[tokio::test]
    async fn test_remove_integration_with_devices() {
        let h = Harness::new();
        let hub = h.add_hub().await;
        h.link("dev-1", &[hub.id]).await;

        let err = h
            .manager
            .remove_integration(&h.identity, hub.id)
            .await
            .unwrap_err();
        assert!(matches!(Error::of(&err), Some(Error::CannotRemoveIntegration)));
        assert!(
            h.store
                .get_integration_by_id(&h.identity, hub.id)
                .await
                .unwrap()
                .is_some()
        );
        assert!(h.stored_device("dev-1").await.unwrap().has_integration(hub.id));
    }

    #[tokio::test]
    async fn test_remove_integration() {
        let h = Harness::new();
        let hub = h.add_hub().await;
        let webhook = h.add_webhook("https://93.184.216.34/", None).await;
        h.link("dev-1", &[webhook.id]).await;

        h.manager.remove_integration(&h.identity, hub.id).await.unwrap();
        h.manager
            .remove_integration(&h.identity, webhook.id)
            .await
            .unwrap();

        let err = h
            .manager
            .remove_integration(&h.identity, hub.id)
            .await
            .unwrap_err();
        assert!(matches!(Error::of(&err), Some(Error::IntegrationNotFound)));
    }

    #[tokio::test]
    async fn test_device_integrations() {
        let h = Harness::new();
        let hub = h.add_hub().await;
        h.add_core().await;

        let err = h
            .manager
            .get_device_integrations(&h.identity, "dev-1")
            .await
            .unwrap_err();
        assert!(matches!(Error::of(&err), Some(Error::DeviceNotFound)));

        h.link("dev-1", &[]).await;
        assert!(
            h.manager
                .get_device_integrations(&h.identity, "dev-1")
                .await
                .unwrap()
                .is_empty()
        );

        h.link("dev-1", &[hub.id]).await;
        let linked = h
            .manager
            .get_device_integrations(&h.identity, "dev-1")
            .await
            .unwrap();
        assert_eq!(linked, vec![hub]);
    }

    #[tokio::test]
    async fn test_delete_tenant() {
        let h = Harness::new();
        let hub = h.add_hub().await;
        h.manager
            .provision_device(&h.identity, DeviceEvent::new("dev-1"))
            .await
            .unwrap();
        let device = h.manager.get_device(&h.identity, "dev-1").await.unwrap();
        assert_eq!(device.integration_ids, vec![hub.id]);

        h.manager.delete_tenant(&h.identity).await.unwrap();

        assert!(h.events().await.is_empty());
        let err = h.manager.get_device(&h.identity, "dev-1").await.unwrap_err();
        assert!(matches!(Error::of(&err), Some(Error::DeviceNotFound)));
        assert!(
            h.manager
                .get_integrations(&h.identity, &IntegrationFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
        h.manager.health_check().await.unwrap();
    }
}
