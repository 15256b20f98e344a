//! The IoT manager service and its builder.

use std::sync::Arc;

use color_eyre::eyre::WrapErr as _;
use iot_client::{
    CoreClient, DevauthClient, HttpDevauthClient, HttpHubClient, HttpWorkflowsClient, HubClient,
    IpFilter, WebhookSender, WorkflowsClient,
};
use iot_core::TrustedHostnames;
use iot_storage::DataStore;

use crate::{
    Adapters, Config, DetachedRunner, IotCoreAdapter, IotHubAdapter, ProviderAdapter, TaskRunner,
    WebhookAdapter,
};

/// Device lifecycle and integration management.
///
/// Clones share the same store, clients and runner.
pub struct IotManager<S> {
    pub(crate) inner: Arc<Inner<S>>,
}

pub(crate) struct Inner<S> {
    pub(crate) store: S,
    pub(crate) config: Config,
    pub(crate) adapters: Adapters,
    pub(crate) devauth: Arc<dyn DevauthClient>,
    pub(crate) workflows: Arc<dyn WorkflowsClient>,
    pub(crate) runner: Arc<dyn TaskRunner>,
    pub(crate) ip_filter: IpFilter,
    pub(crate) trusted_hostnames: TrustedHostnames,
}

impl<S> Clone for IotManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: DataStore + 'static> IotManager<S> {
    /// Start building a manager over a store.
    pub fn builder(store: S, config: Config) -> IotManagerBuilder<S> {
        IotManagerBuilder::new(store, config)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Check that the store is reachable.
    pub async fn health_check(&self) -> color_eyre::eyre::Result<()> {
        self.inner
            .store
            .ping()
            .await
            .wrap_err("error reaching the data store")
    }

    /// Check the store and the device authentication and workflows services.
    pub async fn check_dependencies(&self) -> color_eyre::eyre::Result<()> {
        self.health_check().await?;
        self.inner
            .devauth
            .ping()
            .await
            .wrap_err("device authentication service unreachable")?;
        self.inner
            .workflows
            .check_health()
            .await
            .wrap_err("workflows service unhealthy")
    }
}

/// Builder for [`IotManager`]. Collaborators not supplied are created from the
/// configuration when [`IotManagerBuilder::build`] runs.
pub struct IotManagerBuilder<S> {
    store: S,
    config: Config,
    hub: Option<Arc<dyn HubClient>>,
    core: Option<Arc<dyn CoreClient>>,
    devauth: Option<Arc<dyn DevauthClient>>,
    workflows: Option<Arc<dyn WorkflowsClient>>,
    webhooks: Option<WebhookSender>,
    runner: Option<Arc<dyn TaskRunner>>,
    extra: Vec<Arc<dyn ProviderAdapter>>,
}

impl<S: DataStore + 'static> IotManagerBuilder<S> {
    pub fn new(store: S, config: Config) -> Self {
        Self {
            store,
            config,
            hub: None,
            core: None,
            devauth: None,
            workflows: None,
            webhooks: None,
            runner: None,
            extra: Vec::new(),
        }
    }

    pub fn with_iot_hub(mut self, client: Arc<dyn HubClient>) -> Self {
        self.hub = Some(client);
        self
    }

    /// Enable the core provider. Without a client, deliveries to core
    /// integrations are recorded as failed.
    pub fn with_iot_core(mut self, client: Arc<dyn CoreClient>) -> Self {
        self.core = Some(client);
        self
    }

    pub fn with_devauth(mut self, client: Arc<dyn DevauthClient>) -> Self {
        self.devauth = Some(client);
        self
    }

    pub fn with_workflows(mut self, client: Arc<dyn WorkflowsClient>) -> Self {
        self.workflows = Some(client);
        self
    }

    pub fn with_webhooks(mut self, sender: WebhookSender) -> Self {
        self.webhooks = Some(sender);
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Register an adapter, overriding the built-in one for its provider.
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.extra.push(adapter);
        self
    }

    pub fn build(self) -> color_eyre::eyre::Result<IotManager<S>> {
        let config = self.config;
        let timeout = config.webhooks_timeout();
        let ip_filter = config
            .ip_filter()
            .wrap_err("invalid webhook IP filter")?;
        let trusted_hostnames = config.trusted_hostnames();

        let workflows: Arc<dyn WorkflowsClient> = match self.workflows {
            Some(client) => client,
            None => Arc::new(HttpWorkflowsClient::new(&config.workflows_url, timeout)?),
        };
        let devauth: Arc<dyn DevauthClient> = match self.devauth {
            Some(client) => client,
            None => Arc::new(HttpDevauthClient::new(&config.devauth_url, timeout)?),
        };
        let hub: Arc<dyn HubClient> = match self.hub {
            Some(client) => client,
            None => Arc::new(HttpHubClient::new(timeout)?),
        };
        let webhooks = match self.webhooks {
            Some(sender) => sender,
            None => WebhookSender::new(ip_filter.clone(), timeout)?,
        };
        let runner = self
            .runner
            .unwrap_or_else(|| Arc::new(DetachedRunner::new(timeout)));

        let mut adapters = Adapters::new();
        adapters.insert(Arc::new(IotHubAdapter::new(hub, workflows.clone())));
        if let Some(core) = self.core {
            adapters.insert(Arc::new(IotCoreAdapter::new(core, workflows.clone())));
        }
        adapters.insert(Arc::new(WebhookAdapter::new(webhooks)));
        for adapter in self.extra {
            adapters.insert(adapter);
        }

        tracing::info!(
            webhooks_timeout_seconds = config.webhooks_timeout_seconds,
            trusted_hostnames = config.domain_whitelist.len(),
            "iot manager configured"
        );

        Ok(IotManager {
            inner: Arc::new(Inner {
                store: self.store,
                config,
                adapters,
                devauth,
                workflows,
                runner,
                ip_filter,
                trusted_hostnames,
            }),
        })
    }
}
