//! Webhook delivery.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::WrapErr as _;
use iot_core::{CredentialError, HttpCredentials, WebhookEvent};

use crate::{HttpError, IpFilter};

/// Posts lifecycle events to tenant webhooks.
///
/// Redirects are not followed and connections are only made to addresses the
/// [`IpFilter`] allows, both for IP-literal URLs and for resolved hostnames.
#[derive(Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
    filter: Arc<IpFilter>,
}

impl WebhookSender {
    /// Create a sender with a per-request timeout.
    pub fn new(filter: IpFilter, timeout: Duration) -> color_eyre::eyre::Result<Self> {
        let filter = Arc::new(filter);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .dns_resolver(Arc::new(FilteringResolver {
                filter: filter.clone(),
            }))
            .build()
            .wrap_err("failed to build webhook client")?;

        Ok(Self { client, filter })
    }

    /// Deliver an event, returning the response status.
    ///
    /// Statuses of 300 and above fail with [`HttpError`].
    pub async fn send(
        &self,
        creds: &HttpCredentials,
        event: &WebhookEvent,
    ) -> color_eyre::eyre::Result<u16> {
        let url = url::Url::parse(&creds.url)
            .map_err(|e| CredentialError::InvalidUrl(e.to_string()))?;

        if let Some(host) = url.host_str() {
            if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
                if !self.filter.is_allowed(ip) {
                    return Err(CredentialError::ForbiddenAddress {
                        host: host.to_owned(),
                        addr: ip,
                    }
                    .into());
                }
            }
        }

        let body = serde_json::to_vec(event).wrap_err("failed to encode webhook event")?;

        let mut req = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &creds.secret {
            req = req
                .header(iot_crypto::HEADER_ALGORITHM, iot_crypto::ALGORITHM_HMAC_SHA256)
                .header(
                    iot_crypto::HEADER_SIGNATURE,
                    iot_crypto::sign_payload(secret.as_bytes(), &body),
                );
        }

        let rsp = req
            .body(body)
            .send()
            .await
            .wrap_err("failed to deliver webhook")?;

        let status = rsp.status().as_u16();
        tracing::debug!(event_id = %event.id, status, "webhook delivered");

        if status >= 300 {
            return Err(HttpError::new(status).into());
        }
        Ok(status)
    }
}

/// DNS resolver that drops addresses the filter refuses.
struct FilteringResolver {
    filter: Arc<IpFilter>,
}

impl reqwest::dns::Resolve for FilteringResolver {
    fn resolve(&self, name: reqwest::dns::Name) -> reqwest::dns::Resolving {
        Box::pin(resolve_filtered(
            self.filter.clone(),
            name.as_str().to_owned(),
        ))
    }
}

async fn resolve_filtered(
    filter: Arc<IpFilter>,
    host: String,
) -> Result<reqwest::dns::Addrs, Box<dyn std::error::Error + Send + Sync>> {
    let resolved: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
        .await?
        .collect();

    let Some(first) = resolved.first().copied() else {
        return Err(Box::new(CredentialError::Lookup {
            host,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
        }));
    };

    let allowed: Vec<SocketAddr> = resolved
        .into_iter()
        .filter(|a| filter.is_allowed(a.ip()))
        .collect();
    if allowed.is_empty() {
        return Err(Box::new(CredentialError::ForbiddenAddress {
            host,
            addr: first.ip(),
        }));
    }

    Ok(Box::new(allowed.into_iter()))
}
