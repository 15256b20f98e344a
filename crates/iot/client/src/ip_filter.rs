//! Destination address filtering for outbound requests.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use ipnetwork::IpNetwork;
use iot_core::CredentialError;

/// Decides which addresses outbound requests may connect to.
///
/// Allow-listed networks win over deny-listed ones; anything on neither list
/// is allowed unless it falls in a reserved range (loopback, private,
/// link-local, shared, multicast and the like).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IpFilter {
    allow: Vec<IpNetwork>,
    deny: Vec<IpNetwork>,
}

impl IpFilter {
    /// Filter with explicit allow and deny networks.
    pub fn new(allow: Vec<IpNetwork>, deny: Vec<IpNetwork>) -> Self {
        Self { allow, deny }
    }

    /// Parse CIDR strings into a filter.
    pub fn parse<A, D>(allow: A, deny: D) -> Result<Self, ipnetwork::IpNetworkError>
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
    {
        let allow = allow
            .into_iter()
            .map(|c| c.as_ref().parse())
            .collect::<Result<_, _>>()?;
        let deny = deny
            .into_iter()
            .map(|c| c.as_ref().parse())
            .collect::<Result<_, _>>()?;
        Ok(Self { allow, deny })
    }

    /// Whether connections to `ip` are permitted.
    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        if self.allow.iter().any(|net| net.contains(ip)) {
            return true;
        }
        if self.deny.iter().any(|net| net.contains(ip)) {
            return false;
        }
        !is_reserved(ip)
    }

    /// Resolve a host and check every address it maps to.
    pub async fn check_host(&self, host: &str, port: u16) -> Result<(), CredentialError> {
        let addrs: Vec<SocketAddr> = match host.trim_matches(['[', ']']).parse::<IpAddr>() {
            Ok(ip) => vec![SocketAddr::new(ip, port)],
            Err(_) => tokio::net::lookup_host((host, port))
                .await
                .map_err(|source| CredentialError::Lookup {
                    host: host.to_owned(),
                    source,
                })?
                .collect(),
        };

        if addrs.is_empty() {
            return Err(CredentialError::Lookup {
                host: host.to_owned(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
            });
        }

        match addrs.iter().find(|a| !self.is_allowed(a.ip())) {
            Some(addr) => Err(CredentialError::ForbiddenAddress {
                host: host.to_owned(),
                addr: addr.ip(),
            }),
            None => Ok(()),
        }
    }

    /// Parse a webhook URL and check its host.
    pub async fn check_url(&self, raw: &str) -> Result<url::Url, CredentialError> {
        let url = url::Url::parse(raw).map_err(|e| CredentialError::InvalidUrl(e.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(CredentialError::InvalidUrl(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| CredentialError::InvalidUrl("url must have a host".into()))?;
        let port = url.port_or_known_default().unwrap_or(443);

        self.check_host(host, port).await?;
        Ok(url)
    }
}

fn is_reserved(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_reserved_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_reserved_v4(v4),
            None => is_reserved_v6(v6),
        },
    }
}

fn is_reserved_v4(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || ip.is_multicast()
        || ip.is_documentation()
        || a == 0
        || (a == 100 && (b & 0xc0) == 64) // 100.64.0.0/10
        || (a == 192 && b == 0 && c == 0) // 192.0.0.0/24
        || (a == 198 && (b & 0xfe) == 18) // 198.18.0.0/15
        || a >= 240
}

fn is_reserved_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || (first & 0xfe00) == 0xfc00 // fc00::/7
        || (first & 0xffc0) == 0xfe80 // fe80::/10
        || (first == 0x2001 && ip.segments()[1] == 0x0db8) // 2001:db8::/32
}
