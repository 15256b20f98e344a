//! Trusted hostname patterns.

/// Allowlist of DNS name patterns that registry hostnames must match.
///
/// A `*` label matches exactly one label of the hostname. Matching is
/// case-insensitive and ignores a trailing dot and any port suffix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedHostnames {
    patterns: Vec<Vec<String>>,
}

impl TrustedHostnames {
    /// Build an allowlist from patterns such as `*.azure-devices.net`.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .filter_map(|p| {
                let p = normalize(p.as_ref());
                (!p.is_empty()).then(|| p.split('.').map(str::to_owned).collect())
            })
            .collect();
        Self { patterns }
    }

    /// Whether no pattern is configured.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Check a hostname against the allowlist.
    pub fn is_trusted(&self, hostname: &str) -> bool {
        let hostname = strip_port(hostname);
        let hostname = normalize(hostname);
        if hostname.is_empty() {
            return false;
        }
        let labels: Vec<&str> = hostname.split('.').collect();

        self.patterns.iter().any(|pattern| {
            pattern.len() == labels.len()
                && pattern
                    .iter()
                    .zip(&labels)
                    .all(|(p, label)| p == "*" || p == label)
        })
    }
}

fn normalize(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> TrustedHostnames {
        TrustedHostnames::new(["*.azure-devices.net", "*.iot.*.amazonaws.com"])
    }

    #[test]
    fn test_wildcard_matches_single_label() {
        let trusted = defaults();
        assert!(trusted.is_trusted("myhub.azure-devices.net"));
        assert!(trusted.is_trusted("abc.iot.eu-west-1.amazonaws.com"));
        assert!(!trusted.is_trusted("a.b.azure-devices.net"));
        assert!(!trusted.is_trusted("azure-devices.net"));
        assert!(!trusted.is_trusted("myhub.azure-devices.net.evil.com"));
    }

    #[test]
    fn test_case_port_and_trailing_dot() {
        let trusted = defaults();
        assert!(trusted.is_trusted("MyHub.Azure-Devices.NET"));
        assert!(trusted.is_trusted("myhub.azure-devices.net."));
        assert!(trusted.is_trusted("myhub.azure-devices.net:443"));
    }

    #[test]
    fn test_empty() {
        let trusted = TrustedHostnames::new(["", " "]);
        assert!(trusted.is_empty());
        assert!(!trusted.is_trusted("myhub.azure-devices.net"));
        assert!(!defaults().is_trusted(""));
    }
}
