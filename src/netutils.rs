use anyhow::{bail, Result};

/// Normalize a host name pulled off the queue: lowercase, strip surrounding
/// whitespace and any trailing root dot. Everything downstream (reservations,
/// ledger, ignore filter) keys on this form.
pub fn normalize_host(raw: &str) -> Result<String> {
    let h = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if h.is_empty() {
        bail!("empty host name");
    }
    if h.contains(char::is_whitespace) {
        bail!("host name contains whitespace: {raw:?}");
    }
    Ok(h)
}

/// Reverse-domain form: "mail.example.com" -> "com.example.mail". Prefix
/// matching on this form lets one blocklist entry cover a whole zone.
pub fn reverse_domain(host: &str) -> String {
    host.split('.').rev().collect::<Vec<_>>().join(".")
}

/// Blocklist of hosts that must never be tested, expressed as reverse-domain
/// prefixes ("com.example" matches example.com and everything under it).
#[derive(Debug, Clone, Default)]
pub struct IgnoredHosts {
    prefixes: Vec<String>,
}

impl IgnoredHosts {
    /// Build from a comma-separated list of reverse-domain prefixes.
    /// Empty entries are dropped.
    pub fn from_list(spec: &str) -> Self {
        let prefixes = spec
            .split(',')
            .map(|p| p.trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { prefixes }
    }

    pub fn is_ignored(&self, normalized_host: &str) -> bool {
        if self.prefixes.is_empty() {
            return false;
        }
        let reversed = reverse_domain(normalized_host);
        self.prefixes.iter().any(|p| {
            reversed == *p
                || (reversed.starts_with(p.as_str())
                    && reversed.as_bytes().get(p.len()) == Some(&b'.'))
        })
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}
