use std::fmt;

use fm_protocol::Address;

use crate::ConfigError;

/// One allow-list item: a bare host admits every port, an address admits
/// exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AllowedLocation {
    Host(String),
    Address(Address),
}

impl AllowedLocation {
    /// `"host:port"` and `"[v6]:port"` become an address, anything else a
    /// host. A bare IPv6 literal such as `::1` is a host.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<Address>() {
            Ok(address) => Self::Address(address),
            Err(_) => {
                let host = raw
                    .strip_prefix('[')
                    .and_then(|inner| inner.strip_suffix(']'))
                    .unwrap_or(raw);
                Self::Host(host.to_string())
            }
        }
    }

    #[must_use]
    pub fn admits(&self, address: &Address) -> bool {
        match self {
            Self::Host(host) => host == address.host(),
            Self::Address(allowed) => allowed == address,
        }
    }
}

impl fmt::Display for AllowedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(host) => f.write_str(host),
            Self::Address(address) => write!(f, "{address}"),
        }
    }
}

impl From<Address> for AllowedLocation {
    fn from(address: Address) -> Self {
        Self::Address(address)
    }
}

impl From<&str> for AllowedLocation {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

/// Whether unmatched traffic may reach the real network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrictModePolicy {
    strict: bool,
    allowed: Vec<AllowedLocation>,
}

impl StrictModePolicy {
    /// Fails when an allow-list is supplied without strict mode.
    pub fn new(strict: bool, allowed: Vec<AllowedLocation>) -> Result<Self, ConfigError> {
        if !strict && !allowed.is_empty() {
            return Err(ConfigError::AllowListWithoutStrict);
        }
        Ok(Self { strict, allowed })
    }

    #[must_use]
    pub fn permissive() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn strict() -> Self {
        Self {
            strict: true,
            allowed: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    #[must_use]
    pub fn allowed(&self) -> &[AllowedLocation] {
        &self.allowed
    }

    #[must_use]
    pub fn is_allowed(&self, address: &Address) -> bool {
        !self.strict || self.allowed.iter().any(|location| location.admits(address))
    }
}

#[cfg(test)]
mod tests {
    use fm_protocol::Address;

    use super::{AllowedLocation, StrictModePolicy};
    use crate::ConfigError;

    #[test]
    fn permissive_allows_everything() {
        let policy = StrictModePolicy::permissive();
        assert!(policy.is_allowed(&Address::new("example.com", 80)));
    }

    #[test]
    fn strict_without_allow_list_denies_everything() {
        let policy = StrictModePolicy::strict();
        assert!(!policy.is_allowed(&Address::new("localhost", 6379)));
    }

    #[test]
    fn host_entries_admit_any_port_address_entries_one() {
        let policy = StrictModePolicy::new(
            true,
            vec![AllowedLocation::parse("localhost"), AllowedLocation::parse("httpbin.local:8080")],
        )
        .expect("strict policy");
        assert!(policy.is_allowed(&Address::new("localhost", 1)));
        assert!(policy.is_allowed(&Address::new("localhost", 65000)));
        assert!(policy.is_allowed(&Address::new("httpbin.local", 8080)));
        assert!(!policy.is_allowed(&Address::new("httpbin.local", 80)));
        assert!(!policy.is_allowed(&Address::new("example.com", 80)));
    }

    #[test]
    fn allow_list_requires_strict() {
        let err = StrictModePolicy::new(false, vec!["localhost".into()]).expect_err("rejected");
        assert_eq!(err, ConfigError::AllowListWithoutStrict);
        assert_eq!(err.reason_code(), "config.allow_list_without_strict");
    }

    #[test]
    fn allowed_location_parsing() {
        assert_eq!(
            AllowedLocation::parse("[::1]:443"),
            AllowedLocation::Address(Address::new("::1", 443))
        );
        assert_eq!(
            AllowedLocation::parse(" api.local "),
            AllowedLocation::Host("api.local".to_string())
        );
    }

    #[test]
    fn bare_ipv6_entry_is_a_host() {
        assert_eq!(AllowedLocation::parse("::1"), AllowedLocation::Host("::1".to_string()));
        assert_eq!(AllowedLocation::parse("[::1]"), AllowedLocation::Host("::1".to_string()));
        let policy =
            StrictModePolicy::new(true, vec![AllowedLocation::parse("::1")]).expect("strict policy");
        assert!(policy.is_allowed(&Address::new("::1", 8080)));
        assert!(policy.is_allowed(&Address::new("::1", 1)));
        assert!(!policy.is_allowed(&Address::new(":", 1)));
    }
}
