use std::fmt;
use std::str::FromStr;

/// A `(host, port)` pair. Equality is exact: no DNS or case normalization.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("address `{0}` is missing a `:port` suffix")]
    MissingPort(String),
    #[error("address `{0}` has an invalid port")]
    InvalidPort(String),
    #[error("address `{0}` has an empty host")]
    EmptyHost(String),
    #[error("address `{0}` has an IPv6 host without brackets")]
    UnbracketedHost(String),
}

impl FromStr for Address {
    type Err = AddressParseError;

    /// Parses `host:port`. IPv6 hosts use the bracketed `[::1]:80` form.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (host, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| AddressParseError::MissingPort(raw.to_string()))?;
        let host = match host.strip_prefix('[').and_then(|inner| inner.strip_suffix(']')) {
            Some(inner) => inner,
            None if host.contains(':') => {
                return Err(AddressParseError::UnbracketedHost(raw.to_string()));
            }
            None => host,
        };
        if host.is_empty() {
            return Err(AddressParseError::EmptyHost(raw.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressParseError::InvalidPort(raw.to_string()))?;
        Ok(Self::new(host, port))
    }
}

impl From<(&str, u16)> for Address {
    fn from((host, port): (&str, u16)) -> Self {
        Self::new(host, port)
    }
}

impl From<(String, u16)> for Address {
    fn from((host, port): (String, u16)) -> Self {
        Self::new(host, port)
    }
}
