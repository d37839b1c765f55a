use chrono::{Duration, Utc};

const CERT_VALIDITY_DAYS: i64 = 360;
const NOT_AFTER_FORMAT: &str = "%b %e %H:%M:%S %Y GMT";

/// Cipher triple reported after a simulated handshake.
pub const CIPHER: (&str, &str, &str) = ("ADH", "AES256", "SHA");

/// Handshake bookkeeping for a socket that asked for TLS. No cryptography
/// happens; bytes keep flowing in the clear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TlsSession {
    pub(crate) server_name: Option<String>,
    pub(crate) delivered_data: bool,
}

impl TlsSession {
    pub(crate) fn new(server_name: Option<&str>) -> Self {
        Self {
            server_name: server_name.map(str::to_string),
            delivered_data: false,
        }
    }
}

/// Synthetic certificate for the connected host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCertificate {
    pub not_after: String,
    /// `("DNS", name)` pairs.
    pub subject_alt_names: Vec<(String, String)>,
    pub subject: Vec<(String, String)>,
}

impl PeerCertificate {
    #[must_use]
    pub fn for_host(host: &str) -> Self {
        let expires = Utc::now() + Duration::days(CERT_VALIDITY_DAYS);
        let wildcard = format!("*.{host}");
        Self {
            not_after: expires.format(NOT_AFTER_FORMAT).to_string(),
            subject_alt_names: vec![
                ("DNS".to_string(), wildcard.clone()),
                ("DNS".to_string(), host.to_string()),
                ("DNS".to_string(), "*".to_string()),
            ],
            subject: vec![
                ("organizationName".to_string(), wildcard.clone()),
                (
                    "organizationalUnitName".to_string(),
                    "Domain Control Validated".to_string(),
                ),
                ("commonName".to_string(), wildcard),
            ],
        }
    }

    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.subject
            .iter()
            .find(|(key, _)| key == "commonName")
            .map(|(_, value)| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Utc};

    use super::PeerCertificate;

    #[test]
    fn certificate_covers_host_and_wildcard() {
        let cert = PeerCertificate::for_host("example.com");
        assert_eq!(cert.common_name(), Some("*.example.com"));
        let names: Vec<&str> = cert
            .subject_alt_names
            .iter()
            .map(|(_, name)| name.as_str())
            .collect();
        assert_eq!(names, vec!["*.example.com", "example.com", "*"]);
        assert!(cert.not_after.ends_with(" GMT"));
        let next_year = (Utc::now().year() + 1).to_string();
        let this_year = Utc::now().year().to_string();
        assert!(cert.not_after.contains(&next_year) || cert.not_after.contains(&this_year));
    }
}
