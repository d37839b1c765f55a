use std::path::PathBuf;

use fm_protocol::TextEncoding;

use crate::{
    AllowedLocation, ENV_ENCODING, ENV_NAMESPACE, ENV_RECORDING_DIR, ENV_STRICT,
    ENV_STRICT_ALLOWED, EngineConfig, StrictModePolicy,
};

pub fn apply_env_overrides(config: &mut EngineConfig) {
    apply_env_overrides_from(config, |key| std::env::var(key).ok());
}

fn apply_env_overrides_from<F>(config: &mut EngineConfig, mut lookup: F)
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(ENV_ENCODING) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            match trimmed.parse::<TextEncoding>() {
                Ok(encoding) => config.encoding = encoding,
                Err(err) => tracing::warn!("invalid {ENV_ENCODING}, ignoring: {err}"),
            }
        }
    }

    if let Some(raw) = lookup(ENV_RECORDING_DIR) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.recording_dir = Some(PathBuf::from(trimmed));
        }
    }

    if let Some(raw) = lookup(ENV_NAMESPACE) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.namespace = Some(trimmed.to_string());
        }
    }

    let strict = match lookup(ENV_STRICT) {
        Some(raw) => match parse_boolish(&raw) {
            Some(value) => value,
            None => {
                tracing::warn!("invalid {ENV_STRICT}, ignoring: {raw}");
                config.policy.is_strict()
            }
        },
        None => config.policy.is_strict(),
    };
    let allowed = match lookup(ENV_STRICT_ALLOWED) {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(AllowedLocation::parse)
            .collect(),
        None => config.policy.allowed().to_vec(),
    };
    match StrictModePolicy::new(strict, allowed) {
        Ok(policy) => config.policy = policy,
        Err(err) => tracing::warn!("invalid {ENV_STRICT_ALLOWED}, ignoring: {err}"),
    }
}

fn parse_boolish(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use fm_protocol::{Address, TextEncoding};

    use super::apply_env_overrides_from;
    use crate::{EngineConfig, StrictModePolicy};

    fn apply(vars: &[(&str, &str)]) -> EngineConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut config = EngineConfig::default();
        apply_env_overrides_from(&mut config, |key| vars.get(key).cloned());
        config
    }

    #[test]
    fn overrides_apply() {
        let config = apply(&[
            ("FRANKENMOCK_ENCODING", "latin-1"),
            ("FRANKENMOCK_RECORDING_DIR", " /tmp/captures "),
            ("FRANKENMOCK_NAMESPACE", "suite"),
            ("FRANKENMOCK_STRICT", "yes"),
            ("FRANKENMOCK_STRICT_ALLOWED", "localhost, api.local:8443,"),
        ]);
        assert_eq!(config.encoding, TextEncoding::Latin1);
        assert_eq!(config.recording_dir, Some(PathBuf::from("/tmp/captures")));
        assert_eq!(config.namespace.as_deref(), Some("suite"));
        assert!(config.policy.is_strict());
        assert_eq!(config.policy.allowed().len(), 2);
        assert!(config.policy.is_allowed(&Address::new("api.local", 8443)));
    }

    #[test]
    fn ipv6_allow_list_entries() {
        let config = apply(&[
            ("FRANKENMOCK_STRICT", "1"),
            ("FRANKENMOCK_STRICT_ALLOWED", "::1,[fe80::2]:9000"),
        ]);
        assert!(config.policy.is_allowed(&Address::new("::1", 8080)));
        assert!(config.policy.is_allowed(&Address::new("fe80::2", 9000)));
        assert!(!config.policy.is_allowed(&Address::new("fe80::2", 9001)));
    }

    #[test]
    fn invalid_values_are_ignored() {
        let config = apply(&[
            ("FRANKENMOCK_ENCODING", "klingon"),
            ("FRANKENMOCK_STRICT", "maybe"),
        ]);
        assert_eq!(config.encoding, TextEncoding::Utf8);
        assert_eq!(config.policy, StrictModePolicy::permissive());
    }

    #[test]
    fn allow_list_without_strict_is_ignored() {
        let config = apply(&[("FRANKENMOCK_STRICT_ALLOWED", "localhost")]);
        assert!(!config.policy.is_strict());
        assert!(config.policy.allowed().is_empty());
    }
}
