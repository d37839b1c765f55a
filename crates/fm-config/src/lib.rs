#![forbid(unsafe_code)]

//! Engine configuration: text encoding, capture location, strict-mode
//! policy, and passthrough timing.

mod env;
mod policy;

use std::path::{Path, PathBuf};
use std::time::Duration;

use fm_protocol::TextEncoding;

pub use env::apply_env_overrides;
pub use policy::{AllowedLocation, StrictModePolicy};

pub const ENV_ENCODING: &str = "FRANKENMOCK_ENCODING";
pub const ENV_RECORDING_DIR: &str = "FRANKENMOCK_RECORDING_DIR";
pub const ENV_NAMESPACE: &str = "FRANKENMOCK_NAMESPACE";
pub const ENV_STRICT: &str = "FRANKENMOCK_STRICT";
pub const ENV_STRICT_ALLOWED: &str = "FRANKENMOCK_STRICT_ALLOWED";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("allowed locations are only accepted when strict mode is active")]
    AllowListWithoutStrict,
    #[error("recording directory `{0}` is not a directory")]
    NotADirectory(PathBuf),
    #[error("namespace must not be empty")]
    EmptyNamespace,
}

impl ConfigError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::AllowListWithoutStrict => "config.allow_list_without_strict",
            Self::NotADirectory(_) => "config.recording_dir_not_a_directory",
            Self::EmptyNamespace => "config.empty_namespace",
        }
    }
}

/// Timing for the real network exchange performed on unmatched traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassthroughConfig {
    /// Per-iteration readiness wait; a quiet interval after the first byte
    /// ends the exchange.
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    /// Upper bound on waiting for the first response byte. `None` waits as
    /// long as the peer keeps the connection open.
    pub first_byte_timeout: Option<Duration>,
    pub read_chunk: usize,
}

impl Default for PassthroughConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(10),
            first_byte_timeout: Some(Duration::from_secs(30)),
            read_chunk: 65_536,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub encoding: TextEncoding,
    pub recording_dir: Option<PathBuf>,
    pub namespace: Option<String>,
    pub policy: StrictModePolicy,
    pub passthrough: PassthroughConfig,
}

impl EngineConfig {
    /// Defaults overlaid with `FRANKENMOCK_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        apply_env_overrides(&mut config);
        config
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub fn with_recording_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.recording_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: StrictModePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_passthrough(mut self, passthrough: PassthroughConfig) -> Self {
        self.passthrough = passthrough;
        self
    }

    /// Checks what can only be checked against the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(dir) = &self.recording_dir {
            ensure_directory(dir)?;
        }
        if self.namespace.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::EmptyNamespace);
        }
        Ok(())
    }
}

fn ensure_directory(dir: &Path) -> Result<(), ConfigError> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(ConfigError::NotADirectory(dir.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fm_protocol::TextEncoding;

    use super::{ConfigError, EngineConfig, PassthroughConfig, StrictModePolicy};

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.encoding, TextEncoding::Utf8);
        assert!(config.recording_dir.is_none());
        assert!(!config.policy.is_strict());
        assert_eq!(config.passthrough.poll_interval, Duration::from_millis(100));
        assert_eq!(PassthroughConfig::default().read_chunk, 65_536);
    }

    #[test]
    fn validate_accepts_existing_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = EngineConfig::default()
            .with_recording_dir(dir.path())
            .with_namespace("suite")
            .with_policy(StrictModePolicy::strict());
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_file_as_recording_dir() {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        let config = EngineConfig::default().with_recording_dir(file.path());
        let err = config.validate().expect_err("file is not a directory");
        assert!(matches!(err, ConfigError::NotADirectory(_)));
        assert_eq!(err.reason_code(), "config.recording_dir_not_a_directory");
    }

    #[test]
    fn validate_rejects_empty_namespace() {
        let config = EngineConfig::default().with_namespace("");
        assert_eq!(config.validate(), Err(ConfigError::EmptyNamespace));
    }
}
