#![forbid(unsafe_code)]

//! Replays JSON fixtures against a fresh simulation scope and reports which
//! cases diverged. Fixtures never reach the network: unmatched traffic hits
//! [`OfflineConnector`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use fm_config::{
    AllowedLocation, ConfigError, EngineConfig, PassthroughConfig, StrictModePolicy,
};
use fm_entry::{Entry, Reply};
use fm_protocol::http::HttpResponse;
use fm_protocol::{Address, TextEncoding};
use fm_runtime::{Simulation, SimulationError, VirtualSocket};
use fm_transport::{Connection, Connector};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Namespace of the capture file a fixture seeds.
pub const FIXTURE_NAMESPACE: &str = "fixture";

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            fixture_root: Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseFailure {
    pub name: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffReport {
    pub suite: String,
    pub total: usize,
    pub passed: usize,
    pub failed: Vec<CaseFailure>,
}

impl DiffReport {
    fn record(&mut self, name: &str, outcome: Result<(), String>) {
        self.total += 1;
        match outcome {
            Ok(()) => {
                self.passed += 1;
                tracing::debug!(suite = %self.suite, case = name, "case passed");
            }
            Err(detail) => {
                tracing::warn!(suite = %self.suite, case = name, %detail, "case diverged");
                self.failed.push(CaseFailure {
                    name: name.to_string(),
                    detail,
                });
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("fixture {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("fixture {path} is malformed: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("fixture is invalid: {0}")]
    Invalid(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

/// Refuses every connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineConnector;

impl Connector for OfflineConnector {
    fn connect(
        &self,
        address: &Address,
        _config: &PassthroughConfig,
    ) -> io::Result<Box<dyn Connection>> {
        Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("fixtures never reach the network ({address})"),
        ))
    }
}

/// Installs a `RUST_LOG`-filtered subscriber once per test binary.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── fixture schema ──

#[derive(Debug, Deserialize)]
struct Fixture {
    suite: String,
    #[serde(default)]
    config: FixtureConfig,
    #[serde(default)]
    entries: Vec<FixtureEntry>,
    /// Capture file contents seeded before the scope opens.
    #[serde(default)]
    capture: Option<serde_json::Value>,
    cases: Vec<FixtureCase>,
    /// Whether the scope should end with unserved entries.
    #[serde(default)]
    unserved: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct FixtureConfig {
    #[serde(default)]
    strict: bool,
    #[serde(default)]
    allowed: Vec<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum FixtureEntry {
    Bytes {
        address: String,
        #[serde(default)]
        replies: Vec<FixtureReply>,
    },
    Http {
        method: String,
        uri: String,
        #[serde(default = "default_true")]
        match_querystring: bool,
        #[serde(default)]
        replies: Vec<FixtureReply>,
    },
    Resp {
        #[serde(default)]
        address: Option<String>,
        command: String,
        #[serde(default)]
        replies: Vec<FixtureReply>,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum FixtureReply {
    Text(String),
    Hex(String),
    Integer(i64),
    Http {
        status: u16,
        #[serde(default)]
        body: String,
        #[serde(default)]
        headers: Vec<(String, String)>,
    },
    Error {
        kind: String,
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct FixtureCase {
    name: String,
    address: String,
    send: Vec<String>,
    #[serde(default)]
    expect: Vec<Expectation>,
    /// Request history length after the case.
    #[serde(default)]
    requests: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Expectation {
    Exact(String),
    Prefix(String),
    Contains(String),
    Hex(String),
    /// Reason code of the error the send fails with.
    Error(String),
}

/// Loads `name` from the fixture root and replays it.
pub fn run_fixture(cfg: &HarnessConfig, name: &str) -> Result<DiffReport, HarnessError> {
    let path = cfg.fixture_root.join(name);
    let raw = fs::read_to_string(&path).map_err(|source| HarnessError::Io {
        path: path.clone(),
        source,
    })?;
    let fixture: Fixture =
        serde_json::from_str(&raw).map_err(|source| HarnessError::Json { path, source })?;
    run(fixture)
}

fn run(fixture: Fixture) -> Result<DiffReport, HarnessError> {
    let capture_dir = tempfile::tempdir().map_err(|source| HarnessError::Io {
        path: std::env::temp_dir(),
        source,
    })?;
    let mut config = engine_config(&fixture.config)?;
    if let Some(capture) = &fixture.capture {
        let path = capture_dir.path().join(format!("{FIXTURE_NAMESPACE}.json"));
        let body = serde_json::to_string_pretty(capture).map_err(|source| HarnessError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, body).map_err(|source| HarnessError::Io { path, source })?;
        config = config
            .with_recording_dir(capture_dir.path())
            .with_namespace(FIXTURE_NAMESPACE);
    }

    let simulation = Simulation::new(config).with_connector(Arc::new(OfflineConnector));
    let scope = simulation.enter(None)?;
    for entry in &fixture.entries {
        scope.register(build_entry(entry)?)?;
    }

    let mut report = DiffReport {
        suite: fixture.suite.clone(),
        ..DiffReport::default()
    };
    for case in &fixture.cases {
        let outcome = run_case(&scope, case);
        report.record(&case.name, outcome);
    }
    if let Some(expected) = fixture.unserved {
        let actual = scope.assert_fail_if_entries_not_served().is_err();
        let outcome = if actual == expected {
            Ok(())
        } else {
            Err(format!("expected unserved={expected}, found {actual}"))
        };
        report.record("unserved entries", outcome);
    }
    tracing::info!(
        suite = %report.suite,
        total = report.total,
        passed = report.passed,
        "fixture finished"
    );
    Ok(report)
}

fn engine_config(raw: &FixtureConfig) -> Result<EngineConfig, HarnessError> {
    let allowed = raw.allowed.iter().map(|loc| AllowedLocation::parse(loc)).collect();
    let mut config =
        EngineConfig::default().with_policy(StrictModePolicy::new(raw.strict, allowed)?);
    if let Some(label) = &raw.encoding {
        let encoding = TextEncoding::from_str(label)
            .map_err(|err| HarnessError::Invalid(err.to_string()))?;
        config = config.with_encoding(encoding);
    }
    Ok(config)
}

fn parse_address(raw: &str) -> Result<Address, HarnessError> {
    Address::from_str(raw).map_err(|err| HarnessError::Invalid(err.to_string()))
}

fn build_entry(raw: &FixtureEntry) -> Result<Entry, HarnessError> {
    let entry = match raw {
        FixtureEntry::Bytes { address, replies } => {
            Entry::bytes(parse_address(address)?, build_replies(replies)?)
        }
        FixtureEntry::Http {
            method,
            uri,
            match_querystring,
            replies,
        } => Entry::http(method, uri, build_replies(replies)?)
            .map_err(SimulationError::from)?
            .match_querystring(*match_querystring),
        FixtureEntry::Resp {
            address,
            command,
            replies,
        } => {
            let address = address.as_deref().map(parse_address).transpose()?;
            Entry::resp(address, command, build_replies(replies)?).map_err(SimulationError::from)?
        }
    };
    Ok(entry)
}

fn build_replies(raw: &[FixtureReply]) -> Result<Vec<Reply>, HarnessError> {
    raw.iter().map(build_reply).collect()
}

fn build_reply(raw: &FixtureReply) -> Result<Reply, HarnessError> {
    Ok(match raw {
        FixtureReply::Text(text) => Reply::from(text.as_str()),
        FixtureReply::Hex(dump) => Reply::from(decode_hex(dump)?),
        FixtureReply::Integer(n) => Reply::from(*n),
        FixtureReply::Http {
            status,
            body,
            headers,
        } => {
            let mut builder = HttpResponse::builder(*status).body_text(body.as_str());
            for (name, value) in headers {
                builder = builder.header(name, value);
            }
            let response = builder
                .build()
                .map_err(|err| HarnessError::Invalid(err.to_string()))?;
            Reply::from(response)
        }
        FixtureReply::Error { kind, message } => Reply::error(error_kind(kind)?, message.as_str()),
    })
}

fn error_kind(raw: &str) -> Result<io::ErrorKind, HarnessError> {
    Ok(match raw {
        "connection_refused" => io::ErrorKind::ConnectionRefused,
        "connection_reset" => io::ErrorKind::ConnectionReset,
        "connection_aborted" => io::ErrorKind::ConnectionAborted,
        "broken_pipe" => io::ErrorKind::BrokenPipe,
        "timed_out" => io::ErrorKind::TimedOut,
        "would_block" => io::ErrorKind::WouldBlock,
        "other" => io::ErrorKind::Other,
        unknown => return Err(HarnessError::Invalid(format!("unknown error kind `{unknown}`"))),
    })
}

fn decode_hex(raw: &str) -> Result<Vec<u8>, HarnessError> {
    let compact: String = raw.split_whitespace().collect();
    hex::decode(compact).map_err(|err| HarnessError::Invalid(err.to_string()))
}

fn run_case(scope: &Simulation, case: &FixtureCase) -> Result<(), String> {
    let address = parse_address(&case.address).map_err(|err| err.to_string())?;
    let mut socket = scope.connect(address).map_err(|err| err.to_string())?;

    let mut send_error = None;
    for payload in &case.send {
        if let Err(err) = socket.send_all(payload.as_bytes()) {
            send_error = Some(err);
            break;
        }
    }

    if let Some(err) = send_error {
        return match case.expect.as_slice() {
            [Expectation::Error(code)] if code == err.reason_code() => check_history(scope, case),
            _ => Err(format!("send failed: [{}] {err}", err.reason_code())),
        };
    }

    let response = drain(&mut socket).map_err(|err| err.to_string())?;
    for expectation in &case.expect {
        check(expectation, &response)?;
    }
    check_history(scope, case)
}

fn drain(socket: &mut VirtualSocket) -> Result<Vec<u8>, SimulationError> {
    let mut response = Vec::new();
    loop {
        let chunk = socket.recv(4096)?;
        if chunk.is_empty() {
            return Ok(response);
        }
        response.extend_from_slice(&chunk);
    }
}

fn check(expectation: &Expectation, response: &[u8]) -> Result<(), String> {
    let text = String::from_utf8_lossy(response);
    let ok = match expectation {
        Expectation::Exact(expected) => response == expected.as_bytes(),
        Expectation::Prefix(expected) => response.starts_with(expected.as_bytes()),
        Expectation::Contains(expected) => text.contains(expected.as_str()),
        Expectation::Hex(expected) => decode_hex(expected)
            .map(|bytes| bytes == response)
            .unwrap_or(false),
        Expectation::Error(code) => {
            return Err(format!("expected error {code}, got {} bytes", response.len()));
        }
    };
    if ok {
        Ok(())
    } else {
        Err(format!("{expectation:?} did not hold for {text:?}"))
    }
}

fn check_history(scope: &Simulation, case: &FixtureCase) -> Result<(), String> {
    match case.requests {
        Some(expected) => {
            let actual = scope.requests().len();
            if actual == expected {
                Ok(())
            } else {
                Err(format!("expected {expected} recorded requests, found {actual}"))
            }
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::{Expectation, check, error_kind};

    #[test]
    fn expectations_compare_bytes() {
        check(&Expectation::Prefix("+O".into()), b"+OK\r\n").expect("prefix");
        check(&Expectation::Hex("2B 4F 4B".into()), b"+OK").expect("hex");
        assert!(check(&Expectation::Exact("-ERR".into()), b"+OK").is_err());
        assert!(check(&Expectation::Error("socket.closed".into()), b"").is_err());
    }

    #[test]
    fn error_kinds_are_named() {
        assert!(error_kind("timed_out").is_ok());
        assert!(error_kind("meltdown").is_err());
    }
}
