#![forbid(unsafe_code)]

//! Capture store for real exchanges. One JSON file per namespace:
//! `{host: {port: {signature: {"request": text, "response": hexdump}}}}`.

mod signature;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fm_protocol::{Address, TextEncoding, hexdump, hexload, is_hexdump};
use serde::{Deserialize, Serialize};

pub use signature::{canonicalize, legacy_signature, signature};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture directory `{0}` is not a directory")]
    NotADirectory(PathBuf),
    #[error("capture file `{path}`: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("capture file `{path}` is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl CaptureError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::NotADirectory(_) => "record.not_a_directory",
            Self::Io { .. } => "record.io",
            Self::Json { .. } => "record.malformed_file",
        }
    }
}

/// One captured exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub request: Vec<u8>,
    pub response: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    request: String,
    response: String,
}

type CaptureFile = BTreeMap<String, BTreeMap<String, BTreeMap<String, StoredRecord>>>;

#[derive(Debug)]
pub struct RecordStore {
    directory: PathBuf,
    namespace: String,
    encoding: TextEncoding,
    records: BTreeMap<Address, BTreeMap<String, Record>>,
}

impl RecordStore {
    /// Opens the store for `namespace` under `directory`, loading the capture
    /// file when it exists.
    pub fn open(
        directory: impl Into<PathBuf>,
        namespace: impl Into<String>,
        encoding: TextEncoding,
    ) -> Result<Self, CaptureError> {
        let directory = directory.into();
        if !directory.is_dir() {
            return Err(CaptureError::NotADirectory(directory));
        }
        let mut store = Self {
            directory,
            namespace: namespace.into(),
            encoding,
            records: BTreeMap::new(),
        };
        store.load()?;
        Ok(store)
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn file(&self) -> PathBuf {
        self.directory.join(format!("{}.json", self.namespace))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(&mut self) -> Result<(), CaptureError> {
        let path = self.file();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(CaptureError::Io { path, source }),
        };
        let file: CaptureFile =
            serde_json::from_str(&raw).map_err(|source| CaptureError::Json {
                path: path.clone(),
                source,
            })?;

        for (host, ports) in file {
            for (port, signatures) in ports {
                let Ok(port) = port.parse::<u16>() else {
                    tracing::warn!(%host, %port, "capture port is not a number, skipping");
                    continue;
                };
                let address = Address::new(host.as_str(), port);
                for (sig, stored) in signatures {
                    let Ok(response) = hexload(&stored.response) else {
                        tracing::warn!(%address, signature = %sig, "capture response is not a hex dump, skipping");
                        continue;
                    };
                    // Older files stored the request as a hex dump too.
                    let legacy_request = if is_hexdump(&stored.request) {
                        hexload(&stored.request).ok()
                    } else {
                        None
                    };
                    let request = match legacy_request {
                        Some(bytes) => bytes,
                        None => self
                            .encoding
                            .encode(&stored.request)
                            .unwrap_or_else(|_| stored.request.clone().into_bytes()),
                    };
                    self.records
                        .entry(address.clone())
                        .or_default()
                        .insert(sig, Record { request, response });
                }
            }
        }
        tracing::debug!(file = %path.display(), records = self.len(), "capture file loaded");
        Ok(())
    }

    fn save(&self) -> Result<(), CaptureError> {
        let mut file = CaptureFile::new();
        for (address, signatures) in &self.records {
            let ports = file.entry(address.host().to_string()).or_default();
            let stored = ports.entry(address.port().to_string()).or_default();
            for (sig, record) in signatures {
                stored.insert(
                    sig.clone(),
                    StoredRecord {
                        request: self.encoding.decode(&record.request),
                        response: hexdump(&record.response),
                    },
                );
            }
        }

        let path = self.file();
        let mut payload = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut payload, formatter);
        file.serialize(&mut serializer)
            .map_err(|source| CaptureError::Json {
                path: path.clone(),
                source,
            })?;

        let io_err = |source| CaptureError::Io {
            path: path.clone(),
            source,
        };
        let mut out = File::create(&path).map_err(io_err)?;
        out.write_all(&payload).map_err(io_err)?;
        out.sync_all().map_err(io_err)?;
        Ok(())
    }

    /// Stored exchange for `request` at `address`, by current signature and
    /// then by legacy signature.
    #[must_use]
    pub fn get_record(&self, address: &Address, request: &[u8]) -> Option<&Record> {
        let signatures = self.records.get(address)?;
        let hit = signatures
            .get(&signature(request, self.encoding))
            .or_else(|| signatures.get(&legacy_signature(request, self.encoding)));
        tracing::debug!(%address, hit = hit.is_some(), "capture lookup");
        hit
    }

    /// Stores an exchange and writes the capture file before returning. A
    /// record already keyed by the legacy signature is replaced in place.
    pub fn put_record(
        &mut self,
        address: &Address,
        request: &[u8],
        response: &[u8],
    ) -> Result<(), CaptureError> {
        let legacy = legacy_signature(request, self.encoding);
        let signatures = self.records.entry(address.clone()).or_default();
        let key = if signatures.contains_key(&legacy) {
            legacy
        } else {
            signature(request, self.encoding)
        };
        signatures.insert(
            key,
            Record {
                request: request.to_vec(),
                response: response.to_vec(),
            },
        );
        self.save()?;
        tracing::debug!(%address, bytes = response.len(), "capture persisted");
        Ok(())
    }

    /// Every record stored for `address`, ordered by signature.
    pub fn records(&self, address: &Address) -> impl Iterator<Item = &Record> {
        self.records.get(address).into_iter().flat_map(BTreeMap::values)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use fm_protocol::{Address, TextEncoding};

    use super::{CaptureError, RecordStore, legacy_signature, signature};

    const REQUEST: &[u8] = b"GET / HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n";

    fn address() -> Address {
        Address::new("example.com", 80)
    }

    #[test]
    fn put_persists_immediately_in_hexdump_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = RecordStore::open(dir.path(), "suite", TextEncoding::Utf8).expect("open");
        store
            .put_record(&address(), REQUEST, b"HTTP/1.1 200 OK\r\n\r\n")
            .expect("put");

        let raw = fs::read_to_string(dir.path().join("suite.json")).expect("capture file");
        let sig = signature(REQUEST, TextEncoding::Utf8);
        assert!(raw.starts_with("{\n    \"example.com\": {\n        \"80\": {\n"));
        assert!(raw.contains(&format!("\"{sig}\": {{")));
        assert!(raw.contains("\"response\": \"48 54 54 50 2F 31 2E 31 20 32 30 30 20 4F 4B 0D 0A 0D 0A\""));
        assert!(raw.contains("\"request\": \"GET / HTTP/1.1\\r\\nHost: example.com"));
    }

    #[test]
    fn reopened_store_finds_record_regardless_of_header_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let mut store =
                RecordStore::open(dir.path(), "suite", TextEncoding::Utf8).expect("open");
            store.put_record(&address(), REQUEST, b"pong").expect("put");
        }
        let store = RecordStore::open(dir.path(), "suite", TextEncoding::Utf8).expect("reopen");
        let reordered = b"GET / HTTP/1.1\r\nAccept: */*\r\nHost: example.com\r\n\r\n";
        let record = store.get_record(&address(), reordered).expect("hit");
        assert_eq!(record.response, b"pong");
        assert_eq!(record.request, REQUEST);
        assert!(store.get_record(&Address::new("example.com", 81), REQUEST).is_none());
        assert_eq!(store.records(&address()).count(), 1);
    }

    #[test]
    fn legacy_keys_and_hex_requests_are_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let legacy = legacy_signature(b"PING\r\n", TextEncoding::Utf8);
        let body = format!(
            "{{\"localhost\": {{\"6379\": {{\"{legacy}\": {{\"request\": \"50 49 4E 47 0D 0A\", \"response\": \"2B 50 4F 4E 47 0D 0A\"}}}}}}}}"
        );
        fs::write(dir.path().join("old.json"), body).expect("seed");

        let mut store = RecordStore::open(dir.path(), "old", TextEncoding::Utf8).expect("open");
        let local = Address::new("localhost", 6379);
        let record = store.get_record(&local, b"PING\r\n").expect("legacy hit");
        assert_eq!(record.request, b"PING\r\n");
        assert_eq!(record.response, b"+PONG\r\n");

        store
            .put_record(&local, b"PING\r\n", b"+PONG again\r\n")
            .expect("update");
        assert_eq!(store.len(), 1);
        let raw = fs::read_to_string(store.file()).expect("capture file");
        assert!(raw.contains(&legacy));
    }

    #[test]
    fn request_text_that_looks_like_hex_stays_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let local = Address::new("localhost", 7);
        {
            let mut store =
                RecordStore::open(dir.path(), "echo", TextEncoding::Utf8).expect("open");
            store.put_record(&local, b"CAFE\r\n", b"CAFE\r\n").expect("put");
            store.put_record(&local, b"BEEF", b"ok").expect("put");
        }
        let store = RecordStore::open(dir.path(), "echo", TextEncoding::Utf8).expect("reopen");
        let record = store.get_record(&local, b"CAFE\r\n").expect("hit");
        assert_eq!(record.request, b"CAFE\r\n");
        assert_eq!(record.response, b"CAFE\r\n");
        assert_eq!(store.get_record(&local, b"BEEF").expect("hit").request, b"BEEF");
    }

    #[test]
    fn malformed_records_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("bad.json"),
            r#"{"h": {"x": {"s": {"request": "a", "response": "00"}}, "1": {"s": {"request": "a", "response": "zz"}, "t": {"request": "a", "response": "0A"}}}}"#,
        )
        .expect("seed");
        let store = RecordStore::open(dir.path(), "bad", TextEncoding::Utf8).expect("open");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn open_rejects_missing_directory_and_bad_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope");
        let err = RecordStore::open(&missing, "x", TextEncoding::Utf8).expect_err("missing dir");
        assert!(matches!(err, CaptureError::NotADirectory(_)));

        fs::write(dir.path().join("broken.json"), "{not json").expect("seed");
        let err = RecordStore::open(dir.path(), "broken", TextEncoding::Utf8).expect_err("json");
        assert_eq!(err.reason_code(), "record.malformed_file");
    }

    #[test]
    fn unwritable_file_is_a_capture_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = RecordStore::open(dir.path(), "suite", TextEncoding::Utf8).expect("open");
        // A directory where the capture file should go makes the write fail.
        fs::create_dir(dir.path().join("suite.json")).expect("blocker");
        let err = store
            .put_record(&address(), REQUEST, b"x")
            .expect_err("write fails");
        assert_eq!(err.reason_code(), "record.io");
    }
}
