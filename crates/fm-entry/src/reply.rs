use std::io;

use fm_protocol::{HttpResponse, RespFrame};

/// A failure scripted into an entry's reply list. It is handed back from
/// `get_response` in place of bytes and leaves the entry matchable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ScriptedError {
    kind: io::ErrorKind,
    message: String,
}

impl ScriptedError {
    #[must_use]
    pub fn new(kind: io::ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> io::ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&io::Error> for ScriptedError {
    fn from(err: &io::Error) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<ScriptedError> for io::Error {
    fn from(err: ScriptedError) -> Self {
        io::Error::new(err.kind, err.message)
    }
}

/// One slot of an entry's reply list.
///
/// `Text` and `Bytes` are shaped by the entry's protocol when served: raw on
/// byte entries, a `200` body on HTTP entries, a bulk string on RESP entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Bytes(Vec<u8>),
    Http(HttpResponse),
    Resp(RespFrame),
    Error(ScriptedError),
}

impl Reply {
    #[must_use]
    pub fn error(kind: io::ErrorKind, message: impl Into<String>) -> Self {
        Self::Error(ScriptedError::new(kind, message))
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Reply {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for Reply {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Reply {
    fn from(bytes: &[u8; N]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<i64> for Reply {
    fn from(n: i64) -> Self {
        Self::Resp(RespFrame::Integer(n))
    }
}

impl From<HttpResponse> for Reply {
    fn from(response: HttpResponse) -> Self {
        Self::Http(response)
    }
}

impl From<RespFrame> for Reply {
    fn from(frame: RespFrame) -> Self {
        Self::Resp(frame)
    }
}

impl From<ScriptedError> for Reply {
    fn from(err: ScriptedError) -> Self {
        Self::Error(err)
    }
}

impl From<io::Error> for Reply {
    fn from(err: io::Error) -> Self {
        Self::Error(ScriptedError::from(&err))
    }
}
