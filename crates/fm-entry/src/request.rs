use fm_protocol::resp::frame_to_argv;
use fm_protocol::{HttpRequest, parse_frame};

/// A RESP command as written by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RespRequest {
    raw: Vec<u8>,
    argv: Option<Vec<Vec<u8>>>,
}

impl RespRequest {
    #[must_use]
    pub fn parse(data: &[u8]) -> Self {
        let argv = parse_frame(data)
            .ok()
            .and_then(|parsed| frame_to_argv(&parsed.frame));
        Self {
            raw: data.to_vec(),
            argv,
        }
    }

    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Arguments of a well-formed command frame, name first.
    #[must_use]
    pub fn argv(&self) -> Option<&[Vec<u8>]> {
        self.argv.as_deref()
    }

    #[must_use]
    pub fn command_name(&self) -> Option<String> {
        self.argv
            .as_ref()
            .and_then(|argv| argv.first())
            .map(|name| String::from_utf8_lossy(name).to_ascii_uppercase())
    }
}

/// A request as seen by the entry that collected it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Bytes(Vec<u8>),
    Http(HttpRequest),
    Resp(RespRequest),
}

impl Request {
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        match self {
            Self::Bytes(bytes) => bytes,
            Self::Http(request) => request.raw(),
            Self::Resp(request) => request.raw(),
        }
    }

    #[must_use]
    pub fn as_http(&self) -> Option<&HttpRequest> {
        match self {
            Self::Http(request) => Some(request),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_resp(&self) -> Option<&RespRequest> {
        match self {
            Self::Resp(request) => Some(request),
            _ => None,
        }
    }
}

impl PartialEq<[u8]> for Request {
    fn eq(&self, other: &[u8]) -> bool {
        self.raw() == other
    }
}

/// Every collected request of a scope, in collection order.
#[derive(Debug, Clone, Default)]
pub struct RequestHistory {
    requests: Vec<Request>,
}

impl RequestHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: Request) {
        self.requests.push(request);
    }

    pub fn remove_last(&mut self) -> Option<Request> {
        self.requests.pop()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Request> {
        self.requests.last()
    }

    #[must_use]
    pub fn all(&self) -> &[Request] {
        &self.requests
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }
}
