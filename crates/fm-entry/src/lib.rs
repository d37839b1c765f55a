#![forbid(unsafe_code)]

//! Registered expectations: an address, a match rule and an ordered list of
//! replies served with a saturating cursor.

mod reply;
mod request;
mod rule;

use std::fmt;
use std::sync::Arc;

use fm_protocol::http::{HttpResponse, QueryMap, request_line, split_target, starts_with_method};
use fm_protocol::resp::{CommandSyntaxError, RespFrame, tokenize_command};
use fm_protocol::{Address, EncodingError, HttpRequest, TextEncoding};

pub use reply::{Reply, ScriptedError};
pub use request::{Request, RequestHistory, RespRequest};
pub use rule::{HttpMatcher, HttpRule, RespRule, Rule};

pub const DEFAULT_RESP_HOST: &str = "localhost";
pub const DEFAULT_RESP_PORT: u16 = 6379;

#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("invalid uri `{uri}`: {source}")]
    InvalidUri {
        uri: String,
        source: url::ParseError,
    },
    #[error("uri `{0}` has no host")]
    MissingHost(String),
    #[error(transparent)]
    Command(#[from] CommandSyntaxError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

impl EntryError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidUri { .. } => "entry.invalid_uri",
            Self::MissingHost(_) => "entry.missing_host",
            Self::Command(_) => "entry.command_syntax",
            Self::Encoding(_) => "entry.unencodable_reply",
        }
    }
}

/// Outcome of offering a payload to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    Miss,
    /// A fresh request this entry answers.
    Request,
    /// More bytes of the request this entry matched last.
    Continuation,
}

impl Match {
    #[must_use]
    pub fn is_hit(self) -> bool {
        !matches!(self, Self::Miss)
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    address: Address,
    rule: Rule,
    replies: Vec<Reply>,
    cursor: usize,
    served: bool,
    encoding: TextEncoding,
    sent: Vec<u8>,
}

impl Entry {
    fn with_rule(address: Address, rule: Rule, replies: Vec<Reply>) -> Self {
        let mut replies = replies;
        if replies.is_empty() {
            replies.push(match &rule {
                Rule::Any => Reply::Bytes(Vec::new()),
                Rule::Http(_) => Reply::Text(String::new()),
                Rule::Resp(_) => Reply::Resp(RespFrame::ok()),
            });
        }
        Self {
            address,
            rule,
            replies,
            cursor: 0,
            served: false,
            encoding: TextEncoding::default(),
            sent: Vec::new(),
        }
    }

    /// An entry answering every payload sent to `address`.
    #[must_use]
    pub fn bytes(address: impl Into<Address>, replies: Vec<Reply>) -> Self {
        Self::with_rule(address.into(), Rule::Any, replies)
    }

    /// An HTTP entry for `method` on `uri`. The port defaults to 443 for
    /// `https` and 80 otherwise.
    ///
    /// The path is taken from `uri` as written, so `/a/../b` only matches a
    /// request line carrying that exact path. IPv6 hosts lose
    /// their brackets: `http://[::1]:8080/` listens on host `::1`, port 8080.
    pub fn http(method: &str, uri: &str, replies: Vec<Reply>) -> Result<Self, EntryError> {
        let url = url::Url::parse(uri).map_err(|source| EntryError::InvalidUri {
            uri: uri.to_string(),
            source,
        })?;
        let host = match url.host() {
            Some(url::Host::Domain(domain)) => domain.to_string(),
            Some(url::Host::Ipv4(ip)) => ip.to_string(),
            Some(url::Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(EntryError::MissingHost(uri.to_string())),
        };
        let port = url
            .port()
            .unwrap_or(if url.scheme() == "https" { 443 } else { 80 });
        let (path, query) = split_target(uri.trim());
        let rule = HttpRule::new(method, url.scheme(), path, query);
        Ok(Self::with_rule(
            Address::new(host, port),
            Rule::Http(rule),
            replies,
        ))
    }

    /// A RESP entry for a shell-quoted command such as `SET key "a b"`.
    /// Without an address it listens on `localhost:6379`.
    pub fn resp(
        address: Option<Address>,
        command: &str,
        replies: Vec<Reply>,
    ) -> Result<Self, EntryError> {
        let argv = tokenize_command(command, TextEncoding::default())?;
        let address =
            address.unwrap_or_else(|| Address::new(DEFAULT_RESP_HOST, DEFAULT_RESP_PORT));
        Ok(Self::with_rule(
            address,
            Rule::Resp(RespRule::new(argv)),
            replies,
        ))
    }

    /// Sets the encoding for text replies and request decoding, failing if
    /// a text reply cannot be represented in it.
    pub fn with_encoding(mut self, encoding: TextEncoding) -> Result<Self, EntryError> {
        for reply in &self.replies {
            if let Reply::Text(text) = reply {
                encoding.encode(text)?;
            }
        }
        if let Rule::Resp(rule) = &self.rule {
            // argv was tokenized as UTF-8.
            let rendered: Vec<String> = rule
                .argv()
                .iter()
                .map(|arg| String::from_utf8_lossy(arg).into_owned())
                .collect();
            let reencoded = rendered
                .iter()
                .map(|arg| encoding.encode(arg))
                .collect::<Result<Vec<_>, _>>()?;
            self.rule = Rule::Resp(RespRule::new(reencoded));
        }
        self.encoding = encoding;
        Ok(self)
    }

    /// Toggles query comparison on HTTP entries; no effect on others.
    #[must_use]
    pub fn match_querystring(mut self, enabled: bool) -> Self {
        if let Rule::Http(rule) = &mut self.rule {
            rule.set_match_querystring(enabled);
        }
        self
    }

    /// Installs a custom `(path, query)` predicate on an HTTP entry.
    #[must_use]
    pub fn with_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&str, &QueryMap) -> bool + Send + Sync + 'static,
    {
        if let Rule::Http(rule) = &mut self.rule {
            rule.set_matcher(Arc::new(matcher));
        }
        self
    }

    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    #[must_use]
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    #[must_use]
    pub fn replies(&self) -> &[Reply] {
        &self.replies
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn is_served(&self) -> bool {
        self.served
    }

    #[must_use]
    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// `is_last_matched` tells an HTTP entry whether it was the most recent
    /// entry to match a request; only then does it claim payloads that carry
    /// no request line.
    #[must_use]
    pub fn can_handle(&self, data: &[u8], is_last_matched: bool) -> Match {
        match &self.rule {
            Rule::Any => Match::Request,
            Rule::Http(rule) => match request_line(data, self.encoding) {
                None if is_last_matched => Match::Continuation,
                None => Match::Miss,
                Some(line) => {
                    let query = fm_protocol::http::parse_query(line.query());
                    if rule.accepts(&line.method, line.path(), &query) {
                        Match::Request
                    } else {
                        Match::Miss
                    }
                }
            },
            Rule::Resp(rule) => {
                if rule.accepts(data) {
                    Match::Request
                } else {
                    Match::Miss
                }
            }
        }
    }

    /// Records `data` in `history`. Returns whether a reply should be served
    /// now; HTTP body continuations extend the previous request instead.
    pub fn collect(&mut self, data: &[u8], history: &mut RequestHistory) -> bool {
        match &self.rule {
            Rule::Any => {
                history.push(Request::Bytes(data.to_vec()));
                true
            }
            Rule::Resp(_) => {
                history.push(Request::Resp(RespRequest::parse(data)));
                true
            }
            Rule::Http(_) => {
                let fresh = starts_with_method(data);
                if fresh {
                    self.sent = data.to_vec();
                } else {
                    history.remove_last();
                    self.sent.extend_from_slice(data);
                    tracing::trace!(
                        address = %self.address,
                        appended = data.len(),
                        total = self.sent.len(),
                        "http body continuation"
                    );
                }
                history.push(Request::Http(HttpRequest::parse(&self.sent, self.encoding)));
                fresh
            }
        }
    }

    /// Serves the reply under the cursor, then advances it, saturating at
    /// the last reply. A scripted error is returned as `Err`.
    pub fn get_response(&mut self) -> Result<Vec<u8>, ScriptedError> {
        let idx = self.cursor.min(self.replies.len().saturating_sub(1));
        self.served = true;
        self.cursor = (idx + 1).min(self.replies.len().saturating_sub(1));
        match &self.replies[idx] {
            Reply::Error(err) => Err(err.clone()),
            reply => Ok(self.render(reply)),
        }
    }

    fn render(&self, reply: &Reply) -> Vec<u8> {
        match (reply, &self.rule) {
            (Reply::Http(response), _) => response.to_bytes(),
            (Reply::Resp(frame), _) => frame.to_bytes(),
            (Reply::Text(text), Rule::Any) => self.encode_text(text),
            (Reply::Bytes(bytes), Rule::Any) => bytes.clone(),
            (Reply::Text(text), Rule::Http(_)) => HttpResponse::builder(200)
                .encoding(self.encoding)
                .body_text(text.as_str())
                .build()
                .unwrap_or_else(|_| HttpResponse::text(200, text))
                .to_bytes(),
            (Reply::Bytes(bytes), Rule::Http(_)) => HttpResponse::builder(200)
                .encoding(self.encoding)
                .body_bytes(bytes.clone())
                .build()
                .unwrap_or_else(|_| HttpResponse::text(200, ""))
                .to_bytes(),
            (Reply::Text(text), Rule::Resp(_)) => RespFrame::bulk(self.encode_text(text)).to_bytes(),
            (Reply::Bytes(bytes), Rule::Resp(_)) => RespFrame::bulk(bytes.clone()).to_bytes(),
            (Reply::Error(_), _) => Vec::new(),
        }
    }

    // Text replies were validated against the encoding in `with_encoding`.
    fn encode_text(&self, text: &str) -> Vec<u8> {
        self.encoding
            .encode(text)
            .unwrap_or_else(|_| text.as_bytes().to_vec())
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rule {
            Rule::Any => write!(f, "Entry(address={})", self.address),
            Rule::Http(rule) => write!(
                f,
                "HttpEntry(method={:?}, scheme={:?}, location={}, path={:?}, query={:?})",
                rule.method(),
                rule.scheme(),
                self.address,
                rule.path(),
                rule.query()
            ),
            Rule::Resp(rule) => {
                let argv: Vec<String> = rule
                    .argv()
                    .iter()
                    .map(|arg| String::from_utf8_lossy(arg).into_owned())
                    .collect();
                write!(f, "RespEntry(address={}, command={argv:?})", self.address)
            }
        }
    }
}
