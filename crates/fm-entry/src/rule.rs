use std::fmt;
use std::sync::Arc;

use fm_protocol::http::{QueryMap, parse_query};

/// Custom HTTP predicate over `(path, query)`; replaces the default
/// path/query comparison when set.
pub type HttpMatcher = Arc<dyn Fn(&str, &QueryMap) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct HttpRule {
    method: String,
    scheme: String,
    path: String,
    query: String,
    expected_query: QueryMap,
    match_querystring: bool,
    matcher: Option<HttpMatcher>,
}

impl HttpRule {
    pub(crate) fn new(method: &str, scheme: &str, path: &str, query: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            scheme: scheme.to_string(),
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            query: query.to_string(),
            expected_query: parse_query(query),
            match_querystring: true,
            matcher: None,
        }
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[must_use]
    pub fn match_querystring(&self) -> bool {
        self.match_querystring
    }

    pub(crate) fn set_match_querystring(&mut self, enabled: bool) {
        self.match_querystring = enabled;
    }

    pub(crate) fn set_matcher(&mut self, matcher: HttpMatcher) {
        self.matcher = Some(matcher);
    }

    pub(crate) fn accepts(&self, method: &str, path: &str, query: &QueryMap) -> bool {
        if method != self.method {
            return false;
        }
        match &self.matcher {
            Some(matcher) => matcher(path, query),
            None => {
                path == self.path && (!self.match_querystring || *query == self.expected_query)
            }
        }
    }
}

impl fmt::Debug for HttpRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRule")
            .field("method", &self.method)
            .field("scheme", &self.scheme)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("match_querystring", &self.match_querystring)
            .field("custom_matcher", &self.matcher.is_some())
            .finish()
    }
}

/// Expected wire lines of one RESP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RespRule {
    argv: Vec<Vec<u8>>,
    lines: Vec<Vec<u8>>,
}

impl RespRule {
    pub(crate) fn new(argv: Vec<Vec<u8>>) -> Self {
        let lines = fm_protocol::resp::command_lines(&argv);
        Self { argv, lines }
    }

    #[must_use]
    pub fn argv(&self) -> &[Vec<u8>] {
        &self.argv
    }

    pub(crate) fn accepts(&self, data: &[u8]) -> bool {
        let lines = fm_protocol::resp::split_lines(data);
        lines.len() == self.lines.len()
            && lines
                .iter()
                .zip(&self.lines)
                .all(|(seen, expected)| *seen == expected.as_slice())
    }
}

#[derive(Debug, Clone)]
pub enum Rule {
    /// Matches every payload sent to the entry's address.
    Any,
    Http(HttpRule),
    Resp(RespRule),
}
