use std::fmt;

use crate::encoding::TextEncoding;

use super::{CRLF, METHODS, QueryMap, parse_query};

/// The three parts of `METHOD target HTTP/1.x`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: String,
}

impl RequestLine {
    /// Path component of the target, without query or fragment.
    #[must_use]
    pub fn path(&self) -> &str {
        split_target(&self.target).0
    }

    #[must_use]
    pub fn query(&self) -> &str {
        split_target(&self.target).1
    }
}

/// Parses a request line. The method match is case-insensitive and the
/// returned method is upper-cased; only HTTP/1.0 and HTTP/1.1 are accepted.
#[must_use]
pub fn parse_request_line(line: &str) -> Option<RequestLine> {
    let method = METHODS.iter().find(|method| {
        line.len() >= method.len()
            && line.as_bytes()[..method.len()].eq_ignore_ascii_case(method.as_bytes())
    })?;
    let rest = &line[method.len()..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start();

    // The target may itself contain whitespace; the version marker is the
    // last `HTTP/1.x` preceded by whitespace.
    let upper = rest.to_ascii_uppercase();
    let mut search_end = upper.len();
    while let Some(pos) = upper[..search_end].rfind("HTTP/") {
        let version = &rest[pos + 5..];
        let preceded_by_space = rest[..pos].ends_with(char::is_whitespace);
        if preceded_by_space && valid_version(version) {
            let target = rest[..pos].trim_end();
            if target.is_empty() {
                return None;
            }
            return Some(RequestLine {
                method: (*method).to_string(),
                target: target.to_string(),
                version: version[..3].to_string(),
            });
        }
        search_end = pos;
    }
    None
}

fn valid_version(version: &str) -> bool {
    let bytes = version.as_bytes();
    bytes.len() >= 3 && bytes[0] == b'1' && bytes[1] == b'.' && matches!(bytes[2], b'0' | b'1')
}

/// Request line of a payload that contains at least one CRLF. Payloads with
/// no line terminator, or whose first line is not a request line, yield
/// `None` and are treated as continuations by the HTTP matcher.
#[must_use]
pub fn request_line(data: &[u8], encoding: TextEncoding) -> Option<RequestLine> {
    let text = encoding.decode(data);
    let (line, _) = text.split_once("\r\n")?;
    parse_request_line(line)
}

/// Whether the payload starts with an upper-case method token. Anything else
/// arriving on an HTTP entry is more body for the previous request.
#[must_use]
pub fn starts_with_method(data: &[u8]) -> bool {
    METHODS.iter().any(|method| data.starts_with(method.as_bytes()))
}

/// Splits a request target or absolute URI into its raw path and query. The
/// path is not normalised or percent-encoded; an empty path becomes `/`.
#[must_use]
pub fn split_target(target: &str) -> (&str, &str) {
    let target = match target.find("://") {
        Some(scheme_end) => {
            let after_authority = &target[scheme_end + 3..];
            match after_authority.find(['/', '?']) {
                Some(idx) => &after_authority[idx..],
                None => "",
            }
        }
        None => target,
    };
    let target = target.split_once('#').map_or(target, |(head, _)| head);
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    (if path.is_empty() { "/" } else { path }, query)
}

/// Lenient view over the bytes a client wrote for one HTTP request.
///
/// Parsing never fails: a payload without a request line simply has no
/// method, and a truncated body is exposed as far as it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    raw: Vec<u8>,
    encoding: TextEncoding,
    line: Option<RequestLine>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    complete: bool,
}

impl HttpRequest {
    #[must_use]
    pub fn parse(data: &[u8], encoding: TextEncoding) -> Self {
        let mut request = Self {
            raw: data.to_vec(),
            encoding,
            line: None,
            headers: Vec::new(),
            body: Vec::new(),
            complete: false,
        };
        request.reparse();
        request
    }

    /// Appends more bytes of the same request.
    pub fn add_data(&mut self, data: &[u8]) {
        self.raw.extend_from_slice(data);
        self.reparse();
    }

    fn reparse(&mut self) {
        let (head, rest) = match find(&self.raw, b"\r\n\r\n") {
            Some(idx) => (&self.raw[..idx], Some(&self.raw[idx + 4..])),
            None => (&self.raw[..], None),
        };
        let head = self.encoding.decode(head);
        let mut lines = head.split("\r\n");
        self.line = lines.next().and_then(parse_request_line);
        self.headers = lines
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        let Some(rest) = rest else {
            self.body.clear();
            self.complete = false;
            return;
        };
        let chunked = self
            .header("transfer-encoding")
            .is_some_and(|value| value.to_ascii_lowercase().contains("chunked"));
        let content_length = self
            .header("content-length")
            .and_then(|value| value.parse::<usize>().ok());
        let (body, complete) = if chunked {
            decode_chunked(rest)
        } else if let Some(len) = content_length {
            (rest[..len.min(rest.len())].to_vec(), rest.len() >= len)
        } else {
            (rest.to_vec(), true)
        };
        self.body = body;
        self.complete = complete;
    }

    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    #[must_use]
    pub fn request_line(&self) -> Option<&RequestLine> {
        self.line.as_ref()
    }

    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.line.as_ref().map(|line| line.method.as_str())
    }

    /// Full request target, query included.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.line.as_ref().map(|line| line.target.as_str())
    }

    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.line.as_ref().map(RequestLine::path)
    }

    #[must_use]
    pub fn querystring(&self) -> QueryMap {
        self.line
            .as_ref()
            .map(|line| parse_query(line.query()))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First header with the given name, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn body_text(&self) -> String {
        self.encoding.decode(&self.body)
    }

    /// Headers terminated and the declared body fully present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

impl fmt::Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} - {{",
            self.method().unwrap_or("?"),
            self.target().unwrap_or("?")
        )?;
        for (idx, (name, value)) in self.headers.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name:?}: {value:?}")?;
        }
        f.write_str("}")
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn decode_chunked(mut input: &[u8]) -> (Vec<u8>, bool) {
    let mut body = Vec::new();
    loop {
        let Some(line_end) = find(input, CRLF) else {
            return (body, false);
        };
        let size_line = String::from_utf8_lossy(&input[..line_end]);
        let size_field = size_line.split(';').next().unwrap_or("").trim();
        let Ok(size) = usize::from_str_radix(size_field, 16) else {
            return (body, false);
        };
        input = &input[line_end + 2..];
        if size == 0 {
            return (body, true);
        }
        if input.len() < size {
            body.extend_from_slice(input);
            return (body, false);
        }
        body.extend_from_slice(&input[..size]);
        input = &input[size..];
        if input.starts_with(CRLF) {
            input = &input[2..];
        }
    }
}
