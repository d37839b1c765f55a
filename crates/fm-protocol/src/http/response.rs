use std::io::{self, Read};

use chrono::Utc;

use crate::encoding::{EncodingError, TextEncoding};
use crate::sniff::sniff_content_type;

use super::reason_phrase;

const SERVER: &str = "frankenmock";
const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Where a response body came from. Text is encoded with the builder's
/// encoding; stream bodies are read once and get a sniffed content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Text(String),
    Bytes(Vec<u8>),
    Stream(Vec<u8>),
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// A fully serialized HTTP/1.1 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    head: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn builder(status: u16) -> HttpResponseBuilder {
        HttpResponseBuilder::new(status)
    }

    /// UTF-8 text response with the default headers.
    #[must_use]
    pub fn text(status: u16, body: &str) -> Self {
        let builder = Self::builder(status).body_text(body);
        // UTF-8 represents every string.
        builder
            .build()
            .unwrap_or_else(|_| Self::assemble(status, Vec::new(), body.as_bytes().to_vec()))
    }

    fn assemble(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        let head = render_head(status, &headers);
        Self {
            status,
            headers,
            body,
            head: head.into_bytes(),
        }
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Headers in emission order, with their normalized names.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

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
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.head.len() + self.body.len());
        out.extend_from_slice(&self.head);
        out.extend_from_slice(&self.body);
        out
    }
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::text(200, "")
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponseBuilder {
    status: u16,
    body: ResponseBody,
    extra_headers: Vec<(String, String)>,
    encoding: TextEncoding,
    date: Option<String>,
}

impl HttpResponseBuilder {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            body: ResponseBody::default(),
            extra_headers: Vec::new(),
            encoding: TextEncoding::default(),
            date: None,
        }
    }

    #[must_use]
    pub fn body_text(mut self, body: impl Into<String>) -> Self {
        self.body = ResponseBody::Text(body.into());
        self
    }

    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = ResponseBody::Bytes(body.into());
        self
    }

    /// Drains `reader` now; the bytes are served unchanged on every use.
    pub fn body_reader<R: Read>(mut self, mut reader: R) -> io::Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        self.body = ResponseBody::Stream(bytes);
        Ok(self)
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.to_string(), value.into()));
        self
    }

    #[must_use]
    pub fn encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Pins the `Date` header instead of stamping the build time.
    #[must_use]
    pub fn date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn build(self) -> Result<HttpResponse, EncodingError> {
        let text_content_type = self.text_content_type();
        let (body, content_type) = match self.body {
            ResponseBody::Text(text) => (self.encoding.encode(&text)?, text_content_type),
            ResponseBody::Bytes(bytes) => (bytes, text_content_type),
            ResponseBody::Stream(bytes) => {
                let sniffed = sniff_content_type(&bytes).to_string();
                (bytes, sniffed)
            }
        };
        let date = self
            .date
            .unwrap_or_else(|| Utc::now().format(DATE_FORMAT).to_string());

        let mut headers = vec![
            ("Status".to_string(), self.status.to_string()),
            ("Date".to_string(), date),
            ("Server".to_string(), SERVER.to_string()),
            ("Connection".to_string(), "close".to_string()),
            ("Content-Length".to_string(), body.len().to_string()),
            ("Content-Type".to_string(), content_type),
        ];
        for (name, value) in self.extra_headers {
            let name = normalize_header_name(&name);
            match headers.iter_mut().find(|(key, _)| *key == name) {
                Some(slot) => slot.1 = value,
                None => headers.push((name, value)),
            }
        }

        let head = self.encoding.encode(&render_head(self.status, &headers))?;
        Ok(HttpResponse {
            status: self.status,
            headers,
            body,
            head,
        })
    }

    fn text_content_type(&self) -> String {
        format!("text/plain; charset={}", self.encoding.label())
    }
}

/// `content-type` and `CONTENT-TYPE` both become `Content-Type`.
#[must_use]
pub fn normalize_header_name(name: &str) -> String {
    name.split('-').map(capitalize).collect::<Vec<_>>().join("-")
}

fn capitalize(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

// Header names go out with only the first letter upper-cased
// (`Content-length`); stored captures depend on these exact bytes.
fn render_head(status: u16, headers: &[(String, String)]) -> String {
    let mut head = format!("HTTP/1.1 {status} {}\r\n", reason_phrase(status).unwrap_or(""));
    for (name, value) in headers {
        head.push_str(&capitalize(name));
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    head
}
