//! HTTP/1.x views: an incremental, lenient request parser and a response
//! serializer with a fixed header layout.

mod request;
mod response;
mod status;

use std::collections::BTreeMap;

pub use request::{
    HttpRequest, RequestLine, parse_request_line, request_line, split_target, starts_with_method,
};
pub use response::{HttpResponse, HttpResponseBuilder, ResponseBody, normalize_header_name};
pub use status::reason_phrase;

pub const METHODS: [&str; 9] = [
    "CONNECT", "DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT", "TRACE",
];

const CRLF: &[u8] = b"\r\n";

/// Query parameters by name; values keep their order of appearance and blank
/// values are preserved.
pub type QueryMap = BTreeMap<String, Vec<String>>;

#[must_use]
pub fn parse_query(query: &str) -> QueryMap {
    let mut map = QueryMap::new();
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        map.entry(name.into_owned()).or_default().push(value.into_owned());
    }
    map
}
