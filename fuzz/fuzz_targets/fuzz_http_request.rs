//! Feeds an HTTP request to the parser in arbitrary pieces. Incremental
//! parsing must agree with parsing the whole payload at once.

#![no_main]

use arbitrary::Arbitrary;
use fm_protocol::http::{HttpRequest, parse_query, request_line};
use fm_protocol::TextEncoding;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    head: Vec<u8>,
    continuations: Vec<Vec<u8>>,
    latin1: bool,
}

fuzz_target!(|input: Input| {
    let encoding = if input.latin1 {
        TextEncoding::Latin1
    } else {
        TextEncoding::Utf8
    };

    if let Some(line) = request_line(&input.head, encoding) {
        let _ = parse_query(line.query());
        assert!(!line.path().is_empty());
    }

    let mut incremental = HttpRequest::parse(&input.head, encoding);
    let mut whole = input.head.clone();
    for chunk in &input.continuations {
        incremental.add_data(chunk);
        whole.extend_from_slice(chunk);
    }
    let oneshot = HttpRequest::parse(&whole, encoding);
    assert_eq!(incremental.body(), oneshot.body());
    assert_eq!(incremental.is_complete(), oneshot.is_complete());
    let _ = incremental.to_string();
});
