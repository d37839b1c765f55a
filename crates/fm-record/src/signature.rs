use md5::{Digest, Md5};
use xxhash_rust::xxh32::xxh32;

use fm_protocol::TextEncoding;

/// Decodes the request, sorts its CRLF-separated lines and joins them with
/// nothing in between, so header order does not change the signature.
#[must_use]
pub fn canonicalize(request: &[u8], encoding: TextEncoding) -> Vec<u8> {
    let text = encoding.decode(request);
    let mut lines: Vec<&str> = text.split("\r\n").collect();
    lines.sort_unstable();
    let joined = lines.concat();
    // Decoded text always re-encodes in the encoding it came from.
    encoding
        .encode(&joined)
        .unwrap_or_else(|_| joined.into_bytes())
}

/// xxh32 (seed 0) of the canonical request as eight lower-case hex digits.
#[must_use]
pub fn signature(request: &[u8], encoding: TextEncoding) -> String {
    format!("{:08x}", xxh32(&canonicalize(request, encoding), 0))
}

/// MD5 of the canonical request, the key used by older capture files.
#[must_use]
pub fn legacy_signature(request: &[u8], encoding: TextEncoding) -> String {
    let mut hasher = Md5::new();
    hasher.update(canonicalize(request, encoding));
    format!("{:x}", hasher.finalize())
}
