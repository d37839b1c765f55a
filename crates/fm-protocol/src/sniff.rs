//! Content-type inference for stream bodies, keyed on leading magic bytes.

const OCTET_STREAM: &str = "application/octet-stream";

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b", "application/gzip"),
    (b"BZh", "application/x-bzip2"),
    (b"\xfd7zXZ\x00", "application/x-xz"),
    (b"7z\xbc\xaf\x27\x1c", "application/x-7z-compressed"),
    (b"\x00asm", "application/wasm"),
    (b"OggS", "audio/ogg"),
    (b"ID3", "audio/mpeg"),
    (b"fLaC", "audio/flac"),
    (b"\x1a\x45\xdf\xa3", "video/webm"),
    (b"wOFF", "font/woff"),
    (b"wOF2", "font/woff2"),
    (b"<?xml", "application/xml"),
];

/// Best-effort MIME type for `body`, falling back to
/// `application/octet-stream`.
#[must_use]
pub fn sniff_content_type(body: &[u8]) -> &'static str {
    if let Some((_, mime)) = SIGNATURES.iter().find(|(magic, _)| body.starts_with(magic)) {
        return *mime;
    }
    if body.len() >= 12 && &body[..4] == b"RIFF" {
        match &body[8..12] {
            b"WEBP" => return "image/webp",
            b"WAVE" => return "audio/wav",
            _ => {}
        }
    }
    if body.len() >= 12 && &body[4..8] == b"ftyp" {
        return "video/mp4";
    }
    let head = body.trim_ascii_start();
    if (head.len() >= 5 && head[..5].eq_ignore_ascii_case(b"<html"))
        || (head.len() >= 9 && head[..9].eq_ignore_ascii_case(b"<!doctype"))
    {
        return "text/html";
    }
    OCTET_STREAM
}
