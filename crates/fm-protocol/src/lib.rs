#![forbid(unsafe_code)]

//! Wire-level building blocks: endpoint addresses, text encodings, hex
//! dumps, and the HTTP and RESP codecs used to match and answer traffic.

mod address;
mod encoding;
mod hexdump;
pub mod http;
pub mod resp;
mod sniff;

pub use address::{Address, AddressParseError};
pub use encoding::{EncodingError, TextEncoding};
pub use hexdump::{HexLoadError, hexdump, hexload, is_hexdump};
pub use http::{HttpRequest, HttpResponse, QueryMap};
pub use resp::{ParsedFrame, RespFrame, RespParseError, parse_frame};
pub use sniff::sniff_content_type;
