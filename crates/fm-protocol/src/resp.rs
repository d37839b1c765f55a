//! RESP2 frames: the length-prefixed key-value wire protocol.

use crate::encoding::{EncodingError, TextEncoding};

const CRLF: &[u8] = b"\r\n";
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
const MAX_NESTING: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Option<Vec<u8>>),
    Array(Option<Vec<RespFrame>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub frame: RespFrame,
    pub consumed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RespParseError {
    #[error("incomplete frame")]
    Incomplete,
    #[error("invalid RESP type prefix {:?}", prefix_char(.0))]
    InvalidPrefix(u8),
    #[error("unsupported RESP3 type prefix {:?}", prefix_char(.0))]
    UnsupportedResp3Type(u8),
    #[error("invalid integer payload")]
    InvalidInteger,
    #[error("invalid bulk length")]
    InvalidBulkLength,
    #[error("invalid multibulk length")]
    InvalidMultibulkLength,
    #[error("invalid UTF-8 payload")]
    InvalidUtf8,
    #[error("arrays nested too deeply")]
    NestingTooDeep,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandSyntaxError {
    #[error("command is empty")]
    Empty,
    #[error("unbalanced quoting in command `{0}`")]
    Unbalanced(String),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

fn prefix_char(byte: &u8) -> char {
    char::from(*byte)
}

impl RespFrame {
    #[must_use]
    pub fn ok() -> Self {
        Self::SimpleString("OK".to_string())
    }

    #[must_use]
    pub fn queued() -> Self {
        Self::SimpleString("QUEUED".to_string())
    }

    #[must_use]
    pub fn error(description: impl Into<String>) -> Self {
        Self::Error(description.into())
    }

    #[must_use]
    pub fn bulk(bytes: impl Into<Vec<u8>>) -> Self {
        Self::BulkString(Some(bytes.into()))
    }

    #[must_use]
    pub fn bulk_array<I, B>(items: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        Self::Array(Some(items.into_iter().map(Self::bulk).collect()))
    }

    /// Flattens `(field, value)` pairs into one array, the way hash replies
    /// are laid out on the wire.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        let mut items = Vec::new();
        for (field, value) in pairs {
            items.push(Self::bulk(field));
            items.push(Self::bulk(value));
        }
        Self::Array(Some(items))
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::SimpleString(text) => push_line(out, b'+', text.as_bytes()),
            Self::Error(text) => push_line(out, b'-', text.as_bytes()),
            Self::Integer(n) => push_line(out, b':', n.to_string().as_bytes()),
            Self::BulkString(None) => push_line(out, b'$', b"-1"),
            Self::BulkString(Some(bytes)) => {
                push_line(out, b'$', bytes.len().to_string().as_bytes());
                out.extend_from_slice(bytes);
                out.extend_from_slice(CRLF);
            }
            Self::Array(None) => push_line(out, b'*', b"-1"),
            Self::Array(Some(items)) => {
                push_line(out, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }
}

impl From<i64> for RespFrame {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for RespFrame {
    fn from(value: &str) -> Self {
        Self::bulk(value.as_bytes())
    }
}

impl From<Vec<u8>> for RespFrame {
    fn from(value: Vec<u8>) -> Self {
        Self::bulk(value)
    }
}

fn push_line(out: &mut Vec<u8>, prefix: u8, payload: &[u8]) {
    out.push(prefix);
    out.extend_from_slice(payload);
    out.extend_from_slice(CRLF);
}

pub fn parse_frame(input: &[u8]) -> Result<ParsedFrame, RespParseError> {
    let (frame, consumed) = parse_at(input, 0, 0)?;
    Ok(ParsedFrame { frame, consumed })
}

fn parse_at(input: &[u8], start: usize, depth: usize) -> Result<(RespFrame, usize), RespParseError> {
    if depth > MAX_NESTING {
        return Err(RespParseError::NestingTooDeep);
    }
    let prefix = *input.get(start).ok_or(RespParseError::Incomplete)?;
    let line_end = find_crlf(input, start + 1).ok_or(RespParseError::Incomplete)?;
    let line = &input[start + 1..line_end];
    let next = line_end + CRLF.len();

    match prefix {
        b'+' => Ok((RespFrame::SimpleString(utf8(line)?), next)),
        b'-' => Ok((RespFrame::Error(utf8(line)?), next)),
        b':' => Ok((RespFrame::Integer(parse_i64(line)?), next)),
        b'$' => {
            let len = parse_i64(line).map_err(|_| RespParseError::InvalidBulkLength)?;
            if len == -1 {
                return Ok((RespFrame::BulkString(None), next));
            }
            if !(0..=MAX_BULK_LEN).contains(&len) {
                return Err(RespParseError::InvalidBulkLength);
            }
            let end = next + len as usize;
            if input.len() < end + CRLF.len() {
                return Err(RespParseError::Incomplete);
            }
            if &input[end..end + CRLF.len()] != CRLF {
                return Err(RespParseError::InvalidBulkLength);
            }
            Ok((RespFrame::BulkString(Some(input[next..end].to_vec())), end + CRLF.len()))
        }
        b'*' => {
            let len = parse_i64(line).map_err(|_| RespParseError::InvalidMultibulkLength)?;
            if len == -1 {
                return Ok((RespFrame::Array(None), next));
            }
            if len < 0 {
                return Err(RespParseError::InvalidMultibulkLength);
            }
            let mut items = Vec::with_capacity((len as usize).min(1024));
            let mut cursor = next;
            for _ in 0..len {
                let (item, after) = parse_at(input, cursor, depth + 1)?;
                items.push(item);
                cursor = after;
            }
            Ok((RespFrame::Array(Some(items)), cursor))
        }
        b'_' | b',' | b'#' | b'%' | b'~' | b'>' | b'(' | b'=' | b'!' | b'|' => {
            Err(RespParseError::UnsupportedResp3Type(prefix))
        }
        other => Err(RespParseError::InvalidPrefix(other)),
    }
}

fn find_crlf(input: &[u8], from: usize) -> Option<usize> {
    input
        .get(from..)?
        .windows(CRLF.len())
        .position(|window| window == CRLF)
        .map(|offset| from + offset)
}

fn utf8(bytes: &[u8]) -> Result<String, RespParseError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| RespParseError::InvalidUtf8)
}

fn parse_i64(bytes: &[u8]) -> Result<i64, RespParseError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or(RespParseError::InvalidInteger)
}

/// Extracts the argument vector of a command frame (an array of strings).
#[must_use]
pub fn frame_to_argv(frame: &RespFrame) -> Option<Vec<Vec<u8>>> {
    let RespFrame::Array(Some(items)) = frame else {
        return None;
    };
    let mut argv = Vec::with_capacity(items.len());
    for item in items {
        match item {
            RespFrame::BulkString(Some(bytes)) => argv.push(bytes.clone()),
            RespFrame::SimpleString(text) => argv.push(text.as_bytes().to_vec()),
            RespFrame::Integer(n) => argv.push(n.to_string().into_bytes()),
            _ => return None,
        }
    }
    if argv.is_empty() {
        return None;
    }
    Some(argv)
}

/// Splits a shell-quoted command (`SET key "two words"`) into arguments and
/// upper-cases the command name.
pub fn tokenize_command(
    command: &str,
    encoding: TextEncoding,
) -> Result<Vec<Vec<u8>>, CommandSyntaxError> {
    let words =
        shlex::split(command).ok_or_else(|| CommandSyntaxError::Unbalanced(command.to_string()))?;
    let mut words = words.into_iter();
    let name = words.next().ok_or(CommandSyntaxError::Empty)?;
    let mut argv = vec![encoding.encode(&name.to_uppercase())?];
    for word in words {
        argv.push(encoding.encode(&word)?);
    }
    Ok(argv)
}

/// The wire lines of a command, without line terminators:
/// `["*3", "$3", "SET", "$1", "k", "$1", "v"]`.
#[must_use]
pub fn command_lines(argv: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let mut lines = Vec::with_capacity(1 + argv.len() * 2);
    lines.push(format!("*{}", argv.len()).into_bytes());
    for arg in argv {
        lines.push(format!("${}", arg.len()).into_bytes());
        lines.push(arg.clone());
    }
    lines
}

/// Splits on `\r\n`, `\r` or `\n`; a trailing terminator does not produce an
/// empty final line.
#[must_use]
pub fn split_lines(bytes: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'\r' => {
                lines.push(&bytes[start..idx]);
                idx += if bytes.get(idx + 1) == Some(&b'\n') { 2 } else { 1 };
                start = idx;
            }
            b'\n' => {
                lines.push(&bytes[start..idx]);
                idx += 1;
                start = idx;
            }
            _ => idx += 1,
        }
    }
    if start < bytes.len() {
        lines.push(&bytes[start..]);
    }
    lines
}
