use std::fmt;
use std::str::FromStr;

/// Text encoding used for string bodies, request decoding and signatures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Latin1,
    Ascii,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    #[error("unknown text encoding `{0}`")]
    UnknownLabel(String),
    #[error("character {ch:?} cannot be encoded as {encoding}")]
    Unrepresentable { encoding: TextEncoding, ch: char },
}

impl TextEncoding {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Latin1 => "iso-8859-1",
            Self::Ascii => "ascii",
        }
    }

    pub fn encode(self, text: &str) -> Result<Vec<u8>, EncodingError> {
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::Latin1 | Self::Ascii => {
                let limit = if self == Self::Latin1 { 0xFF } else { 0x7F };
                text.chars()
                    .map(|ch| {
                        let code = u32::from(ch);
                        if code <= limit {
                            Ok(code as u8)
                        } else {
                            Err(EncodingError::Unrepresentable { encoding: self, ch })
                        }
                    })
                    .collect()
            }
        }
    }

    /// Decodes `bytes`, silently dropping anything that does not decode.
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => bytes.utf8_chunks().map(|chunk| chunk.valid()).collect(),
            Self::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Self::Ascii => bytes
                .iter()
                .filter(|b| b.is_ascii())
                .map(|&b| char::from(b))
                .collect(),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TextEncoding {
    type Err = EncodingError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "iso-8859-1" | "latin-1" | "latin1" => Ok(Self::Latin1),
            "ascii" | "us-ascii" => Ok(Self::Ascii),
            _ => Err(EncodingError::UnknownLabel(raw.to_string())),
        }
    }
}
