//! Frame delimiters.
//!
//! Delimiters are configured either as text with C-style escapes
//! (`"\n"`, `"\r\n"`, `"\x02"`) or as hexadecimal byte strings
//! (`"0D 0A"`, `"2f2a"`).

use crate::error::WireError;
use smallvec::SmallVec;
use std::fmt;

/// Non-empty byte sequence marking a frame boundary
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Delimiter(SmallVec<[u8; 8]>);

impl Delimiter {
    /// Create a delimiter from raw bytes
    pub fn new(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.is_empty() {
            return Err(WireError::InvalidDelimiter(String::new()));
        }
        Ok(Self(SmallVec::from_slice(bytes)))
    }

    /// Parse a delimiter from text, honouring `\n \r \t \0 \\ \xNN` escapes
    pub fn from_text(text: &str) -> Result<Self, WireError> {
        let mut out = SmallVec::<[u8; 8]>::new();
        let mut chars = text.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '\\' {
                let mut utf8 = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
                continue;
            }

            match chars.next() {
                Some('n') => out.push(b'\n'),
                Some('r') => out.push(b'\r'),
                Some('t') => out.push(b'\t'),
                Some('0') => out.push(0),
                Some('\\') => out.push(b'\\'),
                Some('x') => {
                    let hi = chars.next();
                    let lo = chars.next();
                    let digits: String = hi.into_iter().chain(lo).collect();
                    let byte = u8::from_str_radix(&digits, 16)
                        .map_err(|_| WireError::InvalidDelimiter(text.to_string()))?;
                    out.push(byte);
                }
                // Unknown escape: keep the backslash literally
                Some(other) => {
                    out.push(b'\\');
                    let mut utf8 = [0u8; 4];
                    out.extend_from_slice(other.encode_utf8(&mut utf8).as_bytes());
                }
                None => out.push(b'\\'),
            }
        }

        if out.is_empty() {
            return Err(WireError::InvalidDelimiter(text.to_string()));
        }
        Ok(Self(out))
    }

    /// Parse a delimiter from hexadecimal text; whitespace is ignored
    pub fn from_hex(text: &str) -> Result<Self, WireError> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = data_encoding::HEXLOWER_PERMISSIVE
            .decode(compact.as_bytes())
            .map_err(|_| WireError::InvalidDelimiter(text.to_string()))?;
        Self::new(&bytes).map_err(|_| WireError::InvalidDelimiter(text.to_string()))
    }

    /// Parse from configuration text in either encoding
    pub fn parse(text: &str, hex: bool) -> Result<Self, WireError> {
        if hex {
            Self::from_hex(text)
        } else {
            Self::from_text(text)
        }
    }

    /// Delimiter bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Delimiter length in bytes (never zero)
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the delimiter holds no bytes; construction rejects that
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Find the first occurrence at or after `from` in `haystack`
    pub fn find_in(&self, haystack: &[u8], from: usize) -> Option<usize> {
        let needle = self.as_bytes();
        if from >= haystack.len() || haystack.len() - from < needle.len() {
            return None;
        }
        haystack[from..]
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|pos| pos + from)
    }
}

impl fmt::Debug for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Delimiter({:?})", String::from_utf8_lossy(&self.0))
    }
}
