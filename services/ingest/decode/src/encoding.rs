//! Payload conversion applied before parsing.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// How payload bytes are presented to the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputEncoding {
    /// UTF-8 text (invalid sequences replaced)
    #[default]
    PlainText,
    /// Bytes rendered as lowercase hexadecimal text
    Hexadecimal,
    /// Bytes rendered as standard base64 text
    Base64,
    /// Raw bytes, one value per byte
    Binary,
}

/// Payload as handed to a parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presented<'a> {
    /// Textual form
    Text(Cow<'a, str>),
    /// Raw bytes
    Bytes(&'a [u8]),
}

impl InputEncoding {
    /// Convert a payload into the form the parser expects
    pub fn present<'a>(&self, payload: &'a [u8]) -> Presented<'a> {
        match self {
            InputEncoding::PlainText => Presented::Text(String::from_utf8_lossy(payload)),
            InputEncoding::Hexadecimal => {
                Presented::Text(Cow::Owned(data_encoding::HEXLOWER.encode(payload)))
            }
            InputEncoding::Base64 => Presented::Text(Cow::Owned(
                base64::engine::general_purpose::STANDARD.encode(payload),
            )),
            InputEncoding::Binary => Presented::Bytes(payload),
        }
    }
}
