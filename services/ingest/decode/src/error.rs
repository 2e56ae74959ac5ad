//! Decoder error types.

use thiserror::Error;

/// Frame decoding and parser loading errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Parser script failed to compile
    #[error("parser script syntax error: {0}")]
    Syntax(String),

    /// No `parse` declaration in the script text
    #[error("No valid 'parse' function declaration found in the script!")]
    MissingDeclaration,

    /// `parse` is declared but the global is not a function after loading
    #[error("The 'parse' function is not declared or is not callable!")]
    NotCallable,

    /// `parse` raised an error while decoding a frame
    #[error("parse() failed: {0}")]
    Runtime(String),

    /// `parse` returned something other than a sequence of scalars
    #[error("parse() must return an ordered list of scalar values, got {0}")]
    BadReturn(String),

    /// Payload is not valid JSON
    #[error("invalid JSON payload: {0}")]
    Json(String),

    /// Project schema is inconsistent or missing
    #[error("project schema error: {0}")]
    Schema(String),

    /// Project or script file could not be read or written
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DecodeError {
    fn from(err: std::io::Error) -> Self {
        DecodeError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Json(err.to_string())
    }
}

/// Suppresses repeats of the same decode error
///
/// An error is reported the first time it occurs; identical errors that
/// follow are swallowed until a different error occurs or a frame decodes
/// successfully.
#[derive(Debug, Default)]
pub struct ErrorLatch {
    last: Option<DecodeError>,
}

impl ErrorLatch {
    /// Create an empty latch
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error; returns true if it should be reported
    pub fn observe(&mut self, err: &DecodeError) -> bool {
        if self.last.as_ref() == Some(err) {
            return false;
        }
        self.last = Some(err.clone());
        true
    }

    /// Forget the last error after a successful decode
    pub fn clear(&mut self) {
        self.last = None;
    }
}
