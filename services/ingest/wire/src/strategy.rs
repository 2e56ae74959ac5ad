//! Frame boundary strategies and their configuration.

use crate::checksum::ChecksumAlgorithm;
use crate::delimiter::Delimiter;
use crate::error::WireError;
use serde::{Deserialize, Serialize};

/// Default accumulation buffer limit (1 MiB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Hard upper limit for the accumulation buffer (64 MiB)
pub const HARD_MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Frame detection selected in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameDetection {
    /// Frames end with the end delimiter
    #[default]
    EndDelimiterOnly,
    /// Frames begin with the start delimiter and run until the next one
    StartDelimiterOnly,
    /// Frames are enclosed by start and end delimiters
    StartAndEndDelimiter,
    /// Each read (or text line) is one frame
    NoDelimiters,
    /// Frames are balanced JSON objects
    JsonObject,
}

/// Framing section of the pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingConfig {
    /// Boundary strategy
    pub detection: FrameDetection,
    /// Start delimiter text (plain or hex)
    pub start_delimiter: String,
    /// End delimiter text (plain or hex)
    pub end_delimiter: String,
    /// Interpret delimiters as hexadecimal
    pub hex_delimiters: bool,
    /// Checksum trailer algorithm
    pub checksum: ChecksumAlgorithm,
    /// Maximum buffered bytes without a frame boundary
    pub max_buffer_size: usize,
    /// Split `no_delimiters` input on line terminators (text transports)
    pub text_lines: bool,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            detection: FrameDetection::EndDelimiterOnly,
            start_delimiter: "/*".to_string(),
            end_delimiter: "*/".to_string(),
            hex_delimiters: false,
            checksum: ChecksumAlgorithm::None,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            text_lines: true,
        }
    }
}

/// Rule used to locate frame boundaries, with its delimiters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryStrategy {
    /// Frame ends at `end`
    EndDelimiterOnly {
        /// End delimiter
        end: Delimiter,
    },
    /// Frame starts at `start` and ends right before the next `start`
    StartDelimiterOnly {
        /// Start delimiter
        start: Delimiter,
    },
    /// Frame enclosed by `start` and `end`
    StartAndEndDelimiter {
        /// Start delimiter
        start: Delimiter,
        /// End delimiter
        end: Delimiter,
    },
    /// Chunk or line boundaries terminate frames
    NoDelimiters,
    /// Balanced top-level JSON objects
    JsonObject,
}

impl BoundaryStrategy {
    /// Build the strategy from configuration, validating required delimiters
    pub fn from_config(config: &FramingConfig) -> Result<Self, WireError> {
        let parse = |text: &str, which: &'static str| -> Result<Delimiter, WireError> {
            if text.is_empty() {
                return Err(WireError::MissingDelimiter(which));
            }
            Delimiter::parse(text, config.hex_delimiters)
        };

        Ok(match config.detection {
            FrameDetection::EndDelimiterOnly => BoundaryStrategy::EndDelimiterOnly {
                end: parse(&config.end_delimiter, "end")?,
            },
            FrameDetection::StartDelimiterOnly => BoundaryStrategy::StartDelimiterOnly {
                start: parse(&config.start_delimiter, "start")?,
            },
            FrameDetection::StartAndEndDelimiter => BoundaryStrategy::StartAndEndDelimiter {
                start: parse(&config.start_delimiter, "start")?,
                end: parse(&config.end_delimiter, "end")?,
            },
            FrameDetection::NoDelimiters => BoundaryStrategy::NoDelimiters,
            FrameDetection::JsonObject => BoundaryStrategy::JsonObject,
        })
    }

    /// Detection kind of this strategy
    pub fn detection(&self) -> FrameDetection {
        match self {
            BoundaryStrategy::EndDelimiterOnly { .. } => FrameDetection::EndDelimiterOnly,
            BoundaryStrategy::StartDelimiterOnly { .. } => FrameDetection::StartDelimiterOnly,
            BoundaryStrategy::StartAndEndDelimiter { .. } => FrameDetection::StartAndEndDelimiter,
            BoundaryStrategy::NoDelimiters => FrameDetection::NoDelimiters,
            BoundaryStrategy::JsonObject => FrameDetection::JsonObject,
        }
    }

    /// Start delimiter, if the strategy uses one
    pub fn start_delimiter(&self) -> Option<&Delimiter> {
        match self {
            BoundaryStrategy::StartDelimiterOnly { start }
            | BoundaryStrategy::StartAndEndDelimiter { start, .. } => Some(start),
            _ => None,
        }
    }

    /// End delimiter, if the strategy uses one
    pub fn end_delimiter(&self) -> Option<&Delimiter> {
        match self {
            BoundaryStrategy::EndDelimiterOnly { end }
            | BoundaryStrategy::StartAndEndDelimiter { end, .. } => Some(end),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_delimiters() {
        let mut config = FramingConfig {
            detection: FrameDetection::StartAndEndDelimiter,
            start_delimiter: String::new(),
            ..FramingConfig::default()
        };
        assert_eq!(
            BoundaryStrategy::from_config(&config),
            Err(WireError::MissingDelimiter("start"))
        );

        config.detection = FrameDetection::EndDelimiterOnly;
        let strategy = BoundaryStrategy::from_config(&config).unwrap();
        assert_eq!(strategy.end_delimiter().unwrap().as_bytes(), b"*/");
        assert!(strategy.start_delimiter().is_none());

        config.detection = FrameDetection::NoDelimiters;
        config.end_delimiter.clear();
        assert_eq!(
            BoundaryStrategy::from_config(&config).unwrap(),
            BoundaryStrategy::NoDelimiters
        );
    }

    #[test]
    fn test_hex_config() {
        let config = FramingConfig {
            detection: FrameDetection::EndDelimiterOnly,
            end_delimiter: "0D0A".to_string(),
            hex_delimiters: true,
            ..FramingConfig::default()
        };
        let strategy = BoundaryStrategy::from_config(&config).unwrap();
        assert_eq!(strategy.end_delimiter().unwrap().as_bytes(), b"\r\n");
        assert_eq!(strategy.detection(), FrameDetection::EndDelimiterOnly);
    }

    #[test]
    fn test_config_deserialize() {
        let config: FramingConfig = serde_json::from_str(
            r#"{"detection":"json_object","checksum":"crc32","max_buffer_size":4096}"#,
        )
        .unwrap();
        assert_eq!(config.detection, FrameDetection::JsonObject);
        assert_eq!(config.checksum, ChecksumAlgorithm::Crc32);
        assert_eq!(config.max_buffer_size, 4096);
        assert!(config.text_lines);
    }
}
