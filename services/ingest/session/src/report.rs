//! Non-fatal conditions reported to sinks.

use ingest_wire::ChecksumAlgorithm;
use std::fmt;

/// Condition delivered to sinks alongside decoded frames
///
/// Reports never interrupt the pipeline; they carry a human-readable
/// message and, where it applies, a running counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// No frame boundary within the buffer limit; buffered bytes dropped
    BufferOverflow {
        /// Configured limit in bytes
        limit: usize,
    },
    /// Frame dropped because its checksum did not match
    ChecksumMismatch {
        /// Configured algorithm
        algorithm: ChecksumAlgorithm,
        /// Frames rejected since the pipeline started
        rejected_total: u64,
    },
    /// Parser script or decoder failed on a frame
    ParserError {
        /// Error description
        message: String,
    },
    /// A legacy parser script was rewritten at load time
    LegacySignatureMigrated {
        /// Notice for the user
        notice: String,
    },
    /// The transport failed; the session is suspended
    TransportFailure {
        /// Error description
        message: String,
    },
    /// Worker queue full; oldest chunks dropped
    QueueOverflow {
        /// Chunks dropped since the session started
        dropped_total: u64,
    },
}

impl Report {
    /// Short machine-friendly name
    pub fn kind(&self) -> &'static str {
        match self {
            Report::BufferOverflow { .. } => "buffer_overflow",
            Report::ChecksumMismatch { .. } => "checksum_mismatch",
            Report::ParserError { .. } => "parser_error",
            Report::LegacySignatureMigrated { .. } => "legacy_signature_migrated",
            Report::TransportFailure { .. } => "transport_failure",
            Report::QueueOverflow { .. } => "queue_overflow",
        }
    }

    /// False for informational reports
    pub fn is_error(&self) -> bool {
        !matches!(self, Report::LegacySignatureMigrated { .. })
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::BufferOverflow { limit } => write!(
                f,
                "No frame boundary found within {} bytes, buffer cleared",
                limit
            ),
            Report::ChecksumMismatch {
                algorithm,
                rejected_total,
            } => write!(
                f,
                "{} checksum mismatch, {} frames rejected",
                algorithm, rejected_total
            ),
            Report::ParserError { message } => write!(f, "Frame parser error: {}", message),
            Report::LegacySignatureMigrated { notice } => f.write_str(notice),
            Report::TransportFailure { message } => write!(f, "Transport failure: {}", message),
            Report::QueueOverflow { dropped_total } => write!(
                f,
                "Frame worker queue full, {} chunks dropped",
                dropped_total
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let report = Report::ChecksumMismatch {
            algorithm: ChecksumAlgorithm::Crc32,
            rejected_total: 3,
        };
        assert_eq!(report.to_string(), "crc32 checksum mismatch, 3 frames rejected");
        assert_eq!(report.kind(), "checksum_mismatch");
        assert!(report.is_error());

        let notice = Report::LegacySignatureMigrated {
            notice: "migrated".to_string(),
        };
        assert_eq!(notice.to_string(), "migrated");
        assert!(!notice.is_error());
    }
}
