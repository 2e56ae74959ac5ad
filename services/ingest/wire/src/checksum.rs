//! Frame checksum algorithms and validation.
//!
//! Checksums are carried as a trailer immediately after the end condition
//! of a frame and are serialized big-endian. Frames produced under
//! [`ChecksumAlgorithm::None`] are accepted unconditionally.

use crate::frame::RawFrame;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

/// Computed checksum bytes (at most 32 for SHA-256)
pub type ChecksumBytes = SmallVec<[u8; 32]>;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChecksumAlgorithm {
    /// No checksum, every frame accepted
    #[default]
    None,
    /// XOR of all bytes
    Xor8,
    /// Sum of all bytes modulo 256
    Sum8,
    /// CRC-8 (poly 0x07, init 0x00)
    Crc8,
    /// CRC-16/MODBUS (reflected poly 0xA001, init 0xFFFF)
    Crc16Modbus,
    /// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF)
    Crc16Ccitt,
    /// CRC-16/XMODEM (poly 0x1021, init 0x0000)
    Crc16Xmodem,
    /// CRC-32 (IEEE 802.3)
    Crc32,
    /// Fletcher-16
    Fletcher16,
    /// Adler-32
    Adler32,
    /// SHA-256 digest
    Sha256,
}

impl ChecksumAlgorithm {
    /// All algorithms, in display order
    pub const ALL: [ChecksumAlgorithm; 11] = [
        ChecksumAlgorithm::None,
        ChecksumAlgorithm::Xor8,
        ChecksumAlgorithm::Sum8,
        ChecksumAlgorithm::Crc8,
        ChecksumAlgorithm::Crc16Modbus,
        ChecksumAlgorithm::Crc16Ccitt,
        ChecksumAlgorithm::Crc16Xmodem,
        ChecksumAlgorithm::Crc32,
        ChecksumAlgorithm::Fletcher16,
        ChecksumAlgorithm::Adler32,
        ChecksumAlgorithm::Sha256,
    ];

    /// Number of trailer bytes this algorithm appends to a frame
    pub fn len(self) -> usize {
        match self {
            ChecksumAlgorithm::None => 0,
            ChecksumAlgorithm::Xor8 | ChecksumAlgorithm::Sum8 | ChecksumAlgorithm::Crc8 => 1,
            ChecksumAlgorithm::Crc16Modbus
            | ChecksumAlgorithm::Crc16Ccitt
            | ChecksumAlgorithm::Crc16Xmodem
            | ChecksumAlgorithm::Fletcher16 => 2,
            ChecksumAlgorithm::Crc32 | ChecksumAlgorithm::Adler32 => 4,
            ChecksumAlgorithm::Sha256 => 32,
        }
    }

    /// Whether the algorithm carries no trailer
    pub fn is_none(self) -> bool {
        self == ChecksumAlgorithm::None
    }

    /// Canonical configuration name
    pub fn name(self) -> &'static str {
        match self {
            ChecksumAlgorithm::None => "none",
            ChecksumAlgorithm::Xor8 => "xor8",
            ChecksumAlgorithm::Sum8 => "sum8",
            ChecksumAlgorithm::Crc8 => "crc8",
            ChecksumAlgorithm::Crc16Modbus => "crc16-modbus",
            ChecksumAlgorithm::Crc16Ccitt => "crc16-ccitt",
            ChecksumAlgorithm::Crc16Xmodem => "crc16-xmodem",
            ChecksumAlgorithm::Crc32 => "crc32",
            ChecksumAlgorithm::Fletcher16 => "fletcher16",
            ChecksumAlgorithm::Adler32 => "adler32",
            ChecksumAlgorithm::Sha256 => "sha256",
        }
    }

    /// Compute the checksum of `data` as big-endian trailer bytes
    pub fn compute(self, data: &[u8]) -> ChecksumBytes {
        match self {
            ChecksumAlgorithm::None => ChecksumBytes::new(),
            ChecksumAlgorithm::Xor8 => {
                ChecksumBytes::from_slice(&[data.iter().fold(0u8, |acc, b| acc ^ b)])
            }
            ChecksumAlgorithm::Sum8 => ChecksumBytes::from_slice(&[data
                .iter()
                .fold(0u8, |acc, b| acc.wrapping_add(*b))]),
            ChecksumAlgorithm::Crc8 => ChecksumBytes::from_slice(&[crc8(data)]),
            ChecksumAlgorithm::Crc16Modbus => {
                ChecksumBytes::from_slice(&crc16_reflected(data, 0xA001, 0xFFFF).to_be_bytes())
            }
            ChecksumAlgorithm::Crc16Ccitt => {
                ChecksumBytes::from_slice(&crc16(data, 0x1021, 0xFFFF).to_be_bytes())
            }
            ChecksumAlgorithm::Crc16Xmodem => {
                ChecksumBytes::from_slice(&crc16(data, 0x1021, 0x0000).to_be_bytes())
            }
            ChecksumAlgorithm::Crc32 => {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(data);
                ChecksumBytes::from_slice(&hasher.finalize().to_be_bytes())
            }
            ChecksumAlgorithm::Fletcher16 => {
                ChecksumBytes::from_slice(&fletcher16(data).to_be_bytes())
            }
            ChecksumAlgorithm::Adler32 => ChecksumBytes::from_slice(&adler32(data).to_be_bytes()),
            ChecksumAlgorithm::Sha256 => ChecksumBytes::from_slice(&Sha256::digest(data)),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = crate::WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | '/' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();

        match key.as_str() {
            "" | "none" | "nochecksum" => Ok(ChecksumAlgorithm::None),
            "xor" | "xor8" => Ok(ChecksumAlgorithm::Xor8),
            "sum" | "sum8" | "mod256" => Ok(ChecksumAlgorithm::Sum8),
            "crc8" => Ok(ChecksumAlgorithm::Crc8),
            "crc16" | "crc16modbus" | "modbus" => Ok(ChecksumAlgorithm::Crc16Modbus),
            "crc16ccitt" | "crc16ccittfalse" | "ccitt" => Ok(ChecksumAlgorithm::Crc16Ccitt),
            "crc16xmodem" | "xmodem" => Ok(ChecksumAlgorithm::Crc16Xmodem),
            "crc32" => Ok(ChecksumAlgorithm::Crc32),
            "fletcher16" | "fletcher" => Ok(ChecksumAlgorithm::Fletcher16),
            "adler32" | "adler" => Ok(ChecksumAlgorithm::Adler32),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            _ => Err(crate::WireError::UnknownChecksum(s.to_string())),
        }
    }
}

impl TryFrom<String> for ChecksumAlgorithm {
    type Error = crate::WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChecksumAlgorithm> for String {
    fn from(value: ChecksumAlgorithm) -> Self {
        value.name().to_string()
    }
}

/// Outcome of validating one raw frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// Checksum matched, or no checksum configured
    Accepted,
    /// Checksum mismatch; the frame must be dropped
    Rejected {
        /// Checksum recomputed over the payload
        expected: ChecksumBytes,
        /// Checksum carried by the frame
        actual: ChecksumBytes,
    },
}

impl Validation {
    /// True when the frame may continue to the decoder
    pub fn is_accepted(&self) -> bool {
        matches!(self, Validation::Accepted)
    }
}

/// Recompute the checksum over the payload and compare with the trailer
pub fn validate(frame: &RawFrame, algorithm: ChecksumAlgorithm) -> Validation {
    if algorithm.is_none() {
        return Validation::Accepted;
    }

    let expected = algorithm.compute(&frame.payload);
    if expected.as_slice() == frame.checksum.as_ref() {
        Validation::Accepted
    } else {
        Validation::Rejected {
            expected,
            actual: ChecksumBytes::from_slice(&frame.checksum),
        }
    }
}

/// Validator with a running rejection counter
#[derive(Debug, Clone, Default)]
pub struct ChecksumValidator {
    algorithm: ChecksumAlgorithm,
    rejected: u64,
}

impl ChecksumValidator {
    /// Create a validator for the given algorithm
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self {
            algorithm,
            rejected: 0,
        }
    }

    /// Configured algorithm
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Switch algorithm; the rejection counter is kept
    pub fn set_algorithm(&mut self, algorithm: ChecksumAlgorithm) {
        self.algorithm = algorithm;
    }

    /// Validate a frame, counting rejections
    pub fn validate(&mut self, frame: &RawFrame) -> Validation {
        let result = validate(frame, self.algorithm);
        if !result.is_accepted() {
            self.rejected += 1;
            tracing::debug!(
                "Checksum mismatch ({}), {} frames rejected so far",
                self.algorithm,
                self.rejected
            );
        }
        result
    }

    /// Total rejected frames
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn crc16(data: &[u8], poly: u16, init: u16) -> u16 {
    let mut crc = init;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ poly
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn crc16_reflected(data: &[u8], poly: u16, init: u16) -> u16 {
    let mut crc = init;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            crc = if crc & 0x0001 != 0 {
                (crc >> 1) ^ poly
            } else {
                crc >> 1
            };
        }
    }
    crc
}

fn fletcher16(data: &[u8]) -> u16 {
    let mut sum1: u16 = 0;
    let mut sum2: u16 = 0;
    for &byte in data {
        sum1 = (sum1 + byte as u16) % 255;
        sum2 = (sum2 + sum1) % 255;
    }
    (sum2 << 8) | sum1
}

fn adler32(data: &[u8]) -> u32 {
    const MOD_ADLER: u32 = 65521;
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for &byte in data {
        a = (a + byte as u32) % MOD_ADLER;
        b = (b + a) % MOD_ADLER;
    }
    (b << 16) | a
}
