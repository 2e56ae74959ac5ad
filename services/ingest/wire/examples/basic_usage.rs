//! Basic usage example for the ingest wire layer.

use ingest_wire::{
    encode_frame, BoundaryStrategy, ChecksumAlgorithm, ChecksumValidator, Delimiter,
    FrameDetector, DEFAULT_MAX_BUFFER_SIZE,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Ingest Wire Example ===\n");

    // 1. Encode a few frames the way a device would send them
    println!("1. Encoding frames with a CRC-16 trailer...");
    let strategy = BoundaryStrategy::StartAndEndDelimiter {
        start: Delimiter::from_text("/*")?,
        end: Delimiter::from_text("*/")?,
    };
    let algorithm = ChecksumAlgorithm::Crc16Modbus;

    let mut stream = b"boot noise".to_vec();
    for payload in [&b"21.5,1013,40"[..], b"21.7,1012,41", b"21.6,1012,43"] {
        stream.extend_from_slice(&encode_frame(&strategy, algorithm, payload));
    }
    println!("   Stream size: {} bytes", stream.len());

    // 2. Feed the stream in small, uneven reads
    println!("\n2. Detecting frames across fragmented reads...");
    let mut detector = FrameDetector::new(strategy, algorithm, DEFAULT_MAX_BUFFER_SIZE)?;
    let mut validator = ChecksumValidator::new(algorithm);

    for chunk in stream.chunks(7) {
        detector.feed(chunk, |frame| {
            let status = if validator.validate(&frame).is_accepted() {
                "ok"
            } else {
                "rejected"
            };
            println!(
                "   Frame {:?} checksum {}",
                std::str::from_utf8(&frame.payload),
                status
            );
        })?;
    }

    // 3. Statistics
    println!("\n3. Detector statistics...");
    let stats = detector.stats();
    println!("   Frames: {}", stats.frames);
    println!("   Noise bytes: {}", stats.noise_bytes);
    println!("   Rejected: {}", validator.rejected());

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
