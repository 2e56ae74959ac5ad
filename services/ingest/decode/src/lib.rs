//! Frame decoding for byte-stream ingestion.
//!
//! Turns validated raw payloads into ordered datasets, either through a
//! project schema or through a user-supplied Lua parser script.
//!
//! ## Features
//!
//! - **Schema Decoding**: delimited text or flattened JSON mapped onto
//!   project dataset descriptors, with alarm and range flags
//! - **Parser Scripts**: Lua 5.4 `parse(frame)` functions behind a narrow
//!   engine interface, with memory and per-call time limits
//! - **Legacy Migration**: `parse(frame, separator)` scripts are rewritten
//!   at load time and a one-time notice is produced
//! - **Quick Plot and Device JSON**: schema-less decoding modes
//! - **Project Arena**: groups and datasets addressed by stable ids, with
//!   duplicate and delete operations
//! - **Input Encodings**: plain text, hexadecimal, base64 and binary

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decoder;
pub mod encoding;
pub mod error;
pub mod migrate;
pub mod schema;
pub mod script;
pub mod value;

// Re-export main types
pub use decoder::{
    build_decoder, Decoder, DecoderMode, DecodingConfig, DeviceJsonDecoder, LoadedDecoder,
    PayloadFormat, QuickPlotDecoder, SchemaDecoder, ScriptDecoder, UnavailableDecoder,
    QUICK_PLOT_TITLE,
};
pub use encoding::{InputEncoding, Presented};
pub use error::{DecodeError, ErrorLatch};
pub use migrate::{detect_signature, migrate_legacy, Migration, Signature, MIGRATION_NOTICE};
pub use schema::{DatasetDescriptor, DatasetId, Group, GroupId, ProjectSchema};
pub use script::{
    LuaEngine, ScriptEngine, DEFAULT_SCRIPT_MEMORY_LIMIT, DEFAULT_SCRIPT_TIME_LIMIT,
};
pub use value::{Dataset, DecodedFrame, Value};
