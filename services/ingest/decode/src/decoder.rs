//! Frame decoders.
//!
//! Every decoding mode implements [`Decoder`], turning one validated payload
//! into a [`DecodedFrame`]. [`build_decoder`] selects the implementation from
//! configuration and runs load-time work such as legacy parser migration.

use crate::encoding::{InputEncoding, Presented};
use crate::error::DecodeError;
use crate::migrate::{migrate_legacy, Migration};
use crate::schema::ProjectSchema;
use crate::script::{
    LuaEngine, ScriptEngine, DEFAULT_SCRIPT_MEMORY_LIMIT, DEFAULT_SCRIPT_TIME_LIMIT,
};
use crate::value::{Dataset, DecodedFrame, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Title used for frames without a project
pub const QUICK_PLOT_TITLE: &str = "Quick Plot";

/// Decoding mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderMode {
    /// Fields mapped positionally through the project schema
    Schema,
    /// Fields produced by the parser script
    Script,
    /// Every separated field becomes a dataset
    #[default]
    QuickPlot,
    /// The device sends a complete JSON frame description
    DeviceJson,
}

/// Schema payload layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// Text fields split by the separator
    #[default]
    Delimited,
    /// A JSON object, flattened in document order
    Json,
}

/// Decoding section of the pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodingConfig {
    /// Decoding mode
    pub mode: DecoderMode,
    /// Field separator for delimited payloads
    pub separator: String,
    /// Payload conversion before parsing
    pub encoding: InputEncoding,
    /// Payload layout in schema mode
    pub payload_format: PayloadFormat,
    /// JSON project file
    pub project: Option<PathBuf>,
    /// Parser script file, overriding the project's parser
    pub script: Option<PathBuf>,
    /// Interpreter memory limit in bytes (0 disables)
    pub script_memory_limit: usize,
    /// Wall-clock budget per script call in milliseconds (0 disables)
    pub script_time_limit_ms: u64,
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            mode: DecoderMode::QuickPlot,
            separator: ",".to_string(),
            encoding: InputEncoding::PlainText,
            payload_format: PayloadFormat::Delimited,
            project: None,
            script: None,
            script_memory_limit: DEFAULT_SCRIPT_MEMORY_LIMIT,
            script_time_limit_ms: DEFAULT_SCRIPT_TIME_LIMIT.as_millis() as u64,
        }
    }
}

/// Converts validated payloads into decoded frames
pub trait Decoder: Send + fmt::Debug {
    /// Decode one payload
    fn decode(&mut self, payload: &[u8]) -> Result<DecodedFrame, DecodeError>;

    /// Mode implemented by this decoder
    fn mode(&self) -> DecoderMode;
}

/// Decoder ready for use, plus the outcome of load-time migration
#[derive(Debug)]
pub struct LoadedDecoder {
    /// The decoder
    pub decoder: Box<dyn Decoder>,
    /// Set when a legacy parser script was rewritten
    pub migration: Option<Migration>,
}

impl LoadedDecoder {
    /// Stand-in for a decoder that failed to build
    ///
    /// Every frame fails with `error`, so the pipeline keeps reading and
    /// the error is reported through the usual parser error path.
    pub fn unavailable(mode: DecoderMode, error: DecodeError) -> Self {
        Self {
            decoder: Box::new(UnavailableDecoder { mode, error }),
            migration: None,
        }
    }
}

/// Build the decoder for the configured mode
///
/// `script` overrides the parser stored in the project. Script mode without
/// any parser source fails with [`DecodeError::MissingDeclaration`].
pub fn build_decoder(
    config: &DecodingConfig,
    project: Option<Arc<ProjectSchema>>,
    script: Option<&str>,
) -> Result<LoadedDecoder, DecodeError> {
    let decoder: Box<dyn Decoder> = match config.mode {
        DecoderMode::Schema => {
            let schema = project.ok_or_else(|| {
                DecodeError::Schema("schema mode requires a project file".to_string())
            })?;
            Box::new(SchemaDecoder::new(
                schema,
                &config.separator,
                config.encoding,
                config.payload_format,
            ))
        }
        DecoderMode::Script => {
            let source = script
                .or_else(|| project.as_deref().and_then(|p| p.frame_parser()))
                .ok_or(DecodeError::MissingDeclaration)?
                .to_string();

            let migration = migrate_legacy(&source, &config.separator)?;
            let source = match &migration {
                Some(m) => {
                    info!("{}", m.notice);
                    m.source.clone()
                }
                None => source,
            };

            let engine = LuaEngine::load(
                &source,
                config.script_memory_limit,
                Duration::from_millis(config.script_time_limit_ms),
            )?;
            let decoder = ScriptDecoder::new(Box::new(engine), project, config.encoding);
            return Ok(LoadedDecoder {
                decoder: Box::new(decoder),
                migration,
            });
        }
        DecoderMode::QuickPlot => Box::new(QuickPlotDecoder::new(&config.separator, config.encoding)),
        DecoderMode::DeviceJson => Box::new(DeviceJsonDecoder),
    };

    Ok(LoadedDecoder {
        decoder,
        migration: None,
    })
}

/// Fails every frame with the error that prevented loading
#[derive(Debug)]
pub struct UnavailableDecoder {
    mode: DecoderMode,
    error: DecodeError,
}

impl Decoder for UnavailableDecoder {
    fn decode(&mut self, _payload: &[u8]) -> Result<DecodedFrame, DecodeError> {
        Err(self.error.clone())
    }

    fn mode(&self) -> DecoderMode {
        self.mode
    }
}

/// Split a payload into fields according to the input encoding
fn split_fields(payload: &[u8], separator: &str, encoding: InputEncoding) -> Vec<Value> {
    match encoding.present(payload) {
        Presented::Bytes(bytes) => bytes.iter().map(|b| Value::Number(f64::from(*b))).collect(),
        Presented::Text(text) => {
            let text = text.trim_end_matches(['\r', '\n']);
            if separator.is_empty() {
                return vec![Value::from_field(text)];
            }
            text.split(separator).map(Value::from_field).collect()
        }
    }
}

/// Flatten a JSON value into `a.b` / `a.0` keyed scalars, in document order
fn flatten_json(value: &serde_json::Value, prefix: &str, out: &mut Vec<(String, Value)>) {
    let key = |k: &str| {
        if prefix.is_empty() {
            k.to_string()
        } else {
            format!("{}.{}", prefix, k)
        }
    };

    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                flatten_json(v, &key(k), out);
            }
        }
        serde_json::Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_json(v, &key(&i.to_string()), out);
            }
        }
        scalar => out.push((prefix.to_string(), json_scalar(scalar))),
    }
}

fn json_scalar(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Empty,
        serde_json::Value::Bool(b) => Value::Text(b.to_string()),
        serde_json::Value::Number(n) => n.as_f64().map_or(Value::Empty, Value::Number),
        serde_json::Value::String(s) => Value::from_field(s),
        other => Value::Text(other.to_string()),
    }
}

/// Positional field lookup with 1-based indexes
fn field_at(fields: &[Value], index: usize) -> Value {
    index
        .checked_sub(1)
        .and_then(|i| fields.get(i))
        .cloned()
        .unwrap_or(Value::Empty)
}

/// Maps payload fields onto project dataset descriptors
#[derive(Debug)]
pub struct SchemaDecoder {
    schema: Arc<ProjectSchema>,
    separator: String,
    encoding: InputEncoding,
    format: PayloadFormat,
}

impl SchemaDecoder {
    /// Create a schema decoder
    pub fn new(
        schema: Arc<ProjectSchema>,
        separator: &str,
        encoding: InputEncoding,
        format: PayloadFormat,
    ) -> Self {
        Self {
            schema,
            separator: separator.to_string(),
            encoding,
            format,
        }
    }

    fn decode_json(&self, payload: &[u8]) -> Result<DecodedFrame, DecodeError> {
        let root: serde_json::Value = serde_json::from_slice(payload)?;
        let mut flat = Vec::new();
        flatten_json(&root, "", &mut flat);

        let datasets = self
            .schema
            .datasets()
            .map(|(group, descriptor)| {
                let value = match &descriptor.key {
                    Some(key) => flat
                        .iter()
                        .find(|(k, _)| k == key)
                        .map(|(_, v)| v.clone())
                        .unwrap_or(Value::Empty),
                    None => descriptor
                        .index
                        .checked_sub(1)
                        .and_then(|i| flat.get(i))
                        .map(|(_, v)| v.clone())
                        .unwrap_or(Value::Empty),
                };
                Dataset::described(descriptor, &group.title, value)
            })
            .collect();

        Ok(DecodedFrame::new(self.schema.title(), datasets))
    }
}

impl Decoder for SchemaDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<DecodedFrame, DecodeError> {
        if self.format == PayloadFormat::Json {
            return self.decode_json(payload);
        }

        let fields = split_fields(payload, &self.separator, self.encoding);
        let datasets = self
            .schema
            .datasets()
            .map(|(group, descriptor)| {
                Dataset::described(descriptor, &group.title, field_at(&fields, descriptor.index))
            })
            .collect();
        Ok(DecodedFrame::new(self.schema.title(), datasets))
    }

    fn mode(&self) -> DecoderMode {
        DecoderMode::Schema
    }
}

/// Runs the parser script and labels its fields from the project, if any
#[derive(Debug)]
pub struct ScriptDecoder {
    engine: Box<dyn ScriptEngine>,
    schema: Option<Arc<ProjectSchema>>,
    encoding: InputEncoding,
}

impl ScriptDecoder {
    /// Create a script decoder around a loaded engine
    pub fn new(
        engine: Box<dyn ScriptEngine>,
        schema: Option<Arc<ProjectSchema>>,
        encoding: InputEncoding,
    ) -> Self {
        Self {
            engine,
            schema,
            encoding,
        }
    }
}

impl Decoder for ScriptDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<DecodedFrame, DecodeError> {
        let fields = self.engine.call_parse(self.encoding.present(payload))?;

        let datasets = fields
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                let index = i + 1;
                match self.schema.as_deref().and_then(|s| s.find_by_index(index)) {
                    Some((group, descriptor)) => Dataset::described(descriptor, &group.title, value),
                    None => Dataset::field(index, value),
                }
            })
            .collect();

        let title = self
            .schema
            .as_deref()
            .map_or(QUICK_PLOT_TITLE, |s| s.title());
        Ok(DecodedFrame::new(title, datasets))
    }

    fn mode(&self) -> DecoderMode {
        DecoderMode::Script
    }
}

/// Schema-less decoder: one dataset per separated field
#[derive(Debug)]
pub struct QuickPlotDecoder {
    separator: String,
    encoding: InputEncoding,
}

impl QuickPlotDecoder {
    /// Create a quick-plot decoder
    pub fn new(separator: &str, encoding: InputEncoding) -> Self {
        Self {
            separator: separator.to_string(),
            encoding,
        }
    }
}

impl Decoder for QuickPlotDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<DecodedFrame, DecodeError> {
        let datasets = split_fields(payload, &self.separator, self.encoding)
            .into_iter()
            .enumerate()
            .map(|(i, value)| Dataset::field(i + 1, value))
            .collect();
        Ok(DecodedFrame::new(QUICK_PLOT_TITLE, datasets))
    }

    fn mode(&self) -> DecoderMode {
        DecoderMode::QuickPlot
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DeviceFrame {
    #[serde(alias = "t")]
    title: String,
    #[serde(alias = "g")]
    groups: Vec<DeviceGroup>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DeviceGroup {
    #[serde(alias = "t")]
    title: String,
    #[serde(alias = "d")]
    datasets: Vec<DeviceDataset>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DeviceDataset {
    #[serde(alias = "t")]
    title: String,
    #[serde(alias = "v")]
    value: serde_json::Value,
    #[serde(alias = "u")]
    units: String,
    min: Option<f64>,
    max: Option<f64>,
    alarm: Option<f64>,
}

/// Decoder for devices that send their own frame description as JSON
#[derive(Debug, Default)]
pub struct DeviceJsonDecoder;

impl Decoder for DeviceJsonDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<DecodedFrame, DecodeError> {
        let frame: DeviceFrame = serde_json::from_slice(payload)?;

        let mut datasets = Vec::new();
        for group in &frame.groups {
            for dataset in &group.datasets {
                let descriptor = crate::schema::DatasetDescriptor {
                    title: dataset.title.clone(),
                    units: dataset.units.clone(),
                    index: datasets.len() + 1,
                    min: dataset.min,
                    max: dataset.max,
                    alarm: dataset.alarm,
                    ..Default::default()
                };
                datasets.push(Dataset::described(
                    &descriptor,
                    &group.title,
                    json_scalar(&dataset.value),
                ));
            }
        }

        Ok(DecodedFrame::new(frame.title, datasets))
    }

    fn mode(&self) -> DecoderMode {
        DecoderMode::DeviceJson
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DatasetDescriptor;

    fn weather() -> Arc<ProjectSchema> {
        let mut schema = ProjectSchema::new("Weather");
        let env = schema.add_group("Environment", "");
        for (title, units, index) in [("Temperature", "°C", 1), ("Pressure", "hPa", 2), ("Humidity", "%", 4)] {
            schema
                .add_dataset(
                    env,
                    DatasetDescriptor {
                        title: title.to_string(),
                        units: units.to_string(),
                        index,
                        alarm: (index == 4).then_some(90.0),
                        ..DatasetDescriptor::default()
                    },
                )
                .unwrap();
        }
        Arc::new(schema)
    }

    fn values(frame: &DecodedFrame) -> Vec<Value> {
        frame.values().cloned().collect()
    }

    #[test]
    fn test_schema_delimited() {
        let mut decoder = SchemaDecoder::new(
            weather(),
            ",",
            InputEncoding::PlainText,
            PayloadFormat::Delimited,
        );

        let frame = decoder.decode(b"21.5, 1013,x,95,extra\r").unwrap();
        assert_eq!(frame.title, "Weather");
        assert_eq!(
            values(&frame),
            vec![Value::Number(21.5), Value::Number(1013.0), Value::Number(95.0)]
        );
        assert!(frame.datasets[2].alarm);
        assert_eq!(frame.datasets[1].units, "hPa");

        // Missing fields become placeholders
        let frame = decoder.decode(b"20").unwrap();
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.datasets[1].value, Value::Empty);
        assert_eq!(frame.datasets[2].value, Value::Empty);
    }

    #[test]
    fn test_schema_json_keys() {
        let mut schema = ProjectSchema::new("Rover");
        let g = schema.add_group("Power", "");
        schema
            .add_dataset(
                g,
                DatasetDescriptor {
                    title: "Voltage".to_string(),
                    index: 1,
                    key: Some("battery.v".to_string()),
                    ..DatasetDescriptor::default()
                },
            )
            .unwrap();
        schema
            .add_dataset(
                g,
                DatasetDescriptor {
                    title: "Second wheel".to_string(),
                    index: 3,
                    ..DatasetDescriptor::default()
                },
            )
            .unwrap();

        let mut decoder = SchemaDecoder::new(
            Arc::new(schema),
            ",",
            InputEncoding::PlainText,
            PayloadFormat::Json,
        );
        let frame = decoder
            .decode(br#"{"battery": {"v": 12.4}, "wheels": [100, 101]}"#)
            .unwrap();
        assert_eq!(values(&frame), vec![Value::Number(12.4), Value::Number(101.0)]);

        assert!(matches!(
            decoder.decode(b"not json").unwrap_err(),
            DecodeError::Json(_)
        ));
    }

    #[test]
    fn test_quick_plot() {
        let mut decoder = QuickPlotDecoder::new(";", InputEncoding::PlainText);
        let frame = decoder.decode(b"1;2;hello").unwrap();
        assert_eq!(frame.title, QUICK_PLOT_TITLE);
        assert_eq!(frame.datasets[2].title, "Field 3");
        assert_eq!(frame.datasets[2].value, Value::Text("hello".to_string()));

        let mut binary = QuickPlotDecoder::new(",", InputEncoding::Binary);
        let frame = binary.decode(&[0x00, 0x7f, 0xff]).unwrap();
        assert_eq!(
            values(&frame),
            vec![Value::Number(0.0), Value::Number(127.0), Value::Number(255.0)]
        );
    }

    #[test]
    fn test_device_json() {
        let mut decoder = DeviceJsonDecoder;
        let payload = br#"{"t": "Probe", "g": [
            {"t": "Env", "d": [{"t": "Temp", "v": "22.5", "u": "C", "alarm": 30}]},
            {"title": "State", "datasets": [{"title": "Mode", "value": "auto"}]}
        ]}"#;

        let frame = decoder.decode(payload).unwrap();
        assert_eq!(frame.title, "Probe");
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.datasets[0].value, Value::Number(22.5));
        assert_eq!(frame.datasets[1].group, "State");
        assert_eq!(frame.datasets[1].index, 2);
    }

    #[test]
    fn test_build_script_with_legacy_parser() {
        let config = DecodingConfig {
            mode: DecoderMode::Script,
            separator: ";".to_string(),
            ..DecodingConfig::default()
        };
        let source = r#"
function parse(frame, separator)
  local out = {}
  for field in string.gmatch(frame, "([^" .. separator .. "]+)") do
    out[#out + 1] = tonumber(field)
  end
  return out
end
"#;

        let mut loaded = build_decoder(&config, Some(weather()), Some(source)).unwrap();
        let migration = loaded.migration.take().unwrap();
        assert!(migration.source.contains("function parse(frame)"));

        let frame = loaded.decoder.decode(b"20;1000;55;80").unwrap();
        assert_eq!(loaded.decoder.mode(), DecoderMode::Script);
        assert_eq!(frame.len(), 4);
        assert_eq!(frame.datasets[0].title, "Temperature");
        assert_eq!(frame.datasets[2].title, "Field 3");
        assert_eq!(frame.datasets[3].title, "Humidity");
    }

    #[test]
    fn test_build_errors() {
        let schema_mode = DecodingConfig {
            mode: DecoderMode::Schema,
            ..DecodingConfig::default()
        };
        assert!(matches!(
            build_decoder(&schema_mode, None, None).unwrap_err(),
            DecodeError::Schema(_)
        ));

        let script_mode = DecodingConfig {
            mode: DecoderMode::Script,
            ..DecodingConfig::default()
        };
        assert_eq!(
            build_decoder(&script_mode, None, None).unwrap_err(),
            DecodeError::MissingDeclaration
        );
        assert_eq!(
            build_decoder(&script_mode, None, Some("x = 1")).unwrap_err(),
            DecodeError::MissingDeclaration
        );

        let loaded = build_decoder(&DecodingConfig::default(), None, None).unwrap();
        assert_eq!(loaded.decoder.mode(), DecoderMode::QuickPlot);
        assert!(loaded.migration.is_none());
    }

    #[test]
    fn test_unavailable_decoder_repeats_load_error() {
        let script_mode = DecodingConfig {
            mode: DecoderMode::Script,
            ..DecodingConfig::default()
        };
        let err = build_decoder(&script_mode, None, Some("parse = 42")).unwrap_err();
        assert_eq!(err, DecodeError::NotCallable);

        let mut loaded = LoadedDecoder::unavailable(script_mode.mode, err);
        assert_eq!(loaded.decoder.mode(), DecoderMode::Script);
        assert!(loaded.migration.is_none());
        for payload in [&b"1,2"[..], b""] {
            assert_eq!(
                loaded.decoder.decode(payload).unwrap_err(),
                DecodeError::NotCallable
            );
        }
    }

    #[test]
    fn test_config_names() {
        let config: DecodingConfig =
            serde_json::from_str(r#"{"mode": "device_json", "encoding": "hexadecimal"}"#).unwrap();
        assert_eq!(config.mode, DecoderMode::DeviceJson);
        assert_eq!(config.encoding, InputEncoding::Hexadecimal);
        assert_eq!(config.separator, ",");
        assert_eq!(config.script_time_limit_ms, 1000);
    }
}
