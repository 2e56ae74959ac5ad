//! Decoded values, datasets and frames.

use crate::schema::DatasetDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar value of one dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Numeric value
    Number(f64),
    /// Non-numeric text
    Text(String),
    /// Field missing from the frame
    Empty,
}

impl Value {
    /// Interpret a text field: numbers become [`Value::Number`], blank
    /// fields become [`Value::Empty`]
    pub fn from_field(field: &str) -> Self {
        let trimmed = field.trim();
        if trimmed.is_empty() {
            return Value::Empty;
        }
        match trimmed.parse::<f64>() {
            Ok(number) if number.is_finite() => Value::Number(number),
            _ => Value::Text(trimmed.to_string()),
        }
    }

    /// Numeric value, if any
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// True for missing fields
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
            Value::Empty => Ok(()),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

/// One value cell of a decoded frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Stable 1-based frame index
    pub index: usize,
    /// Group title
    pub group: String,
    /// Dataset title
    pub title: String,
    /// Measurement units
    pub units: String,
    /// Decoded value
    pub value: Value,
    /// Value reached the alarm threshold
    pub alarm: bool,
    /// Value outside the descriptor's `[min, max]`
    pub out_of_range: bool,
}

impl Dataset {
    /// Dataset without a descriptor, titled `Field N`
    pub fn field(index: usize, value: Value) -> Self {
        Self {
            index,
            group: String::new(),
            title: format!("Field {}", index),
            units: String::new(),
            value,
            alarm: false,
            out_of_range: false,
        }
    }

    /// Dataset described by a project descriptor, with alarm flags evaluated
    pub fn described(descriptor: &DatasetDescriptor, group: &str, value: Value) -> Self {
        let (alarm, out_of_range) = match value.as_f64() {
            Some(v) => (
                descriptor.alarm.is_some_and(|a| v >= a),
                descriptor.min.is_some_and(|min| v < min)
                    || descriptor.max.is_some_and(|max| v > max),
            ),
            None => (false, false),
        };

        Self {
            index: descriptor.index,
            group: group.to_string(),
            title: descriptor.title.clone(),
            units: descriptor.units.clone(),
            value,
            alarm,
            out_of_range,
        }
    }
}

/// Ordered datasets decoded from one raw frame
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DecodedFrame {
    /// Publication sequence number within the session
    pub seq: u64,
    /// Frame (project) title
    pub title: String,
    /// Datasets in stable order
    pub datasets: Vec<Dataset>,
}

impl DecodedFrame {
    /// Create a frame; the sequence number is assigned on publication
    pub fn new(title: impl Into<String>, datasets: Vec<Dataset>) -> Self {
        Self {
            seq: 0,
            title: title.into(),
            datasets,
        }
    }

    /// Number of datasets
    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    /// True if the frame has no datasets
    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Values in dataset order
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.datasets.iter().map(|d| &d.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_field() {
        assert_eq!(Value::from_field(" 12.5 "), Value::Number(12.5));
        assert_eq!(Value::from_field("-3"), Value::Number(-3.0));
        assert_eq!(Value::from_field("ON"), Value::Text("ON".to_string()));
        assert_eq!(Value::from_field("  "), Value::Empty);
        assert_eq!(Value::from_field("nan"), Value::Text("nan".to_string()));
    }

    #[test]
    fn test_described_flags() {
        let descriptor = DatasetDescriptor {
            title: "Temperature".to_string(),
            units: "°C".to_string(),
            index: 2,
            min: Some(0.0),
            max: Some(50.0),
            alarm: Some(40.0),
            ..DatasetDescriptor::default()
        };

        let ok = Dataset::described(&descriptor, "Env", Value::Number(21.0));
        assert!(!ok.alarm && !ok.out_of_range);
        assert_eq!(ok.index, 2);
        assert_eq!(ok.group, "Env");

        let hot = Dataset::described(&descriptor, "Env", Value::Number(40.0));
        assert!(hot.alarm && !hot.out_of_range);

        let off = Dataset::described(&descriptor, "Env", Value::Number(-1.0));
        assert!(!off.alarm && off.out_of_range);

        let text = Dataset::described(&descriptor, "Env", Value::from("n/a"));
        assert!(!text.alarm && !text.out_of_range);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Number(1.5).to_string(), "1.5");
        assert_eq!(Value::Empty.to_string(), "");
        assert_eq!(Dataset::field(3, Value::Empty).title, "Field 3");
    }
}
