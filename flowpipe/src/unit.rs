//! Data units flowing through a pipeline
//!
//! A pipeline runs in exactly one [`Mode`]: raw byte chunks or structured
//! records. Records are JSON values.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Transport mode of a stage, link, or whole pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Opaque byte chunks; buffer limits are counted in bytes
    Bytes,
    /// Structured records; buffer limits are counted in units
    Object,
}

impl Mode {
    /// Default high-water-mark: 16 KiB of bytes, or 16 records
    #[must_use]
    pub fn default_high_water_mark(self) -> usize {
        match self {
            Mode::Bytes => 16 * 1024,
            Mode::Object => 16,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Bytes => write!(f, "bytes"),
            Mode::Object => write!(f, "object"),
        }
    }
}

/// A byte chunk could not be interpreted as a structured record.
///
/// Never fatal: stages that hit it fall back to handling the raw chunk.
#[derive(Debug, thiserror::Error)]
#[error("chunk is not a structured record: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// One discrete item flowing through a pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum DataUnit {
    Bytes(Bytes),
    Record(Value),
}

impl DataUnit {
    #[must_use]
    pub fn mode(&self) -> Mode {
        match self {
            DataUnit::Bytes(_) => Mode::Bytes,
            DataUnit::Record(_) => Mode::Object,
        }
    }

    /// Amount of link capacity the unit occupies in the given mode
    ///
    /// An empty chunk still weighs 1, so it cannot slip past backpressure.
    #[must_use]
    pub fn weight(&self, mode: Mode) -> usize {
        match (mode, self) {
            (Mode::Bytes, DataUnit::Bytes(bytes)) => bytes.len().max(1),
            _ => 1,
        }
    }

    /// Byte payload, if this is a byte chunk
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            DataUnit::Bytes(bytes) => Some(bytes),
            DataUnit::Record(_) => None,
        }
    }

    /// Record payload, if this is a structured record
    #[must_use]
    pub fn as_record(&self) -> Option<&Value> {
        match self {
            DataUnit::Record(value) => Some(value),
            DataUnit::Bytes(_) => None,
        }
    }

    /// Interpret the unit as a structured record
    ///
    /// Records are returned as is. Byte chunks are parsed as JSON text;
    /// an empty chunk decodes to `null`.
    pub fn decode(&self) -> Result<Value, DecodeError> {
        match self {
            DataUnit::Record(value) => Ok(value.clone()),
            DataUnit::Bytes(bytes) if bytes.is_empty() => Ok(Value::Null),
            DataUnit::Bytes(bytes) => Ok(serde_json::from_slice(bytes)?),
        }
    }

    /// Text rendering for logs and `text/plain` bodies
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            DataUnit::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            DataUnit::Record(value) => value.to_string(),
        }
    }
}

impl From<Value> for DataUnit {
    fn from(value: Value) -> Self {
        DataUnit::Record(value)
    }
}

impl From<Bytes> for DataUnit {
    fn from(bytes: Bytes) -> Self {
        DataUnit::Bytes(bytes)
    }
}

impl From<&'static str> for DataUnit {
    fn from(text: &'static str) -> Self {
        DataUnit::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

/// Serialize a record to JSON text, `None` if it cannot be serialized
#[must_use]
pub fn pack(value: &Value) -> Option<String> {
    serde_json::to_string(value).ok()
}
