//! Schema Module
//!
//! Measurement data types, typed values, series paths and the per-engine
//! schema that maps every measurement to its declared type.
//!
//! ## Schema Log Format
//! ```text
//! sensor0,INT64
//! sensor1,DOUBLE
//! ...one registration per line, appended and fsync'd
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ChronoError, Result};

/// Timestamps are signed 64-bit integers (engine-defined unit)
pub type Timestamp = i64;

// =============================================================================
// Data Types
// =============================================================================

/// Declared type of a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    Boolean = 0,
    Int32 = 1,
    Int64 = 2,
    Float = 3,
    Double = 4,
    Text = 5,
}

impl DataType {
    /// Stable one-byte code used by the data file format
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Inverse of [`DataType::code`]
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(DataType::Boolean),
            1 => Ok(DataType::Int32),
            2 => Ok(DataType::Int64),
            3 => Ok(DataType::Float),
            4 => Ok(DataType::Double),
            5 => Ok(DataType::Text),
            other => Err(ChronoError::Corruption(format!(
                "Unknown data type code: {}",
                other
            ))),
        }
    }

    fn name(self) -> &'static str {
        match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Int32 => "INT32",
            DataType::Int64 => "INT64",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::Text => "TEXT",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = ChronoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "BOOLEAN" => Ok(DataType::Boolean),
            "INT32" => Ok(DataType::Int32),
            "INT64" => Ok(DataType::Int64),
            "FLOAT" => Ok(DataType::Float),
            "DOUBLE" => Ok(DataType::Double),
            "TEXT" => Ok(DataType::Text),
            other => Err(ChronoError::Corruption(format!(
                "Unknown data type: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Values
// =============================================================================

/// A single typed value of a measurement
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Text(String),
}

impl Value {
    /// Parse the textual form carried by WAL inserts into the declared type
    pub fn parse(measurement: &str, data_type: DataType, raw: &str) -> Result<Self> {
        let mismatch = || ChronoError::TypeMismatch {
            measurement: measurement.to_string(),
            expected: data_type.to_string(),
            value: raw.to_string(),
        };

        let value = match data_type {
            DataType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                _ => return Err(mismatch()),
            },
            DataType::Int32 => Value::Int32(raw.parse().map_err(|_| mismatch())?),
            DataType::Int64 => Value::Int64(raw.parse().map_err(|_| mismatch())?),
            DataType::Float => Value::Float(raw.parse().map_err(|_| mismatch())?),
            DataType::Double => Value::Double(raw.parse().map_err(|_| mismatch())?),
            DataType::Text => Value::Text(raw.to_string()),
        };
        Ok(value)
    }

    /// The type this value belongs to
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Boolean(_) => DataType::Boolean,
            Value::Int32(_) => DataType::Int32,
            Value::Int64(_) => DataType::Int64,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::Text(_) => DataType::Text,
        }
    }

    /// Approximate in-memory footprint, used for flush accounting
    pub fn approx_size(&self) -> usize {
        match self {
            Value::Boolean(_) => 1,
            Value::Int32(_) | Value::Float(_) => 4,
            Value::Int64(_) | Value::Double(_) => 8,
            Value::Text(s) => s.len(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
        }
    }
}

// =============================================================================
// Series Paths
// =============================================================================

/// Full path of one series: `<device>.<measurement>`
///
/// The measurement is the last dot-separated segment; everything before it
/// names the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesPath {
    pub device: String,
    pub measurement: String,
}

impl SeriesPath {
    pub fn new(device: impl Into<String>, measurement: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            measurement: measurement.into(),
        }
    }
}

impl fmt::Display for SeriesPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.device, self.measurement)
    }
}

impl FromStr for SeriesPath {
    type Err = ChronoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.rsplit_once('.') {
            Some((device, measurement)) if !device.is_empty() && !measurement.is_empty() => {
                Ok(SeriesPath::new(device, measurement))
            }
            _ => Err(ChronoError::Corruption(format!(
                "Invalid series path: {:?}",
                s
            ))),
        }
    }
}

// =============================================================================
// File Schema
// =============================================================================

/// Measurement name → declared data type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSchema {
    measurements: BTreeMap<String, DataType>,
}

impl FileSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare (or redeclare) a measurement
    pub fn register(&mut self, measurement: impl Into<String>, data_type: DataType) {
        self.measurements.insert(measurement.into(), data_type);
    }

    /// Declared type of a measurement, if known
    pub fn data_type(&self, measurement: &str) -> Option<DataType> {
        self.measurements.get(measurement).copied()
    }

    pub fn contains(&self, measurement: &str) -> bool {
        self.measurements.contains_key(measurement)
    }

    /// Iterate measurements in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, DataType)> {
        self.measurements.iter().map(|(m, t)| (m.as_str(), *t))
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}

// =============================================================================
// Schema Log
// =============================================================================

/// Append-only text log of measurement registrations
pub struct SchemaLog {
    path: PathBuf,
    writer: Mutex<Option<File>>,
}

impl SchemaLog {
    pub const FILE_NAME: &'static str = "schema.log";

    /// Open the schema log inside `dir` (nothing is created until the first append)
    pub fn open(dir: &Path) -> Self {
        Self {
            path: dir.join(Self::FILE_NAME),
            writer: Mutex::new(None),
        }
    }

    /// Replay every registration; a missing log is an empty schema
    pub fn load(&self) -> Result<FileSchema> {
        let mut schema = FileSchema::new();
        if !self.path.exists() {
            return Ok(schema);
        }

        let reader = BufReader::new(File::open(&self.path)?);
        for line in reader.lines() {
            let line = line?;
            let (measurement, data_type) = line.split_once(',').ok_or_else(|| {
                ChronoError::Corruption(format!("Malformed schema line: {:?}", line))
            })?;
            schema.register(measurement, data_type.parse()?);
        }

        debug!(path = %self.path.display(), measurements = schema.len(), "loaded schema log");
        Ok(schema)
    }

    /// Durably append one registration
    pub fn append(&self, measurement: &str, data_type: DataType) -> Result<()> {
        if measurement.contains(',') || measurement.contains('\n') {
            return Err(ChronoError::Config(format!(
                "Measurement name may not contain ',' or newlines: {:?}",
                measurement
            )));
        }

        let mut guard = self.writer.lock();
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            *guard = Some(file);
        }

        if let Some(file) = guard.as_mut() {
            writeln!(file, "{},{}", measurement, data_type)?;
            file.sync_data()?;
        }
        Ok(())
    }
}
