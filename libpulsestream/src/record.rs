use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

/// The records produced by translating one key for one event, keyed by record name.
pub type Translation = BTreeMap<String, Record>;

/// Physical unit attached to a Record.
///
/// Units are kept symbolic; nothing in the ingestion layer converts between them.
/// Unknown unit strings are preserved as `Other` so that facility schemas can carry
/// whatever their data sheets say.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Unit {
    #[default]
    Dimensionless,
    Adu,
    Count,
    Joule,
    Millijoule,
    Microjoule,
    Electronvolt,
    Meter,
    Millimeter,
    Micrometer,
    Nanometer,
    Second,
    Nanosecond,
    Percent,
    Other(String),
}

impl FromStr for Unit {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "" => Self::Dimensionless,
            "ADU" | "adu" => Self::Adu,
            "count" => Self::Count,
            "J" => Self::Joule,
            "mJ" => Self::Millijoule,
            "uJ" => Self::Microjoule,
            "eV" => Self::Electronvolt,
            "m" => Self::Meter,
            "mm" => Self::Millimeter,
            "um" => Self::Micrometer,
            "nm" => Self::Nanometer,
            "s" => Self::Second,
            "ns" => Self::Nanosecond,
            "%" => Self::Percent,
            other => Self::Other(other.to_string()),
        })
    }
}

impl Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Self::Dimensionless => "",
            Self::Adu => "ADU",
            Self::Count => "count",
            Self::Joule => "J",
            Self::Millijoule => "mJ",
            Self::Microjoule => "uJ",
            Self::Electronvolt => "eV",
            Self::Meter => "m",
            Self::Millimeter => "mm",
            Self::Micrometer => "um",
            Self::Nanometer => "nm",
            Self::Second => "s",
            Self::Nanosecond => "ns",
            Self::Percent => "%",
            Self::Other(s) => s.as_str(),
        };
        write!(f, "{symbol}")
    }
}

impl From<String> for Unit {
    fn from(value: String) -> Self {
        match Self::from_str(&value) {
            Ok(unit) => unit,
            Err(never) => match never {},
        }
    }
}

impl From<Unit> for String {
    fn from(value: Unit) -> Self {
        value.to_string()
    }
}

/// A raw payload as delivered by the facility, and the value carried by a Record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Integer(i64),
    Array(ArrayD<f64>),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayD<f64>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Short description used in log messages; arrays are never printed in full
    pub fn describe(&self) -> String {
        match self {
            Self::Scalar(v) => format!("scalar {v}"),
            Self::Integer(v) => format!("integer {v}"),
            Self::Array(a) => format!("array {:?}", a.shape()),
            Self::Text(s) => format!("text ({} bytes)", s.len()),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<ArrayD<f64>> for Value {
    fn from(value: ArrayD<f64>) -> Self {
        Self::Array(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Where a Record came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSource {
    /// Extracted through the key schema from the named native field
    Schema(String),
    /// A literal native field requested by name, bypassing the schema
    Native(String),
    /// Attached by analysis code after translation
    Analysis,
}

impl RecordSource {
    pub fn tag(&self) -> &str {
        match self {
            Self::Schema(_) => "schema",
            Self::Native(_) => "native",
            Self::Analysis => "analysis",
        }
    }

    /// The native field which produced the record, if any
    pub fn native_field(&self) -> Option<&str> {
        match self {
            Self::Schema(f) | Self::Native(f) => Some(f.as_str()),
            Self::Analysis => None,
        }
    }
}

/// A named value with a physical unit and a source annotation.
///
/// Records have no setters; once built they are only ever read.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    name: String,
    value: Value,
    unit: Option<Unit>,
    source: RecordSource,
}

impl Record {
    pub fn new(name: &str, value: Value, unit: Option<Unit>, source: RecordSource) -> Self {
        Self {
            name: name.to_string(),
            value,
            unit,
            source,
        }
    }

    /// Shorthand for values attached by analysis code
    pub fn analysis(name: &str, value: impl Into<Value>, unit: Option<Unit>) -> Self {
        Self::new(name, value.into(), unit, RecordSource::Analysis)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn unit(&self) -> Option<&Unit> {
        self.unit.as_ref()
    }

    pub fn source(&self) -> &RecordSource {
        &self.source
    }
}

/// Insert a record into a translation under its own name
pub fn add_record(values: &mut Translation, record: Record) {
    values.insert(record.name.clone(), record);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_symbols() {
        for symbol in ["", "ADU", "J", "mJ", "nm", "ns", "%"] {
            let unit = Unit::from(symbol.to_string());
            assert_eq!(unit.to_string(), symbol);
        }
        assert_eq!(
            Unit::from(String::from("mJ/um**2")),
            Unit::Other(String::from("mJ/um**2"))
        );
    }

    #[test]
    fn test_add_record() {
        let mut values = Translation::new();
        add_record(
            &mut values,
            Record::analysis("hitscore - CCD", 12_i64, None),
        );
        let record = &values["hitscore - CCD"];
        assert_eq!(record.value().as_f64(), Some(12.0));
        assert_eq!(record.source().tag(), "analysis");
        assert!(record.source().native_field().is_none());
    }

    #[test]
    fn test_describe_never_prints_arrays() {
        let frame = Value::from(ArrayD::<f64>::zeros(ndarray::IxDyn(&[512, 128])));
        assert_eq!(frame.describe(), "array [512, 128]");
        assert_eq!(Value::from("dark").describe(), "text (4 bytes)");
    }
}
