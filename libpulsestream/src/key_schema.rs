// The key schema is the only place where facility knowledge lives. Everything the
// analysis code sees is phrased in common keys:
// native type -> SchemaEntry(common key, record name, unit)
// and, inverted,
// common key -> [native type, ...]
// Several native types usually collapse to one common key (every AGIPD module is a
// photonPixelDetector), so the inverse table holds a list.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use fxhash::FxHashMap;

use super::error::KeySchemaError;
use super::record::{Record, RecordSource, Unit, Value};

const ENTRIES_PER_LINE: usize = 4; //native type, common key, record name, unit

/// Load the schema bundled with the library
fn load_default_schema() -> String {
    String::from(include_str!("data/default_key_schema.csv"))
}

/// What the schema knows about one native type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEntry {
    pub common_key: String,
    pub record_name: String,
    pub unit: Unit,
}

impl SchemaEntry {
    pub fn new(common_key: &str, record_name: &str, unit: Unit) -> Self {
        Self {
            common_key: common_key.to_string(),
            record_name: record_name.to_string(),
            unit,
        }
    }
}

/// KeySchema maps facility-native field identifiers to common keys and back.
///
/// A schema is built once per facility and never changes during a run. It is read from a
/// CSV file where each row has four columns: native type, common key, record name, unit.
#[derive(Debug, Clone, Default)]
pub struct KeySchema {
    native_to_common: FxHashMap<String, SchemaEntry>,
    common_to_native: BTreeMap<String, Vec<String>>,
}

impl KeySchema {
    /// Create a new KeySchema
    /// If the path is None, we load the default that is bundled with the library
    pub fn new(path: Option<&Path>) -> Result<Self, KeySchemaError> {
        let mut contents = String::new();
        if let Some(p) = path {
            let mut file = File::open(p)?;
            file.read_to_string(&mut contents)?;
        } else {
            contents = load_default_schema();
        }
        Self::parse(&contents)
    }

    /// Parse the CSV form of a schema
    pub fn parse(contents: &str) -> Result<Self, KeySchemaError> {
        let mut schema = KeySchema::default();
        let mut lines = contents.lines().enumerate();
        lines.next(); // Skip the header
        for (number, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let entries: Vec<&str> = line.split(',').collect();
            if entries.len() != ENTRIES_PER_LINE {
                return Err(KeySchemaError::BadFileFormat(number + 1));
            }
            schema.insert(
                entries[0],
                SchemaEntry::new(entries[1], entries[2], Unit::from(entries[3].to_string())),
            )?;
        }
        Ok(schema)
    }

    /// Build a schema from in-memory entries
    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = (&'a str, SchemaEntry)>,
    ) -> Result<Self, KeySchemaError> {
        let mut schema = KeySchema::default();
        for (native_type, entry) in entries {
            schema.insert(native_type, entry)?;
        }
        Ok(schema)
    }

    fn insert(&mut self, native_type: &str, entry: SchemaEntry) -> Result<(), KeySchemaError> {
        if self.native_to_common.contains_key(native_type) {
            return Err(KeySchemaError::DuplicateNativeType(native_type.to_string()));
        }
        self.common_to_native
            .entry(entry.common_key.clone())
            .or_default()
            .push(native_type.to_string());
        self.native_to_common.insert(native_type.to_string(), entry);
        Ok(())
    }

    /// The schema entry for a native type, if the schema covers it
    pub fn entry(&self, native_type: &str) -> Option<&SchemaEntry> {
        self.native_to_common.get(native_type)
    }

    /// The common key a native type collapses to
    pub fn common_key(&self, native_type: &str) -> Option<&str> {
        self.entry(native_type).map(|e| e.common_key.as_str())
    }

    /// All native types which satisfy a common key
    pub fn native_types(&self, common_key: &str) -> &[String] {
        self.common_to_native
            .get(common_key)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_common_key(&self, key: &str) -> bool {
        self.common_to_native.contains_key(key)
    }

    pub fn common_keys(&self) -> impl Iterator<Item = &str> {
        self.common_to_native.keys().map(|k| k.as_str())
    }

    /// Wrap a raw field as a Record if its native type maps to the requested common key.
    ///
    /// Returns None when the native type is not in the schema or maps elsewhere; this is
    /// not an error, unmapped fields are simply invisible to common-key queries.
    pub fn build(&self, common_key: &str, native_type: &str, raw_field: &Value) -> Option<Record> {
        let entry = self.entry(native_type)?;
        if entry.common_key != common_key {
            return None;
        }
        Some(Record::new(
            &entry.record_name,
            raw_field.clone(),
            Some(entry.unit.clone()),
            RecordSource::Schema(native_type.to_string()),
        ))
    }
}
