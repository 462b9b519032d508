//! Archival metadata model
//!
//! Passive descriptors of a delivery: the data source, its tables, their
//! fields, candidate keys and foreign keys. Nothing here validates data; the
//! descriptors are immutable for the duration of a delivery run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::value::{DataValue, FieldType, Row};
use crate::error::{ArkivError, Result};

/// Description of a complete delivery: package identity and its tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    /// Unique package identifier of the archive version
    pub package_id: Uuid,

    /// Human-readable name of the delivering system
    pub name: String,

    /// Tables in delivery order
    #[serde(default)]
    pub tables: Vec<Table>,
}

impl DataSource {
    pub fn new(name: impl Into<String>, tables: Vec<Table>) -> Self {
        Self {
            package_id: Uuid::new_v4(),
            name: name.into(),
            tables,
        }
    }

    /// Look up a table by target name, falling back to source name
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.target_name() == name)
            .or_else(|| self.tables.iter().find(|t| t.name == name))
    }

    /// Resolve the candidate key a foreign key points at
    pub fn referenced_key(&self, foreign_key: &ForeignKey) -> Option<(&Table, &CandidateKey)> {
        let table = self.table(&foreign_key.references.table)?;
        let key = table.candidate_key(&foreign_key.references.key)?;
        Some((table, key))
    }
}

/// A table with its fields and keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Source name
    pub name: String,

    /// Name in the archive, defaults to the source name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,

    pub fields: Vec<Field>,

    #[serde(default)]
    pub candidate_keys: Vec<CandidateKey>,

    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            target_name: None,
            fields,
            candidate_keys: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn with_candidate_key(mut self, key: CandidateKey) -> Self {
        self.candidate_keys.push(key);
        self
    }

    pub fn with_foreign_key(mut self, key: ForeignKey) -> Self {
        self.foreign_keys.push(key);
        self
    }

    pub fn target_name(&self) -> &str {
        self.target_name.as_deref().unwrap_or(&self.name)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Value of the named field in `row`
    pub fn value<'r>(&self, row: &'r Row, field: &str) -> Option<&'r DataValue> {
        self.field_index(field).and_then(|i| row.get(i))
    }

    pub fn candidate_key(&self, name: &str) -> Option<&CandidateKey> {
        self.candidate_keys.iter().find(|k| k.name == name)
    }

    pub fn primary_key(&self) -> Option<&CandidateKey> {
        self.candidate_keys.iter().find(|k| k.primary)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,

    #[serde(rename = "type", default)]
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }
}

/// Maps canonical source values onto canonical target values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ValueMapping {
    pub values: BTreeMap<String, String>,

    /// Reject values that have no entry instead of passing them through
    #[serde(default)]
    pub strict: bool,
}

impl ValueMapping {
    pub fn map(&self, canonical: String) -> Result<String> {
        match self.values.get(&canonical) {
            Some(mapped) => Ok(mapped.clone()),
            None if self.strict => Err(ArkivError::UnmappedValue { value: canonical }),
            None => Ok(canonical),
        }
    }
}

/// One position of a key: a field plus an optional value mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyField {
    pub field: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<ValueMapping>,
}

impl KeyField {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            mapping: None,
        }
    }

    pub fn mapped(field: impl Into<String>, mapping: ValueMapping) -> Self {
        Self {
            field: field.into(),
            mapping: Some(mapping),
        }
    }
}

/// A set of fields whose combined value is unique per row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateKey {
    pub name: String,
    pub fields: Vec<KeyField>,

    #[serde(default)]
    pub primary: bool,
}

impl CandidateKey {
    pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| KeyField::new(*f)).collect(),
            primary: false,
        }
    }

    pub fn primary(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            primary: true,
            ..Self::new(name, fields)
        }
    }
}

/// Target of a foreign key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyReference {
    /// Referenced table (target or source name)
    pub table: String,
    /// Name of the referenced candidate key
    pub key: String,
}

/// A set of fields that must match a candidate key of another (or the same) table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub fields: Vec<KeyField>,
    pub references: KeyReference,
}

impl ForeignKey {
    pub fn new(
        name: impl Into<String>,
        fields: &[&str],
        table: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| KeyField::new(*f)).collect(),
            references: KeyReference {
                table: table.into(),
                key: key.into(),
            },
        }
    }
}
