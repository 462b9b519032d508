//! Key-value canonicalization
//!
//! A key is an ordered list of fields, each with an optional value mapping.
//! This module turns a key into
//!
//! - a *dictionary name*: a deterministic cache address derived from the
//!   key's table and field identities, and
//! - a [`KeyValue`]: a type-erased, comparable string built from a row's
//!   values, so a foreign key value and a candidate key value compare equal
//!   whenever they denote the same target values.

use arkiv_common::{DataValue, KeyField, Row, Table, NULL_CANONICAL};

use crate::error::{MetadataError, Result};
use crate::source::ExtraCriteria;

/// Separates the components of a multi-field key value
pub const COMPONENT_SEPARATOR: char = '\u{1f}';

/// Precedes a separator or escape character that belongs to a component
pub const COMPONENT_ESCAPE: char = '\\';

/// Canonical value of a key in one row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyValue(String);

impl KeyValue {
    pub fn from_components<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut canonical = String::new();
        for (i, component) in components.into_iter().enumerate() {
            if i > 0 {
                canonical.push(COMPONENT_SEPARATOR);
            }
            for ch in component.as_ref().chars() {
                if ch == COMPONENT_SEPARATOR || ch == COMPONENT_ESCAPE {
                    canonical.push(COMPONENT_ESCAPE);
                }
                canonical.push(ch);
            }
        }
        Self(canonical)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The components as given to [`KeyValue::from_components`]
    pub fn components(&self) -> Vec<String> {
        let mut components = Vec::new();
        let mut current = String::new();
        let mut chars = self.0.chars();
        while let Some(ch) = chars.next() {
            match ch {
                COMPONENT_ESCAPE => current.extend(chars.next()),
                COMPONENT_SEPARATOR => components.push(std::mem::take(&mut current)),
                _ => current.push(ch),
            }
        }
        components.push(current);
        components
    }

    /// Whether every component is `NULL`
    pub fn is_null(&self) -> bool {
        self.components().iter().all(|c| c == NULL_CANONICAL)
    }
}

impl std::fmt::Display for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, component) in self.components().into_iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if component == NULL_CANONICAL {
                write!(f, "NULL")?;
            } else {
                write!(f, "{}", component)?;
            }
        }
        Ok(())
    }
}

/// Cache address of a key: table target name and field names
pub fn dictionary_name(table: &Table, fields: &[KeyField]) -> String {
    let names: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
    format!("{}({})", table.target_name(), names.join(","))
}

/// A key whose fields have been located in its table
#[derive(Debug, Clone)]
pub struct ResolvedKey<'a> {
    table: &'a Table,
    name: &'a str,
    fields: &'a [KeyField],
    indices: Vec<usize>,
}

impl<'a> ResolvedKey<'a> {
    pub fn resolve(
        table: &'a Table,
        name: &'a str,
        fields: &'a [KeyField],
    ) -> std::result::Result<Self, MetadataError> {
        if fields.is_empty() {
            return Err(MetadataError::EmptyKey {
                table: table.target_name().to_string(),
                key: name.to_string(),
            });
        }

        let indices = fields
            .iter()
            .map(|f| {
                table.field_index(&f.field).ok_or_else(|| MetadataError::UnknownField {
                    table: table.target_name().to_string(),
                    key: name.to_string(),
                    field: f.field.clone(),
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            table,
            name,
            fields,
            indices,
        })
    }

    pub fn table(&self) -> &'a Table {
        self.table
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    pub fn address(&self) -> String {
        dictionary_name(self.table, self.fields)
    }

    /// Canonical key value of `row`, with value mappings applied
    ///
    /// Values missing from a short row count as `NULL`. Mapping failures of
    /// strict mappings surface as mapping errors.
    pub fn value(&self, row: &Row) -> Result<KeyValue> {
        let mut components = Vec::with_capacity(self.indices.len());
        for (field, &index) in self.fields.iter().zip(&self.indices) {
            let raw = row.get(index).unwrap_or(&DataValue::Null);
            let canonical = raw.canonical();
            let component = match &field.mapping {
                Some(mapping) if !raw.is_null() => mapping.map(canonical)?,
                _ => canonical,
            };
            components.push(component);
        }
        Ok(KeyValue::from_components(components))
    }

    /// Other values of `row` that narrow a lookup on `target`'s table
    ///
    /// A non-null field of this key's table becomes an equality criterion
    /// when it is not part of this key and the target table has a field of
    /// the same name outside the target key. Checked against itself, a
    /// candidate key yields the row's non-key fields.
    pub fn extra_criteria(&self, row: &Row, target: &ResolvedKey<'_>) -> ExtraCriteria {
        let mut criteria = ExtraCriteria::default();
        for (index, field) in self.table.fields.iter().enumerate() {
            if self.indices.contains(&index) {
                continue;
            }
            let Some(target_index) = target.table.field_index(&field.name) else {
                continue;
            };
            if target.indices.contains(&target_index) {
                continue;
            }
            match row.get(index) {
                Some(value) if !value.is_null() => criteria.push(field.name.clone(), value.clone()),
                _ => {}
            }
        }
        criteria
    }
}
