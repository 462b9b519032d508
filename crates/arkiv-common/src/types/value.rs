//! Row and value model

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{ArkivError, Result};

/// Canonical text used for SQL-style `NULL` in key values
pub const NULL_CANONICAL: &str = "\u{0}";

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];

/// Declared type of a table field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
    Timestamp,
}

impl FieldType {
    /// Convert raw source text into a typed value
    ///
    /// Empty input is `Null` for every type.
    pub fn parse(self, raw: &str) -> Result<DataValue> {
        if raw.is_empty() {
            return Ok(DataValue::Null);
        }

        let conversion_error = || ArkivError::Conversion {
            value: raw.to_string(),
            field_type: self.to_string(),
        };

        let value = match self {
            FieldType::Text => DataValue::Text(raw.to_string()),
            FieldType::Integer => {
                DataValue::Integer(raw.trim().parse().map_err(|_| conversion_error())?)
            },
            FieldType::Decimal => {
                DataValue::Decimal(raw.trim().parse().map_err(|_| conversion_error())?)
            },
            FieldType::Boolean => match raw.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => DataValue::Boolean(true),
                "false" | "0" | "no" => DataValue::Boolean(false),
                _ => return Err(conversion_error()),
            },
            FieldType::Date => DataValue::Date(
                NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| conversion_error())?,
            ),
            FieldType::Timestamp => DataValue::Timestamp(
                TIMESTAMP_FORMATS
                    .iter()
                    .find_map(|format| NaiveDateTime::parse_from_str(raw.trim(), format).ok())
                    .ok_or_else(conversion_error)?,
            ),
        };

        Ok(value)
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Text => write!(f, "text"),
            FieldType::Integer => write!(f, "integer"),
            FieldType::Decimal => write!(f, "decimal"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Date => write!(f, "date"),
            FieldType::Timestamp => write!(f, "timestamp"),
        }
    }
}

/// A single field value of a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl DataValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    /// Type-erased text form used when comparing key values
    ///
    /// `Integer(7)` and `Text("7")` share the canonical form `"7"`, so a
    /// text foreign key can reference an integer candidate key.
    pub fn canonical(&self) -> String {
        match self {
            DataValue::Null => NULL_CANONICAL.to_string(),
            DataValue::Boolean(b) => b.to_string(),
            DataValue::Integer(i) => i.to_string(),
            DataValue::Decimal(d) => d.to_string(),
            DataValue::Date(d) => d.format(DATE_FORMAT).to_string(),
            DataValue::Timestamp(ts) => ts.format(TIMESTAMP_FORMATS[0]).to_string(),
            DataValue::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        DataValue::Text(value.to_string())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        DataValue::Text(value)
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        DataValue::Integer(value)
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        DataValue::Boolean(value)
    }
}

/// One row of a table, values in table field order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Row {
    values: Vec<DataValue>,
}

impl Row {
    pub fn new(values: Vec<DataValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, index: usize) -> Option<&DataValue> {
        self.values.get(index)
    }

    /// Replace a value in place; returns the previous value
    pub fn set(&mut self, index: usize, value: DataValue) -> Option<DataValue> {
        self.values
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, value))
    }

    pub fn values(&self) -> &[DataValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<V: Into<DataValue>> FromIterator<V> for Row {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_empty_is_null() {
        for field_type in [FieldType::Text, FieldType::Integer, FieldType::Date] {
            assert_eq!(field_type.parse("").unwrap(), DataValue::Null);
        }
    }

    #[test]
    fn test_parse_rejects_malformed_values() {
        assert!(matches!(
            FieldType::Integer.parse("12a"),
            Err(ArkivError::Conversion { .. })
        ));
        assert!(FieldType::Boolean.parse("maybe").is_err());
        assert!(FieldType::Date.parse("2024-13-01").is_err());
    }

    #[test]
    fn test_parse_temporal_values() {
        let date = FieldType::Date.parse("2024-02-29").unwrap();
        assert_eq!(date.canonical(), "2024-02-29");

        let ts = FieldType::Timestamp.parse("2024-02-29 10:15:00").unwrap();
        assert_eq!(ts.canonical(), "2024-02-29T10:15:00");
    }

    #[test]
    fn test_canonical_is_type_erased() {
        assert_eq!(DataValue::Integer(42).canonical(), DataValue::from("42").canonical());
        assert_ne!(DataValue::Null.canonical(), DataValue::from("").canonical());
    }

    #[test]
    fn test_row_set_replaces_value() {
        let mut row: Row = ["a", "b"].into_iter().collect();
        let previous = row.set(1, DataValue::Integer(3));
        assert_eq!(previous, Some(DataValue::from("b")));
        assert_eq!(row.get(1), Some(&DataValue::Integer(3)));
        assert_eq!(row.set(5, DataValue::Null), None);
    }

    proptest! {
        #[test]
        fn integer_text_and_value_canonicalize_alike(n in any::<i64>()) {
            let parsed = FieldType::Integer.parse(&n.to_string()).unwrap();
            prop_assert_eq!(parsed.canonical(), DataValue::Text(n.to_string()).canonical());
        }
    }
}
