//! Candidate and primary key validation
//!
//! Each candidate key value must occur once per table. Without a live query
//! interface, values are accumulated per key across the chunks of a table and
//! every repeat is a violation. With one, multiplicities are counted over all
//! rows at end of data. A repeated value is always a violation; its live
//! count, narrowed by the row's other fields, is logged with the failure.

use arkiv_common::{CandidateKey, Row, Table};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::canonical::{dictionary_name, KeyValue, ResolvedKey};
use super::{notify_row, open_queryer, Validator};
use crate::command::CandidateKeyValidationCommand;
use crate::error::{DeliveryError, MetadataError, Result, ValidationError};
use crate::events::{RowValidated, ValidationListener};
use crate::rows::RowsByTable;
use crate::source::{DataQueryer, DataRepository};

/// Checks that candidate key values are unique within their table
pub struct CandidateKeyValidator {
    repository: Arc<dyn DataRepository>,
    /// Values seen so far, per key address
    seen: DashMap<String, HashSet<KeyValue>>,
    listeners: Vec<Arc<dyn ValidationListener>>,
}

impl CandidateKeyValidator {
    pub fn new(repository: Arc<dyn DataRepository>) -> Self {
        Self {
            repository,
            seen: DashMap::new(),
            listeners: Vec::new(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ValidationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Number of values currently accumulated for `address`
    pub fn accumulated(&self, address: &str) -> usize {
        self.seen.get(address).map(|set| set.len()).unwrap_or(0)
    }

    fn notify_latest_chunk(&self, table: &Table, key: &CandidateKey, rows: &RowsByTable) {
        let table_name = table.target_name();
        let offset = rows.latest_chunk_offset(table_name);
        for (i, row) in rows.latest_chunk(table_name).iter().enumerate() {
            notify_row(
                &self.listeners,
                RowValidated {
                    table: table_name,
                    key: &key.name,
                    row_index: offset + i,
                    row,
                },
            );
        }
    }

    fn validate_accumulated(
        &self,
        key: &ResolvedKey<'_>,
        rows: &RowsByTable,
        end_of_data: bool,
    ) -> Result<()> {
        let table_name = key.table().target_name();
        let address = key.address();

        if rows.is_first_chunk(table_name) {
            self.seen.insert(address.clone(), HashSet::new());
        }

        let result = self.accumulate(key, &address, rows);
        if result.is_err() || end_of_data {
            self.seen.remove(&address);
        }
        result
    }

    fn accumulate(&self, key: &ResolvedKey<'_>, address: &str, rows: &RowsByTable) -> Result<()> {
        let table_name = key.table().target_name();
        let mut seen = self.seen.entry(address.to_string()).or_default();

        for row in rows.latest_chunk(table_name) {
            let value = key.value(row)?;
            if !seen.insert(value.clone()) {
                return Err(uniqueness_violation(key, &value, row));
            }
        }
        Ok(())
    }

    async fn validate_with_queryer(
        &self,
        queryer: &dyn DataQueryer,
        key: &ResolvedKey<'_>,
        candidate_key: &CandidateKey,
        rows: &RowsByTable,
    ) -> Result<()> {
        let all_rows = rows.rows(key.table().target_name());

        // value -> (occurrences, first offending row)
        let mut counts: HashMap<KeyValue, (u64, usize)> = HashMap::new();
        let mut order = Vec::new();
        for (i, row) in all_rows.iter().enumerate() {
            let value = key.value(row)?;
            let count = counts.entry(value.clone()).or_insert_with(|| {
                order.push(value.clone());
                (0, i)
            });
            count.0 += 1;
            if count.0 == 2 {
                count.1 = i;
            }
        }

        for value in order {
            let Some(&(occurrences, index)) = counts.get(&value) else {
                continue;
            };
            if occurrences == 1 {
                continue;
            }
            let Some(row) = all_rows.get(index) else {
                continue;
            };

            let criteria = key.extra_criteria(row, key);
            let live = queryer
                .count_matching_candidate_key_values(key.table(), candidate_key, &criteria, &value)
                .await?;
            warn!(value = %value, occurrences, live, "Key value repeats in the delivered rows");
            return Err(uniqueness_violation(key, &value, row));
        }
        Ok(())
    }
}

#[async_trait]
impl Validator for CandidateKeyValidator {
    type Command = CandidateKeyValidationCommand;

    fn name(&self) -> &str {
        "candidate-key"
    }

    #[instrument(skip_all, fields(table = %target.target_name(), end_of_data = end_of_data))]
    async fn validate(
        &self,
        target: &Table,
        rows: &mut RowsByTable,
        end_of_data: bool,
        command: &CandidateKeyValidationCommand,
    ) -> Result<()> {
        if target.candidate_keys.is_empty() {
            if command.require_candidate_key {
                return Err(MetadataError::NoCandidateKeys(target.target_name().to_string()).into());
            }
            debug!("Table has no candidate keys, skipping");
            return Ok(());
        }

        let keys = target
            .candidate_keys
            .iter()
            .map(|key| ResolvedKey::resolve(target, &key.name, &key.fields).map(|r| (key, r)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let queryer = open_queryer(self.repository.as_ref()).await?;
        for (candidate_key, key) in &keys {
            self.notify_latest_chunk(target, candidate_key, rows);
            match queryer.as_deref() {
                Some(queryer) if end_of_data => {
                    self.validate_with_queryer(queryer, key, candidate_key, rows)
                        .await?
                }
                Some(_) => {}
                None => self.validate_accumulated(key, rows, end_of_data)?,
            }
        }
        Ok(())
    }

    fn finish_table(&self, target: &Table) {
        for key in &target.candidate_keys {
            self.seen.remove(&dictionary_name(target, &key.fields));
        }
    }
}

fn uniqueness_violation(key: &ResolvedKey<'_>, value: &KeyValue, row: &Row) -> DeliveryError {
    ValidationError::UniquenessViolation {
        table: key.table().target_name().to_string(),
        key: key.name().to_string(),
        value: value.to_string(),
        row: row.clone(),
    }
    .into()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRepository;
    use arkiv_common::{DataSource, DataValue, Field};

    fn table() -> Table {
        Table::new("persons", vec![Field::integer("id"), Field::text("name")])
            .with_candidate_key(CandidateKey::primary("pk_persons", &["id"]))
    }

    fn rows_by_table(table: &Table) -> RowsByTable {
        RowsByTable::new(Arc::new(DataSource::new("registry", vec![table.clone()])))
    }

    fn chunk(ids: &[i64]) -> Vec<Row> {
        ids.iter()
            .map(|&id| Row::new(vec![DataValue::Integer(id), format!("p{id}").into()]))
            .collect()
    }

    fn command() -> CandidateKeyValidationCommand {
        CandidateKeyValidationCommand::default()
    }

    #[tokio::test]
    async fn test_duplicate_across_chunks_is_detected() {
        let table = table();
        let validator = CandidateKeyValidator::new(Arc::new(InMemoryRepository::new()));
        let mut rows = rows_by_table(&table);

        rows.append_chunk("persons", chunk(&[1, 2]));
        validator.validate(&table, &mut rows, false, &command()).await.unwrap();
        assert_eq!(validator.accumulated("persons(id)"), 2);

        rows.append_chunk("persons", chunk(&[3, 1]));
        let err = validator.validate(&table, &mut rows, true, &command()).await.unwrap_err();
        match err {
            DeliveryError::Validation(ValidationError::UniquenessViolation { key, value, row, .. }) => {
                assert_eq!(key, "pk_persons");
                assert_eq!(value, "1");
                assert_eq!(row, chunk(&[1])[0]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(validator.accumulated("persons(id)"), 0);
    }

    #[tokio::test]
    async fn test_unique_values_pass_and_clear_at_end_of_data() {
        let table = table();
        let validator = CandidateKeyValidator::new(Arc::new(InMemoryRepository::new()));
        let mut rows = rows_by_table(&table);

        rows.append_chunk("persons", chunk(&[1, 2]));
        validator.validate(&table, &mut rows, false, &command()).await.unwrap();
        rows.append_chunk("persons", chunk(&[3]));
        validator.validate(&table, &mut rows, true, &command()).await.unwrap();
        assert_eq!(validator.accumulated("persons(id)"), 0);
    }

    #[tokio::test]
    async fn test_first_chunk_resets_accumulation() {
        let table = table();
        let validator = CandidateKeyValidator::new(Arc::new(InMemoryRepository::new()));

        let mut first_attempt = rows_by_table(&table);
        first_attempt.append_chunk("persons", chunk(&[1, 2]));
        validator.validate(&table, &mut first_attempt, false, &command()).await.unwrap();

        let mut retry = rows_by_table(&table);
        retry.append_chunk("persons", chunk(&[1, 2]));
        validator.validate(&table, &mut retry, true, &command()).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_candidate_keys() {
        let table = Table::new("loose", vec![Field::text("x")]);
        let validator = CandidateKeyValidator::new(Arc::new(InMemoryRepository::new()));
        let mut rows = rows_by_table(&table);
        rows.append_chunk("loose", vec![Row::new(vec!["a".into()])]);

        let lenient = CandidateKeyValidationCommand {
            require_candidate_key: false,
        };
        validator.validate(&table, &mut rows, true, &lenient).await.unwrap();

        let err = validator.validate(&table, &mut rows, true, &command()).await.unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::Metadata(MetadataError::NoCandidateKeys(name)) if name == "loose"
        ));
    }

    #[tokio::test]
    async fn test_query_path_checks_at_end_of_data() {
        let table = table();
        let repository = Arc::new(InMemoryRepository::new().queryable(true));
        repository.insert_rows("persons", chunk(&[1, 2, 2]));
        let validator = CandidateKeyValidator::new(repository.clone());
        let mut rows = rows_by_table(&table);

        rows.append_chunk("persons", chunk(&[1, 2]));
        validator.validate(&table, &mut rows, false, &command()).await.unwrap();
        assert_eq!(repository.query_count(), 0);

        rows.append_chunk("persons", chunk(&[2]));
        let err = validator.validate(&table, &mut rows, true, &command()).await.unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::Validation(ValidationError::UniquenessViolation { ref value, .. }) if value == "2"
        ));
        assert_eq!(repository.query_count(), 1);
    }

    #[tokio::test]
    async fn test_repeat_in_stream_fails_even_when_repository_holds_one() {
        let table = table();
        let repository = Arc::new(InMemoryRepository::new().queryable(true));
        repository.insert_rows("persons", chunk(&[1, 2]));
        let validator = CandidateKeyValidator::new(repository.clone());
        let mut rows = rows_by_table(&table);

        rows.append_chunk("persons", chunk(&[1, 2, 2]));
        let err = validator.validate(&table, &mut rows, true, &command()).await.unwrap_err();
        match err {
            DeliveryError::Validation(ValidationError::UniquenessViolation { value, row, .. }) => {
                assert_eq!(value, "2");
                assert_eq!(row, chunk(&[2])[0]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(repository.query_count(), 1);
    }

    #[tokio::test]
    async fn test_finish_table_drops_accumulated_values() {
        let table = table();
        let validator = CandidateKeyValidator::new(Arc::new(InMemoryRepository::new()));
        let mut rows = rows_by_table(&table);

        rows.append_chunk("persons", chunk(&[1, 2]));
        validator.validate(&table, &mut rows, false, &command()).await.unwrap();
        assert_eq!(validator.accumulated("persons(id)"), 2);

        validator.finish_table(&table);
        assert_eq!(validator.accumulated("persons(id)"), 0);
    }
}
