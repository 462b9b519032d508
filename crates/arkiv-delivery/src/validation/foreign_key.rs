//! Foreign key validation
//!
//! Every foreign key value of a chunk must match exactly one row of the
//! referenced candidate key. Matches are counted through the repository's
//! live query interface when it has one, with confirmed values cached per
//! referenced key. Otherwise the referenced key's values are loaded into the
//! cache once and counted in memory. A referenced key with more distinct
//! values than the cache may hold is streamed again for every chunk, counting
//! only the values that chunk needs.

use arkiv_common::{CandidateKey, DataSource, ForeignKey, Row, Table};
use async_trait::async_trait;
use futures::TryStreamExt;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::cache::{CacheEntry, KeyValueCache, Preload};
use super::canonical::{KeyValue, ResolvedKey};
use super::{notify_row, open_queryer, Validator};
use crate::command::ForeignKeyValidationCommand;
use crate::error::{MetadataError, Result, ValidationError};
use crate::events::{RowValidated, ValidationListener};
use crate::rows::RowsByTable;
use crate::source::{DataQueryer, DataRepository, ExtraCriteria};

/// Rows of a chunk sharing one foreign key value
#[derive(Debug)]
struct ValueGroup {
    value: KeyValue,
    /// Indices into [`RowsByTable::rows`], in stream order
    rows: Vec<usize>,
}

/// Where the matches of one chunk are counted
enum Counts<'a> {
    Query(&'a dyn DataQueryer),
    InMemory(Cow<'a, HashMap<KeyValue, u64>>),
}

/// Checks foreign keys against their referenced candidate keys
pub struct ForeignKeyValidator {
    repository: Arc<dyn DataRepository>,
    cache: KeyValueCache,
    listeners: Vec<Arc<dyn ValidationListener>>,
}

impl ForeignKeyValidator {
    pub fn new(repository: Arc<dyn DataRepository>) -> Self {
        Self {
            repository,
            cache: KeyValueCache::new(),
            listeners: Vec::new(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ValidationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Replace the value ceiling of the cache, [`super::MAX_CACHED_VALUES`] by default
    pub fn with_max_cached_values(mut self, max_values: usize) -> Self {
        self.cache = KeyValueCache::with_max_values(max_values);
        self
    }

    pub fn cache(&self) -> &KeyValueCache {
        &self.cache
    }

    #[instrument(skip_all, fields(table = %table.target_name(), foreign_key = %foreign_key.name))]
    async fn validate_foreign_key(
        &self,
        data_source: &DataSource,
        table: &Table,
        foreign_key: &ForeignKey,
        rows: &mut RowsByTable,
        queryer: Option<&dyn DataQueryer>,
        command: &ForeignKeyValidationCommand,
    ) -> Result<()> {
        let (referenced_table, referenced_key) = resolve_reference(data_source, table, foreign_key)?;
        let own = ResolvedKey::resolve(table, &foreign_key.name, &foreign_key.fields)?;
        let target = ResolvedKey::resolve(referenced_table, &referenced_key.name, &referenced_key.fields)?;

        let table_name = table.target_name();
        let groups = group_values(&own, rows, table_name)?;
        if groups.is_empty() {
            return Ok(());
        }

        let entry = self
            .cache
            .entry(&target.address(), command.number_of_foreign_tables_to_cache);

        let counts = match queryer {
            Some(queryer) => Counts::Query(queryer),
            None => {
                let preload = self
                    .cache
                    .preload(&entry, |limit| {
                        load_key_values(self.repository.as_ref(), data_source, &target, limit)
                    })
                    .await?;
                match preload {
                    Preload::Loaded(values) => Counts::InMemory(Cow::Borrowed(values)),
                    Preload::TooLarge => {
                        let wanted: HashSet<KeyValue> = groups.iter().map(|g| g.value.clone()).collect();
                        let values = count_key_values(self.repository.as_ref(), data_source, &target, &wanted).await?;
                        Counts::InMemory(Cow::Owned(values))
                    }
                }
            }
        };

        let mut orphans = Vec::new();
        for group in groups {
            for &index in &group.rows {
                if let Some(row) = rows.rows(table_name).get(index) {
                    notify_row(
                        &self.listeners,
                        RowValidated {
                            table: table_name,
                            key: &foreign_key.name,
                            row_index: index,
                            row,
                        },
                    );
                }
            }

            let matches = match &counts {
                Counts::Query(queryer) => {
                    self.count_with_queryer(*queryer, &entry, &own, &target, referenced_key, rows, table_name, &group)
                        .await?
                }
                Counts::InMemory(values) => values.get(&group.value).copied().unwrap_or(0),
            };

            match matches {
                1 => {}
                0 if command.remove_orphans => orphans.extend(group.rows),
                0 => {
                    return Err(ValidationError::MissingRelationship {
                        table: table_name.to_string(),
                        foreign_key: foreign_key.name.clone(),
                        referenced_table: referenced_table.target_name().to_string(),
                        value: group.value.to_string(),
                        rows: collect_rows(rows.rows(table_name), &group.rows),
                    }
                    .into())
                }
                matches => {
                    return Err(ValidationError::TooManyRelationships {
                        table: table_name.to_string(),
                        foreign_key: foreign_key.name.clone(),
                        referenced_table: referenced_table.target_name().to_string(),
                        value: group.value.to_string(),
                        matches,
                        rows: collect_rows(rows.rows(table_name), &group.rows),
                    }
                    .into())
                }
            }
        }

        if !orphans.is_empty() {
            let removed = rows.remove_rows(table_name, &orphans);
            info!(removed, "Removed rows without a referenced row");
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn count_with_queryer(
        &self,
        queryer: &dyn DataQueryer,
        entry: &CacheEntry,
        own: &ResolvedKey<'_>,
        target: &ResolvedKey<'_>,
        referenced_key: &CandidateKey,
        rows: &RowsByTable,
        table_name: &str,
        group: &ValueGroup,
    ) -> Result<u64> {
        let table_rows = rows.rows(table_name);
        let mut distinct: Vec<ExtraCriteria> = Vec::new();
        for row in group.rows.iter().filter_map(|&i| table_rows.get(i)) {
            let criteria = own.extra_criteria(row, target);
            if !distinct.contains(&criteria) {
                distinct.push(criteria);
            }
        }

        // Confirmed values hold for the bare key only
        let cacheable = distinct.iter().all(ExtraCriteria::is_empty);
        if cacheable && entry.contains(&group.value) {
            return Ok(1);
        }

        for criteria in &distinct {
            let matches = queryer
                .count_matching_candidate_key_values(target.table(), referenced_key, criteria, &group.value)
                .await?;
            if matches != 1 {
                return Ok(matches);
            }
        }

        if cacheable {
            self.cache.confirm(entry, group.value.clone());
        }
        Ok(1)
    }
}

#[async_trait]
impl Validator for ForeignKeyValidator {
    type Command = ForeignKeyValidationCommand;

    fn name(&self) -> &str {
        "foreign-key"
    }

    async fn validate(
        &self,
        target: &Table,
        rows: &mut RowsByTable,
        end_of_data: bool,
        command: &ForeignKeyValidationCommand,
    ) -> Result<()> {
        let data_source = Arc::clone(rows.data_source());

        let tables: Vec<&Table> = rows
            .table_names()
            .iter()
            .filter_map(|name| data_source.table(name))
            .filter(|table| !table.foreign_keys.is_empty())
            .collect();
        if tables.is_empty() {
            return Ok(());
        }

        debug!(table = %target.target_name(), end_of_data, "Validating foreign keys");

        let queryer = open_queryer(self.repository.as_ref()).await?;
        for table in tables {
            for foreign_key in &table.foreign_keys {
                self.validate_foreign_key(
                    &data_source,
                    table,
                    foreign_key,
                    rows,
                    queryer.as_deref(),
                    command,
                )
                .await?;
            }
        }
        Ok(())
    }
}

fn resolve_reference<'d>(
    data_source: &'d DataSource,
    table: &Table,
    foreign_key: &ForeignKey,
) -> Result<(&'d Table, &'d CandidateKey)> {
    let (referenced_table, referenced_key) =
        data_source
            .referenced_key(foreign_key)
            .ok_or_else(|| MetadataError::UnresolvedReference {
                table: table.target_name().to_string(),
                foreign_key: foreign_key.name.clone(),
                referenced_table: foreign_key.references.table.clone(),
                key: foreign_key.references.key.clone(),
            })?;

    if referenced_key.fields.len() != foreign_key.fields.len() {
        return Err(MetadataError::ArityMismatch {
            table: table.target_name().to_string(),
            foreign_key: foreign_key.name.clone(),
            fields: foreign_key.fields.len(),
            key: referenced_key.name.clone(),
            key_fields: referenced_key.fields.len(),
        }
        .into());
    }

    Ok((referenced_table, referenced_key))
}

/// Distinct non-null key values of the latest chunk, in first-appearance order
fn group_values(key: &ResolvedKey<'_>, rows: &RowsByTable, table_name: &str) -> Result<Vec<ValueGroup>> {
    let offset = rows.latest_chunk_offset(table_name);
    let mut groups: Vec<ValueGroup> = Vec::new();
    let mut positions: HashMap<KeyValue, usize> = HashMap::new();

    for (i, row) in rows.latest_chunk(table_name).iter().enumerate() {
        let value = key.value(row)?;
        if value.is_null() {
            continue;
        }
        match positions.get(&value) {
            Some(&position) => groups[position].rows.push(offset + i),
            None => {
                positions.insert(value.clone(), groups.len());
                groups.push(ValueGroup {
                    value,
                    rows: vec![offset + i],
                });
            }
        }
    }
    Ok(groups)
}

/// Count the values of a candidate key over the referenced table's rows
///
/// Gives up with [`Preload::TooLarge`] once more than `limit` distinct values
/// have been seen.
async fn load_key_values(
    repository: &dyn DataRepository,
    data_source: &DataSource,
    key: &ResolvedKey<'_>,
    limit: usize,
) -> Result<Preload> {
    let mut values: HashMap<KeyValue, u64> = HashMap::new();
    let mut chunks = repository
        .get_data_for_target_table(key.table().target_name(), data_source)
        .await?;

    while let Some(chunk) = chunks.try_next().await? {
        for row in &chunk.rows {
            *values.entry(key.value(row)?).or_default() += 1;
            if values.len() > limit {
                return Ok(Preload::TooLarge);
            }
        }
        if chunk.end_of_data {
            break;
        }
    }
    Ok(Preload::Loaded(values))
}

/// Count only the `wanted` values of a candidate key over the referenced table's rows
async fn count_key_values(
    repository: &dyn DataRepository,
    data_source: &DataSource,
    key: &ResolvedKey<'_>,
    wanted: &HashSet<KeyValue>,
) -> Result<HashMap<KeyValue, u64>> {
    let mut values: HashMap<KeyValue, u64> = HashMap::new();
    let mut chunks = repository
        .get_data_for_target_table(key.table().target_name(), data_source)
        .await?;

    while let Some(chunk) = chunks.try_next().await? {
        for row in &chunk.rows {
            let value = key.value(row)?;
            if wanted.contains(&value) {
                *values.entry(value).or_default() += 1;
            }
        }
        if chunk.end_of_data {
            break;
        }
    }
    Ok(values)
}

fn collect_rows(rows: &[Row], indices: &[usize]) -> Vec<Row> {
    indices.iter().filter_map(|&i| rows.get(i).cloned()).collect()
}
