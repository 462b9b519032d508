//! Shared fixtures for delivery integration tests
//!
//! - A small shop data source (customers, products, orders) with keys
//! - Recording collaborators that capture handler decisions and listener
//!   notifications
//! - A scripted validator whose failures are chosen per call

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use arkiv_common::{CandidateKey, DataSource, DataValue, Field, ForeignKey, Row, Table};
use arkiv_delivery::memory::{InMemoryArchive, InMemoryRepository, StaticMetadataSource};
use arkiv_delivery::validation::Validator;
use arkiv_delivery::{
    DeliveryCommand, DeliveryError, DeliveryListener, DeliveryOrchestrator, ErrorKind,
    ExceptionHandler, Result, RowsByTable,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn customers() -> Table {
    Table::new("customers", vec![Field::integer("id"), Field::text("name")])
        .with_candidate_key(CandidateKey::primary("pk_customers", &["id"]))
}

pub fn products() -> Table {
    Table::new("products", vec![Field::text("sku"), Field::text("title")])
        .with_candidate_key(CandidateKey::primary("pk_products", &["sku"]))
}

pub fn orders() -> Table {
    Table::new(
        "orders",
        vec![Field::integer("id"), Field::integer("customer"), Field::text("sku")],
    )
    .with_candidate_key(CandidateKey::primary("pk_orders", &["id"]))
    .with_foreign_key(ForeignKey::new("fk_customer", &["customer"], "customers", "pk_customers"))
    .with_foreign_key(ForeignKey::new("fk_product", &["sku"], "products", "pk_products"))
}

pub fn shop() -> DataSource {
    DataSource::new("shop", vec![customers(), products(), orders()])
}

pub fn customer(id: i64, name: &str) -> Row {
    Row::new(vec![DataValue::Integer(id), name.into()])
}

pub fn product(sku: &str, title: &str) -> Row {
    Row::new(vec![sku.into(), title.into()])
}

pub fn order(id: i64, customer: i64, sku: &str) -> Row {
    Row::new(vec![DataValue::Integer(id), DataValue::Integer(customer), sku.into()])
}

/// Repository holding a consistent shop
pub fn shop_repository(chunk_size: usize) -> InMemoryRepository {
    let repository = InMemoryRepository::new().with_chunk_size(chunk_size);
    repository.insert_rows("customers", vec![customer(1, "Ada"), customer(2, "Bo")]);
    repository.insert_rows("products", vec![product("A-1", "Anchor"), product("B-2", "Buoy")]);
    repository.insert_rows(
        "orders",
        vec![order(10, 1, "A-1"), order(11, 2, "B-2"), order(12, 1, "B-2")],
    );
    repository
}

/// Collaborators of one orchestrator, kept for inspection
pub struct Harness {
    pub metadata: Arc<StaticMetadataSource>,
    pub repository: Arc<InMemoryRepository>,
    pub archive: Arc<InMemoryArchive>,
    pub handler: Arc<RecordingHandler>,
}

impl Harness {
    pub fn new(data_source: DataSource, repository: InMemoryRepository, answers: &[bool]) -> Self {
        Self {
            metadata: Arc::new(StaticMetadataSource::new(data_source)),
            repository: Arc::new(repository),
            archive: Arc::new(InMemoryArchive::new()),
            handler: Arc::new(RecordingHandler::new(answers)),
        }
    }

    pub fn orchestrator(&self) -> DeliveryOrchestrator {
        DeliveryOrchestrator::new(
            self.metadata.clone(),
            self.repository.clone(),
            self.archive.clone(),
            self.handler.clone(),
        )
    }
}

/// Answers retry requests from a script, then declines
#[derive(Debug, Default)]
pub struct RecordingHandler {
    answers: Mutex<VecDeque<bool>>,
    handled: Mutex<Vec<ErrorKind>>,
    retry_requests: Mutex<Vec<(String, ErrorKind)>>,
}

impl RecordingHandler {
    pub fn new(answers: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            ..Self::default()
        }
    }

    pub fn handled(&self) -> Vec<ErrorKind> {
        self.handled.lock().unwrap().clone()
    }

    pub fn retry_requests(&self) -> Vec<(String, ErrorKind)> {
        self.retry_requests.lock().unwrap().clone()
    }
}

impl ExceptionHandler for RecordingHandler {
    fn handle(&self, error: &DeliveryError) {
        self.handled.lock().unwrap().push(error.kind());
    }

    fn handle_with_retry(&self, table: &str, error: &DeliveryError) -> bool {
        self.retry_requests
            .lock()
            .unwrap()
            .push((table.to_string(), error.kind()));
        self.answers.lock().unwrap().pop_front().unwrap_or(false)
    }
}

/// Records lifecycle notifications as short strings
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
}

impl RecordingListener {
    pub fn failing_on(event: &'static str) -> Self {
        Self {
            fail_on: Some(event),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) -> anyhow::Result<()> {
        let name = event.split(':').next().unwrap_or_default().to_string();
        self.events.lock().unwrap().push(event);
        match self.fail_on {
            Some(fail_on) if fail_on == name => anyhow::bail!("listener refused {}", name),
            _ => Ok(()),
        }
    }
}

impl DeliveryListener for RecordingListener {
    fn before_get_data_source(&self) -> anyhow::Result<()> {
        self.record("get_data_source".to_string())
    }

    fn before_archive_metadata(&self, _data_source: &DataSource) -> anyhow::Result<()> {
        self.record("archive_metadata".to_string())
    }

    fn before_get_data_for_target_table(
        &self,
        _data_source: &DataSource,
        table: &Table,
    ) -> anyhow::Result<()> {
        self.record(format!("get_data:{}", table.target_name()))
    }

    fn before_validate_data_in_target_table(
        &self,
        table: &Table,
        _rows: &RowsByTable,
        end_of_data: bool,
    ) -> anyhow::Result<()> {
        self.record(format!("validate:{}:{}", table.target_name(), end_of_data))
    }

    fn before_archive_data_for_target_table(
        &self,
        table: &Table,
        _rows: &RowsByTable,
    ) -> anyhow::Result<()> {
        self.record(format!("archive_data:{}", table.target_name()))
    }
}

/// Fails on chosen calls (1-based) with a conversion error, or always with
/// a validation-kind error
#[derive(Debug, Default)]
pub struct ScriptedValidator {
    calls: AtomicUsize,
    fail_on_calls: Vec<usize>,
    always_fail: bool,
}

impl ScriptedValidator {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn failing_on_calls(calls: &[usize]) -> Self {
        Self {
            fail_on_calls: calls.to_vec(),
            ..Self::default()
        }
    }

    pub fn always_failing() -> Self {
        Self {
            always_fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Validator for ScriptedValidator {
    type Command = DeliveryCommand;

    fn name(&self) -> &str {
        "scripted"
    }

    async fn validate(
        &self,
        target: &Table,
        _rows: &mut RowsByTable,
        _end_of_data: bool,
        _command: &DeliveryCommand,
    ) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.always_fail {
            return Err(DeliveryError::Validation(
                arkiv_delivery::ValidationError::UniquenessViolation {
                    table: target.target_name().to_string(),
                    key: "scripted".to_string(),
                    value: call.to_string(),
                    row: Row::default(),
                },
            ));
        }
        if self.fail_on_calls.contains(&call) {
            return Err(DeliveryError::Conversion(format!("scripted failure on call {}", call)));
        }
        Ok(())
    }
}
