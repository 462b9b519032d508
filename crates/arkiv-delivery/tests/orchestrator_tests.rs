//! Orchestrator behavior over in-memory collaborators

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use arkiv_common::{DataSource, DataValue, Field, Row, Table};
use arkiv_delivery::memory::{InMemoryArchive, InMemoryRepository, StaticMetadataSource};
use arkiv_delivery::validation::dispatch;
use arkiv_delivery::{
    DeliveryCommand, DeliveryError, DeliveryOrchestrator, ErrorKind, TableOutcome,
};
use common::{shop, shop_repository, Harness, RecordingHandler, RecordingListener, ScriptedValidator};
use std::collections::HashSet;
use std::sync::Arc;

#[tokio::test]
async fn test_zero_validators_archive_metadata_once_and_every_table() {
    let harness = Harness::new(shop(), shop_repository(2), &[]);

    let report = harness
        .orchestrator()
        .execute(&DeliveryCommand::new())
        .await
        .unwrap();

    assert_eq!(harness.archive.metadata_writes(), 1);
    let archived = harness.archive.archived_tables();
    assert_eq!(archived.len(), 3);
    assert_eq!(harness.archive.archived("orders").unwrap().rows.len(), 3);

    let tokens: HashSet<_> = archived.iter().map(|t| t.correlation_token).collect();
    assert_eq!(tokens.len(), 3);

    assert!(report.is_complete());
    assert!(harness.handler.handled().is_empty());
    assert!(harness.handler.retry_requests().is_empty());
}

#[tokio::test]
async fn test_retry_then_decline_validates_twice_and_skips_archive() {
    let data_source = DataSource::new("ds", vec![Table::new("T", vec![Field::integer("id")])]);
    let repository = InMemoryRepository::new();
    repository.insert_rows("T", vec![Row::new(vec![DataValue::Integer(1)])]);
    let harness = Harness::new(data_source, repository, &[true, false]);

    let validator = Arc::new(ScriptedValidator::always_failing());
    let report = harness
        .orchestrator()
        .with_validator(dispatch(validator.clone()))
        .execute(&DeliveryCommand::new())
        .await
        .unwrap();

    assert_eq!(validator.calls(), 2);
    assert!(harness.archive.archived_tables().is_empty());
    assert_eq!(harness.archive.metadata_writes(), 1);

    let table = report.table("T").unwrap();
    assert_eq!(table.attempts, 2);
    assert!(matches!(table.outcome, TableOutcome::Rejected { .. }));
    assert_eq!(
        harness.handler.retry_requests(),
        vec![
            ("T".to_string(), ErrorKind::Validation),
            ("T".to_string(), ErrorKind::Validation)
        ]
    );
}

#[tokio::test]
async fn test_failing_metadata_source_has_no_side_effects() {
    let repository = Arc::new(shop_repository(10));
    let archive = Arc::new(InMemoryArchive::new());
    let handler = Arc::new(RecordingHandler::new(&[]));
    let validator = Arc::new(ScriptedValidator::passing());

    let orchestrator = DeliveryOrchestrator::new(
        Arc::new(StaticMetadataSource::failing()),
        repository.clone(),
        archive.clone(),
        handler.clone(),
    )
    .with_validator(dispatch(validator.clone()));

    let err = orchestrator.execute(&DeliveryCommand::new()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Repository);
    assert_eq!(handler.handled(), vec![ErrorKind::Repository]);
    assert!(handler.retry_requests().is_empty());
    assert!(archive.data_source().is_none());
    assert_eq!(archive.metadata_writes(), 0);
    assert_eq!(repository.fetch_count("orders"), 0);
    assert_eq!(validator.calls(), 0);
}

#[tokio::test]
async fn test_listener_sees_lifecycle_in_order() {
    let data_source = DataSource::new("ds", vec![common::customers()]);
    let repository = InMemoryRepository::new().with_chunk_size(1);
    repository.insert_rows("customers", vec![common::customer(1, "Ada"), common::customer(2, "Bo")]);
    let harness = Harness::new(data_source, repository, &[]);

    let listener = Arc::new(RecordingListener::default());
    harness
        .orchestrator()
        .with_listener(listener.clone())
        .execute(&DeliveryCommand::new())
        .await
        .unwrap();

    assert_eq!(
        listener.events(),
        vec![
            "get_data_source",
            "archive_metadata",
            "get_data:customers",
            "validate:customers:false",
            "validate:customers:true",
            "archive_data:customers",
        ]
    );
}

#[tokio::test]
async fn test_listener_error_propagates_without_handler() {
    let harness = Harness::new(shop(), shop_repository(10), &[true]);
    let listener = Arc::new(RecordingListener::failing_on("validate"));

    let err = harness
        .orchestrator()
        .with_listener(listener)
        .execute(&DeliveryCommand::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::Listener(_)));
    assert!(harness.handler.handled().is_empty());
    assert!(harness.handler.retry_requests().is_empty());
    assert!(harness.archive.archived_tables().is_empty());
}

#[tokio::test]
async fn test_max_table_retries_overrides_handler() {
    let data_source = DataSource::new("ds", vec![Table::new("T", vec![Field::integer("id")])]);
    let harness = Harness::new(data_source, InMemoryRepository::new(), &[true, true, true, true]);
    let validator = Arc::new(ScriptedValidator::always_failing());

    let report = harness
        .orchestrator()
        .with_validator(dispatch(validator.clone()))
        .with_max_table_retries(1)
        .execute(&DeliveryCommand::new())
        .await
        .unwrap();

    assert_eq!(validator.calls(), 2);
    assert_eq!(report.table("T").unwrap().attempts, 2);
    assert!(!report.is_complete());
}

#[tokio::test]
async fn test_repository_failure_aborts_and_is_reported_once() {
    let repository = shop_repository(10);
    repository.fail_table("orders");
    let harness = Harness::new(shop(), repository, &[true]);

    let err = harness
        .orchestrator()
        .execute(&DeliveryCommand::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Repository);
    assert_eq!(harness.handler.handled(), vec![ErrorKind::Repository]);
    assert!(harness.handler.retry_requests().is_empty());
}

#[tokio::test]
async fn test_concurrent_tables_are_all_archived() {
    let tables: Vec<Table> = (0..6)
        .map(|i| Table::new(format!("T{i}"), vec![Field::integer("id")]))
        .collect();
    let repository = InMemoryRepository::new().with_chunk_size(2);
    for table in &tables {
        repository.insert_rows(
            table.target_name(),
            (0..5).map(|i| Row::new(vec![DataValue::Integer(i)])).collect(),
        );
    }
    let harness = Harness::new(DataSource::new("ds", tables), repository, &[]);

    let report = harness
        .orchestrator()
        .execute(&DeliveryCommand::new().with_tables_handled_simultaneously(3))
        .await
        .unwrap();

    let names: Vec<_> = report.tables.iter().map(|t| t.table.clone()).collect();
    assert_eq!(names, vec!["T0", "T1", "T2", "T3", "T4", "T5"]);
    assert_eq!(harness.archive.archived_tables().len(), 6);
    assert!(report.tables.iter().all(|t| t.rows == 5 && t.attempts == 1));
}

#[tokio::test]
async fn test_zero_simultaneity_is_argument_error() {
    let harness = Harness::new(shop(), shop_repository(10), &[]);

    let err = harness
        .orchestrator()
        .execute(&DeliveryCommand::new().with_tables_handled_simultaneously(0))
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::Argument(_)));
    assert_eq!(harness.handler.handled(), vec![ErrorKind::Argument]);
    assert!(harness.archive.data_source().is_none());
}

#[tokio::test]
async fn test_metadata_archive_failure_stops_before_tables() {
    let repository = Arc::new(shop_repository(10));
    let archive = Arc::new(InMemoryArchive::failing_metadata());
    let handler = Arc::new(RecordingHandler::new(&[true]));

    let err = DeliveryOrchestrator::new(
        Arc::new(StaticMetadataSource::new(shop())),
        repository.clone(),
        archive.clone(),
        handler.clone(),
    )
    .execute(&DeliveryCommand::new())
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Repository);
    assert_eq!(handler.handled(), vec![ErrorKind::Repository]);
    assert!(archive.data_source().is_some());
    assert_eq!(repository.fetch_count("customers"), 0);
    assert!(archive.archived_tables().is_empty());
}

#[tokio::test]
async fn test_empty_data_source_archives_metadata_only() {
    let harness = Harness::new(DataSource::new("empty", Vec::new()), InMemoryRepository::new(), &[]);

    let report = harness
        .orchestrator()
        .execute(&DeliveryCommand::new())
        .await
        .unwrap();

    assert!(report.tables.is_empty());
    assert_eq!(harness.archive.metadata_writes(), 1);
    assert!(harness.archive.archived_tables().is_empty());
    assert_eq!(harness.metadata.calls(), 1);
}
