//! Cross-module integration tests (spec.md §8 end-to-end scenarios):
//! each drives `parser::parse` -> `planner::plan` -> `engine::execute`
//! against real CSV/JSON fixtures on disk, the same path a submitted
//! request takes through [`crate::lifecycle::RequestManager`].


use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use crate::config::{Config, ConnectorClass, ConnectorConfig, KerberosConfig};
use crate::connectors::ConnectorFactory;
use crate::error::EngineError;
use crate::registry::SourceRegistry;
use crate::row::Value;

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

fn csv_source(data_source: &str, base_dir: &Path) -> ConnectorConfig {
    ConnectorConfig {
        data_source: data_source.to_string(),
        type_name: "csv".to_string(),
        version: None,
        class: ConnectorClass::File,
        properties: json!({ "base_dir": base_dir.display().to_string() }),
    }
}

async fn run(sql: &str, registry: &SourceRegistry) -> crate::error::EngineResult<(crate::row::ColumnIndex, Vec<crate::row::Row>)> {
    let segments = crate::parser::parse(sql)?;
    let plan = crate::planner::plan(&segments, registry)?;
    let factory = ConnectorFactory::new(KerberosConfig::default());
    crate::engine::execute(&plan, &factory).await
}

fn headers(columns: &crate::row::ColumnIndex) -> Vec<&str> {
    columns.columns().iter().map(|c| c.output_name()).collect()
}

fn innermost(error: &EngineError) -> &EngineError {
    match error {
        EngineError::Stage { source, .. } => innermost(source),
        other => other,
    }
}

#[tokio::test]
async fn csv_json_left_join() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "one.csv", "id,name\n1,Testing\n2,Two\n3,JOIN\n");
    write(
        dir.path(),
        "two.json",
        r#"{"result":[{"id":1,"category":"A"},{"id":2,"category":"Part"},{"id":3,"category":"Query"}]}"#,
    );

    let mut registry = SourceRegistry::new();
    registry.register(crate::registry::ConnectorSpec {
        data_source: "csv".into(),
        type_name: "csv".into(),
        version: None,
        class: ConnectorClass::File,
        properties: json!({ "base_dir": dir.path().display().to_string() }),
    });
    registry.register(crate::registry::ConnectorSpec {
        data_source: "json".into(),
        type_name: "json".into(),
        version: None,
        class: ConnectorClass::File,
        properties: json!({ "base_dir": dir.path().display().to_string(), "format": "json", "result_path": "result" }),
    });

    let sql = "SELECT csv.name AS name,json.category AS category FROM csv.'one.csv' csv LEFT JOIN json.'two.json' json ON (csv.id = json.id) ORDER BY csv.id ASC";
    let (columns, rows) = run(sql, &registry).await.unwrap();

    assert_eq!(headers(&columns), vec!["name", "category"]);
    assert_eq!(
        rows,
        vec![
            vec![Value::Str("Testing".into()), Value::Str("A".into())],
            vec![Value::Str("Two".into()), Value::Str("Part".into())],
            vec![Value::Str("JOIN".into()), Value::Str("Query".into())],
        ]
    );
}

#[tokio::test]
async fn aggregate_with_group_by() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "t.csv", "u,msg\na,x\na,y\nb,z\n");

    let mut registry = SourceRegistry::new();
    registry.register(crate::registry::ConnectorSpec {
        data_source: "ds".into(),
        type_name: "csv".into(),
        version: None,
        class: ConnectorClass::File,
        properties: json!({ "base_dir": dir.path().display().to_string() }),
    });

    let sql = "SELECT s.u,COUNT(s.msg) AS c FROM ds.'t.csv' s GROUP BY s.u ORDER BY c DESC";
    let (columns, rows) = run(sql, &registry).await.unwrap();

    assert_eq!(headers(&columns), vec!["u", "c"]);
    assert_eq!(
        rows,
        vec![
            vec![Value::Str("a".into()), Value::Int(2)],
            vec![Value::Str("b".into()), Value::Int(1)],
        ]
    );
}

#[tokio::test]
async fn count_distinct_ignores_nulls() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "t.csv", "v\n1\n1\n2\n\n3\n\n");

    let mut registry = SourceRegistry::new();
    registry.register(crate::registry::ConnectorSpec {
        data_source: "ds".into(),
        type_name: "csv".into(),
        version: None,
        class: ConnectorClass::File,
        properties: json!({ "base_dir": dir.path().display().to_string() }),
    });

    let sql = "SELECT COUNT(DISTINCT s.v) AS c FROM ds.'t.csv' s";
    let (columns, rows) = run(sql, &registry).await.unwrap();

    assert_eq!(headers(&columns), vec!["c"]);
    assert_eq!(rows, vec![vec![Value::Int(3)]]);
}

#[tokio::test]
async fn type_coercion_in_where_matches_string_against_int_literal() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "t.csv", "n\n3\n4\n");

    let mut registry = SourceRegistry::new();
    registry.register(crate::registry::ConnectorSpec {
        data_source: "ds".into(),
        type_name: "csv".into(),
        version: None,
        class: ConnectorClass::File,
        properties: json!({ "base_dir": dir.path().display().to_string() }),
    });

    let sql = "SELECT s.n FROM ds.'t.csv' s WHERE s.n = 3";
    let (_columns, rows) = run(sql, &registry).await.unwrap();

    assert_eq!(rows, vec![vec![Value::Int(3)]]);
}

#[tokio::test]
async fn unknown_data_source_is_a_validation_failure() {
    let registry = SourceRegistry::new();
    let sql = "SELECT a.* FROM absent.'t.csv' a";
    let err = run(sql, &registry).await.unwrap_err();
    assert!(matches!(innermost(&err), EngineError::Validation { .. }));
}

#[tokio::test]
async fn parse_failure_exposes_remaining_input() {
    let err = crate::parser::parse("SELECT * FROM ds.t HAVING x=1").unwrap_err();
    match err {
        EngineError::Parse { remaining, .. } => assert!(remaining.trim_start().starts_with("HAVING")),
        other => panic!("expected a parse error, got {other:?}"),
    }
}

fn test_config(metadata_dir: &Path, result_dir: &Path, csv_dir: &Path, expiry_minutes: u64) -> Config {
    Config {
        metadata_base_dir: metadata_dir.to_path_buf(),
        result_tmp_dir: result_dir.to_path_buf(),
        result_set_expiry: expiry_minutes,
        connectors: vec![csv_source("ds", csv_dir)],
        kerberos: KerberosConfig::default(),
        ..Config::default()
    }
}

#[tokio::test]
async fn request_lifecycle_submit_poll_and_get_result() {
    use crate::lifecycle::{RequestContext, RequestManager};
    use crate::metadata::MetadataStore;

    let metadata_dir = tempfile::tempdir().unwrap();
    let result_dir = tempfile::tempdir().unwrap();
    let csv_dir = tempfile::tempdir().unwrap();
    write(csv_dir.path(), "t.csv", "id,name\n1,Ann\n2,Bo\n");

    let config = test_config(metadata_dir.path(), result_dir.path(), csv_dir.path(), 30);
    let metadata = Arc::new(MetadataStore::with_base_dir(&config.metadata_base_dir).unwrap());
    let registry = Arc::new(SourceRegistry::from_configs(&config.connectors));
    let connector_factory = Arc::new(ConnectorFactory::new(config.kerberos.clone()));
    let manager = Arc::new(RequestManager::new(&config, metadata, registry, connector_factory).unwrap());

    let id = manager.submit_query(
        "SELECT s.id,s.name FROM ds.'t.csv' s ORDER BY s.id ASC".to_string(),
        RequestContext { username: "alice".into(), model: None, endpoint: None },
    );

    let mut completed = manager.poll(&id).unwrap();
    assert_eq!(completed.username, "alice");

    for _ in 0..50 {
        completed = manager.poll(&id).unwrap();
        if completed.status != crate::metadata::ResultStatus::InProgress {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    assert_eq!(completed.status, crate::metadata::ResultStatus::Completed);
    assert!(completed.end_time.is_some());
    assert!(!completed.expired);

    let result = manager.get_result(&id).await.unwrap();
    assert_eq!(result["data"]["columns"], json!(["id", "name"]));
    assert_eq!(result["data"]["rows"], json!([[1, "Ann"], [2, "Bo"]]));

    let plan = manager.get_query_plan(&id).unwrap();
    assert!(plan.get("resources").is_some());
}

#[tokio::test]
async fn expired_result_set_has_its_spill_file_removed() {
    use crate::lifecycle::{RequestContext, RequestManager};
    use crate::metadata::MetadataStore;

    let metadata_dir = tempfile::tempdir().unwrap();
    let result_dir = tempfile::tempdir().unwrap();
    let csv_dir = tempfile::tempdir().unwrap();
    write(csv_dir.path(), "t.csv", "id\n1\n");

    let config = test_config(metadata_dir.path(), result_dir.path(), csv_dir.path(), 30);
    let metadata = Arc::new(MetadataStore::with_base_dir(&config.metadata_base_dir).unwrap());
    let registry = Arc::new(SourceRegistry::from_configs(&config.connectors));
    let connector_factory = Arc::new(ConnectorFactory::new(config.kerberos.clone()));
    let manager = Arc::new(RequestManager::new(&config, metadata.clone(), registry, connector_factory).unwrap());

    let id = manager.submit_query(
        "SELECT s.id FROM ds.'t.csv' s".to_string(),
        RequestContext { username: "bob".into(), model: None, endpoint: None },
    );

    let mut record = manager.poll(&id).unwrap();
    for _ in 0..50 {
        record = manager.poll(&id).unwrap();
        if record.status != crate::metadata::ResultStatus::InProgress {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(record.status, crate::metadata::ResultStatus::Completed);
    let spill_path = record.spill_path.clone().unwrap();
    assert!(spill_path.exists());

    // Backdate end_time past the expiry window and run the sweep directly.
    record.end_time = Some(chrono::Utc::now() - chrono::Duration::minutes(31));
    metadata.put_result_set(record);
    manager.sweep_expired().await;

    let swept = manager.poll(&id).unwrap();
    assert!(swept.expired);
    assert!(swept.spill_path.is_none());
    assert!(!spill_path.exists());
    assert!(manager.get_result(&id).await.is_err());
}

#[tokio::test]
async fn purge_stale_spill_files_removes_untracked_json() {
    use crate::lifecycle::RequestManager;
    use crate::metadata::MetadataStore;

    let metadata_dir = tempfile::tempdir().unwrap();
    let result_dir = tempfile::tempdir().unwrap();
    let csv_dir = tempfile::tempdir().unwrap();

    let config = test_config(metadata_dir.path(), result_dir.path(), csv_dir.path(), 30);
    let orphan = result_dir.path().join("orphan.json");
    std::fs::write(&orphan, "{}").unwrap();

    let metadata = Arc::new(MetadataStore::with_base_dir(&config.metadata_base_dir).unwrap());
    let registry = Arc::new(SourceRegistry::from_configs(&config.connectors));
    let connector_factory = Arc::new(ConnectorFactory::new(config.kerberos.clone()));
    let manager = RequestManager::new(&config, metadata, registry, connector_factory).unwrap();

    manager.purge_stale_spill_files().unwrap();
    assert!(!orphan.exists());
}
