use std::path::Path;

use fieldflow_core::config::{parse_pipeline, CredentialResolver, EnvCredentialResolver};
use fieldflow_core::engine::PipelineEngine;
use fieldflow_core::pipeline::{DataSourceConfig, FieldMap, Pipeline};
use fieldflow_core::store::Store;
use fieldflow_utils::{Record, Stage, Value};
use rusqlite::Connection;
use tempfile::TempDir;

fn seed_orders(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, email TEXT, total REAL);
         INSERT INTO orders VALUES
            (1, 'Ada@Example.com', 10.5),
            (2, 'BOB@example.com', 3.25),
            (3, 'cy@example.com', 7.0);",
    )
    .unwrap();
}

fn read_jsonl(path: &Path) -> Vec<Record> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| Record::from_json(serde_json::from_str(line).unwrap()).unwrap())
        .collect()
}

const ORDERS_YAML: &str = r#"
pipeline: orders_export
description: orders to newline-delimited JSON
source:
  type: sqlite
  connection: ${ORDERS_DB}
  params:
    table: orders
destination:
  type: jsonl
  connection: ${ORDERS_OUT}
mappings:
  - id -> order_id
  - source: email
    destination: contact
  - total -> amount
transformations:
  - LOWER(contact)
  - amount_cents = amount * 100
batch:
  size: 2
incremental:
  field: id
"#;

#[tokio::test]
async fn yaml_pipeline_from_sqlite_to_jsonl_with_ledger() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("orders.db");
    let out = dir.path().join("orders.jsonl");
    seed_orders(&db);

    let db_str = db.to_string_lossy().to_string();
    let out_str = out.to_string_lossy().to_string();
    let resolver = EnvCredentialResolver::with_lookup(move |name| match name {
        "ORDERS_DB" => Some(db_str.clone()),
        "ORDERS_OUT" => Some(out_str.clone()),
        _ => None,
    });

    let mut pipeline = parse_pipeline(ORDERS_YAML).unwrap().into_pipeline().unwrap();
    resolver.resolve_pipeline(&mut pipeline).unwrap();
    assert_eq!(pipeline.batch_size, Some(2));

    let store = Store::in_memory().unwrap();
    let engine = PipelineEngine::default();

    let report = engine.run(&pipeline).await.unwrap();
    store.record_success(&report).unwrap();
    assert_eq!(report.rows_read, 3);
    assert_eq!(report.rows_processed, 3);
    assert_eq!(report.batches, 2);
    assert_eq!(report.watermark.as_deref(), Some("3"));

    let written = read_jsonl(&out);
    assert_eq!(written.len(), 3);
    assert_eq!(written[0].get("order_id"), Some(&Value::Int(1)));
    assert_eq!(written[0].get("contact"), Some(&Value::from("ada@example.com")));
    assert_eq!(written[1].get("amount_cents"), Some(&Value::Float(325.0)));
    assert!(!written[0].contains("email"));

    // second run picks up only rows past the stored watermark
    Connection::open(&db)
        .unwrap()
        .execute("INSERT INTO orders VALUES (4, 'Di@example.com', 1.0)", [])
        .unwrap();
    pipeline.last_incremental_value = store.last_watermark("orders_export").unwrap();
    let report = engine.run(&pipeline).await.unwrap();
    store.record_success(&report).unwrap();
    assert_eq!(report.rows_read, 1);
    assert_eq!(report.watermark.as_deref(), Some("4"));

    let written = read_jsonl(&out);
    assert_eq!(written.len(), 4);
    assert_eq!(written[3].get("contact"), Some(&Value::from("di@example.com")));

    let runs = store.recent_runs(10).unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.status == "completed"));
    assert_eq!(store.last_watermark("orders_export").unwrap().as_deref(), Some("4"));
}

#[tokio::test]
async fn csv_to_sqlite_creates_the_table() {
    let dir = TempDir::new().unwrap();
    let csv = dir.path().join("people.csv");
    std::fs::write(&csv, "name,age\nada,36\nbob,41\n").unwrap();
    let db = dir.path().join("people.db");

    let pipeline = Pipeline {
        name: "people_import".to_string(),
        source: DataSourceConfig::new("csv", csv.to_string_lossy()),
        destination: DataSourceConfig::new("sqlite", db.to_string_lossy())
            .with_param("table", "people")
            .with_param("createTable", "true"),
        field_mappings: vec![FieldMap::new("name", "name"), FieldMap::new("age", "age")],
        transformations: vec!["UPPER(name)".to_string()],
        ..Default::default()
    };

    let report = PipelineEngine::default().run(&pipeline).await.unwrap();
    assert_eq!(report.rows_processed, 2);

    let conn = Connection::open(&db).unwrap();
    let names: Vec<String> = conn
        .prepare("SELECT name FROM people ORDER BY name")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(names, vec!["ADA", "BOB"]);
}

#[tokio::test]
async fn dry_run_leaves_files_untouched() {
    let dir = TempDir::new().unwrap();
    let csv = dir.path().join("in.csv");
    std::fs::write(&csv, "id,city\n1,oslo\n2,lima\n3,pune\n").unwrap();
    let existing = dir.path().join("out.jsonl");
    std::fs::write(&existing, "{\"id\":0}\n").unwrap();
    let before = std::fs::read(&existing).unwrap();
    let missing_db = dir.path().join("never.db");

    let engine = PipelineEngine::default();

    let to_jsonl = Pipeline {
        name: "preview_jsonl".to_string(),
        source: DataSourceConfig::new("csv", csv.to_string_lossy()),
        destination: DataSourceConfig::new("jsonl", existing.to_string_lossy()),
        transformations: vec!["TITLE_CASE(city)".to_string()],
        ..Default::default()
    };
    let result = engine.dry_run(&to_jsonl, 2).await.unwrap();
    assert_eq!(result.source_preview.len(), 2);
    assert_eq!(result.transformed_preview[1].get("city"), Some(&Value::from("Lima")));
    assert_eq!(std::fs::read(&existing).unwrap(), before);

    let to_sqlite = Pipeline {
        name: "preview_sqlite".to_string(),
        source: DataSourceConfig::new("csv", csv.to_string_lossy()),
        destination: DataSourceConfig::new("sqlite", missing_db.to_string_lossy())
            .with_param("table", "cities"),
        ..Default::default()
    };
    let result = engine.dry_run(&to_sqlite, 0).await.unwrap();
    assert_eq!(result.source_preview.len(), 3);
    assert!(!result.destination_schema_valid);
    assert!(!missing_db.exists());
}

#[tokio::test]
async fn failed_run_lands_in_the_ledger() {
    let dir = TempDir::new().unwrap();
    let pipeline = Pipeline {
        name: "missing_input".to_string(),
        source: DataSourceConfig::new("json", dir.path().join("absent.json").to_string_lossy()),
        destination: DataSourceConfig::new("memory", "out"),
        ..Default::default()
    };

    let store = Store::open(dir.path().join("runs.db")).unwrap();
    store.record_started("run-x", &pipeline.name).unwrap();
    let err = PipelineEngine::default().run(&pipeline).await.unwrap_err();
    assert_eq!(err.stage, Stage::SourceRead);
    assert!(err.message.starts_with("json: failed to read"));
    store.record_failure("run-x", &err).unwrap();

    let run = &store.recent_runs(1).unwrap()[0];
    assert_eq!(run.status, "failed");
    assert_eq!(run.failed_stage.as_deref(), Some("SourceRead"));
    assert_eq!(run.error.as_deref(), Some(err.message.as_str()));
}
