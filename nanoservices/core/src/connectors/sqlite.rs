//! SQLite adapter. The connection string is a file path (an optional
//! `sqlite://` prefix is stripped). All rusqlite work runs on the blocking pool.

use async_trait::async_trait;
use base64::Engine as _;
use fieldflow_utils::{ConnectorError, FieldflowResult, Record, Value};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};

use super::sql::{base_query, quote_ident, read_query, table_name};
use super::{field_union, run_blocking};
use crate::destinations::DestinationWriter;
use crate::pipeline::DataSourceConfig;
use crate::sources::SourceReader;

const CONNECTOR: &str = "sqlite";

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

fn wrap(message: impl Into<String>, e: rusqlite::Error) -> ConnectorError {
    ConnectorError::wrap(CONNECTOR, message, e)
}

fn db_path(config: &DataSourceConfig) -> FieldflowResult<&str> {
    let raw = config.connection_string.trim();
    let path = raw.strip_prefix("sqlite://").unwrap_or(raw);
    if path.is_empty() {
        return Err(
            ConnectorError::new(CONNECTOR, "connection string must be a database path").into(),
        );
    }
    Ok(path)
}

/// Open an existing database. A missing file is an error, never created.
fn open(config: &DataSourceConfig) -> FieldflowResult<Connection> {
    open_with(config, OpenFlags::SQLITE_OPEN_READ_WRITE)
}

/// Open for writing; the file is created only when `createTable` is set.
fn open_for_write(config: &DataSourceConfig) -> FieldflowResult<Connection> {
    let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE;
    if config.param_bool("createTable") {
        flags |= OpenFlags::SQLITE_OPEN_CREATE;
    }
    open_with(config, flags)
}

fn open_with(config: &DataSourceConfig, flags: OpenFlags) -> FieldflowResult<Connection> {
    let path = db_path(config)?;
    if path == ":memory:" {
        return Connection::open_in_memory()
            .map_err(|e| wrap("failed to open in-memory database", e).into());
    }
    let flags = flags | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Connection::open_with_flags(path, flags)
        .map_err(|e| wrap(format!("failed to open '{path}'"), e).into())
}

fn to_value(raw: ValueRef<'_>) -> Value {
    match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
    }
}

fn to_sql(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Int(i)) => SqlValue::Integer(*i),
        Some(Value::Float(f)) => SqlValue::Real(*f),
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
    }
}

/// Bind the watermark with the type it parses as, so integer columns
/// compare numerically.
fn bound_value(last: &str) -> SqlValue {
    let trimmed = last.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        SqlValue::Integer(i)
    } else if let Ok(f) = trimmed.parse::<f64>() {
        SqlValue::Real(f)
    } else {
        SqlValue::Text(last.to_string())
    }
}

fn column_type(records: &[Record], field: &str) -> &'static str {
    let mut kind = "";
    for v in records.iter().filter_map(|r| r.get(field)) {
        kind = match (kind, v) {
            (k, Value::Null) => k,
            ("" | "INTEGER", Value::Int(_) | Value::Bool(_)) => "INTEGER",
            ("" | "INTEGER" | "REAL", Value::Float(_)) | ("REAL", Value::Int(_)) => "REAL",
            _ => "TEXT",
        };
    }
    if kind.is_empty() { "TEXT" } else { kind }
}

fn query_records(conn: &Connection, config: &DataSourceConfig) -> FieldflowResult<Vec<Record>> {
    let sql = read_query(CONNECTOR, config, |_| "?1".to_string())?;
    let bound: Vec<SqlValue> = config
        .incremental()
        .and_then(|(_, last)| last)
        .map(bound_value)
        .into_iter()
        .collect();

    let mut stmt = conn.prepare(&sql).map_err(|e| wrap("failed to prepare read query", e))?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let mut rows = stmt
        .query(params_from_iter(bound.iter()))
        .map_err(|e| wrap("read query failed", e))?;

    let mut records = Vec::new();
    while let Some(row) = rows.next().map_err(|e| wrap("failed to fetch row", e))? {
        let mut record = Record::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            let raw = row
                .get_ref(i)
                .map_err(|e| wrap(format!("failed to decode column '{name}'"), e))?;
            record.insert(name.as_str(), to_value(raw));
        }
        records.push(record);
    }
    Ok(records)
}

fn table_columns(conn: &Connection, table: &str) -> FieldflowResult<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(|e| wrap("failed to inspect table", e))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| wrap("failed to inspect table", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| wrap("failed to inspect table", e))?;
    Ok(names)
}

fn insert_records(
    conn: &mut Connection,
    config: &DataSourceConfig,
    records: &[Record],
) -> FieldflowResult<()> {
    let table = table_name(CONNECTOR, config)?;
    let columns = field_union(records);

    if config.param_bool("createTable") {
        let defs: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(c), column_type(records, c)))
            .collect();
        conn.execute(&format!("CREATE TABLE IF NOT EXISTS {table} ({})", defs.join(", ")), [])
            .map_err(|e| wrap(format!("failed to create table {table}"), e))?;
    }

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
        placeholders.join(", ")
    );

    let tx = conn.transaction().map_err(|e| wrap("failed to begin transaction", e))?;
    {
        let mut stmt = tx
            .prepare(&sql)
            .map_err(|e| wrap(format!("failed to prepare insert into {table}"), e))?;
        for (i, record) in records.iter().enumerate() {
            let values = columns.iter().map(|c| to_sql(record.get(c)));
            stmt.execute(params_from_iter(values))
                .map_err(|e| wrap(format!("insert of row {} into {table} failed", i + 1), e))?;
        }
    }
    tx.commit().map_err(|e| wrap("failed to commit transaction", e).into())
}

#[async_trait]
impl SourceReader for SqliteConnector {
    fn connector_type(&self) -> &str {
        CONNECTOR
    }

    async fn read(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<Record>> {
        let config = config.clone();
        run_blocking(CONNECTOR, move || {
            let conn = open(&config)?;
            query_records(&conn, &config)
        })
        .await
    }

    async fn discover_schema(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<String>> {
        let config = config.clone();
        run_blocking(CONNECTOR, move || {
            let conn = open(&config)?;
            if config.param("query").is_none() {
                let table = table_name(CONNECTOR, &config)?;
                return table_columns(&conn, &table);
            }
            let stmt = conn
                .prepare(&base_query(CONNECTOR, &config)?)
                .map_err(|e| wrap("failed to prepare query", e))?;
            Ok(stmt.column_names().into_iter().map(str::to_string).collect())
        })
        .await
    }

    async fn dry_run_preview(
        &self,
        config: &DataSourceConfig,
        limit: usize,
    ) -> FieldflowResult<Vec<Record>> {
        let capped = config.param_usize("limit").map_or(limit, |l| l.min(limit));
        let config = config.clone().with_param("limit", capped.to_string());
        self.read(&config).await
    }

    async fn test_connection(&self, config: &DataSourceConfig) -> FieldflowResult<()> {
        let config = config.clone();
        run_blocking(CONNECTOR, move || {
            let conn = open(&config)?;
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| wrap("connection test query failed", e))?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl DestinationWriter for SqliteConnector {
    fn connector_type(&self) -> &str {
        CONNECTOR
    }

    async fn write(&self, config: &DataSourceConfig, records: &[Record]) -> FieldflowResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let config = config.clone();
        let records = records.to_vec();
        run_blocking(CONNECTOR, move || {
            let mut conn = open_for_write(&config)?;
            insert_records(&mut conn, &config, &records)
        })
        .await
    }

    async fn validate_schema(
        &self,
        config: &DataSourceConfig,
        fields: &[String],
    ) -> FieldflowResult<bool> {
        let config = config.clone();
        let fields = fields.to_vec();
        run_blocking(CONNECTOR, move || {
            // a database that does not exist yet has no tables
            let path = db_path(&config)?;
            if path != ":memory:" && !std::path::Path::new(path).exists() {
                return Ok(config.param_bool("createTable"));
            }
            let conn = open(&config)?;
            let columns = table_columns(&conn, &table_name(CONNECTOR, &config)?)?;
            if columns.is_empty() {
                return Ok(config.param_bool("createTable"));
            }
            Ok(fields.iter().all(|f| columns.contains(f)))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PARAM_INCREMENTAL_FIELD, PARAM_LAST_INCREMENTAL_VALUE};
    use tempfile::TempDir;

    fn db(dir: &TempDir) -> DataSourceConfig {
        DataSourceConfig::new(CONNECTOR, dir.path().join("t.db").to_string_lossy().to_string())
    }

    fn seed(dir: &TempDir) {
        let conn = Connection::open(dir.path().join("t.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, score REAL);
             INSERT INTO users VALUES (1, 'ada', 9.5), (2, 'bob', NULL), (10, 'cy', 3.0);",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn reads_rows_with_native_types() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let cfg = db(&dir).with_param("table", "users");
        let rows = SqliteConnector.read(&cfg).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get("id"), Some(&Value::Int(1)));
        assert_eq!(rows[0].get("score"), Some(&Value::Float(9.5)));
        assert_eq!(rows[1].get("score"), Some(&Value::Null));
        assert_eq!(
            SqliteConnector.discover_schema(&cfg).await.unwrap(),
            vec!["id", "name", "score"]
        );
    }

    #[tokio::test]
    async fn incremental_bound_compares_numerically() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let cfg = db(&dir)
            .with_param("table", "users")
            .with_param(PARAM_INCREMENTAL_FIELD, "id")
            .with_param(PARAM_LAST_INCREMENTAL_VALUE, "2");
        let rows = SqliteConnector.read(&cfg).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::from("cy")));
    }

    #[tokio::test]
    async fn writes_create_table_and_round_trip() {
        let dir = TempDir::new().unwrap();
        let cfg = db(&dir).with_param("table", "out").with_param("createTable", "true");
        let records: Vec<Record> = vec![
            [("k", Value::from("a")), ("n", Value::Int(1))].into_iter().collect(),
            [("k", Value::from("b")), ("flag", Value::Bool(true))].into_iter().collect(),
        ];
        assert!(SqliteConnector.validate_schema(&cfg, &["k".to_string()]).await.unwrap());
        SqliteConnector.write(&cfg, &records).await.unwrap();

        let back = SqliteConnector.read(&cfg).await.unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].get("n"), Some(&Value::Int(1)));
        assert_eq!(back[1].get("n"), Some(&Value::Null));
        assert_eq!(back[1].get("flag"), Some(&Value::Int(1)));
        assert!(!SqliteConnector.validate_schema(&cfg, &["missing".to_string()]).await.unwrap());
    }

    #[tokio::test]
    async fn missing_table_fails_with_chain() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let cfg = db(&dir).with_param("table", "nope");
        let err = SqliteConnector.read(&cfg).await.unwrap_err();
        let chain = fieldflow_utils::render_chain(&err);
        assert!(chain.starts_with("sqlite: failed to prepare read query → "), "{chain}");
        assert!(chain.contains("no such table"), "{chain}");
    }

    #[tokio::test]
    async fn preview_respects_smaller_limit() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let cfg = db(&dir).with_param("table", "users");
        let rows = SourceReader::dry_run_preview(&SqliteConnector, &cfg, 2).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn missing_database_is_never_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("typo.db");
        let cfg =
            DataSourceConfig::new(CONNECTOR, path.to_string_lossy()).with_param("table", "users");

        assert!(SqliteConnector.test_connection(&cfg).await.is_err());
        assert!(SqliteConnector.read(&cfg).await.is_err());
        assert!(SqliteConnector.discover_schema(&cfg).await.is_err());
        assert!(SourceReader::dry_run_preview(&SqliteConnector, &cfg, 2).await.is_err());
        assert!(!SqliteConnector.validate_schema(&cfg, &["id".to_string()]).await.unwrap());

        let record: Record = [("id", Value::Int(1))].into_iter().collect();
        let err = SqliteConnector.write(&cfg, &[record]).await.unwrap_err();
        assert!(fieldflow_utils::render_chain(&err).starts_with("sqlite: failed to open"));
        assert!(!path.exists());

        let factory = crate::connectors::ConnectorFactory::with_builtin();
        let outcome = factory.test_connection(&cfg).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("sqlite: failed to open"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn dotted_field_names_stay_single_columns() {
        let dir = TempDir::new().unwrap();
        let cfg = db(&dir).with_param("table", "events").with_param("createTable", "true");
        let record: Record = [("meta.source", Value::from("web")), ("id", Value::Int(7))]
            .into_iter()
            .collect();
        SqliteConnector.write(&cfg, &[record]).await.unwrap();

        let back = SqliteConnector.read(&cfg).await.unwrap();
        assert_eq!(back[0].get("meta.source"), Some(&Value::from("web")));
        assert_eq!(
            SqliteConnector.discover_schema(&cfg).await.unwrap(),
            vec!["meta.source", "id"]
        );
    }
}
