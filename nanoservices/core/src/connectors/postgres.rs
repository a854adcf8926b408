//! PostgreSQL adapter over tokio-postgres.
//!
//! Rows travel as JSON in both directions (`row_to_json` on read,
//! `json_populate_recordset` on write) so column types never need a per-type
//! Rust mapping.

use async_trait::async_trait;
use fieldflow_utils::{ConnectorError, FieldflowResult, Record, Value};
use tokio_postgres::{Client, NoTls};

use super::field_union;
use super::sql::{base_query, quote_ident, quote_literal, read_query, table_name};
use crate::destinations::DestinationWriter;
use crate::pipeline::DataSourceConfig;
use crate::sources::SourceReader;

const CONNECTOR: &str = "postgresql";

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresConnector;

fn wrap(message: impl Into<String>, e: tokio_postgres::Error) -> ConnectorError {
    ConnectorError::wrap(CONNECTOR, message, e)
}

/// Accept libpq key/value strings, URLs, and `Key=Value;` strings as written
/// by ADO-style tooling (`Host=db;Username=app;Database=sales`).
pub fn normalize_connection_string(raw: &str) -> String {
    let raw = raw.trim();
    if raw.contains("://") || !raw.contains(';') {
        return raw.to_string();
    }
    raw.split(';')
        .filter_map(|pair| pair.split_once('='))
        .filter_map(|(key, value)| {
            let key = match key.trim().to_ascii_lowercase().replace(' ', "").as_str() {
                "host" | "server" => "host",
                "port" => "port",
                "username" | "user" | "userid" => "user",
                "password" => "password",
                "database" | "dbname" => "dbname",
                "sslmode" => "sslmode",
                "timeout" | "connecttimeout" => "connect_timeout",
                "applicationname" => "application_name",
                _ => return None,
            };
            let value = value.trim().replace('\\', "\\\\").replace('\'', "\\'");
            Some(format!("{key}='{value}'"))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

async fn connect(config: &DataSourceConfig) -> FieldflowResult<Client> {
    let conn_str = normalize_connection_string(&config.connection_string);
    if conn_str.is_empty() {
        return Err(ConnectorError::new(CONNECTOR, "connection string is empty").into());
    }
    let (client, connection) = tokio_postgres::connect(&conn_str, NoTls)
        .await
        .map_err(|e| wrap("connection failed", e))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!(connector = CONNECTOR, error = %e, "connection task ended with error");
        }
    });
    Ok(client)
}

fn json_read_statement(config: &DataSourceConfig) -> FieldflowResult<String> {
    let inner = read_query(CONNECTOR, config, quote_literal)?;
    Ok(format!("SELECT row_to_json(r)::text FROM ({inner}) AS r"))
}

fn insert_statement(table: &str, columns: &[String]) -> String {
    let cols = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    format!(
        "INSERT INTO {table} ({cols}) SELECT {cols} \
         FROM json_populate_recordset(NULL::{table}, $1::text::json)"
    )
}

fn create_statement(table: &str, records: &[Record], columns: &[String]) -> String {
    let defs: Vec<String> = columns
        .iter()
        .map(|c| {
            let mut kind = "";
            for v in records.iter().filter_map(|r| r.get(c)) {
                kind = match (kind, v) {
                    (k, Value::Null) => k,
                    ("" | "BOOLEAN", Value::Bool(_)) => "BOOLEAN",
                    ("" | "BIGINT", Value::Int(_)) => "BIGINT",
                    ("" | "BIGINT" | "DOUBLE PRECISION", Value::Float(_))
                    | ("DOUBLE PRECISION", Value::Int(_)) => "DOUBLE PRECISION",
                    _ => "TEXT",
                };
            }
            format!("{} {}", quote_ident(c), if kind.is_empty() { "TEXT" } else { kind })
        })
        .collect();
    format!("CREATE TABLE IF NOT EXISTS {table} ({})", defs.join(", "))
}

async fn table_columns(client: &Client, config: &DataSourceConfig) -> FieldflowResult<Vec<String>> {
    let table = config
        .param("table")
        .ok_or_else(|| super::missing_param(CONNECTOR, "table"))?;
    let (schema, table) = match table.split_once('.') {
        Some((s, t)) => (s.to_string(), t.to_string()),
        None if !config.schema.trim().is_empty() => {
            (config.schema.trim().to_string(), table.to_string())
        }
        None => ("public".to_string(), table.to_string()),
    };
    let rows = client
        .query(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
            &[&schema, &table],
        )
        .await
        .map_err(|e| wrap("failed to inspect table", e))?;
    Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
}

#[async_trait]
impl SourceReader for PostgresConnector {
    fn connector_type(&self) -> &str {
        CONNECTOR
    }

    async fn read(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<Record>> {
        let sql = json_read_statement(config)?;
        let client = connect(config).await?;
        let rows = client
            .query(sql.as_str(), &[])
            .await
            .map_err(|e| wrap("read query failed", e))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let text: String = row
                .try_get(0)
                .map_err(|e| wrap("failed to decode row", e))?;
            let json: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| ConnectorError::wrap(CONNECTOR, "row is not valid JSON", e))?;
            records.extend(Record::from_json(json));
        }
        tracing::debug!(connector = CONNECTOR, rows = records.len(), "read complete");
        Ok(records)
    }

    async fn discover_schema(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<String>> {
        let client = connect(config).await?;
        if config.param("query").is_none() {
            return table_columns(&client, config).await;
        }
        let stmt = client
            .prepare(&base_query(CONNECTOR, config)?)
            .await
            .map_err(|e| wrap("failed to prepare query", e))?;
        Ok(stmt.columns().iter().map(|c| c.name().to_string()).collect())
    }

    async fn dry_run_preview(
        &self,
        config: &DataSourceConfig,
        limit: usize,
    ) -> FieldflowResult<Vec<Record>> {
        let capped = config.param_usize("limit").map_or(limit, |l| l.min(limit));
        self.read(&config.clone().with_param("limit", capped.to_string())).await
    }

    async fn test_connection(&self, config: &DataSourceConfig) -> FieldflowResult<()> {
        let client = connect(config).await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| wrap("connection test query failed", e))?;
        Ok(())
    }
}

#[async_trait]
impl DestinationWriter for PostgresConnector {
    fn connector_type(&self) -> &str {
        CONNECTOR
    }

    async fn write(&self, config: &DataSourceConfig, records: &[Record]) -> FieldflowResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let table = table_name(CONNECTOR, config)?;
        let columns = field_union(records);
        let rows: Vec<_> = records.iter().map(Record::to_json).collect();
        let payload = serde_json::to_string(&rows)
            .map_err(|e| ConnectorError::wrap(CONNECTOR, "failed to encode rows", e))?;

        let mut client = connect(config).await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| wrap("failed to begin transaction", e))?;
        if config.param_bool("createTable") {
            tx.execute(create_statement(&table, records, &columns).as_str(), &[])
                .await
                .map_err(|e| wrap(format!("failed to create table {table}"), e))?;
        }
        let inserted = tx
            .execute(insert_statement(&table, &columns).as_str(), &[&payload])
            .await
            .map_err(|e| wrap(format!("insert into {table} failed"), e))?;
        tx.commit().await.map_err(|e| wrap("failed to commit transaction", e))?;
        tracing::debug!(connector = CONNECTOR, rows = inserted, "write complete");
        Ok(())
    }

    async fn validate_schema(
        &self,
        config: &DataSourceConfig,
        fields: &[String],
    ) -> FieldflowResult<bool> {
        let client = connect(config).await?;
        let columns = table_columns(&client, config).await?;
        if columns.is_empty() {
            return Ok(config.param_bool("createTable"));
        }
        Ok(fields.iter().all(|f| columns.contains(f)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PARAM_INCREMENTAL_FIELD, PARAM_LAST_INCREMENTAL_VALUE};

    #[test]
    fn ado_style_strings_become_libpq() {
        assert_eq!(
            normalize_connection_string(
                "Host=db;Port=5432;Username=app;Password=p'w;Database=sales;Pooling=true"
            ),
            "host='db' port='5432' user='app' password='p\\'w' dbname='sales'"
        );
        assert_eq!(normalize_connection_string("host=db user=app"), "host=db user=app");
        assert_eq!(
            normalize_connection_string("postgresql://app@db/sales"),
            "postgresql://app@db/sales"
        );
    }

    #[test]
    fn read_statement_inlines_the_bound_as_a_literal() {
        let cfg = DataSourceConfig::new(CONNECTOR, "host=db")
            .with_param("table", "orders")
            .with_param(PARAM_INCREMENTAL_FIELD, "updated_at")
            .with_param(PARAM_LAST_INCREMENTAL_VALUE, "2026-01-01");
        assert_eq!(
            json_read_statement(&cfg).unwrap(),
            "SELECT row_to_json(r)::text FROM (SELECT * FROM (SELECT * FROM \"orders\") AS src \
             WHERE \"updated_at\" > '2026-01-01' ORDER BY \"updated_at\") AS r"
        );
    }

    #[test]
    fn insert_goes_through_json_recordset() {
        let sql = insert_statement("\"public\".\"t\"", &["a".to_string(), "b".to_string()]);
        assert_eq!(
            sql,
            "INSERT INTO \"public\".\"t\" (\"a\", \"b\") SELECT \"a\", \"b\" \
             FROM json_populate_recordset(NULL::\"public\".\"t\", $1::text::json)"
        );
    }

    #[test]
    fn create_statement_infers_column_types() {
        let records: Vec<Record> = vec![
            [("id", Value::Int(1)), ("x", Value::Float(1.5)), ("ok", Value::Bool(true))]
                .into_iter()
                .collect(),
            [("id", Value::Int(2)), ("x", Value::Int(3)), ("name", Value::from("n"))]
                .into_iter()
                .collect(),
        ];
        let cols = field_union(&records);
        assert_eq!(
            create_statement("\"t\"", &records, &cols),
            "CREATE TABLE IF NOT EXISTS \"t\" \
             (\"id\" BIGINT, \"x\" DOUBLE PRECISION, \"ok\" BOOLEAN, \"name\" TEXT)"
        );
    }
}
