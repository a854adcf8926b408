//! Neo4j adapter over the HTTP transactional Cypher endpoint. The connection
//! string is the server URL (`http://localhost:7474`); credentials come from
//! `username`/`password`, the node label from `label`.

use async_trait::async_trait;
use fieldflow_utils::{ConnectorError, FieldflowResult, Record, Value};
use serde_json::{json, Value as Json};

use super::rest::{client, endpoint, send_json};
use super::{missing_param, post_filter};
use crate::destinations::DestinationWriter;
use crate::pipeline::DataSourceConfig;
use crate::sources::traits::{fields_of_first, SourceReader};

const CONNECTOR: &str = "neo4j";
const DEFAULT_DATABASE: &str = "neo4j";

#[derive(Debug, Clone, Copy, Default)]
pub struct Neo4jConnector;

fn quote_label(label: &str) -> String {
    format!("`{}`", label.trim().replace('`', "``"))
}

fn label(config: &DataSourceConfig) -> FieldflowResult<String> {
    config
        .param("label")
        .map(quote_label)
        .ok_or_else(|| missing_param(CONNECTOR, "label").into())
}

fn read_statement(config: &DataSourceConfig) -> FieldflowResult<String> {
    if let Some(query) = config.param("query") {
        return Ok(query.trim().to_string());
    }
    let mut cypher = format!("MATCH (n:{}) RETURN properties(n) AS props", label(config)?);
    if config.incremental().is_none() {
        if let Some(limit) = config.param_usize("limit") {
            cypher.push_str(&format!(" LIMIT {limit}"));
        }
    }
    Ok(cypher)
}

/// Plain CREATE, or MERGE keyed on `idField` when one is configured.
fn write_statement(config: &DataSourceConfig) -> FieldflowResult<String> {
    let label = label(config)?;
    Ok(match config.param("idField") {
        Some(id) => format!(
            "UNWIND $rows AS row MERGE (n:{label} {{{key}: row[{lit}]}}) SET n += row",
            key = quote_label(id),
            lit = serde_json::Value::from(id),
        ),
        None => format!("UNWIND $rows AS row CREATE (n:{label}) SET n = row"),
    })
}

fn statements(cypher: &str, parameters: Json) -> Json {
    json!({ "statements": [{ "statement": cypher, "parameters": parameters }] })
}

/// Surface Cypher errors reported inside a 200 response.
fn check_errors(body: &Json) -> FieldflowResult<()> {
    match body["errors"].as_array().and_then(|errs| errs.first()) {
        Some(err) => Err(ConnectorError::new(
            CONNECTOR,
            format!(
                "{}: {}",
                err["code"].as_str().unwrap_or("Neo.Error"),
                err["message"].as_str().unwrap_or("unknown error")
            ),
        )
        .into()),
        None => Ok(()),
    }
}

/// One record per result row. A single map column is flattened; otherwise
/// each column becomes a field.
fn parse_rows(body: &Json) -> Vec<Record> {
    let result = &body["results"][0];
    let columns: Vec<&str> = result["columns"]
        .as_array()
        .map(|c| c.iter().filter_map(Json::as_str).collect())
        .unwrap_or_default();
    let Some(data) = result["data"].as_array() else {
        return Vec::new();
    };
    data.iter()
        .filter_map(|entry| entry["row"].as_array())
        .map(|row| match row.as_slice() {
            [single @ Json::Object(_)] if columns.len() == 1 => {
                Record::from_json(single.clone()).unwrap_or_default()
            }
            values => columns
                .iter()
                .zip(values.iter())
                .map(|(c, v)| (*c, Value::from_json(v.clone())))
                .collect(),
        })
        .collect()
}

async fn commit(config: &DataSourceConfig, body: &Json, what: &str) -> FieldflowResult<Json> {
    let database = config.param_or("database", DEFAULT_DATABASE);
    let url = endpoint(CONNECTOR, &config.connection_string, &format!("db/{database}/tx/commit"))?;
    let mut request = client(CONNECTOR, config)?.post(url).json(body);
    if let Some(user) = config.param("username") {
        request = request.basic_auth(user, config.param("password"));
    }
    let response = send_json(CONNECTOR, request, what).await?;
    check_errors(&response)?;
    Ok(response)
}

#[async_trait]
impl SourceReader for Neo4jConnector {
    fn connector_type(&self) -> &str {
        CONNECTOR
    }

    async fn read(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<Record>> {
        let body = statements(&read_statement(config)?, json!({}));
        let response = commit(config, &body, "read").await?;
        Ok(post_filter(config, parse_rows(&response)))
    }

    async fn discover_schema(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<String>> {
        let sample = SourceReader::dry_run_preview(self, config, 1).await?;
        Ok(fields_of_first(&sample))
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
        commit(config, &statements("RETURN 1", json!({})), "connection test").await?;
        Ok(())
    }
}

#[async_trait]
impl DestinationWriter for Neo4jConnector {
    fn connector_type(&self) -> &str {
        CONNECTOR
    }

    async fn write(&self, config: &DataSourceConfig, records: &[Record]) -> FieldflowResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        // neo4j properties cannot hold null
        let rows: Vec<Json> = records
            .iter()
            .map(|r| {
                Json::Object(
                    r.iter()
                        .filter(|(_, v)| !v.is_null())
                        .map(|(k, v)| (k.to_string(), v.to_json()))
                        .collect(),
                )
            })
            .collect();
        let body = statements(&write_statement(config)?, json!({ "rows": rows }));
        commit(config, &body, "write").await?;
        Ok(())
    }

    async fn validate_schema(
        &self,
        _config: &DataSourceConfig,
        _fields: &[String],
    ) -> FieldflowResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DataSourceConfig {
        DataSourceConfig::new(CONNECTOR, "http://localhost:7474").with_param("label", "Person")
    }

    #[test]
    fn read_statement_uses_label_and_limit() {
        assert_eq!(
            read_statement(&cfg().with_param("limit", "5")).unwrap(),
            "MATCH (n:`Person`) RETURN properties(n) AS props LIMIT 5"
        );
        let custom = cfg().with_param("query", "MATCH (p) RETURN p.name AS name");
        assert_eq!(read_statement(&custom).unwrap(), "MATCH (p) RETURN p.name AS name");
    }

    #[test]
    fn write_statement_merges_on_id_field() {
        assert_eq!(
            write_statement(&cfg()).unwrap(),
            "UNWIND $rows AS row CREATE (n:`Person`) SET n = row"
        );
        assert_eq!(
            write_statement(&cfg().with_param("idField", "email")).unwrap(),
            "UNWIND $rows AS row MERGE (n:`Person` {`email`: row[\"email\"]}) SET n += row"
        );
    }

    #[test]
    fn labels_are_escaped() {
        assert_eq!(quote_label("Bad`Label"), "`Bad``Label`");
    }

    #[test]
    fn rows_flatten_single_map_column() {
        let body = json!({"results": [{"columns": ["props"], "data": [
            {"row": [{"name": "Ada", "born": 1815}], "meta": []}
        ]}], "errors": []});
        let rows = parse_rows(&body);
        assert_eq!(rows[0].get("born"), Some(&Value::Int(1815)));

        let body = json!({"results": [{
            "columns": ["name", "age"],
            "data": [{"row": ["Bob", 40]}]
        }]});
        let rows = parse_rows(&body);
        assert_eq!(rows[0].get("name"), Some(&Value::from("Bob")));
        assert_eq!(rows[0].get("age"), Some(&Value::Int(40)));
    }

    #[test]
    fn embedded_errors_fail_the_call() {
        let body = json!({"results": [], "errors": [{
            "code": "Neo.ClientError.Statement.SyntaxError",
            "message": "bad"
        }]});
        let err = check_errors(&body).unwrap_err();
        assert_eq!(err.to_string(), "neo4j: Neo.ClientError.Statement.SyntaxError: bad");
        assert!(check_errors(&json!({"errors": []})).is_ok());
    }
}
