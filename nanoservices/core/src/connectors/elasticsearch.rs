//! Elasticsearch adapter: scroll search to read, `_bulk` to write. The
//! connection string is the cluster URL; `index` names the target.

use async_trait::async_trait;
use fieldflow_utils::{ConnectorError, FieldflowResult, Record, Value};
use reqwest::Method;
use serde_json::{json, Value as Json};

use super::rest::{client, endpoint, send_json};
use super::{missing_param, post_filter};
use crate::destinations::DestinationWriter;
use crate::pipeline::DataSourceConfig;
use crate::sources::traits::{fields_of_first, SourceReader};

const CONNECTOR: &str = "elasticsearch";
const SCROLL_KEEPALIVE: &str = "1m";
const SCROLL_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, Default)]
pub struct ElasticsearchConnector;

fn index(config: &DataSourceConfig) -> FieldflowResult<&str> {
    config
        .param("index")
        .ok_or_else(|| missing_param(CONNECTOR, "index").into())
}

fn request(
    config: &DataSourceConfig,
    method: Method,
    path: &str,
) -> FieldflowResult<reqwest::RequestBuilder> {
    let url = endpoint(CONNECTOR, &config.connection_string, path)?;
    let mut builder = client(CONNECTOR, config)?.request(method, url);
    if let Some(key) = config.param("apiKey") {
        builder = builder.header(reqwest::header::AUTHORIZATION, format!("ApiKey {key}"));
    } else if let Some(user) = config.param("username") {
        builder = builder.basic_auth(user, config.param("password"));
    }
    Ok(builder)
}

/// First search request. The incremental bound becomes a range query sorted
/// on the watermark field.
fn search_body(config: &DataSourceConfig, size: usize) -> Json {
    let mut body = json!({ "size": size, "query": { "match_all": {} } });
    if let Some((field, last)) = config.incremental() {
        if let Some(last) = last {
            body["query"] = json!({ "range": { field: { "gt": last } } });
        }
        body["sort"] = json!([{ field: "asc" }]);
    }
    body
}

/// Documents on one page plus the scroll id to continue with.
fn parse_hits(body: &Json, id_field: Option<&str>) -> (Vec<Record>, Option<String>) {
    let records = body["hits"]["hits"]
        .as_array()
        .map(|hits| {
            hits.iter()
                .map(|hit| {
                    let mut record = Record::from_json(hit["_source"].clone()).unwrap_or_default();
                    if let Some(field) = id_field {
                        if !record.contains(field) {
                            record.insert(field, Value::from_json(hit["_id"].clone()));
                        }
                    }
                    record
                })
                .collect()
        })
        .unwrap_or_default();
    let scroll_id = body["_scroll_id"].as_str().map(str::to_string);
    (records, scroll_id)
}

/// NDJSON bulk payload: an action line then the document, per record.
fn bulk_payload(
    index: &str,
    records: &[Record],
    id_field: Option<&str>,
) -> FieldflowResult<String> {
    let mut out = String::new();
    for record in records {
        let mut action = json!({ "_index": index });
        if let Some(id) = id_field.and_then(|f| record.get(f)).filter(|v| !v.is_empty()) {
            action["_id"] = json!(id.to_string());
        }
        for line in [json!({ "index": action }), record.to_json()] {
            let text = serde_json::to_string(&line)
                .map_err(|e| ConnectorError::wrap(CONNECTOR, "failed to encode bulk line", e))?;
            out.push_str(&text);
            out.push('\n');
        }
    }
    Ok(out)
}

/// `_bulk` answers 200 even when items fail; report the first failure.
fn check_bulk(body: &Json) -> FieldflowResult<()> {
    if !body["errors"].as_bool().unwrap_or(false) {
        return Ok(());
    }
    let items = body["items"].as_array().map(Vec::as_slice).unwrap_or_default();
    let failed: Vec<&Json> = items
        .iter()
        .filter_map(|item| item.as_object().and_then(|o| o.values().next()))
        .filter(|result| !result["error"].is_null())
        .collect();
    let first = failed
        .first()
        .map(|r| {
            format!(
                "{}: {}",
                r["error"]["type"].as_str().unwrap_or("error"),
                r["error"]["reason"].as_str().unwrap_or("unknown reason")
            )
        })
        .unwrap_or_else(|| "unknown failure".to_string());
    Err(ConnectorError::new(
        CONNECTOR,
        format!(
            "bulk request rejected {} of {} documents; first: {first}",
            failed.len(),
            items.len()
        ),
    )
    .into())
}

#[async_trait]
impl SourceReader for ElasticsearchConnector {
    fn connector_type(&self) -> &str {
        CONNECTOR
    }

    async fn read(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<Record>> {
        let index = index(config)?;
        let id_field = config.param("idField");
        let limit = config.param_usize("limit");
        let size = limit.map_or(SCROLL_PAGE_SIZE, |l| l.clamp(1, SCROLL_PAGE_SIZE));

        let first = request(config, Method::POST, &format!("{index}/_search"))?
            .query(&[("scroll", SCROLL_KEEPALIVE)])
            .json(&search_body(config, size));
        let (mut records, mut scroll_id) =
            parse_hits(&send_json(CONNECTOR, first, "search").await?, id_field);
        let mut page_len = records.len();

        while page_len > 0 && !limit.is_some_and(|l| records.len() >= l) {
            let Some(id) = scroll_id.clone() else { break };
            let next = request(config, Method::POST, "_search/scroll")?
                .json(&json!({ "scroll": SCROLL_KEEPALIVE, "scroll_id": id }));
            let (page, next_id) =
                parse_hits(&send_json(CONNECTOR, next, "scroll").await?, id_field);
            page_len = page.len();
            records.extend(page);
            scroll_id = next_id.or(scroll_id);
        }

        if let Some(id) = scroll_id {
            let clear = request(config, Method::DELETE, "_search/scroll")?
                .json(&json!({ "scroll_id": id }));
            if let Err(e) = send_json(CONNECTOR, clear, "clear scroll").await {
                tracing::debug!(connector = CONNECTOR, error = %e, "scroll context not cleared");
            }
        }
        Ok(post_filter(config, records))
    }

    async fn discover_schema(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<String>> {
        let index = index(config)?;
        let body = send_json(
            CONNECTOR,
            request(config, Method::GET, &format!("{index}/_mapping"))?,
            "get mapping",
        )
        .await?;
        let mapped: Vec<String> = body
            .as_object()
            .and_then(|indices| indices.values().next())
            .and_then(|m| m["mappings"]["properties"].as_object())
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default();
        if !mapped.is_empty() {
            return Ok(mapped);
        }
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
        send_json(CONNECTOR, request(config, Method::GET, "")?, "cluster info").await?;
        Ok(())
    }
}

#[async_trait]
impl DestinationWriter for ElasticsearchConnector {
    fn connector_type(&self) -> &str {
        CONNECTOR
    }

    async fn write(&self, config: &DataSourceConfig, records: &[Record]) -> FieldflowResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let payload = bulk_payload(index(config)?, records, config.param("idField"))?;
        let bulk = request(config, Method::POST, "_bulk")?
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(payload);
        let response = send_json(CONNECTOR, bulk, "bulk index").await?;
        check_bulk(&response)
    }

    /// Indices map new fields dynamically.
    async fn validate_schema(
        &self,
        _config: &DataSourceConfig,
        _fields: &[String],
    ) -> FieldflowResult<bool> {
        Ok(true)
    }
}
