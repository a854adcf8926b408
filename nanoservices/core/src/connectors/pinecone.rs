//! Pinecone data-plane adapter. The connection string is the index host URL;
//! the API key comes from the `apiKey` parameter.

use async_trait::async_trait;
use fieldflow_utils::{ConnectorError, FieldflowResult, Record};
use serde_json::{json, Value as Json};

use super::rest::{client, endpoint, send_json};
use super::vector::{join_point, split_point, PointFields};
use super::{missing_param, post_filter};
use crate::destinations::DestinationWriter;
use crate::pipeline::DataSourceConfig;
use crate::sources::traits::{fields_of_first, SourceReader};

const CONNECTOR: &str = "pinecone";
const LIST_PAGE_SIZE: usize = 100;
const DEFAULT_UPSERT_BATCH: usize = 100;

#[derive(Debug, Clone, Copy, Default)]
pub struct PineconeConnector;

fn api_key(config: &DataSourceConfig) -> FieldflowResult<&str> {
    config
        .param("apiKey")
        .ok_or_else(|| missing_param(CONNECTOR, "apiKey").into())
}

fn get(config: &DataSourceConfig, path: &str) -> FieldflowResult<reqwest::RequestBuilder> {
    let url = endpoint(CONNECTOR, &config.connection_string, path)?;
    Ok(client(CONNECTOR, config)?.get(url).header("Api-Key", api_key(config)?))
}

fn post(
    config: &DataSourceConfig,
    path: &str,
    body: &Json,
) -> FieldflowResult<reqwest::RequestBuilder> {
    let url = endpoint(CONNECTOR, &config.connection_string, path)?;
    Ok(client(CONNECTOR, config)?
        .post(url)
        .header("Api-Key", api_key(config)?)
        .json(body))
}

/// Ids on one list page plus the token for the next one.
fn parse_list_page(body: &Json) -> (Vec<String>, Option<String>) {
    let ids = body["vectors"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let next = body["pagination"]["next"].as_str().map(str::to_string);
    (ids, next)
}

/// Fetched vectors come back keyed by id; keep the listing order.
fn parse_fetch(body: &Json, ids: &[String], fields: &PointFields<'_>) -> Vec<Record> {
    ids.iter()
        .filter_map(|id| body["vectors"].get(id))
        .map(|v| join_point(&v["id"], v.get("values"), v["metadata"].as_object(), fields))
        .collect()
}

fn upsert_body(
    records: &[Record],
    namespace: Option<&str>,
    fields: &PointFields<'_>,
) -> FieldflowResult<Json> {
    let vectors = records
        .iter()
        .map(|r| {
            let (id, values, metadata) = split_point(CONNECTOR, r, fields)?;
            // pinecone ids are always strings
            let id = match id {
                Json::String(s) => s,
                other => other.to_string(),
            };
            Ok(json!({ "id": id, "values": values, "metadata": metadata }))
        })
        .collect::<FieldflowResult<Vec<_>>>()?;
    let mut body = json!({ "vectors": vectors });
    if let Some(ns) = namespace {
        body["namespace"] = json!(ns);
    }
    Ok(body)
}

#[async_trait]
impl SourceReader for PineconeConnector {
    fn connector_type(&self) -> &str {
        CONNECTOR
    }

    async fn read(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<Record>> {
        let fields = PointFields::from_config(config);
        let namespace = config.param("namespace").unwrap_or_default();
        let limit = config.param_usize("limit");
        let mut records = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut query = vec![
                ("namespace", namespace.to_string()),
                ("limit", LIST_PAGE_SIZE.to_string()),
            ];
            if let Some(t) = &token {
                query.push(("paginationToken", t.clone()));
            }
            let page = send_json(
                CONNECTOR,
                get(config, "vectors/list")?.query(&query),
                "list vectors",
            )
            .await?;
            let (ids, next) = parse_list_page(&page);
            if !ids.is_empty() {
                let mut fetch_query: Vec<(&str, &str)> =
                    ids.iter().map(|id| ("ids", id.as_str())).collect();
                fetch_query.push(("namespace", namespace));
                let body = send_json(
                    CONNECTOR,
                    get(config, "vectors/fetch")?.query(&fetch_query),
                    "fetch vectors",
                )
                .await?;
                records.extend(parse_fetch(&body, &ids, &fields));
            }
            let done = limit.is_some_and(|l| records.len() >= l) && config.incremental().is_none();
            match next {
                Some(t) if !done => token = Some(t),
                _ => break,
            }
        }
        tracing::debug!(connector = CONNECTOR, rows = records.len(), "read complete");
        Ok(post_filter(config, records))
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
        let describe = post(config, "describe_index_stats", &json!({}))?;
        send_json(CONNECTOR, describe, "describe index").await?;
        Ok(())
    }
}

#[async_trait]
impl DestinationWriter for PineconeConnector {
    fn connector_type(&self) -> &str {
        CONNECTOR
    }

    async fn write(&self, config: &DataSourceConfig, records: &[Record]) -> FieldflowResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let fields = PointFields::from_config(config);
        let chunk = config
            .param_usize("upsertBatchSize")
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_UPSERT_BATCH);
        for part in records.chunks(chunk) {
            let body = upsert_body(part, config.param("namespace"), &fields)?;
            let response =
                send_json(CONNECTOR, post(config, "vectors/upsert", &body)?, "upsert").await?;
            let upserted = response["upsertedCount"].as_u64().unwrap_or(0);
            if upserted as usize != part.len() {
                return Err(ConnectorError::new(
                    CONNECTOR,
                    format!("upsert acknowledged {upserted} of {} vectors", part.len()),
                )
                .into());
            }
        }
        Ok(())
    }

    async fn validate_schema(
        &self,
        config: &DataSourceConfig,
        fields: &[String],
    ) -> FieldflowResult<bool> {
        let point = PointFields::from_config(config);
        Ok(fields.iter().any(|f| f == point.id) && fields.iter().any(|f| f == point.vector))
    }
}
