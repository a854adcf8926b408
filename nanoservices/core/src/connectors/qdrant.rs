//! Qdrant REST adapter. The connection string is the base URL
//! (`http://localhost:6333`); `collection` names the target.

use async_trait::async_trait;
use fieldflow_utils::{FieldflowResult, Record};
use reqwest::Method;
use serde_json::{json, Value as Json};

use super::rest::{client, endpoint, send_json};
use super::vector::{join_point, split_point, PointFields};
use super::{missing_param, post_filter};
use crate::destinations::DestinationWriter;
use crate::pipeline::DataSourceConfig;
use crate::sources::traits::{fields_of_first, SourceReader};

const CONNECTOR: &str = "qdrant";
const SCROLL_PAGE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
pub struct QdrantConnector;

fn request(
    config: &DataSourceConfig,
    method: Method,
    path: &str,
) -> FieldflowResult<reqwest::RequestBuilder> {
    let collection = config
        .param("collection")
        .ok_or_else(|| missing_param(CONNECTOR, "collection"))?;
    let url = endpoint(
        CONNECTOR,
        &config.connection_string,
        &format!("collections/{collection}{path}"),
    )?;
    let mut builder = client(CONNECTOR, config)?.request(method, url);
    if let Some(key) = config.param("apiKey") {
        builder = builder.header("api-key", key);
    }
    Ok(builder)
}

/// Qdrant ids are unsigned integers or UUID strings.
fn point_id(id: Json) -> Json {
    match &id {
        Json::String(s) => s.trim().parse::<u64>().map(Json::from).unwrap_or(id),
        _ => id,
    }
}

fn scroll_body(offset: Option<&Json>, page: usize) -> Json {
    let mut body = json!({ "limit": page, "with_payload": true, "with_vector": true });
    if let Some(offset) = offset {
        body["offset"] = offset.clone();
    }
    body
}

/// Points on one scroll page and the offset of the next, if any.
fn parse_scroll(
    body: &Json,
    fields: &PointFields<'_>,
    vector_name: Option<&str>,
) -> (Vec<Record>, Option<Json>) {
    let records = body["result"]["points"]
        .as_array()
        .map(|points| {
            points
                .iter()
                .map(|p| {
                    let vector = match vector_name {
                        Some(name) => p["vector"].get(name),
                        None => p.get("vector"),
                    };
                    join_point(&p["id"], vector, p["payload"].as_object(), fields)
                })
                .collect()
        })
        .unwrap_or_default();
    let next = Some(&body["result"]["next_page_offset"])
        .filter(|v| !v.is_null())
        .cloned();
    (records, next)
}

fn upsert_body(
    records: &[Record],
    fields: &PointFields<'_>,
    vector_name: Option<&str>,
) -> FieldflowResult<Json> {
    let points = records
        .iter()
        .map(|r| {
            let (id, vector, payload) = split_point(CONNECTOR, r, fields)?;
            let vector = match vector_name {
                Some(name) => json!({ name: vector }),
                None => json!(vector),
            };
            Ok(json!({ "id": point_id(id), "vector": vector, "payload": payload }))
        })
        .collect::<FieldflowResult<Vec<_>>>()?;
    Ok(json!({ "points": points }))
}

#[async_trait]
impl SourceReader for QdrantConnector {
    fn connector_type(&self) -> &str {
        CONNECTOR
    }

    async fn read(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<Record>> {
        let fields = PointFields::from_config(config);
        let vector_name = config.param("vectorName");
        let limit = config.param_usize("limit");
        let page = limit.map_or(SCROLL_PAGE_SIZE, |l| l.clamp(1, SCROLL_PAGE_SIZE));
        let mut records = Vec::new();
        let mut offset: Option<Json> = None;

        loop {
            let body = scroll_body(offset.as_ref(), page);
            let response = send_json(
                CONNECTOR,
                request(config, Method::POST, "/points/scroll")?.json(&body),
                "scroll",
            )
            .await?;
            let (batch, next) = parse_scroll(&response, &fields, vector_name);
            records.extend(batch);
            let done = limit.is_some_and(|l| records.len() >= l) && config.incremental().is_none();
            match next {
                Some(n) if !done => offset = Some(n),
                _ => break,
            }
        }
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
        send_json(CONNECTOR, request(config, Method::GET, "")?, "describe collection").await?;
        Ok(())
    }
}

#[async_trait]
impl DestinationWriter for QdrantConnector {
    fn connector_type(&self) -> &str {
        CONNECTOR
    }

    async fn write(&self, config: &DataSourceConfig, records: &[Record]) -> FieldflowResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let fields = PointFields::from_config(config);
        let body = upsert_body(records, &fields, config.param("vectorName"))?;
        send_json(
            CONNECTOR,
            request(config, Method::PUT, "/points")?
                .query(&[("wait", "true")])
                .json(&body),
            "upsert points",
        )
        .await?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use fieldflow_utils::Value;

    fn fields() -> PointFields<'static> {
        PointFields { id: "id", vector: "values" }
    }

    #[test]
    fn numeric_string_ids_become_integers() {
        assert_eq!(point_id(json!("42")), json!(42));
        assert_eq!(
            point_id(json!("5f0c1f7e-4d3a-4b0e-9a53-2a1f0c9d8e71")),
            json!("5f0c1f7e-4d3a-4b0e-9a53-2a1f0c9d8e71")
        );
        assert_eq!(point_id(json!(7)), json!(7));
    }

    #[test]
    fn scroll_page_parses_points_and_offset() {
        let body = json!({"result": {
            "points": [{"id": 1, "vector": [0.5, 0.25], "payload": {"city": "Oslo"}}],
            "next_page_offset": 2
        }});
        let (records, next) = parse_scroll(&body, &fields(), None);
        assert_eq!(records[0].get("id"), Some(&Value::Int(1)));
        assert_eq!(records[0].get("city"), Some(&Value::from("Oslo")));
        assert_eq!(next, Some(json!(2)));

        let last = json!({"result": {"points": [], "next_page_offset": null}});
        assert_eq!(parse_scroll(&last, &fields(), None).1, None);
    }

    #[test]
    fn named_vectors_are_unwrapped_and_wrapped() {
        let body = json!({"result": {"points": [
            {"id": 1, "vector": {"text": [1.0]}, "payload": {}}
        ]}});
        let (records, _) = parse_scroll(&body, &fields(), Some("text"));
        assert_eq!(records[0].get("values"), Some(&Value::from("[1.0]")));

        let input: Vec<Record> = vec![[("id", Value::from("9")), ("values", Value::from("[1]"))]
            .into_iter()
            .collect()];
        let body = upsert_body(&input, &fields(), Some("text")).unwrap();
        assert_eq!(body, json!({"points": [{"id": 9, "vector": {"text": [1.0]}, "payload": {}}]}));
    }

    #[test]
    fn scroll_body_carries_offset() {
        assert_eq!(scroll_body(None, 10)["limit"], json!(10));
        assert_eq!(scroll_body(Some(&json!("abc")), 10)["offset"], json!("abc"));
    }

    #[test]
    fn collection_is_required() {
        let cfg = DataSourceConfig::new(CONNECTOR, "http://localhost:6333");
        let err = request(&cfg, Method::GET, "").unwrap_err();
        assert_eq!(err.to_string(), "qdrant: missing required parameter 'collection'");
    }
}
