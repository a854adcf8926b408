//! Generic JSON-over-HTTP adapter. The connection string is the endpoint URL.

use async_trait::async_trait;
use fieldflow_utils::{ConnectorError, FieldflowResult, Record};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value as Json;
use url::Url;

use super::rest::{client, send_json};
use super::post_filter;
use crate::destinations::DestinationWriter;
use crate::pipeline::DataSourceConfig;
use crate::sources::traits::{fields_of_first, SourceReader};

/// Keys tried, in order, when a response object wraps its rows and no
/// `recordsPath` is configured.
const ENVELOPE_KEYS: [&str; 5] = ["data", "items", "results", "records", "rows"];

#[derive(Debug, Clone)]
pub struct HttpConnector {
    connector_type: String,
}

impl HttpConnector {
    pub fn new(connector_type: impl Into<String>) -> Self {
        Self { connector_type: connector_type.into() }
    }

    fn name(&self) -> &str {
        &self.connector_type
    }

    fn request(
        &self,
        config: &DataSourceConfig,
        default_method: Method,
    ) -> FieldflowResult<reqwest::RequestBuilder> {
        let raw = config.connection_string.trim();
        let url = Url::parse(raw)
            .map_err(|e| ConnectorError::wrap(self.name(), format!("invalid URL '{raw}'"), e))?;
        let method = match config.param("method") {
            Some(m) => Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                .map_err(|e| {
                    ConnectorError::wrap(self.name(), format!("invalid HTTP method '{m}'"), e)
                })?,
            None => default_method,
        };
        let mut request = client(self.name(), config)?
            .request(method, url)
            .headers(parse_headers(self.name(), config.param("headers"))?);
        if let Some(token) = config.param("bearerToken") {
            request = request.bearer_auth(token);
        }
        Ok(request)
    }
}

/// Headers come either as a JSON object or as `Name: value` pairs separated by
/// newlines or semicolons.
pub fn parse_headers(connector: &str, raw: Option<&str>) -> FieldflowResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(headers);
    };

    let pairs: Vec<(String, String)> = if raw.starts_with('{') {
        let obj: serde_json::Map<String, Json> = serde_json::from_str(raw)
            .map_err(|e| ConnectorError::wrap(connector, "headers is not a JSON object", e))?;
        obj.into_iter()
            .map(|(k, v)| match v {
                Json::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect()
    } else {
        raw.split(['\n', ';'])
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                line.split_once(':')
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                    .ok_or_else(|| {
                        let line = line.trim();
                        ConnectorError::new(connector, format!("malformed header '{line}'"))
                    })
            })
            .collect::<Result<_, _>>()?
    };

    for (name, value) in pairs {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| {
                ConnectorError::wrap(connector, format!("invalid header name '{name}'"), e)
            })?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| {
                ConnectorError::wrap(connector, format!("invalid value for header '{name}'"), e)
            })?;
        headers.insert(header, value);
    }
    Ok(headers)
}

/// Pull the row list out of a response body. `path` is dot-separated; numeric
/// segments index arrays. Scalars inside the list land in a `value` field.
pub fn extract_records(body: Json, path: Option<&str>) -> Option<Vec<Record>> {
    let mut node = body;
    if let Some(path) = path {
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            node = match node {
                Json::Object(mut map) => map.remove(segment)?,
                Json::Array(mut items) => {
                    let idx: usize = segment.parse().ok()?;
                    if idx >= items.len() {
                        return None;
                    }
                    items.swap_remove(idx)
                }
                _ => return None,
            };
        }
    } else {
        let envelope = match &node {
            Json::Object(map) => ENVELOPE_KEYS
                .iter()
                .copied()
                .find(|k| map.get(*k).is_some_and(Json::is_array)),
            _ => None,
        };
        if let Some(key) = envelope {
            node = match node {
                Json::Object(mut map) => map.remove(key)?,
                other => other,
            };
        }
    }

    match node {
        Json::Array(items) => Some(
            items
                .into_iter()
                .map(|item| match item {
                    obj @ Json::Object(_) => Record::from_json(obj).unwrap_or_default(),
                    other => [("value", fieldflow_utils::Value::from_json(other))]
                        .into_iter()
                        .collect(),
                })
                .collect(),
        ),
        Json::Null => Some(Vec::new()),
        obj @ Json::Object(_) => Record::from_json(obj).map(|r| vec![r]),
        _ => None,
    }
}

#[async_trait]
impl SourceReader for HttpConnector {
    fn connector_type(&self) -> &str {
        self.name()
    }

    async fn read(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<Record>> {
        let request = self.request(config, Method::GET)?;
        let request = match config.param("body") {
            Some(body) => request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_string()),
            None => request,
        };
        let body = send_json(self.name(), request, "read").await?;
        let path = config.param("recordsPath");
        let records = extract_records(body, path).ok_or_else(|| {
            ConnectorError::new(
                self.name(),
                format!("response has no record list at '{}'", path.unwrap_or("<root>")),
            )
        })?;
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
        let mut records = self.read(config).await?;
        records.truncate(limit);
        Ok(records)
    }

    async fn test_connection(&self, config: &DataSourceConfig) -> FieldflowResult<()> {
        let request = self.request(config, Method::GET)?;
        let response = request
            .send()
            .await
            .map_err(|e| ConnectorError::wrap(self.name(), "connection test request failed", e))?;
        // any answer other than a server error proves the endpoint is reachable
        if response.status().is_server_error() {
            return Err(ConnectorError::new(
                self.name(),
                format!("connection test returned HTTP {}", response.status()),
            )
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl DestinationWriter for HttpConnector {
    fn connector_type(&self) -> &str {
        self.name()
    }

    /// One request with the whole batch as a JSON array, or one request per
    /// record when `perRecord` is set.
    async fn write(&self, config: &DataSourceConfig, records: &[Record]) -> FieldflowResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        if config.param_bool("perRecord") {
            for (i, record) in records.iter().enumerate() {
                let request = self.request(config, Method::POST)?.json(&record.to_json());
                send_json(self.name(), request, &format!("write of record {}", i + 1)).await?;
            }
            return Ok(());
        }
        let payload = Json::Array(records.iter().map(Record::to_json).collect());
        let request = self.request(config, Method::POST)?.json(&payload);
        send_json(self.name(), request, "write").await?;
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
