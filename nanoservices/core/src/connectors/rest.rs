//! reqwest plumbing shared by the HTTP-speaking adapters.

use std::time::Duration;

use fieldflow_utils::{ConnectorError, FieldflowResult};
use reqwest::{Client, RequestBuilder};
use url::Url;

use crate::pipeline::DataSourceConfig;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const ERROR_BODY_LIMIT: usize = 300;

pub(crate) fn client(connector: &str, config: &DataSourceConfig) -> FieldflowResult<Client> {
    let timeout = config
        .param_usize("timeoutSeconds")
        .map(|s| s as u64)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()
        .map_err(|e| ConnectorError::wrap(connector, "failed to build HTTP client", e).into())
}

/// Parse a base URL so relative joins append instead of replacing the last
/// path segment.
pub(crate) fn base_url(connector: &str, raw: &str) -> FieldflowResult<Url> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| ConnectorError::wrap(connector, format!("invalid URL '{raw}'"), e))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

pub(crate) fn endpoint(connector: &str, base: &str, path: &str) -> FieldflowResult<Url> {
    base_url(connector, base)?
        .join(path.trim_start_matches('/'))
        .map_err(|e| {
            ConnectorError::wrap(connector, format!("invalid endpoint path '{path}'"), e).into()
        })
}

/// Send a request and decode a JSON body, turning transport failures and
/// non-2xx statuses into connector errors. An empty body decodes to null.
pub(crate) async fn send_json(
    connector: &str,
    request: RequestBuilder,
    what: &str,
) -> FieldflowResult<serde_json::Value> {
    let response = request
        .send()
        .await
        .map_err(|e| ConnectorError::wrap(connector, format!("{what}: request failed"), e))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| {
            ConnectorError::wrap(connector, format!("{what}: failed to read response"), e)
        })?;

    if !status.is_success() {
        return Err(ConnectorError::new(
            connector,
            format!("{what}: HTTP {status}: {}", truncate(&body)),
        )
        .into());
    }
    if body.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| {
        ConnectorError::wrap(connector, format!("{what}: response is not valid JSON"), e).into()
    })
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_to_base_path() {
        let url = endpoint("qdrant", "http://localhost:6333/api", "/collections/c/points").unwrap();
        assert_eq!(url.as_str(), "http://localhost:6333/api/collections/c/points");

        let url = endpoint("qdrant", "http://localhost:6333", "collections").unwrap();
        assert_eq!(url.as_str(), "http://localhost:6333/collections");
    }

    #[test]
    fn invalid_url_is_a_connector_error() {
        let err = base_url("http", "not a url").unwrap_err();
        assert!(err.to_string().starts_with("http: invalid URL"));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        assert_eq!(truncate(&body).chars().count(), ERROR_BODY_LIMIT + 1);
        assert_eq!(truncate(" short "), "short");
    }
}
