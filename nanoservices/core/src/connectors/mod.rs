//! Per-backend adapters behind the [`SourceReader`](crate::sources::SourceReader)
//! and [`DestinationWriter`](crate::destinations::DestinationWriter) contract,
//! plus the [`ConnectorFactory`] that resolves them by type name.

use fieldflow_utils::{ConnectorError, FieldflowResult, Record};

use crate::pipeline::{watermark, DataSourceConfig};

pub mod elasticsearch;
pub mod factory;
pub mod file;
pub mod http;
pub mod memory;
pub mod neo4j;
pub mod pinecone;
pub mod postgres;
pub mod qdrant;
pub mod sqlite;

mod rest;
mod sql;
mod vector;

pub use factory::{ConnectionTestResult, ConnectorFactory};

/// Run blocking backend work on tokio's blocking pool.
pub(crate) async fn run_blocking<F, T>(connector: &'static str, f: F) -> FieldflowResult<T>
where
    F: FnOnce() -> FieldflowResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(join_err) => {
            Err(ConnectorError::wrap(connector, "blocking task failed", join_err).into())
        }
    }
}

/// Apply the incremental bound and the `limit` parameter after a read for
/// backends that cannot push them down.
pub(crate) fn post_filter(config: &DataSourceConfig, records: Vec<Record>) -> Vec<Record> {
    let mut records = match config.incremental() {
        Some((field, last)) => watermark::filter_after(records, field, last),
        None => records,
    };
    if let Some(limit) = config.param_usize("limit") {
        records.truncate(limit);
    }
    records
}

/// Union of field names across records, first-seen order.
pub(crate) fn field_union(records: &[Record]) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for record in records {
        for field in record.fields() {
            if !fields.iter().any(|f| f == field) {
                fields.push(field.to_string());
            }
        }
    }
    fields
}

/// Config error for a missing required parameter.
pub(crate) fn missing_param(connector: &str, key: &str) -> ConnectorError {
    ConnectorError::new(connector, format!("missing required parameter '{key}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PARAM_INCREMENTAL_FIELD, PARAM_LAST_INCREMENTAL_VALUE};

    #[test]
    fn post_filter_applies_bound_then_limit() {
        let records: Vec<Record> = (1..=6).map(|i| [("id", i)].into_iter().collect()).collect();
        let cfg = DataSourceConfig::new("memory", "x")
            .with_param(PARAM_INCREMENTAL_FIELD, "id")
            .with_param(PARAM_LAST_INCREMENTAL_VALUE, "2")
            .with_param("limit", "3");
        let out = post_filter(&cfg, records);
        let ids: Vec<String> = out.iter().map(|r| r.get("id").unwrap().to_string()).collect();
        assert_eq!(ids, vec!["3", "4", "5"]);
    }

    #[test]
    fn field_union_keeps_first_seen_order() {
        let a: Record = [("x", 1), ("y", 2)].into_iter().collect();
        let b: Record = [("z", 1), ("x", 2)].into_iter().collect();
        assert_eq!(field_union(&[a, b]), vec!["x", "y", "z"]);
    }

    #[tokio::test]
    async fn blocking_errors_pass_through() {
        let result: FieldflowResult<()> =
            run_blocking("sqlite", || Err(ConnectorError::new("sqlite", "boom").into())).await;
        assert_eq!(result.unwrap_err().to_string(), "sqlite: boom");
    }
}
