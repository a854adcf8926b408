use async_trait::async_trait;
use fieldflow_utils::{FieldflowResult, Record};

use crate::pipeline::DataSourceConfig;

/// Reads records out of one kind of external system.
///
/// Implementations translate backend-native rows, documents or points into
/// [`Record`]s and must wrap every backend failure in a
/// [`ConnectorError`](fieldflow_utils::ConnectorError) tagged with
/// [`connector_type`](SourceReader::connector_type).
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Type tag used in errors and logs, e.g. `"postgresql"`.
    fn connector_type(&self) -> &str;

    /// Materialize every record the config selects.
    async fn read(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<Record>>;

    /// Field names, typically taken from one sampled record.
    async fn discover_schema(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<String>>;

    /// Same selection as [`read`](SourceReader::read), capped at `limit` records.
    async fn dry_run_preview(
        &self,
        config: &DataSourceConfig,
        limit: usize,
    ) -> FieldflowResult<Vec<Record>>;

    /// Cheapest call that proves the backend is reachable with these credentials.
    async fn test_connection(&self, config: &DataSourceConfig) -> FieldflowResult<()>;
}

/// Field names of the first record, in order.
pub fn fields_of_first(records: &[Record]) -> Vec<String> {
    records
        .first()
        .map(|r| r.fields().map(str::to_string).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticSource(Vec<Record>);

    #[async_trait]
    impl SourceReader for StaticSource {
        fn connector_type(&self) -> &str { "static" }

        async fn read(&self, _: &DataSourceConfig) -> FieldflowResult<Vec<Record>> {
            Ok(self.0.clone())
        }

        async fn discover_schema(&self, _: &DataSourceConfig) -> FieldflowResult<Vec<String>> {
            Ok(fields_of_first(&self.0))
        }

        async fn dry_run_preview(
            &self,
            _: &DataSourceConfig,
            limit: usize,
        ) -> FieldflowResult<Vec<Record>> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }

        async fn test_connection(&self, _: &DataSourceConfig) -> FieldflowResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn source_trait_works() {
        let records: Vec<Record> = (0..3)
            .map(|i| [("id", i), ("n", i * 2)].into_iter().collect())
            .collect();
        let src = StaticSource(records);
        let cfg = DataSourceConfig::new("static", "");
        assert_eq!(src.connector_type(), "static");
        assert_eq!(src.read(&cfg).await.unwrap().len(), 3);
        assert_eq!(src.dry_run_preview(&cfg, 2).await.unwrap().len(), 2);
        assert_eq!(src.discover_schema(&cfg).await.unwrap(), vec!["id", "n"]);
    }

    #[test]
    fn no_records_no_fields() {
        assert!(fields_of_first(&[]).is_empty());
    }
}
