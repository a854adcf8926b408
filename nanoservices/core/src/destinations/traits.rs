use async_trait::async_trait;
use fieldflow_utils::{FieldflowResult, Record};

use crate::pipeline::DataSourceConfig;

/// Writes records into one kind of external system.
#[async_trait]
pub trait DestinationWriter: Send + Sync {
    fn connector_type(&self) -> &str;

    /// Persist the records. An empty slice is a no-op.
    async fn write(&self, config: &DataSourceConfig, records: &[Record]) -> FieldflowResult<()>;

    /// Best effort: true for schemaless backends, otherwise true only when
    /// every field exists at the destination.
    async fn validate_schema(
        &self,
        config: &DataSourceConfig,
        fields: &[String],
    ) -> FieldflowResult<bool>;

    /// The first `limit` records, unwritten. Never touches the destination.
    async fn dry_run_preview(
        &self,
        _config: &DataSourceConfig,
        records: &[Record],
        limit: usize,
    ) -> FieldflowResult<Vec<Record>> {
        Ok(records.iter().take(limit).cloned().collect())
    }
}
