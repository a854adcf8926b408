//! In-process connector backed by named datasets.
//!
//! The dataset name is the `dataset` parameter, falling back to the
//! connection string. Every write call is logged with its size so callers can
//! observe batching.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use fieldflow_utils::{ConnectorError, FieldflowResult, Record};

use super::post_filter;
use crate::destinations::DestinationWriter;
use crate::pipeline::DataSourceConfig;
use crate::sources::traits::{fields_of_first, SourceReader};

pub const CONNECTOR_TYPE: &str = "memory";

#[derive(Debug, Default)]
struct Dataset {
    records: Vec<Record>,
    write_calls: Vec<usize>,
}

/// Cloning shares the underlying datasets.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    datasets: Arc<RwLock<HashMap<String, Dataset>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a dataset's contents.
    pub fn seed(&self, dataset: impl Into<String>, records: Vec<Record>) {
        let mut guard = self.write_guard();
        let entry = guard.entry(dataset.into()).or_default();
        entry.records = records;
        entry.write_calls.clear();
    }

    /// Current contents of a dataset (empty when unknown).
    pub fn snapshot(&self, dataset: &str) -> Vec<Record> {
        self.read_guard()
            .get(dataset)
            .map(|d| d.records.clone())
            .unwrap_or_default()
    }

    /// Sizes of every write call received by a dataset, in order.
    pub fn write_calls(&self, dataset: &str) -> Vec<usize> {
        self.read_guard()
            .get(dataset)
            .map(|d| d.write_calls.clone())
            .unwrap_or_default()
    }

    fn dataset_name(config: &DataSourceConfig) -> FieldflowResult<String> {
        let name = config
            .param("dataset")
            .unwrap_or(config.connection_string.trim());
        if name.is_empty() {
            return Err(ConnectorError::new(
                CONNECTOR_TYPE,
                "no dataset named in 'dataset' or connection string",
            )
            .into());
        }
        Ok(name.to_string())
    }

    // A poisoned lock only means another writer panicked mid-update; the
    // datasets themselves remain usable.
    fn read_guard(&self) -> RwLockReadGuard<'_, HashMap<String, Dataset>> {
        self.datasets.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, HashMap<String, Dataset>> {
        self.datasets.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SourceReader for MemoryConnector {
    fn connector_type(&self) -> &str {
        CONNECTOR_TYPE
    }

    async fn read(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<Record>> {
        let name = Self::dataset_name(config)?;
        let records = self
            .read_guard()
            .get(&name)
            .map(|d| d.records.clone())
            .ok_or_else(|| {
                ConnectorError::new(CONNECTOR_TYPE, format!("unknown dataset '{name}'"))
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
        Self::dataset_name(config).map(|_| ())
    }
}

#[async_trait]
impl DestinationWriter for MemoryConnector {
    fn connector_type(&self) -> &str {
        CONNECTOR_TYPE
    }

    async fn write(&self, config: &DataSourceConfig, records: &[Record]) -> FieldflowResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let name = Self::dataset_name(config)?;
        let mut guard = self.write_guard();
        let dataset = guard.entry(name).or_default();
        dataset.records.extend_from_slice(records);
        dataset.write_calls.push(records.len());
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
