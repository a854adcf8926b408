//! Runs a [`Pipeline`]: read, map, transform, write.
//!
//! Every run is strictly sequential. A failure in any stage aborts the run
//! and comes back as one [`ExecutionError`] tagged with that stage.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fieldflow_utils::{Error, ExecutionError, FieldflowResult, Record, Stage};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::connectors::{ConnectionTestResult, ConnectorFactory};
use crate::destinations::DestinationWriter;
use crate::mapping::{self, apply_mappings};
use crate::metrics;
use crate::pipeline::{watermark, DataSourceConfig, FieldMap, Pipeline};
use crate::transforms::{apply_all, compile_all, Expression};

pub const DEFAULT_SAMPLE_SIZE: usize = 10;

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub pipeline: String,
    pub rows_read: u64,
    /// Rows handed to the destination writer.
    pub rows_processed: u64,
    /// Write calls made; zero when there was nothing to write.
    pub batches: usize,
    /// Next incremental watermark, for the caller to persist.
    pub watermark: Option<String>,
    pub duration_ms: u64,
}

/// Bounded snapshot of each stage. Nothing here was written anywhere.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunResult {
    pub source_preview: Vec<Record>,
    pub mapped_preview: Vec<Record>,
    pub transformed_preview: Vec<Record>,
    pub destination_schema_valid: bool,
}

/// A stage failure before it is rendered into an [`ExecutionError`].
struct StageFailure {
    stage: Stage,
    error: Error,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageFailure>;
}

impl<T, E: Into<Error>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, StageFailure> {
        self.map_err(|e| StageFailure {
            stage,
            error: e.into(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineEngine {
    factory: Arc<ConnectorFactory>,
}

impl Default for PipelineEngine {
    fn default() -> Self {
        Self::new(Arc::new(ConnectorFactory::with_builtin()))
    }
}

impl PipelineEngine {
    pub fn new(factory: Arc<ConnectorFactory>) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &ConnectorFactory {
        &self.factory
    }

    /// Execute all four stages against the full record set.
    pub async fn run(&self, pipeline: &Pipeline) -> Result<RunReport, ExecutionError> {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("pipeline_run", pipeline = %pipeline.name, run = %run_id);
        let started = Instant::now();
        metrics::inc_run(&pipeline.name);

        let mut written: u64 = 0;
        let outcome = self.execute(pipeline, &mut written).instrument(span.clone()).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        metrics::observe_duration(&pipeline.name, duration_ms as f64);
        metrics::add_rows_written(&pipeline.name, written);

        let _entered = span.enter();
        match outcome {
            Ok((rows_read, batches, watermark)) => {
                tracing::info!(
                    rows_read,
                    rows = written,
                    batches,
                    duration_ms,
                    "pipeline run finished"
                );
                Ok(RunReport {
                    run_id,
                    pipeline: pipeline.name.clone(),
                    rows_read,
                    rows_processed: written,
                    batches,
                    watermark,
                    duration_ms,
                })
            }
            Err(StageFailure { stage, error }) => {
                let err = ExecutionError::from_cause(stage, &error, written);
                metrics::inc_failure(&pipeline.name, stage.as_str());
                tracing::error!(
                    stage = %stage,
                    rows = written,
                    error = %err.message,
                    "pipeline run failed"
                );
                Err(err)
            }
        }
    }

    /// Returns (rows read, write calls, next watermark). `written` counts
    /// committed rows as batches land so a failure can still report them.
    async fn execute(
        &self,
        pipeline: &Pipeline,
        written: &mut u64,
    ) -> Result<(u64, usize, Option<String>), StageFailure> {
        let expressions = compile_all(&pipeline.transformations).at(Stage::Transform)?;
        warn_on_duplicate_destinations(pipeline);

        let source = self.factory.source(&pipeline.source.connector_type).at(Stage::SourceRead)?;
        let destination = self
            .factory
            .destination(&pipeline.destination.connector_type)
            .at(Stage::DestinationWrite)?;

        let read_config = pipeline.source_config_for_read();
        let records = source.read(&read_config).await.at(Stage::SourceRead)?;
        let rows_read = records.len() as u64;
        tracing::debug!(
            stage = %Stage::SourceRead,
            rows = rows_read,
            connector = source.connector_type(),
            "read complete"
        );

        let next_watermark = pipeline
            .incremental_field
            .as_deref()
            .filter(|f| !f.is_empty())
            .and_then(|field| {
                watermark::advance(&records, field, pipeline.last_incremental_value.as_deref())
            });

        let mut records = apply_mappings(records, &pipeline.field_mappings);
        tracing::debug!(
            stage = %Stage::Mapping,
            mappings = pipeline.field_mappings.len(),
            "mapping complete"
        );

        apply_all(&mut records, &expressions).at(Stage::Transform)?;
        tracing::debug!(
            stage = %Stage::Transform,
            transformations = expressions.len(),
            "transform complete"
        );

        let batches = write_batches(destination.as_ref(), pipeline, &records, written)
            .await
            .at(Stage::DestinationWrite)?;
        Ok((rows_read, batches, next_watermark))
    }

    /// Same stage sequence on a sample; the destination only previews.
    /// A zero sample size means [`DEFAULT_SAMPLE_SIZE`].
    pub async fn dry_run(
        &self,
        pipeline: &Pipeline,
        sample_size: usize,
    ) -> Result<DryRunResult, ExecutionError> {
        let sample_size = if sample_size == 0 { DEFAULT_SAMPLE_SIZE } else { sample_size };
        let span = tracing::info_span!("pipeline_dry_run", pipeline = %pipeline.name, sample_size);
        self.preview(pipeline, sample_size)
            .instrument(span)
            .await
            .map_err(|StageFailure { stage, error }| {
                let err = ExecutionError::from_cause(stage, &error, 0);
                tracing::warn!(
                    pipeline = %pipeline.name,
                    stage = %stage,
                    error = %err.message,
                    "dry run failed"
                );
                err
            })
    }

    async fn preview(
        &self,
        pipeline: &Pipeline,
        sample_size: usize,
    ) -> Result<DryRunResult, StageFailure> {
        let expressions: Vec<Expression> =
            compile_all(&pipeline.transformations).at(Stage::Transform)?;

        let source = self.factory.source(&pipeline.source.connector_type).at(Stage::SourceRead)?;
        let destination = self
            .factory
            .destination(&pipeline.destination.connector_type)
            .at(Stage::DestinationWrite)?;

        let read_config = pipeline.source_config_for_read();
        let source_preview = source
            .dry_run_preview(&read_config, sample_size)
            .await
            .at(Stage::SourceRead)?;

        let mapped_preview = apply_mappings(source_preview.clone(), &pipeline.field_mappings);
        let mut transformed = mapped_preview.clone();
        apply_all(&mut transformed, &expressions).at(Stage::Transform)?;

        let fields = destination_fields(&transformed);
        let destination_schema_valid = destination
            .validate_schema(&pipeline.destination, &fields)
            .await
            .at(Stage::DestinationWrite)?;
        let transformed_preview = destination
            .dry_run_preview(&pipeline.destination, &transformed, sample_size)
            .await
            .at(Stage::DestinationWrite)?;

        Ok(DryRunResult {
            source_preview,
            mapped_preview,
            transformed_preview,
            destination_schema_valid,
        })
    }

    /// Suggest mappings between two field lists.
    pub fn automap(
        &self,
        source_fields: &[String],
        destination_fields: &[String],
    ) -> Vec<FieldMap> {
        mapping::automap(source_fields, destination_fields)
    }

    pub async fn discover_schema(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<String>> {
        let source = self.factory.source(&config.connector_type)?;
        source.discover_schema(config).await
    }

    pub async fn test_connection(
        &self,
        connector_type: &str,
        connection_string: &str,
    ) -> ConnectionTestResult {
        let config = DataSourceConfig::new(connector_type, connection_string);
        self.factory.test_connection(&config).await
    }
}

fn warn_on_duplicate_destinations(pipeline: &Pipeline) {
    let dupes = pipeline.duplicate_destination_fields();
    if !dupes.is_empty() {
        tracing::warn!(
            fields = ?dupes,
            "several mappings target the same destination field; the last one wins"
        );
    }
}

/// Field names across the sample, first-seen order.
fn destination_fields(records: &[Record]) -> Vec<String> {
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

/// Write in one call, or in `batch_size` chunks with the configured delay
/// between chunks. Returns the number of write calls.
async fn write_batches(
    destination: &dyn DestinationWriter,
    pipeline: &Pipeline,
    records: &[Record],
    written: &mut u64,
) -> FieldflowResult<usize> {
    if records.is_empty() {
        tracing::info!(connector = destination.connector_type(), "nothing to write");
        return Ok(0);
    }

    let Some(batch_size) = pipeline.effective_batch_size() else {
        destination.write(&pipeline.destination, records).await?;
        *written += records.len() as u64;
        return Ok(1);
    };

    let delay = pipeline
        .batch_delay_seconds
        .filter(|s| *s > 0)
        .map(Duration::from_secs);
    let mut calls = 0;
    for (i, chunk) in records.chunks(batch_size).enumerate() {
        if i > 0 {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
        destination.write(&pipeline.destination, chunk).await?;
        *written += chunk.len() as u64;
        calls += 1;
        tracing::debug!(batch = calls, rows = chunk.len(), "batch written");
    }
    Ok(calls)
}
