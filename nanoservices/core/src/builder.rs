use fieldflow_utils::ParseError;

use crate::pipeline::{DataSourceConfig, FieldMap, Pipeline};
use crate::transforms::Expression;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("pipeline name is required")]
    NoName,
    #[error("a source is required")]
    NoSource,
    #[error("a destination is required")]
    NoDestination,
    #[error("invalid transformation '{expression}': {source}")]
    InvalidTransformation {
        expression: String,
        #[source]
        source: ParseError,
    },
}

/// Fluent construction of a [`Pipeline`], validating transformations early.
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    name: Option<String>,
    source: Option<DataSourceConfig>,
    destination: Option<DataSourceConfig>,
    mappings: Vec<FieldMap>,
    transformations: Vec<String>,
    batch_size: Option<usize>,
    batch_delay_seconds: Option<u64>,
    incremental_field: Option<String>,
    last_incremental_value: Option<String>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn source(mut self, config: DataSourceConfig) -> Self {
        self.source = Some(config);
        self
    }

    pub fn destination(mut self, config: DataSourceConfig) -> Self {
        self.destination = Some(config);
        self
    }

    /// Map one source field onto one destination field.
    pub fn map(mut self, source: impl Into<String>, destination: impl Into<String>) -> Self {
        self.mappings.push(FieldMap::new(source, destination));
        self
    }

    /// Append mappings, e.g. the output of automap.
    pub fn mappings(mut self, mappings: impl IntoIterator<Item = FieldMap>) -> Self {
        self.mappings.extend(mappings);
        self
    }

    pub fn transform(mut self, expression: impl Into<String>) -> Self {
        self.transformations.push(expression.into());
        self
    }

    /// Write in chunks of `size`, waiting `delay_seconds` between chunks.
    pub fn batch(mut self, size: usize, delay_seconds: u64) -> Self {
        self.batch_size = Some(size);
        self.batch_delay_seconds = Some(delay_seconds);
        self
    }

    pub fn incremental(mut self, field: impl Into<String>, last_value: Option<String>) -> Self {
        self.incremental_field = Some(field.into());
        self.last_incremental_value = last_value;
        self
    }

    pub fn build(self) -> Result<Pipeline, BuildError> {
        let name = self.name.filter(|n| !n.trim().is_empty()).ok_or(BuildError::NoName)?;
        let source = self
            .source
            .filter(|s| !s.connector_type.trim().is_empty())
            .ok_or(BuildError::NoSource)?;
        let destination = self
            .destination
            .filter(|d| !d.connector_type.trim().is_empty())
            .ok_or(BuildError::NoDestination)?;

        for expression in &self.transformations {
            Expression::parse(expression).map_err(|source| BuildError::InvalidTransformation {
                expression: expression.clone(),
                source,
            })?;
        }

        let pipeline = Pipeline {
            name,
            source,
            destination,
            field_mappings: self.mappings,
            transformations: self.transformations,
            batch_size: self.batch_size,
            batch_delay_seconds: self.batch_delay_seconds,
            incremental_field: self.incremental_field,
            last_incremental_value: self.last_incremental_value,
        };

        let dupes = pipeline.duplicate_destination_fields();
        if !dupes.is_empty() {
            tracing::warn!(
                pipeline = %pipeline.name,
                fields = ?dupes,
                "duplicate destination fields; the last mapping wins"
            );
        }
        Ok(pipeline)
    }
}
