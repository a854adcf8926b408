pub use fieldflow_core as core;
pub use fieldflow_utils as utils;

// Convenience re-exports for common usage
pub use fieldflow_core::builder::PipelineBuilder;
pub use fieldflow_core::connectors::ConnectorFactory;
pub use fieldflow_core::destinations::traits::DestinationWriter;
pub use fieldflow_core::engine::{DryRunResult, PipelineEngine, RunReport};
pub use fieldflow_core::pipeline::{DataSourceConfig, FieldMap, Pipeline};
pub use fieldflow_core::sources::traits::SourceReader;
pub use fieldflow_utils::{ExecutionError, FieldflowResult, Record, Stage, Value};
