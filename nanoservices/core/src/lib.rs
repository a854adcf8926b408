//! fieldflow_core: pipeline execution core
//!
//! Moves records between heterogeneous data stores: a source connector reads
//! schemaless records, field mappings project them, a small expression
//! language transforms them and a destination connector writes them, in one
//! shot or in throttled batches.
//!
//! Basic usage:
//!
//! ```no_run
//! use fieldflow_core::builder::PipelineBuilder;
//! use fieldflow_core::engine::PipelineEngine;
//! use fieldflow_core::pipeline::DataSourceConfig;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = PipelineBuilder::new("orders_sync")
//!     .source(DataSourceConfig::new("sqlite", "orders.db").with_param("table", "orders"))
//!     .destination(DataSourceConfig::new("jsonl", "orders.jsonl"))
//!     .map("id", "order_id")
//!     .map("email", "email")
//!     .transform("LOWER(email)")
//!     .build()?;
//!
//! let report = PipelineEngine::default().run(&pipeline).await?;
//! println!("{} rows written", report.rows_processed);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod connectors;
pub mod destinations;
pub mod engine;
pub mod mapping;
pub mod pipeline;
pub mod sources;
pub mod store;
pub mod transforms;

pub mod logging;

pub mod metrics;
