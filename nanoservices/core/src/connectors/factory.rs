//! Resolves connector type names to shared adapter instances.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use fieldflow_utils::{render_chain, ConnectorError, FieldflowResult};
use serde::Serialize;

use super::elasticsearch::ElasticsearchConnector;
use super::file::FileConnector;
use super::http::HttpConnector;
use super::memory::MemoryConnector;
use super::neo4j::Neo4jConnector;
use super::pinecone::PineconeConnector;
use super::postgres::PostgresConnector;
use super::qdrant::QdrantConnector;
use super::sqlite::SqliteConnector;
use crate::destinations::DestinationWriter;
use crate::pipeline::DataSourceConfig;
use crate::sources::SourceReader;

/// Outcome of probing a connector without moving data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub success: bool,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Registry of readers and writers keyed by lower-cased type name.
#[derive(Clone, Default)]
pub struct ConnectorFactory {
    sources: HashMap<String, Arc<dyn SourceReader>>,
    destinations: HashMap<String, Arc<dyn DestinationWriter>>,
}

impl std::fmt::Debug for ConnectorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut sources: Vec<_> = self.sources.keys().collect();
        let mut destinations: Vec<_> = self.destinations.keys().collect();
        sources.sort();
        destinations.sort();
        f.debug_struct("ConnectorFactory")
            .field("sources", &sources)
            .field("destinations", &destinations)
            .finish()
    }
}

impl ConnectorFactory {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in adapter, including aliases (`postgres`, `rest`, `file`).
    /// The memory connector is shared across source and destination so a
    /// pipeline can read what another wrote.
    pub fn with_builtin() -> Self {
        let mut factory = Self::new();
        factory.register("memory", MemoryConnector::new());
        for name in ["file", "csv", "json", "jsonl", "arrow"] {
            factory.register(name, FileConnector::new(name));
        }
        factory.register("sqlite", SqliteConnector);
        factory.register("postgresql", PostgresConnector);
        factory.register("postgres", PostgresConnector);
        factory.register("http", HttpConnector::new("http"));
        factory.register("rest", HttpConnector::new("rest"));
        factory.register("pinecone", PineconeConnector);
        factory.register("qdrant", QdrantConnector);
        factory.register("neo4j", Neo4jConnector);
        factory.register("elasticsearch", ElasticsearchConnector);
        factory
    }

    pub fn register_source<S>(&mut self, name: &str, source: S) -> &mut Self
    where
        S: SourceReader + 'static,
    {
        self.sources.insert(name.to_ascii_lowercase(), Arc::new(source));
        self
    }

    pub fn register_destination<D>(&mut self, name: &str, destination: D) -> &mut Self
    where
        D: DestinationWriter + 'static,
    {
        self.destinations
            .insert(name.to_ascii_lowercase(), Arc::new(destination));
        self
    }

    /// Register one adapter as both reader and writer under the same name.
    pub fn register<C>(&mut self, name: &str, connector: C) -> &mut Self
    where
        C: SourceReader + DestinationWriter + 'static,
    {
        let shared = Arc::new(connector);
        let key = name.to_ascii_lowercase();
        self.sources.insert(key.clone(), shared.clone());
        self.destinations.insert(key, shared);
        self
    }

    pub fn source(&self, connector_type: &str) -> FieldflowResult<Arc<dyn SourceReader>> {
        self.sources
            .get(&connector_type.trim().to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| unknown(connector_type, "source", self.source_types()))
    }

    pub fn destination(&self, connector_type: &str) -> FieldflowResult<Arc<dyn DestinationWriter>> {
        self.destinations
            .get(&connector_type.trim().to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| unknown(connector_type, "destination", self.destination_types()))
    }

    pub fn source_types(&self) -> Vec<String> {
        sorted_keys(&self.sources)
    }

    pub fn destination_types(&self) -> Vec<String> {
        sorted_keys(&self.destinations)
    }

    /// Probe a config as a source. Failures are reported, never raised.
    pub async fn test_connection(&self, config: &DataSourceConfig) -> ConnectionTestResult {
        let started = Instant::now();
        let outcome = match self.source(&config.connector_type) {
            Ok(source) => source.test_connection(config).await,
            Err(e) => Err(e),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => ConnectionTestResult { success: true, elapsed_ms, error: None },
            Err(e) => {
                tracing::warn!(
                    connector = %config.connector_type,
                    error = %e,
                    "connection test failed"
                );
                ConnectionTestResult {
                    success: false,
                    elapsed_ms,
                    error: Some(render_chain(&e)),
                }
            }
        }
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<String> {
    let mut keys: Vec<String> = map.keys().cloned().collect();
    keys.sort();
    keys
}

fn unknown(connector_type: &str, role: &str, known: Vec<String>) -> fieldflow_utils::Error {
    ConnectorError::new(
        connector_type,
        format!("unknown {role} connector type (known: {})", known.join(", ")),
    )
    .into()
}
