//! Pipeline definition types handed to the engine.
//!
//! These are read-only inputs: the engine never writes back into a
//! [`Pipeline`]. Advancing the incremental watermark is left to the caller,
//! which observes the new value on the run report.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

pub mod watermark;

/// Source parameter carrying the incremental field name.
pub const PARAM_INCREMENTAL_FIELD: &str = "incrementalField";
/// Source parameter carrying the last seen watermark value.
pub const PARAM_LAST_INCREMENTAL_VALUE: &str = "lastIncrementalValue";

/// Where to read from or write to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceConfig {
    #[serde(rename = "type")]
    pub connector_type: String,
    #[serde(default)]
    pub connection_string: String,
    /// Connector-specific knobs (table, collection, namespace, headers, limits).
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub schema: String,
}

impl DataSourceConfig {
    pub fn new(connector_type: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self {
            connector_type: connector_type.into(),
            connection_string: connection_string.into(),
            parameters: HashMap::new(),
            schema: String::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// A parameter value, treating blank values as absent.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn param_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.param(key).unwrap_or(default)
    }

    /// Parse a numeric parameter; unparsable values are ignored.
    pub fn param_usize(&self, key: &str) -> Option<usize> {
        self.param(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn param_bool(&self, key: &str) -> bool {
        self.param(key)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }

    /// The incremental bound requested by the engine, if any.
    pub fn incremental(&self) -> Option<(&str, Option<&str>)> {
        self.param(PARAM_INCREMENTAL_FIELD)
            .map(|field| (field, self.param(PARAM_LAST_INCREMENTAL_VALUE)))
    }
}

/// One source field projected onto one destination field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMap {
    pub source_field: String,
    pub destination_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automap_score: Option<f64>,
    #[serde(default)]
    pub is_automapped: bool,
}

impl FieldMap {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source_field: source.into(),
            destination_field: destination.into(),
            automap_score: None,
            is_automapped: false,
        }
    }

    pub fn automapped(
        source: impl Into<String>,
        destination: impl Into<String>,
        score: f64,
    ) -> Self {
        Self {
            source_field: source.into(),
            destination_field: destination.into(),
            automap_score: Some(score.clamp(0.0, 1.0)),
            is_automapped: true,
        }
    }
}

/// A complete pipeline definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub name: String,
    pub source: DataSourceConfig,
    pub destination: DataSourceConfig,
    #[serde(default)]
    pub field_mappings: Vec<FieldMap>,
    #[serde(default)]
    pub transformations: Vec<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub batch_delay_seconds: Option<u64>,
    #[serde(default)]
    pub incremental_field: Option<String>,
    #[serde(default)]
    pub last_incremental_value: Option<String>,
}

impl Pipeline {
    /// Batch size when batching is enabled (set and non-zero).
    pub fn effective_batch_size(&self) -> Option<usize> {
        self.batch_size.filter(|n| *n > 0)
    }

    /// Destination fields targeted by more than one mapping.
    pub fn duplicate_destination_fields(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut dupes = Vec::new();
        for m in &self.field_mappings {
            if !seen.insert(m.destination_field.as_str()) && !dupes.contains(&m.destination_field) {
                dupes.push(m.destination_field.clone());
            }
        }
        dupes
    }

    /// The source config the reader actually receives: the pipeline's own
    /// config plus the incremental bound, when one is configured.
    pub fn source_config_for_read(&self) -> DataSourceConfig {
        let mut config = self.source.clone();
        if let Some(field) = self.incremental_field.as_deref().filter(|f| !f.is_empty()) {
            config
                .parameters
                .insert(PARAM_INCREMENTAL_FIELD.to_string(), field.to_string());
            if let Some(last) = self.last_incremental_value.as_deref() {
                config
                    .parameters
                    .insert(PARAM_LAST_INCREMENTAL_VALUE.to_string(), last.to_string());
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_batch_size_disables_batching() {
        let mut p = Pipeline::default();
        assert_eq!(p.effective_batch_size(), None);
        p.batch_size = Some(0);
        assert_eq!(p.effective_batch_size(), None);
        p.batch_size = Some(3);
        assert_eq!(p.effective_batch_size(), Some(3));
    }

    #[test]
    fn duplicates_are_reported_once() {
        let p = Pipeline {
            field_mappings: vec![
                FieldMap::new("a", "x"),
                FieldMap::new("b", "x"),
                FieldMap::new("c", "x"),
                FieldMap::new("d", "y"),
            ],
            ..Default::default()
        };
        assert_eq!(p.duplicate_destination_fields(), vec!["x"]);
    }

    #[test]
    fn incremental_bound_is_injected_into_source_params() {
        let p = Pipeline {
            source: DataSourceConfig::new("memory", "orders"),
            incremental_field: Some("updated_at".into()),
            last_incremental_value: Some("2026-01-01".into()),
            ..Default::default()
        };
        let cfg = p.source_config_for_read();
        assert_eq!(cfg.incremental(), Some(("updated_at", Some("2026-01-01"))));
        assert!(p.source.incremental().is_none());
    }

    #[test]
    fn deserializes_camel_case_wire_shape() {
        let json = r#"{
            "name": "orders",
            "source": {
                "type": "postgresql",
                "connectionString": "host=db",
                "parameters": {"table": "orders"}
            },
            "destination": {"type": "pinecone", "connectionString": "https://idx"},
            "fieldMappings": [{"sourceField": "id", "destinationField": "order_id"}],
            "transformations": ["order_id = UPPER(order_id)"],
            "batchSize": 100,
            "batchDelaySeconds": 2
        }"#;
        let p: Pipeline = serde_json::from_str(json).unwrap();
        assert_eq!(p.source.param("table"), Some("orders"));
        assert_eq!(p.field_mappings[0].destination_field, "order_id");
        assert!(!p.field_mappings[0].is_automapped);
        assert_eq!(p.batch_delay_seconds, Some(2));
    }
}
