use std::path::Path;

use crate::config::types::PipelineConfig;
use crate::config::ConfigError;

/// Load a pipeline config from a YAML file.
pub fn load_pipeline(path: impl AsRef<Path>) -> Result<PipelineConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_pipeline(&content)
}

/// Parse a pipeline config from a YAML string.
pub fn parse_pipeline(yaml: &str) -> Result<PipelineConfig, ConfigError> {
    let config: PipelineConfig = serde_yaml::from_str(yaml)?;
    Ok(config)
}

/// Load all pipeline configs from a directory, sorted by file name.
pub fn load_pipelines_dir(dir: impl AsRef<Path>) -> Result<Vec<PipelineConfig>, ConfigError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")) {
            paths.push(path);
        }
    }
    paths.sort();
    paths.into_iter().map(load_pipeline).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS: &str = r#"
pipeline: orders_sync
description: "Copy new orders into the warehouse"

source:
  type: postgresql
  connection: "host=db user=etl"
  params:
    table: orders
    limit: 500

destination:
  type: sqlite
  connection: /data/warehouse.db
  params:
    table: orders
    createTable: true

mappings:
  - "id -> order_id"
  - source: total
    destination: amount

transformations:
  - "amount = ROUND(amount, 2)"
  - "synced_at = NOW()"

batch:
  size: 100
  delay: 2s

incremental:
  field: updated_at
  last_value: "2026-01-01T00:00:00Z"
"#;

    #[test]
    fn parse_full_pipeline() {
        let config = parse_pipeline(ORDERS).unwrap();
        assert_eq!(config.pipeline, "orders_sync");
        assert_eq!(config.mappings.len(), 2);

        let p = config.into_pipeline().unwrap();
        assert_eq!(p.source.connector_type, "postgresql");
        assert_eq!(p.source.param("limit"), Some("500"));
        assert_eq!(p.destination.param("createTable"), Some("true"));
        assert_eq!(p.field_mappings[0].destination_field, "order_id");
        assert_eq!(p.field_mappings[1].source_field, "total");
        assert_eq!(p.transformations.len(), 2);
        assert_eq!(p.batch_size, Some(100));
        assert_eq!(p.batch_delay_seconds, Some(2));
        assert_eq!(p.incremental_field.as_deref(), Some("updated_at"));
        assert_eq!(p.last_incremental_value.as_deref(), Some("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn minimal_pipeline_has_no_batching() {
        let yaml = r#"
pipeline: copy
source: { type: memory, connection: in }
destination: { type: memory, connection: out }
"#;
        let p = parse_pipeline(yaml).unwrap().into_pipeline().unwrap();
        assert!(p.field_mappings.is_empty());
        assert_eq!(p.effective_batch_size(), None);
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(matches!(parse_pipeline("pipeline: [unterminated"), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn loads_yaml_files_from_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yaml"), ORDERS).unwrap();
        std::fs::write(
            dir.path().join("a.yml"),
            "pipeline: first\nsource: {type: memory}\ndestination: {type: memory}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let configs = load_pipelines_dir(dir.path()).unwrap();
        let names: Vec<_> = configs.iter().map(|c| c.pipeline.as_str()).collect();
        assert_eq!(names, vec!["first", "orders_sync"]);
    }
}
