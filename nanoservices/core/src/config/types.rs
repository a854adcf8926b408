use std::collections::HashMap;

use serde::Deserialize;

use crate::pipeline::{DataSourceConfig, FieldMap, Pipeline};

use super::ConfigError;

/// A pipeline as written in YAML.
#[derive(Debug, Deserialize)]
pub struct PipelineConfig {
    pub pipeline: String,
    pub description: Option<String>,
    pub source: ConnectorConfig,
    pub destination: ConnectorConfig,
    #[serde(default)]
    pub mappings: Vec<MappingEntry>,
    #[serde(default)]
    pub transformations: Vec<String>,
    pub batch: Option<BatchConfig>,
    pub incremental: Option<IncrementalConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectorConfig {
    #[serde(rename = "type")]
    pub connector_type: String,
    #[serde(default)]
    pub connection: String,
    #[serde(default)]
    pub schema: String,
    /// Scalars of any YAML type; rendered to strings for the connector.
    #[serde(default)]
    pub params: HashMap<String, serde_yaml::Value>,
}

/// Either `"source -> destination"` or a full map.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum MappingEntry {
    Shorthand(String),
    Full {
        source: String,
        destination: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct BatchConfig {
    pub size: usize,
    /// e.g. "2s", "1m", or an integer number of seconds
    pub delay: Option<DelayValue>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum DelayValue {
    Seconds(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
pub struct IncrementalConfig {
    pub field: String,
    pub last_value: Option<serde_yaml::Value>,
}

impl MappingEntry {
    pub fn into_field_map(self) -> Result<FieldMap, ConfigError> {
        match self {
            MappingEntry::Full { source, destination } => Ok(FieldMap::new(source, destination)),
            MappingEntry::Shorthand(text) => match text.split_once("->") {
                Some((src, dst)) if !src.trim().is_empty() && !dst.trim().is_empty() => {
                    Ok(FieldMap::new(src.trim(), dst.trim()))
                }
                _ => Err(ConfigError::Invalid(format!(
                    "mapping '{text}' is not 'source -> destination'"
                ))),
            },
        }
    }
}

impl DelayValue {
    pub fn as_seconds(&self) -> Result<u64, ConfigError> {
        match self {
            DelayValue::Seconds(s) => Ok(*s),
            DelayValue::Text(text) => parse_duration_secs(text),
        }
    }
}

/// Parse "30", "30s", "5m" or "1h" into whole seconds.
pub fn parse_duration_secs(text: &str) -> Result<u64, ConfigError> {
    let text = text.trim();
    let invalid =
        || ConfigError::Invalid(format!("invalid duration '{text}' (use e.g. 30s, 5m, 1h)"));
    let split = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let n: u64 = digits.parse().map_err(|_| invalid())?;
    let factor = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => return Err(invalid()),
    };
    n.checked_mul(factor).ok_or_else(invalid)
}

fn scalar_text(value: &serde_yaml::Value) -> Result<String, ConfigError> {
    match value {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Null => Ok(String::new()),
        other => Err(ConfigError::Invalid(format!("expected a scalar, got {other:?}"))),
    }
}

impl ConnectorConfig {
    pub fn into_data_source(self) -> Result<DataSourceConfig, ConfigError> {
        let mut config =
            DataSourceConfig::new(self.connector_type, self.connection).with_schema(self.schema);
        for (key, value) in &self.params {
            let text = scalar_text(value)
                .map_err(|e| ConfigError::Invalid(format!("parameter '{key}': {e}")))?;
            config.parameters.insert(key.clone(), text);
        }
        Ok(config)
    }
}

impl PipelineConfig {
    /// Convert into the engine's definition type.
    pub fn into_pipeline(self) -> Result<Pipeline, ConfigError> {
        let field_mappings = self
            .mappings
            .into_iter()
            .map(MappingEntry::into_field_map)
            .collect::<Result<Vec<_>, _>>()?;
        let (batch_size, batch_delay_seconds) = match self.batch {
            Some(batch) => (
                Some(batch.size),
                batch.delay.as_ref().map(DelayValue::as_seconds).transpose()?,
            ),
            None => (None, None),
        };
        let (incremental_field, last_incremental_value) = match self.incremental {
            Some(inc) => (
                Some(inc.field),
                inc.last_value.as_ref().map(scalar_text).transpose()?,
            ),
            None => (None, None),
        };
        Ok(Pipeline {
            name: self.pipeline,
            source: self.source.into_data_source()?,
            destination: self.destination.into_data_source()?,
            field_mappings,
            transformations: self.transformations,
            batch_size,
            batch_delay_seconds,
            incremental_field,
            last_incremental_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration_secs("30").unwrap(), 30);
        assert_eq!(parse_duration_secs("2s").unwrap(), 2);
        assert_eq!(parse_duration_secs("5m").unwrap(), 300);
        assert_eq!(parse_duration_secs("1h").unwrap(), 3600);
        assert!(parse_duration_secs("500ms").is_err());
        assert!(parse_duration_secs("soon").is_err());
    }

    #[test]
    fn shorthand_mapping() {
        let m = MappingEntry::Shorthand("email -> contact_email".into()).into_field_map().unwrap();
        assert_eq!(m, FieldMap::new("email", "contact_email"));
        assert!(MappingEntry::Shorthand("email".into()).into_field_map().is_err());
    }
}
