//! YAML pipeline definitions and credential resolution.

pub mod credentials;
pub mod loader;
pub mod types;

pub use credentials::{CredentialResolver, EnvCredentialResolver};
pub use loader::{load_pipeline, load_pipelines_dir, parse_pipeline};
pub use types::PipelineConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for fieldflow_utils::Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Io(e) => fieldflow_utils::Error::Io(e),
            ConfigError::Yaml(e) => fieldflow_utils::Error::Yaml(e),
            ConfigError::Invalid(msg) => fieldflow_utils::Error::Config(msg),
        }
    }
}
