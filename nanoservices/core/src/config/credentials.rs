//! Turning stored credential references into live connection strings.
//!
//! Resolution is an explicit step the caller performs before handing a
//! pipeline to the engine; the engine itself never looks up secrets.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::pipeline::{DataSourceConfig, Pipeline};

use super::ConfigError;

/// Parameter naming a stored connection profile.
pub const PARAM_PROFILE_ID: &str = "profileId";
/// Environment prefix for profile connection strings.
pub const PROFILE_ENV_PREFIX: &str = "FIELDFLOW_PROFILE_";

static ENV_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env reference pattern compiles")
});

pub trait CredentialResolver: Send + Sync {
    /// Resolve one connector config in place.
    fn resolve(&self, config: &mut DataSourceConfig) -> Result<(), ConfigError>;

    /// Resolve both ends of a pipeline.
    fn resolve_pipeline(&self, pipeline: &mut Pipeline) -> Result<(), ConfigError> {
        self.resolve(&mut pipeline.source)?;
        self.resolve(&mut pipeline.destination)
    }
}

/// Resolves `${VAR}` references and `profileId` parameters from a variable
/// lookup, the process environment by default.
pub struct EnvCredentialResolver {
    lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl Default for EnvCredentialResolver {
    fn default() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }
}

impl std::fmt::Debug for EnvCredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvCredentialResolver").finish_non_exhaustive()
    }
}

impl EnvCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self { lookup: Box::new(lookup) }
    }

    fn expand(&self, text: &str) -> Result<String, ConfigError> {
        let mut missing: Option<String> = None;
        let expanded = ENV_REF.replace_all(text, |caps: &Captures| match (self.lookup)(&caps[1]) {
            Some(value) => value,
            None => {
                missing.get_or_insert_with(|| caps[1].to_string());
                String::new()
            }
        });
        match missing {
            Some(name) => Err(ConfigError::Invalid(format!(
                "environment variable '{name}' is not set"
            ))),
            None => Ok(expanded.into_owned()),
        }
    }
}

impl CredentialResolver for EnvCredentialResolver {
    fn resolve(&self, config: &mut DataSourceConfig) -> Result<(), ConfigError> {
        if let Some(profile) = config.param(PARAM_PROFILE_ID).map(str::to_string) {
            let key = format!(
                "{PROFILE_ENV_PREFIX}{}",
                profile.to_ascii_uppercase().replace('-', "_")
            );
            let connection = (self.lookup)(&key).ok_or_else(|| {
                ConfigError::Invalid(format!("no connection profile '{profile}' (expected {key})"))
            })?;
            tracing::debug!(
                connector = %config.connector_type,
                profile = %profile,
                "resolved connection profile"
            );
            config.connection_string = connection;
            config.parameters.remove(PARAM_PROFILE_ID);
        }
        config.connection_string = self.expand(&config.connection_string)?;
        for value in config.parameters.values_mut() {
            *value = self.expand(value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolver(vars: &[(&str, &str)]) -> EnvCredentialResolver {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        EnvCredentialResolver::with_lookup(move |name| vars.get(name).cloned())
    }

    #[test]
    fn expands_env_references() {
        let r = resolver(&[("PG_PASS", "s3cret"), ("API_KEY", "k-1")]);
        let mut cfg = DataSourceConfig::new("postgresql", "host=db password=${PG_PASS}")
            .with_param("bearerToken", "${API_KEY}");
        r.resolve(&mut cfg).unwrap();
        assert_eq!(cfg.connection_string, "host=db password=s3cret");
        assert_eq!(cfg.param("bearerToken"), Some("k-1"));
    }

    #[test]
    fn profile_id_becomes_connection_string() {
        let r = resolver(&[("FIELDFLOW_PROFILE_WAREHOUSE_EU", "host=eu-db")]);
        let mut cfg =
            DataSourceConfig::new("postgresql", "").with_param(PARAM_PROFILE_ID, "warehouse-eu");
        r.resolve(&mut cfg).unwrap();
        assert_eq!(cfg.connection_string, "host=eu-db");
        assert!(cfg.param(PARAM_PROFILE_ID).is_none());
    }

    #[test]
    fn missing_variables_are_errors() {
        let r = resolver(&[]);
        let mut cfg = DataSourceConfig::new("sqlite", "${DB_PATH}");
        let err = r.resolve(&mut cfg).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration: environment variable 'DB_PATH' is not set",
        );

        let mut cfg = DataSourceConfig::new("sqlite", "").with_param(PARAM_PROFILE_ID, "nope");
        assert!(r.resolve(&mut cfg).is_err());
    }

    #[test]
    fn resolves_both_ends_of_a_pipeline() {
        let r = resolver(&[("IN", "a.db"), ("OUT", "b.db")]);
        let mut p = Pipeline {
            source: DataSourceConfig::new("sqlite", "${IN}"),
            destination: DataSourceConfig::new("sqlite", "${OUT}"),
            ..Default::default()
        };
        r.resolve_pipeline(&mut p).unwrap();
        assert_eq!(p.source.connection_string, "a.db");
        assert_eq!(p.destination.connection_string, "b.db");
    }
}
