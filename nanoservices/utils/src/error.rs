use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed cause carried by a [`ConnectorError`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Separator used when rendering a cause chain.
pub const CHAIN_SEPARATOR: &str = " → ";

/// One stage of a pipeline run; the unit of failure attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    SourceRead,
    Mapping,
    Transform,
    DestinationWrite,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::SourceRead => "SourceRead",
            Stage::Mapping => "Mapping",
            Stage::Transform => "Transform",
            Stage::DestinationWrite => "DestinationWrite",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend call failed. Every adapter wraps its native errors in this type.
#[derive(Debug, Error)]
#[error("{connector}: {message}")]
pub struct ConnectorError {
    pub connector: String,
    pub message: String,
    #[source]
    pub source: Option<BoxError>,
}

impl ConnectorError {
    pub fn new(connector: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            connector: connector.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a backend-native error as the cause.
    pub fn wrap<E>(connector: impl Into<String>, message: impl Into<String>, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            connector: connector.into(),
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }
}

/// A transformation line could not be parsed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty transformation")]
    Empty,

    #[error("unrecognized transformation: '{0}'")]
    Unrecognized(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("{function} expects {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: String,
        got: usize,
    },

    #[error("invalid argument for {function}: {reason}")]
    InvalidArgument { function: String, reason: String },
}

/// A parsed transformation failed while evaluating a record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("{function}: value '{value}' is not numeric")]
    NotNumeric { function: String, value: String },

    #[error("{function}: invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        function: String,
        pattern: String,
        reason: String,
    },

    #[error("{function}: {reason}")]
    Invalid { function: String, reason: String },
}

/// Umbrella error for everything below the engine boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("YAML error")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error")]
    Json(#[from] serde_json::Error),
}

/// The single failure value surfaced by a pipeline run or dry run.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("pipeline failed at {stage}: {message}")]
pub struct ExecutionError {
    pub stage: Stage,
    /// Every message of the cause chain, outermost first, joined by [`CHAIN_SEPARATOR`].
    pub message: String,
    /// Rows already committed by earlier batches.
    pub rows_written: u64,
}

impl ExecutionError {
    pub fn from_cause(stage: Stage, cause: &(dyn StdError + 'static), rows_written: u64) -> Self {
        Self {
            stage,
            message: render_chain(cause),
            rows_written,
        }
    }

    /// The innermost message of the chain.
    pub fn root_cause(&self) -> &str {
        self.message
            .rsplit(CHAIN_SEPARATOR)
            .next()
            .unwrap_or(&self.message)
    }
}

/// Join the messages of an error and its `source()` chain.
pub fn render_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        let msg = e.to_string();
        if parts.last() != Some(&msg) {
            parts.push(msg);
        }
        current = e.source();
    }
    parts.join(CHAIN_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("{msg}")]
    struct Layer {
        msg: &'static str,
        #[source]
        inner: Option<Box<Layer>>,
    }

    #[test]
    fn three_layers_render_two_separators() {
        let root = Layer { msg: "connection refused", inner: None };
        let mid = Layer { msg: "query failed", inner: Some(Box::new(root)) };
        let err = ConnectorError::wrap("postgresql", "read failed", mid);
        let rendered = render_chain(&err);
        assert_eq!(rendered, "postgresql: read failed → query failed → connection refused");
        assert_eq!(rendered.matches(CHAIN_SEPARATOR).count(), 2);
    }

    #[test]
    fn transparent_wrapper_adds_no_layer() {
        let err: Error = ConnectorError::new("sqlite", "table missing").into();
        let exec = ExecutionError::from_cause(Stage::SourceRead, &err, 0);
        assert_eq!(exec.message, "sqlite: table missing");
        assert_eq!(exec.root_cause(), "sqlite: table missing");
    }

    #[test]
    fn root_cause_is_last_segment() {
        let root = Layer { msg: "disk full", inner: None };
        let err = ConnectorError::wrap("csv", "append failed", root);
        let exec = ExecutionError::from_cause(Stage::DestinationWrite, &err, 6);
        assert_eq!(exec.root_cause(), "disk full");
        assert_eq!(exec.rows_written, 6);
        assert_eq!(
            exec.to_string(),
            "pipeline failed at DestinationWrite: csv: append failed → disk full"
        );
    }
}
