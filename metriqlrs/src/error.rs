use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetriqlError>;

/// Kind of semantic element an unknown name was looked up as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Metric,
    Measure,
    Dimension,
    Entity,
    Source,
    Column,
    OutputColumn,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IdentifierKind::Metric => "metric",
            IdentifierKind::Measure => "measure",
            IdentifierKind::Dimension => "dimension",
            IdentifierKind::Entity => "entity",
            IdentifierKind::Source => "source",
            IdentifierKind::Column => "column",
            IdentifierKind::OutputColumn => "output column",
        };
        f.write_str(s)
    }
}

/// Whether an error was caused by the request or by a compiler defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    User,
    Internal,
}

#[derive(Debug, Error)]
pub enum MetriqlError {
    #[error("unknown {kind} '{name}'")]
    UnknownIdentifier { kind: IdentifierKind, name: String },
    #[error("ambiguous dimension '{name}': found on sources {}; qualify it with an entity path", sources.join(", "))]
    AmbiguousDimension { name: String, sources: Vec<String> },
    #[error("'{name}' lives on source '{to}' which is not reachable from '{from}'")]
    UnreachableDimension {
        name: String,
        from: String,
        to: String,
    },
    #[error("measure '{name}' is only reachable from '{from}' through a one-to-many join into '{via}'")]
    FanOutJoin {
        name: String,
        from: String,
        via: String,
    },
    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),
    #[error("dimension '{dimension}' has grain {native}; cannot request finer grain {requested}")]
    InvalidGranularity {
        dimension: String,
        requested: String,
        native: String,
    },
    #[error("request names no metrics and no dimensions")]
    EmptyRequest,
    #[error("invalid expression for metric '{metric}': {reason}")]
    InvalidMetricExpression { metric: String, reason: String },
    #[error("measure '{measure}' uses {agg} which cannot be re-aggregated after a pre-join aggregate")]
    NonAdditiveMeasure { measure: String, agg: String },
    #[error("render contract violation: node {node} references column '{column}' missing from its input")]
    RenderContractViolation { node: usize, column: String },
    #[error("model error: {0}")]
    Model(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MetriqlError {
    pub fn severity(&self) -> Severity {
        match self {
            MetriqlError::RenderContractViolation { .. } => Severity::Internal,
            _ => Severity::User,
        }
    }

    pub(crate) fn unknown(kind: IdentifierKind, name: impl Into<String>) -> Self {
        MetriqlError::UnknownIdentifier {
            kind,
            name: name.into(),
        }
    }
}
