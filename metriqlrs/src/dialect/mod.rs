//! SQL dialect abstractions for different database backends.
//!
//! Each dialect lives in its own file. A dialect only maps logical constructs
//! (literals, casts, quoting, aggregation calls) to SQL fragments; plan
//! walking and layout live in the query builder.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::MetriqlError;
use crate::expr_utils::is_identifier;
use crate::models::{Aggregation, TimeGrain};

mod bigquery;
mod duckdb;
mod postgres;

pub use bigquery::BigQueryDialect;
pub use duckdb::DuckDbDialect;
pub use postgres::PostgresDialect;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Words that must be quoted even though they look like plain identifiers.
const RESERVED: &[&str] = &[
    "all", "and", "as", "by", "case", "cast", "date", "desc", "else", "end", "from", "group",
    "having", "in", "inner", "join", "left", "like", "limit", "not", "null", "on", "or",
    "order", "outer", "select", "table", "then", "time", "timestamp", "user", "when", "where",
];

pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn quote_char(&self) -> char {
        '"'
    }

    /// Quote an identifier only when it is not a plain lowercase name.
    fn quote_ident(&self, ident: &str) -> String {
        if needs_quoting(ident) {
            let q = self.quote_char();
            let escaped = ident.replace(q, &format!("{q}{q}"));
            format!("{q}{escaped}{q}")
        } else {
            ident.to_string()
        }
    }

    /// Quote each dot-separated part of a relation name.
    fn qualify_table(&self, table: &str) -> String {
        table
            .split('.')
            .map(|part| self.quote_ident(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn timestamp_type(&self) -> &'static str {
        "TIMESTAMP"
    }

    fn double_type(&self) -> &'static str {
        "DOUBLE"
    }

    fn integer_type(&self) -> &'static str {
        "INTEGER"
    }

    /// Literal for a time bound, written at day precision when it falls on midnight.
    fn render_timestamp_literal(&self, ts: &NaiveDateTime) -> String {
        format!(
            "CAST('{}' AS {})",
            format_time_bound(ts),
            self.timestamp_type()
        )
    }

    fn render_bool(&self, value: bool) -> String {
        let literal = if value { "TRUE" } else { "FALSE" };
        literal.to_string()
    }

    fn render_date_trunc(&self, grain: TimeGrain, expr: &str) -> String {
        format!("DATE_TRUNC('{}', {expr})", grain.as_str())
    }

    fn render_cast(&self, expr: &str, data_type: &str) -> String {
        format!("CAST({expr} AS {data_type})")
    }

    fn render_aggregation(&self, agg: Aggregation, expr: &str) -> String {
        match agg {
            Aggregation::Sum => format!("SUM({expr})"),
            Aggregation::Count => format!("COUNT({expr})"),
            Aggregation::CountDistinct => format!("COUNT(DISTINCT {expr})"),
            Aggregation::Min => format!("MIN({expr})"),
            Aggregation::Max => format!("MAX({expr})"),
            Aggregation::Average => format!("AVG({expr})"),
            Aggregation::SumBoolean => {
                format!("SUM({})", self.render_cast(expr, self.integer_type()))
            }
        }
    }

    fn render_literal(&self, value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::Null => "NULL".to_string(),
            serde_json::Value::Bool(b) => self.render_bool(*b),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            serde_json::Value::Array(items) => {
                let rendered: Vec<String> = items.iter().map(|v| self.render_literal(v)).collect();
                rendered.join(", ")
            }
            serde_json::Value::Object(_) => {
                format!("'{}'", value.to_string().replace('\'', "''"))
            }
        }
    }
}

pub(crate) fn needs_quoting(ident: &str) -> bool {
    !is_identifier(ident)
        || ident.chars().any(|c| c.is_ascii_uppercase())
        || RESERVED.contains(&ident)
}

pub(crate) fn format_time_bound(ts: &NaiveDateTime) -> String {
    if ts.num_seconds_from_midnight() == 0 && ts.nanosecond() == 0 {
        ts.format(DATE_FORMAT).to_string()
    } else {
        ts.format(TS_FORMAT).to_string()
    }
}

/// Runtime tag naming one of the supported dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialectKind {
    #[default]
    Duckdb,
    Postgres,
    Bigquery,
}

static DUCKDB: DuckDbDialect = DuckDbDialect;
static POSTGRES: PostgresDialect = PostgresDialect;
static BIGQUERY: BigQueryDialect = BigQueryDialect;

impl DialectKind {
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            DialectKind::Duckdb => &DUCKDB,
            DialectKind::Postgres => &POSTGRES,
            DialectKind::Bigquery => &BIGQUERY,
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dialect().name())
    }
}

impl FromStr for DialectKind {
    type Err = MetriqlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "duckdb" => Ok(DialectKind::Duckdb),
            "postgres" | "postgresql" => Ok(DialectKind::Postgres),
            "bigquery" => Ok(DialectKind::Bigquery),
            other => Err(MetriqlError::Config(format!("unknown dialect {other}"))),
        }
    }
}
