//! BigQuery dialect implementation.

use crate::models::TimeGrain;

use super::Dialect;

#[derive(Debug, Default, Clone, Copy)]
pub struct BigQueryDialect;

impl Dialect for BigQueryDialect {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    // BigQuery uses backticks for identifiers
    fn quote_char(&self) -> char {
        '`'
    }

    fn quote_ident(&self, ident: &str) -> String {
        if super::needs_quoting(ident) {
            format!("`{}`", ident.replace('`', "\\`"))
        } else {
            ident.to_string()
        }
    }

    // Bounds carry no zone, so they compare against DATETIME columns.
    fn timestamp_type(&self) -> &'static str {
        "DATETIME"
    }

    fn double_type(&self) -> &'static str {
        "FLOAT64"
    }

    fn integer_type(&self) -> &'static str {
        "INT64"
    }

    fn render_date_trunc(&self, grain: TimeGrain, expr: &str) -> String {
        let part = match grain {
            TimeGrain::Day => "DAY",
            TimeGrain::Week => "ISOWEEK",
            TimeGrain::Month => "MONTH",
            TimeGrain::Quarter => "QUARTER",
            TimeGrain::Year => "YEAR",
        };
        format!("DATETIME_TRUNC({expr}, {part})")
    }
}
