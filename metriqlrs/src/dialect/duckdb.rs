//! DuckDB dialect implementation.

use super::Dialect;

#[derive(Debug, Default, Clone, Copy)]
pub struct DuckDbDialect;

impl Dialect for DuckDbDialect {
    fn name(&self) -> &'static str {
        "duckdb"
    }
}
