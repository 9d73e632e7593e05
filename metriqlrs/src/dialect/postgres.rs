//! PostgreSQL dialect implementation.

use super::Dialect;

#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn double_type(&self) -> &'static str {
        "DOUBLE PRECISION"
    }
}
