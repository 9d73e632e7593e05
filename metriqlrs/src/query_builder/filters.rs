use crate::request::FilterOp;
use crate::sql_ast::{SqlBinaryOperator, SqlExpr};

use super::plan::Predicate;

/// Lower a plan predicate over `column` into WHERE conditions. A time range
/// yields two inclusive bounds.
pub(crate) fn render_predicate(column: SqlExpr, predicate: &Predicate) -> Vec<SqlExpr> {
    match predicate {
        Predicate::TimeRange { start, end, .. } => vec![
            SqlExpr::binary(
                SqlBinaryOperator::Gte,
                column.clone(),
                SqlExpr::TimestampLiteral(*start),
            ),
            SqlExpr::binary(
                SqlBinaryOperator::Lte,
                column,
                SqlExpr::TimestampLiteral(*end),
            ),
        ],
        Predicate::Compare { op, value, .. } => vec![render_compare(column, *op, value)],
    }
}

fn render_compare(base_expr: SqlExpr, op: FilterOp, value: &serde_json::Value) -> SqlExpr {
    let binary = match op {
        FilterOp::In | FilterOp::NotIn => {
            let list = match value {
                serde_json::Value::Array(items) => {
                    items.iter().map(|v| SqlExpr::Literal(v.clone())).collect()
                }
                other => vec![SqlExpr::Literal(other.clone())],
            };
            return SqlExpr::InList {
                expr: Box::new(base_expr),
                list,
                negated: op == FilterOp::NotIn,
            };
        }
        FilterOp::Eq => SqlBinaryOperator::Eq,
        FilterOp::Neq => SqlBinaryOperator::Neq,
        FilterOp::Gt => SqlBinaryOperator::Gt,
        FilterOp::Gte => SqlBinaryOperator::Gte,
        FilterOp::Lt => SqlBinaryOperator::Lt,
        FilterOp::Lte => SqlBinaryOperator::Lte,
        FilterOp::Like => SqlBinaryOperator::Like,
    };
    SqlExpr::binary(binary, base_expr, SqlExpr::Literal(value.clone()))
}
