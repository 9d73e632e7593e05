use metriql::expr_parser::{parse_metric_expr, ArithOp, MetricExpr};
use metriql::{DialectKind, Metric, MetriqlError, QueryRequest, SemanticGraph, SqlBuilder};

fn demo_with(metric: Metric) -> SemanticGraph {
    let root = concat!(env!("CARGO_MANIFEST_DIR"), "/examples/models");
    let demo = SemanticGraph::load_from_dir(root).unwrap();
    let mut metrics: Vec<Metric> = demo.metrics().cloned().collect();
    metrics.push(metric);
    SemanticGraph::from_parts(demo.sources().cloned().collect(), metrics).unwrap()
}

fn compile(graph: &SemanticGraph, metric: &str) -> metriql::Result<String> {
    let request = QueryRequest::new(&[metric], &["ds"]).unwrap();
    SqlBuilder::default().build_with_dialect(graph, &request, DialectKind::Duckdb.dialect())
}

#[test]
fn precedence_and_parentheses() {
    let expr = parse_metric_expr("(bookings - 2) * booking_value").unwrap();
    match expr {
        MetricExpr::Binary { op, left, .. } => {
            assert_eq!(op, ArithOp::Multiply);
            assert!(matches!(*left, MetricExpr::Binary { op: ArithOp::Subtract, .. }));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn expression_over_two_measures_of_one_source() {
    let graph = demo_with(Metric::expr("value_per_booking", "booking_value / bookings"));
    let sql = compile(&graph, "value_per_booking").unwrap();
    assert!(sql.contains("subq_1.booking_value / subq_1.bookings AS value_per_booking"));
    assert!(sql.contains("SUM(subq_0.booking_value) AS booking_value"));
    assert!(sql.contains("SUM(subq_0.bookings) AS bookings"));
}

#[test]
fn scalar_functions_are_kept() {
    let graph = demo_with(Metric::expr("rounded_value", "round(booking_value, 2)"));
    let sql = compile(&graph, "rounded_value").unwrap();
    assert!(sql.contains("ROUND(subq_1.booking_value, 2) AS rounded_value"));
}

#[test]
fn aggregate_calls_are_rejected() {
    let graph = demo_with(Metric::expr("double_sum", "sum(booking_value)"));
    assert!(matches!(
        compile(&graph, "double_sum"),
        Err(MetriqlError::InvalidMetricExpression { .. })
    ));
}

#[test]
fn unknown_measure_in_expression() {
    let graph = demo_with(Metric::expr("broken", "refunds * 2"));
    assert!(matches!(
        compile(&graph, "broken"),
        Err(MetriqlError::UnknownIdentifier { .. })
    ));
}
