use metriql::{DialectKind, QueryRequest, SemanticGraph, SqlBuilder, TimeRange};

fn demo() -> SemanticGraph {
    let root = concat!(env!("CARGO_MANIFEST_DIR"), "/examples/models");
    SemanticGraph::load_from_dir(root).unwrap()
}

fn ratio_request() -> QueryRequest {
    QueryRequest::new(&["instant_booking_rate"], &["ds__month"])
        .unwrap()
        .with_time_range(TimeRange::parse("2021-03-01", "2021-03-31T23:59:59").unwrap())
}

fn sql_for(kind: DialectKind) -> String {
    SqlBuilder::default()
        .build_with_dialect(&demo(), &ratio_request(), kind.dialect())
        .unwrap()
}

#[test]
fn duckdb() {
    let sql = sql_for(DialectKind::Duckdb);
    assert!(sql.contains("DATE_TRUNC('month', bookings_source_src_0.ds) AS ds__month"));
    assert!(sql.contains("SUM(CAST(subq_1.instant_bookings AS INTEGER)) AS instant_bookings"));
    assert!(sql.contains("subq_0.ds <= CAST('2021-03-31 23:59:59' AS TIMESTAMP)"));
    assert!(sql.contains("CAST(NULLIF(subq_2.bookings, 0) AS DOUBLE)"));
}

#[test]
fn postgres() {
    let sql = sql_for(DialectKind::Postgres);
    assert!(sql.contains("CAST(subq_2.instant_bookings AS DOUBLE PRECISION)"));
    assert!(sql.contains("subq_0.ds >= CAST('2021-03-01' AS TIMESTAMP)"));
}

#[test]
fn bigquery() {
    let sql = sql_for(DialectKind::Bigquery);
    assert!(sql.contains("DATETIME_TRUNC(bookings_source_src_0.ds, MONTH) AS ds__month"));
    assert!(sql.contains("SUM(CAST(subq_1.instant_bookings AS INT64))"));
    assert!(sql.contains("CAST('2021-03-01' AS DATETIME)"));
    assert!(sql.contains("AS FLOAT64"));
}

#[test]
fn same_plan_for_every_dialect() {
    let graph = demo();
    let request = ratio_request();
    let shapes: Vec<String> = [DialectKind::Duckdb, DialectKind::Postgres, DialectKind::Bigquery]
        .into_iter()
        .map(|kind| {
            SqlBuilder::default()
                .compile(&graph, &request, kind.dialect())
                .unwrap()
                .plan
                .shape()
        })
        .collect();
    assert!(shapes.iter().all(|s| s == "Compute(Aggregate(Filter(Scan)))"));
}
