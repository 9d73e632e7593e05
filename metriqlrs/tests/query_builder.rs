//! Integration tests for the query builder.
//!
//! These tests compile requests against the demo models shipped under
//! `examples/models` and check the emitted SQL and plan shape.

use metriql::error::IdentifierKind;
use metriql::models::Source;
use metriql::query_builder::{AggregateStage, NodeKind};
use metriql::{
    ColumnKind, DialectKind, FilterOp, Metric, MetriqlError, QueryRequest, SemanticGraph,
    SortDirection, SqlBuilder, TimeRange, ValueFilter,
};
use serde_json::json;

// ============================================================================
// Test fixtures
// ============================================================================

mod fixtures {
    use super::*;

    pub fn demo_graph() -> SemanticGraph {
        let root = concat!(env!("CARGO_MANIFEST_DIR"), "/examples/models");
        SemanticGraph::load_from_dir(root).expect("demo models load")
    }

    /// Demo sources with an extra set of metrics.
    pub fn demo_graph_with(metrics: Vec<Metric>) -> SemanticGraph {
        let demo = demo_graph();
        let mut all: Vec<Metric> = demo.metrics().cloned().collect();
        all.extend(metrics);
        SemanticGraph::from_parts(demo.sources().cloned().collect(), all).unwrap()
    }

    /// Demo sources where `users_latest` also carries `country_latest`.
    pub fn demo_graph_with_user_country() -> SemanticGraph {
        let demo = demo_graph();
        let sources: Vec<Source> = demo
            .sources()
            .cloned()
            .map(|mut source| {
                if source.name == "users_latest" {
                    source
                        .dimensions
                        .insert("country_latest".to_string(), serde_yaml::from_str("{}").unwrap());
                }
                source
            })
            .collect();
        SemanticGraph::from_parts(sources, demo.metrics().cloned().collect()).unwrap()
    }

    /// `a` and `c` carry measures and are linked through `b` by the
    /// entities `x` and `y`; `x_on_b` is the role of `x` on `b`.
    pub fn chain_graph(x_on_a: &str, x_on_b: &str) -> SemanticGraph {
        let source = |yaml: String| -> Source { serde_yaml::from_str(&yaml).unwrap() };
        let a = source(format!(
            "name: a\ntable: t.a\nentities:\n  x: {{type: {x_on_a}}}\nmeasures:\n  a_val: {{agg: sum}}\n"
        ));
        let b = source(format!(
            "name: b\ntable: t.b\nentities:\n  x: {{type: {x_on_b}}}\n  y: {{type: foreign}}\n"
        ));
        let c = source(
            "name: c\ntable: t.c\nentities:\n  y: {type: primary}\nmeasures:\n  c_val: {agg: sum}\n"
                .to_string(),
        );
        SemanticGraph::from_parts(
            vec![a, b, c],
            vec![
                Metric::measure_proxy("a_m", "a_val"),
                Metric::measure_proxy("c_m", "c_val"),
            ],
        )
        .unwrap()
    }

    pub fn duckdb_sql(graph: &SemanticGraph, request: &QueryRequest) -> String {
        SqlBuilder::default()
            .build_with_dialect(graph, request, DialectKind::Duckdb.dialect())
            .unwrap()
    }

    pub fn compile_err(graph: &SemanticGraph, request: &QueryRequest) -> MetriqlError {
        SqlBuilder::default()
            .build_with_dialect(graph, request, DialectKind::Duckdb.dialect())
            .unwrap_err()
    }
}

use fixtures::*;

// ============================================================================
// End-to-end SQL
// ============================================================================

#[test]
fn single_source_metric_by_time_dimension() {
    let graph = demo_graph();
    let request = QueryRequest::new(&["bookings"], &["ds"]).unwrap();
    let compiled = SqlBuilder::default()
        .compile(&graph, &request, DialectKind::Duckdb.dialect())
        .unwrap();
    assert_eq!(compiled.plan.shape(), "Aggregate(Scan)");
    let sql = duckdb_sql(&graph, &request);
    let expected = "\
-- Aggregate Measures
SELECT
  SUM(subq_0.bookings) AS bookings
  , subq_0.ds
FROM (
  -- Read Elements From Source 'bookings_source'
  --   ['bookings', 'ds']
  SELECT
    1 AS bookings
    , bookings_source_src_0.ds
  FROM demo.fct_bookings bookings_source_src_0
) subq_0
GROUP BY
  subq_0.ds";
    assert_eq!(sql, expected);
    assert_eq!(sql.matches(") subq_").count(), 1);
}

#[test]
fn expression_metric_with_joined_dimension() {
    let graph = demo_graph();
    let request =
        QueryRequest::new(&["booking_fees"], &["listing", "listing__country_latest"]).unwrap();
    let sql = duckdb_sql(&graph, &request);
    let expected = "\
-- Compute Metrics via Expressions
SELECT
  subq_3.booking_value * 0.05 AS booking_fees
  , subq_3.listing
  , subq_3.listing__country_latest
FROM (
  -- Aggregate Measures
  SELECT
    SUM(subq_2.booking_value) AS booking_value
    , subq_2.listing
    , subq_2.listing__country_latest
  FROM (
    -- Join Standard Outputs
    SELECT
      subq_0.booking_value
      , subq_0.listing
      , subq_1.country_latest AS listing__country_latest
    FROM (
      -- Read Elements From Source 'bookings_source'
      --   ['booking_value', 'listing']
      SELECT
        bookings_source_src_0.booking_value
        , bookings_source_src_0.listing_id AS listing
      FROM demo.fct_bookings bookings_source_src_0
    ) subq_0
    LEFT OUTER JOIN (
      -- Read Elements From Source 'listings_latest'
      --   ['country_latest', 'listing']
      SELECT
        listings_latest_src_0.country_latest
        , listings_latest_src_0.listing_id AS listing
      FROM demo.dim_listings_latest listings_latest_src_0
    ) subq_1
    ON
      subq_0.listing = subq_1.listing
  ) subq_2
  GROUP BY
    subq_2.listing
    , subq_2.listing__country_latest
) subq_3";
    assert_eq!(sql, expected);
}

#[test]
fn dimension_only_request_collapses_compute() {
    let graph = demo_graph();
    let request = QueryRequest::new(&[], &["listing__country_latest"]).unwrap();
    let sql = duckdb_sql(&graph, &request);
    let expected = "\
-- Aggregate Measures
SELECT
  subq_0.country_latest AS listing__country_latest
FROM (
  -- Read Elements From Source 'listings_latest'
  --   ['country_latest']
  SELECT
    listings_latest_src_0.country_latest
  FROM demo.dim_listings_latest listings_latest_src_0
) subq_0
GROUP BY
  subq_0.country_latest";
    assert_eq!(sql, expected);
}

#[test]
fn time_range_filter_order_and_limit() {
    let graph = demo_graph();
    let request = QueryRequest::new(&["booking_fees"], &["listing__country_latest"])
        .unwrap()
        .with_time_range(TimeRange::parse("2020-01-01", "2020-01-31").unwrap())
        .with_filter(
            ValueFilter::new("listing__country_latest", FilterOp::In, json!(["us", "ca"]))
                .unwrap(),
        )
        .with_order("booking_fees", SortDirection::Desc)
        .with_limit(10);
    let sql = duckdb_sql(&graph, &request);

    assert!(sql.contains("-- Constrain Time Range to [2020-01-01T00:00:00, 2020-01-31T00:00:00]"));
    assert!(sql.contains("subq_0.ds >= CAST('2020-01-01' AS TIMESTAMP)"));
    assert!(sql.contains("AND subq_0.ds <= CAST('2020-01-31' AS TIMESTAMP)"));
    assert!(sql.contains("-- Constrain Output with WHERE"));
    assert!(sql.contains("subq_2.country_latest IN ('us', 'ca')"));
    assert!(sql.contains("INNER JOIN ("));
    assert!(!sql.contains("LEFT OUTER JOIN"));
    assert!(sql.ends_with(") subq_5\nORDER BY\n  booking_fees DESC\nLIMIT 10"));
}

#[test]
fn grain_suffix_truncates_time_dimension() {
    let graph = demo_graph();
    let request = QueryRequest::new(&["bookings"], &["ds__month"]).unwrap();
    let sql = duckdb_sql(&graph, &request);
    assert!(sql.contains("DATE_TRUNC('month', bookings_source_src_0.ds) AS ds__month"));
    assert!(sql.contains("GROUP BY\n  subq_0.ds__month"));
}

#[test]
fn multi_hop_dimension_joins_through_intermediate_source() {
    let graph = demo_graph();
    let request =
        QueryRequest::new(&["bookings"], &["listing__user__home_state_latest"]).unwrap();
    let sql = duckdb_sql(&graph, &request);
    assert!(sql.contains("ON\n      subq_0.listing = subq_1.listing"));
    assert!(sql.contains("subq_1.\"user\" = subq_2.\"user\""));
    assert!(sql.contains("subq_2.home_state_latest AS listing__user__home_state_latest"));
    assert!(sql.contains("FROM demo.dim_users_latest users_latest_src_0"));
}

#[test]
fn double_negation_stays_in_the_select_list() {
    let graph = demo_graph_with(vec![Metric::expr("neg_neg", "-(-booking_value)")]);
    let sql = duckdb_sql(&graph, &QueryRequest::new(&["neg_neg"], &["ds"]).unwrap());
    assert!(sql.contains("  -(-subq_1.booking_value) AS neg_neg\n  , subq_1.ds"));
    assert!(!sql.contains("--subq"));
}

#[test]
fn stage_comments_can_be_disabled() {
    let graph = demo_graph();
    let request = QueryRequest::new(&["bookings"], &["ds"]).unwrap();
    let sql = SqlBuilder::default()
        .with_comments(false)
        .build_with_dialect(&graph, &request, DialectKind::Duckdb.dialect())
        .unwrap();
    assert!(!sql.contains("--"));
    assert!(sql.starts_with("SELECT\n  SUM(subq_0.bookings) AS bookings"));
}

// ============================================================================
// Plan shape and output columns
// ============================================================================

#[test]
fn measures_from_two_sources_aggregate_before_join() {
    let graph = demo_graph();
    let request = QueryRequest::new(&["bookings_per_listing"], &["listing__country_latest"]).unwrap();
    let compiled = SqlBuilder::default()
        .compile(&graph, &request, DialectKind::Duckdb.dialect())
        .unwrap();
    assert_eq!(
        compiled.plan.shape(),
        "Compute(Aggregate(Join(Aggregate(Scan), Aggregate(Scan))))"
    );
    let pre_join = compiled
        .plan
        .nodes()
        .iter()
        .filter(|n| matches!(&n.kind, NodeKind::Aggregate(a) if a.stage == AggregateStage::PreJoin))
        .count();
    assert_eq!(pre_join, 2);
    assert!(compiled.sql.contains("-- Aggregate Measures Before Join"));
    assert!(compiled
        .sql
        .contains("CAST(subq_5.bookings AS DOUBLE) / CAST(NULLIF(subq_5.listings, 0) AS DOUBLE) AS bookings_per_listing"));
}

#[test]
fn plan_serializes_to_json() {
    let graph = demo_graph();
    let request = QueryRequest::new(&["booking_fees"], &["listing__country_latest"]).unwrap();
    let compiled = SqlBuilder::default()
        .compile(&graph, &request, DialectKind::Duckdb.dialect())
        .unwrap();
    let value = serde_json::to_value(&compiled.plan).unwrap();
    let nodes = value["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), compiled.plan.len());
    assert_eq!(value["root"], json!(compiled.plan.root()));
    assert_eq!(nodes[0]["kind"]["type"], json!("scan"));
    assert_eq!(nodes[0]["kind"]["source"], json!("bookings_source"));
    assert_eq!(
        nodes[compiled.plan.root()]["kind"]["type"],
        json!("compute")
    );
}

#[test]
fn output_columns_are_metrics_then_dimensions() {
    let graph = demo_graph();
    let request =
        QueryRequest::new(&["booking_fees"], &["listing", "listing__country_latest", "ds__month"])
            .unwrap();
    let compiled = SqlBuilder::default()
        .compile(&graph, &request, DialectKind::Duckdb.dialect())
        .unwrap();
    let kinds: Vec<(&str, ColumnKind)> = compiled
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("booking_fees", ColumnKind::Metric),
            ("listing", ColumnKind::Entity),
            ("listing__country_latest", ColumnKind::Dimension),
            ("ds__month", ColumnKind::TimeDimension),
        ]
    );
    assert_eq!(
        compiled.plan.output(compiled.plan.root()),
        compiled.column_names().as_slice()
    );
}

#[test]
fn duplicate_request_items_are_emitted_once() {
    let graph = demo_graph();
    let request = QueryRequest::new(&["bookings", "bookings"], &["ds", "ds"]).unwrap();
    let compiled = SqlBuilder::default()
        .compile(&graph, &request, DialectKind::Duckdb.dialect())
        .unwrap();
    assert_eq!(compiled.column_names(), vec!["bookings", "ds"]);
}

#[test]
fn compiling_twice_is_deterministic() {
    let graph = demo_graph();
    let request = QueryRequest::new(
        &["bookings_per_listing", "booking_fees"],
        &["listing__user__home_state_latest", "ds__quarter"],
    )
    .unwrap();
    assert_eq!(duckdb_sql(&graph, &request), duckdb_sql(&graph, &request));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn unknown_metric() {
    let graph = demo_graph();
    let err = compile_err(&graph, &QueryRequest::new(&["nope"], &[]).unwrap());
    assert!(matches!(
        err,
        MetriqlError::UnknownIdentifier {
            kind: IdentifierKind::Metric,
            ..
        }
    ));
}

#[test]
fn unknown_dimension() {
    let graph = demo_graph();
    let err = compile_err(&graph, &QueryRequest::new(&["bookings"], &["nope"]).unwrap());
    assert!(matches!(
        err,
        MetriqlError::UnknownIdentifier {
            kind: IdentifierKind::Dimension,
            ..
        }
    ));
}

#[test]
fn ambiguous_bare_entity() {
    let graph = demo_graph();
    let err = compile_err(&graph, &QueryRequest::new(&["bookings"], &["user"]).unwrap());
    match err {
        MetriqlError::AmbiguousDimension { name, sources } => {
            assert_eq!(name, "user");
            assert_eq!(sources, vec!["listings_latest", "users_latest"]);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn ambiguous_bare_dimension_on_two_joined_sources() {
    let graph = demo_graph_with_user_country();
    let err = compile_err(
        &graph,
        &QueryRequest::new(&["bookings"], &["country_latest"]).unwrap(),
    );
    match err {
        MetriqlError::AmbiguousDimension { name, sources } => {
            assert_eq!(name, "country_latest");
            assert_eq!(sources, vec!["listings_latest", "users_latest"]);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn qualified_path_disambiguates_dimension() {
    let graph = demo_graph_with_user_country();
    let request = QueryRequest::new(
        &["bookings"],
        &["listing__country_latest", "listing__user__country_latest"],
    )
    .unwrap();
    let compiled = SqlBuilder::default()
        .compile(&graph, &request, DialectKind::Duckdb.dialect())
        .unwrap();
    assert_eq!(
        compiled.column_names(),
        vec!["bookings", "listing__country_latest", "listing__user__country_latest"]
    );
    assert!(compiled
        .sql
        .contains("subq_1.country_latest AS listing__country_latest"));
    assert!(compiled
        .sql
        .contains("subq_2.country_latest AS listing__user__country_latest"));
}

#[test]
fn measure_behind_one_to_many_hop_is_rejected() {
    let graph = chain_graph("primary", "foreign");
    let err = compile_err(&graph, &QueryRequest::new(&["a_m", "c_m"], &["x"]).unwrap());
    match err {
        MetriqlError::FanOutJoin { name, from, via } => {
            assert_eq!(name, "c_val");
            assert_eq!(from, "a");
            assert_eq!(via, "b");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn measure_behind_many_to_one_hops_is_joined() {
    let graph = chain_graph("foreign", "primary");
    let request = QueryRequest::new(&["a_m", "c_m"], &["x"]).unwrap();
    let compiled = SqlBuilder::default()
        .compile(&graph, &request, DialectKind::Duckdb.dialect())
        .unwrap();
    assert_eq!(
        compiled.plan.shape(),
        "Compute(Aggregate(Join(Aggregate(Scan), Scan, Aggregate(Scan))))"
    );
    assert_eq!(compiled.column_names(), vec!["a_m", "c_m", "x"]);
}

#[test]
fn fan_out_dimension_is_unreachable() {
    let graph = demo_graph();
    let err = compile_err(&graph, &QueryRequest::new(&["listings"], &["is_instant"]).unwrap());
    assert!(matches!(err, MetriqlError::UnreachableDimension { .. }));
}

#[test]
fn grain_on_categorical_dimension() {
    let graph = demo_graph();
    let err = compile_err(
        &graph,
        &QueryRequest::new(&["bookings"], &["is_instant__month"]).unwrap(),
    );
    assert!(matches!(err, MetriqlError::InvalidGranularity { .. }));
}

#[test]
fn reversed_time_range() {
    let graph = demo_graph();
    let request = QueryRequest::new(&["bookings"], &[])
        .unwrap()
        .with_time_range(TimeRange::parse("2020-02-01", "2020-01-01").unwrap());
    assert!(matches!(
        compile_err(&graph, &request),
        MetriqlError::InvalidTimeRange(_)
    ));
}

#[test]
fn empty_request() {
    let graph = demo_graph();
    assert!(matches!(
        compile_err(&graph, &QueryRequest::default()),
        MetriqlError::EmptyRequest
    ));
}

#[test]
fn order_by_unknown_column() {
    let graph = demo_graph();
    let request = QueryRequest::new(&["bookings"], &["ds"])
        .unwrap()
        .with_order("country", SortDirection::Asc);
    assert!(matches!(
        compile_err(&graph, &request),
        MetriqlError::UnknownIdentifier {
            kind: IdentifierKind::OutputColumn,
            ..
        }
    ));
}

#[test]
fn average_cannot_be_reaggregated_across_sources() {
    let graph = demo_graph_with(vec![Metric::ratio(
        "value_per_listing",
        "average_booking_value",
        "listings",
    )]);
    let err = compile_err(&graph, &QueryRequest::new(&["value_per_listing"], &[]).unwrap());
    assert!(matches!(err, MetriqlError::NonAdditiveMeasure { .. }));
}

#[test]
fn average_on_single_source_is_fine() {
    let graph = demo_graph_with(vec![Metric::measure_proxy(
        "average_booking_value",
        "average_booking_value",
    )]);
    let sql = duckdb_sql(
        &graph,
        &QueryRequest::new(&["average_booking_value"], &["ds"]).unwrap(),
    );
    assert!(sql.contains("AVG(subq_0.average_booking_value) AS average_booking_value"));
}
