use metriql::models::TimeGrain;
use metriql::{DimensionRef, FilterOp, QueryRequest, SortDirection};
use serde_json::json;

#[test]
fn parses_full_request() {
    let request: QueryRequest = serde_json::from_value(json!({
        "metrics": ["booking_fees"],
        "dimensions": ["listing__country_latest", "ds__month"],
        "time_range": {"start": "2020-01-01", "end": "2020-01-31T12:30:00", "grain": "day"},
        "filters": [{"field": "listing__country_latest", "op": "not_in", "value": ["us"]}],
        "order": [{"column": "booking_fees", "direction": "desc"}, {"column": "ds__month"}],
        "limit": 25
    }))
    .unwrap();

    assert_eq!(request.metrics, vec!["booking_fees"]);
    assert_eq!(request.dimensions[0].path(), ["listing".to_string()]);
    assert_eq!(request.dimensions[0].name(), "country_latest");
    assert_eq!(request.dimensions[1].grain(), Some(TimeGrain::Month));
    assert_eq!(request.filters[0].op, FilterOp::NotIn);
    assert_eq!(request.order[0].direction, SortDirection::Desc);
    assert_eq!(request.order[1].direction, SortDirection::Asc);
    assert_eq!(request.limit, Some(25));

    let range = request.time_range.as_ref().unwrap();
    assert_eq!(range.end.format("%H:%M:%S").to_string(), "12:30:00");
}

#[test]
fn dimension_refs_serialize_as_written() {
    let request = QueryRequest::new(&["bookings"], &["listing__user__home_state_latest", "ds__week"])
        .unwrap();
    let value = serde_json::to_value(&request).unwrap();
    assert_eq!(
        value["dimensions"],
        json!(["listing__user__home_state_latest", "ds__week"])
    );
    let back: QueryRequest = serde_json::from_value(value).unwrap();
    assert_eq!(back, request);
}

#[test]
fn grain_alone_is_a_dimension_name() {
    let dim: DimensionRef = "month".parse().unwrap();
    assert_eq!(dim, DimensionRef::bare("month"));
}

#[test]
fn rejects_malformed_input() {
    assert!("listing____country".parse::<DimensionRef>().is_err());
    assert!(serde_json::from_value::<QueryRequest>(json!({"metric": ["x"]})).is_err());
    assert!(serde_json::from_value::<QueryRequest>(json!({
        "metrics": ["x"],
        "time_range": {"start": "01/02/2020", "end": "2020-01-03"}
    }))
    .is_err());
}
