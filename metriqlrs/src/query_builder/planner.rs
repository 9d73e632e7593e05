//! Builds the plan tree for a resolved query.
//!
//! Per join site: Scan, then Filter when constraints apply, then a pre-join
//! Aggregate when measures come from several sites. Sites are combined by a
//! single Join node, then a final Aggregate groups by the requested
//! dimensions and a Compute node evaluates the metrics. The Compute node is
//! left out when it would only repeat the aggregate's columns.

use crate::error::Result;
use crate::models::ElementExpr;

use super::measures::final_aggregation;
use super::plan::{
    AggregateMeasure, AggregateNode, AggregateStage, ColumnBinding, ComputeNode, ComputedMetric,
    FilterNode, JoinNode, JoinTarget, NodeId, NodeKind, Predicate, QueryPlan, ScanColumn,
    ScanNode,
};
use super::resolve::{ResolvedQuery, SiteColumn};

pub(crate) fn build_plan(resolved: &ResolvedQuery<'_>) -> Result<QueryPlan> {
    let mut plan = QueryPlan::new();
    let pre_aggregate = resolved.needs_pre_aggregation();

    let mut site_roots: Vec<NodeId> = Vec::with_capacity(resolved.sites.len());
    for site in 0..resolved.sites.len() {
        site_roots.push(build_site(&mut plan, resolved, site, pre_aggregate));
    }

    let combined = if site_roots.len() == 1 {
        site_roots[0]
    } else {
        build_join(&mut plan, resolved, &site_roots)
    };

    let mut measures = Vec::new();
    for measure in &resolved.measures {
        measures.push(AggregateMeasure {
            input: resolved.sites.qualify(measure.site, &measure.name),
            output: measure.name.clone(),
            agg: final_aggregation(&measure.name, measure.agg, pre_aggregate)?,
        });
    }
    let group_by: Vec<ColumnBinding> = resolved
        .dimensions
        .iter()
        .map(|d| ColumnBinding {
            input: resolved.sites.qualify(d.column.site, &d.column.local),
            output: d.output.clone(),
        })
        .collect();
    let aggregate_output: Vec<String> = measures
        .iter()
        .map(|m| m.output.clone())
        .chain(group_by.iter().map(|g| g.output.clone()))
        .collect();
    let aggregate = plan.add(
        NodeKind::Aggregate(AggregateNode {
            stage: AggregateStage::Final,
            measures,
            group_by,
        }),
        vec![combined],
        aggregate_output,
    );

    let metrics: Vec<ComputedMetric> = resolved
        .metrics
        .iter()
        .map(|m| ComputedMetric {
            name: m.name.clone(),
            expr: m.compute.clone(),
        })
        .collect();
    let passthrough: Vec<ColumnBinding> = resolved
        .dimensions
        .iter()
        .map(|d| ColumnBinding::same(&d.output))
        .collect();
    let compute_output: Vec<String> = metrics
        .iter()
        .map(|m| m.name.clone())
        .chain(passthrough.iter().map(|b| b.output.clone()))
        .collect();
    let compute = ComputeNode {
        metrics,
        passthrough,
        order: resolved.order.clone(),
        limit: resolved.limit,
    };
    // The final aggregate already exposes every output column.
    if !compute.is_passthrough() {
        plan.add(NodeKind::Compute(compute), vec![aggregate], compute_output);
    }

    tracing::debug!(
        shape = %plan.shape(),
        nodes = plan.len(),
        pre_aggregate,
        "built query plan"
    );
    Ok(plan)
}

fn push_column(columns: &mut Vec<ScanColumn>, column: ScanColumn) {
    if !columns.iter().any(|c| c.name == column.name) {
        columns.push(column);
    }
}

fn scan_column(column: &SiteColumn) -> ScanColumn {
    ScanColumn {
        name: column.local.clone(),
        expr: column.expr.clone(),
        truncate_to: column.truncate_to,
    }
}

/// Key column a site exposes for `entity`.
fn entity_column(resolved: &ResolvedQuery<'_>, site: usize, entity: &str) -> ScanColumn {
    let source = resolved.sites.get(site).source;
    let expr = source
        .entities
        .get(entity)
        .map(|e| ElementExpr::for_element(entity, e.expr.as_deref()))
        .unwrap_or_else(|| ElementExpr::Column(entity.to_string()));
    ScanColumn {
        name: entity.to_string(),
        expr,
        truncate_to: None,
    }
}

/// Entity columns a site joins on: to its parent and to its children.
fn join_keys(resolved: &ResolvedQuery<'_>, site: usize) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(entity) = resolved.sites.get(site).entity() {
        keys.push(entity.to_string());
    }
    for child in resolved.sites.iter() {
        if child.parent == Some(site) {
            if let Some(entity) = child.entity() {
                if !keys.iter().any(|k| k == entity) {
                    keys.push(entity.to_string());
                }
            }
        }
    }
    keys
}

fn build_site(
    plan: &mut QueryPlan,
    resolved: &ResolvedQuery<'_>,
    site: usize,
    pre_aggregate: bool,
) -> NodeId {
    let source = resolved.sites.get(site).source;
    let mut columns: Vec<ScanColumn> = Vec::new();

    for measure in resolved.measures.iter().filter(|m| m.site == site) {
        push_column(
            &mut columns,
            ScanColumn {
                name: measure.name.clone(),
                expr: measure.expr.clone(),
                truncate_to: None,
            },
        );
    }
    for dim in resolved.dimensions.iter().filter(|d| d.column.site == site) {
        push_column(&mut columns, scan_column(&dim.column));
    }
    for constraint in resolved
        .time_constraints
        .iter()
        .filter(|c| c.column.site == site)
    {
        push_column(&mut columns, scan_column(&constraint.column));
    }
    for filter in resolved.filters.iter().filter(|f| f.column.site == site) {
        push_column(&mut columns, scan_column(&filter.column));
    }
    let keys = join_keys(resolved, site);
    for key in &keys {
        push_column(&mut columns, entity_column(resolved, site, key));
    }

    let scan_output: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    let mut node = plan.add(
        NodeKind::Scan(ScanNode {
            source: source.name.clone(),
            table: source.table.clone(),
            columns,
        }),
        vec![],
        scan_output.clone(),
    );

    let mut predicates: Vec<Predicate> = resolved
        .time_constraints
        .iter()
        .filter(|c| c.column.site == site)
        .map(|c| Predicate::TimeRange {
            column: c.column.local.clone(),
            start: c.start,
            end: c.end,
        })
        .collect();
    predicates.extend(
        resolved
            .filters
            .iter()
            .filter(|f| f.column.site == site)
            .map(|f| Predicate::Compare {
                column: f.column.local.clone(),
                op: f.op,
                value: f.value.clone(),
            }),
    );
    if !predicates.is_empty() {
        node = plan.add(
            NodeKind::Filter(FilterNode { predicates }),
            vec![node],
            scan_output,
        );
    }

    if pre_aggregate && resolved.site_has_measures(site) {
        let measures: Vec<AggregateMeasure> = resolved
            .measures
            .iter()
            .filter(|m| m.site == site)
            .map(|m| AggregateMeasure {
                input: m.name.clone(),
                output: m.name.clone(),
                agg: m.agg,
            })
            .collect();
        let mut group_by: Vec<ColumnBinding> = Vec::new();
        for dim in resolved.dimensions.iter().filter(|d| d.column.site == site) {
            if !group_by.iter().any(|g| g.input == dim.column.local) {
                group_by.push(ColumnBinding::same(&dim.column.local));
            }
        }
        for key in &keys {
            if !group_by.iter().any(|g| &g.input == key) {
                group_by.push(ColumnBinding::same(key));
            }
        }
        let output: Vec<String> = measures
            .iter()
            .map(|m| m.output.clone())
            .chain(group_by.iter().map(|g| g.output.clone()))
            .collect();
        node = plan.add(
            NodeKind::Aggregate(AggregateNode {
                stage: AggregateStage::PreJoin,
                measures,
                group_by,
            }),
            vec![node],
            output,
        );
    }

    node
}

fn build_join(plan: &mut QueryPlan, resolved: &ResolvedQuery<'_>, site_roots: &[NodeId]) -> NodeId {
    let mut output: Vec<String> = plan.output(site_roots[0]).to_vec();
    let mut targets = Vec::new();
    for (idx, root) in site_roots.iter().enumerate().skip(1) {
        let site = resolved.sites.get(idx);
        let entity = site.entity().unwrap_or_default().to_string();
        let columns: Vec<ColumnBinding> = plan
            .output(*root)
            .iter()
            .filter(|c| **c != entity)
            .map(|c| ColumnBinding {
                input: c.clone(),
                output: resolved.sites.qualify(idx, c),
            })
            .collect();
        output.extend(columns.iter().map(|c| c.output.clone()));
        tracing::debug!(
            site = idx,
            entity = %entity,
            cardinality = ?site.cardinality(),
            join = ?site.join_kind(),
            "planned join"
        );
        targets.push(JoinTarget {
            join_type: site.join_kind(),
            left_input: site.parent.unwrap_or(0),
            left_column: entity.clone(),
            right_column: entity,
            columns,
        });
    }
    plan.add(
        NodeKind::Join(JoinNode { targets }),
        site_roots.to_vec(),
        output,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SemanticGraph;
    use crate::models::{Aggregation, Dimension, DimensionType, Entity, EntityType, Measure, Metric, Source};
    use crate::query_builder::plan::AggregateStage;
    use crate::query_builder::resolve::resolve;
    use crate::request::QueryRequest;
    use std::collections::BTreeMap;

    fn measure(agg: Aggregation, expr: Option<&str>) -> Measure {
        Measure {
            agg,
            expr: expr.map(str::to_string),
            agg_time_dimension: None,
            description: None,
        }
    }

    fn dim(kind: DimensionType) -> Dimension {
        Dimension {
            dimension_type: kind,
            expr: None,
            time_grain: None,
            is_primary: kind == DimensionType::Time,
            description: None,
        }
    }

    fn entity(t: EntityType, expr: &str) -> Entity {
        Entity {
            entity_type: t,
            expr: Some(expr.to_string()),
            description: None,
        }
    }

    fn graph() -> SemanticGraph {
        let bookings = Source {
            name: "bookings_source".to_string(),
            table: "demo.fct_bookings".to_string(),
            columns: Vec::new(),
            entities: BTreeMap::from([(
                "listing".to_string(),
                entity(EntityType::Foreign, "listing_id"),
            )]),
            measures: BTreeMap::from([
                ("bookings".to_string(), measure(Aggregation::Sum, Some("1"))),
                ("booking_value".to_string(), measure(Aggregation::Sum, None)),
            ]),
            dimensions: BTreeMap::from([("ds".to_string(), dim(DimensionType::Time))]),
            description: None,
        };
        let listings = Source {
            name: "listings_latest".to_string(),
            table: "demo.dim_listings_latest".to_string(),
            columns: Vec::new(),
            entities: BTreeMap::from([(
                "listing".to_string(),
                entity(EntityType::Primary, "listing_id"),
            )]),
            measures: BTreeMap::from([("listings".to_string(), measure(Aggregation::Sum, Some("1")))]),
            dimensions: BTreeMap::from([
                ("country_latest".to_string(), dim(DimensionType::Categorical)),
                ("created_at".to_string(), dim(DimensionType::Time)),
            ]),
            description: None,
        };
        SemanticGraph::from_parts(
            vec![bookings, listings],
            vec![
                Metric::measure_proxy("bookings", "bookings"),
                Metric::measure_proxy("listings", "listings"),
                Metric::expr("booking_fees", "booking_value * 0.05"),
                Metric::ratio("bookings_per_listing", "bookings", "listings"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn single_source_chain() {
        let g = graph();
        let request = QueryRequest::new(&["bookings"], &["ds"]).unwrap();
        let resolved = resolve(&g, &request).unwrap();
        let plan = build_plan(&resolved).unwrap();
        assert_eq!(plan.shape(), "Aggregate(Scan)");
        assert_eq!(plan.output(plan.root()), ["bookings", "ds"]);
        assert_eq!(plan.count("Compute"), 0);
    }

    #[test]
    fn dimension_join_skips_pre_aggregation() {
        let g = graph();
        let request =
            QueryRequest::new(&["booking_fees"], &["listing", "listing__country_latest"]).unwrap();
        let resolved = resolve(&g, &request).unwrap();
        let plan = build_plan(&resolved).unwrap();
        assert_eq!(plan.shape(), "Compute(Aggregate(Join(Scan, Scan)))");
        assert_eq!(
            plan.output(plan.root()),
            ["booking_fees", "listing", "listing__country_latest"]
        );
        let join = plan
            .nodes()
            .iter()
            .find_map(|n| match &n.kind {
                NodeKind::Join(j) => Some(j.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(join.targets[0].left_column, "listing");
        assert_eq!(join.targets[0].columns[0].output, "listing__country_latest");
    }

    #[test]
    fn multi_source_measures_pre_aggregate() {
        let g = graph();
        let request = QueryRequest::new(&["bookings_per_listing"], &["listing"]).unwrap();
        let resolved = resolve(&g, &request).unwrap();
        let plan = build_plan(&resolved).unwrap();
        assert_eq!(
            plan.shape(),
            "Compute(Aggregate(Join(Aggregate(Scan), Aggregate(Scan))))"
        );
        let stages: Vec<AggregateStage> = plan
            .nodes()
            .iter()
            .filter_map(|n| match &n.kind {
                NodeKind::Aggregate(a) => Some(a.stage),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            vec![
                AggregateStage::PreJoin,
                AggregateStage::PreJoin,
                AggregateStage::Final
            ]
        );
    }

    #[test]
    fn time_range_adds_filter_on_each_measure_site() {
        let g = graph();
        let request = QueryRequest::new(&["bookings_per_listing"], &[])
            .unwrap()
            .with_time_range(crate::request::TimeRange::parse("2020-01-01", "2020-01-31").unwrap());
        let resolved = resolve(&g, &request).unwrap();
        let plan = build_plan(&resolved).unwrap();
        assert_eq!(plan.count("Filter"), 2);
    }
}
