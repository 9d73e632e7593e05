//! Maps a request onto the semantic graph: picks the primary source, assigns
//! every measure, dimension and filter to a join site, and validates names.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::error::{IdentifierKind, MetriqlError, Result};
use crate::graph::{EdgeFilter, JoinEdge, SemanticGraph};
use crate::models::{Aggregation, Dimension, ElementExpr, Source, TimeGrain};
use crate::request::{DimensionRef, FilterOp, OrderItem, QueryRequest, QUALIFIER_SEP};

use super::grain::{check_range_grain, check_range_order, requested_truncation};
use super::joins::SiteTable;
use super::measures::{expand_metric, ExpandedMetric};

/// Role of an output column, reported to callers alongside the SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Metric,
    Dimension,
    TimeDimension,
    Entity,
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedMeasure {
    pub name: String,
    pub site: usize,
    pub agg: Aggregation,
    pub expr: ElementExpr,
}

/// A column read at a join site; `local` is its name inside the site's
/// sub-plan.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SiteColumn {
    pub site: usize,
    pub local: String,
    pub expr: ElementExpr,
    pub truncate_to: Option<TimeGrain>,
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedDimension {
    pub output: String,
    pub kind: ColumnKind,
    pub column: SiteColumn,
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedFilter {
    pub column: SiteColumn,
    pub op: FilterOp,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone)]
pub(crate) struct TimeConstraint {
    pub column: SiteColumn,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedQuery<'g> {
    pub metrics: Vec<ExpandedMetric>,
    pub measures: Vec<ResolvedMeasure>,
    pub sites: SiteTable<'g>,
    pub dimensions: Vec<ResolvedDimension>,
    pub filters: Vec<ResolvedFilter>,
    pub time_constraints: Vec<TimeConstraint>,
    pub order: Vec<OrderItem>,
    pub limit: Option<u64>,
}

impl ResolvedQuery<'_> {
    /// Measures come from more than one site, so each site is aggregated
    /// to its join keys before joining.
    pub fn needs_pre_aggregation(&self) -> bool {
        let mut sites = self.measures.iter().map(|m| m.site);
        match sites.next() {
            Some(first) => sites.any(|s| s != first),
            None => false,
        }
    }

    pub fn site_has_measures(&self, site: usize) -> bool {
        self.measures.iter().any(|m| m.site == site)
    }
}

/// An element found on a source.
struct Element<'g> {
    name: String,
    kind: ColumnKind,
    expr: ElementExpr,
    dimension: Option<&'g Dimension>,
}

fn element_on<'g>(source: &'g Source, name: &str) -> Option<Element<'g>> {
    if let Some(dim) = source.dimensions.get(name) {
        return Some(Element {
            name: name.to_string(),
            kind: if dim.is_time() {
                ColumnKind::TimeDimension
            } else {
                ColumnKind::Dimension
            },
            expr: ElementExpr::for_element(name, dim.expr.as_deref()),
            dimension: Some(dim),
        });
    }
    source.entities.get(name).map(|entity| Element {
        name: name.to_string(),
        kind: ColumnKind::Entity,
        expr: ElementExpr::for_element(name, entity.expr.as_deref()),
        dimension: None,
    })
}

fn check_column(source: &Source, expr: &ElementExpr) -> Result<()> {
    if let ElementExpr::Column(col) = expr {
        if !source.columns.is_empty() && !source.columns.iter().any(|c| c == col) {
            return Err(MetriqlError::unknown(
                IdentifierKind::Column,
                format!("{}.{col}", source.name),
            ));
        }
    }
    Ok(())
}

fn local_name(element: &str, grain: Option<TimeGrain>) -> String {
    match grain {
        Some(g) => format!("{element}{QUALIFIER_SEP}{g}"),
        None => element.to_string(),
    }
}

pub(crate) struct Resolver<'g> {
    graph: &'g SemanticGraph,
    sites: SiteTable<'g>,
    /// Fan-out safe paths from the primary source to every reachable source.
    reachable: BTreeMap<String, Vec<JoinEdge>>,
}

pub(crate) fn resolve<'g>(
    graph: &'g SemanticGraph,
    request: &QueryRequest,
) -> Result<ResolvedQuery<'g>> {
    if request.metrics.is_empty() && request.dimensions.is_empty() {
        return Err(MetriqlError::EmptyRequest);
    }
    if let Some(range) = &request.time_range {
        check_range_order(range)?;
    }

    let mut metrics: Vec<ExpandedMetric> = Vec::new();
    for name in &request.metrics {
        if metrics.iter().any(|m| &m.name == name) {
            continue;
        }
        let metric = graph
            .get_metric(name)
            .ok_or_else(|| MetriqlError::unknown(IdentifierKind::Metric, name))?;
        metrics.push(expand_metric(graph, metric)?);
    }

    let mut measure_names: Vec<&str> = Vec::new();
    for metric in &metrics {
        for measure in &metric.measures {
            if !measure_names.contains(&measure.as_str()) {
                measure_names.push(measure);
            }
        }
    }

    let primary = match measure_names.is_empty() {
        false => choose_primary(graph, &measure_names)?,
        true => anchor_for_dimension(graph, &request.dimensions[0])?,
    };
    tracing::debug!(primary = %primary.name, measures = measure_names.len(), "chose primary source");

    let mut resolver = Resolver {
        graph,
        sites: SiteTable::new(primary),
        reachable: graph.reachable(&primary.name, EdgeFilter::FanoutSafe),
    };

    let mut measures = Vec::new();
    for name in &measure_names {
        measures.push(resolver.resolve_measure(name)?);
    }

    let mut dimensions: Vec<ResolvedDimension> = Vec::new();
    for dim_ref in &request.dimensions {
        let resolved = resolver.resolve_dimension(dim_ref)?;
        if dimensions.iter().any(|d| d.output == resolved.output) {
            continue;
        }
        dimensions.push(resolved);
    }

    let mut filters = Vec::new();
    for filter in &request.filters {
        let resolved = resolver.resolve_dimension(&filter.field)?;
        resolver.sites.mark_filtered(resolved.column.site);
        filters.push(ResolvedFilter {
            column: resolved.column,
            op: filter.op,
            value: filter.value.clone(),
        });
    }

    let mut time_constraints = Vec::new();
    if let Some(range) = &request.time_range {
        time_constraints = resolver.resolve_time_range(range, &measures)?;
    }

    for item in &request.order {
        let known = metrics.iter().any(|m| m.name == item.column)
            || dimensions.iter().any(|d| d.output == item.column);
        if !known {
            return Err(MetriqlError::unknown(
                IdentifierKind::OutputColumn,
                &item.column,
            ));
        }
    }

    Ok(ResolvedQuery {
        metrics,
        measures,
        sites: resolver.sites,
        dimensions,
        filters,
        time_constraints,
        order: request.order.clone(),
        limit: request.limit,
    })
}

/// Source owning the most measures; ties go to the source of the earliest
/// measure in request order.
fn choose_primary<'g>(graph: &'g SemanticGraph, measures: &[&str]) -> Result<&'g Source> {
    let mut counts: Vec<(&'g Source, usize)> = Vec::new();
    for name in measures {
        let owner = graph
            .measure_owner(name)
            .ok_or_else(|| MetriqlError::unknown(IdentifierKind::Measure, *name))?;
        match counts.iter_mut().find(|(s, _)| s.name == owner.name) {
            Some((_, n)) => *n += 1,
            None => counts.push((owner, 1)),
        }
    }
    let mut best: Option<(&'g Source, usize)> = None;
    for (source, n) in counts {
        if best.map(|(_, b)| n > b).unwrap_or(true) {
            best = Some((source, n));
        }
    }
    best.map(|(s, _)| s)
        .ok_or_else(|| MetriqlError::Model("no measure owner found".to_string()))
}

/// Primary source for a request without metrics: the owner of the first
/// requested dimension.
fn anchor_for_dimension<'g>(graph: &'g SemanticGraph, dim_ref: &DimensionRef) -> Result<&'g Source> {
    if let Some(entity) = dim_ref.path().first() {
        return graph
            .sources()
            .find(|s| s.is_unique_on(entity))
            .ok_or_else(|| MetriqlError::unknown(IdentifierKind::Entity, entity));
    }
    let name = dim_ref.name();
    if let Some(source) = graph.sources().find(|s| s.is_unique_on(name)) {
        return Ok(source);
    }
    let owners: Vec<&Source> = graph
        .sources()
        .filter(|s| s.dimensions.contains_key(name) || s.entities.contains_key(name))
        .collect();
    match owners.as_slice() {
        [] => Err(MetriqlError::unknown(IdentifierKind::Dimension, name)),
        [only] => Ok(only),
        many => Err(MetriqlError::AmbiguousDimension {
            name: name.to_string(),
            sources: many.iter().map(|s| s.name.clone()).collect(),
        }),
    }
}

impl<'g> Resolver<'g> {
    fn primary(&self) -> &'g Source {
        self.sites.primary()
    }

    fn resolve_measure(&mut self, name: &str) -> Result<ResolvedMeasure> {
        let owner = self
            .graph
            .measure_owner(name)
            .ok_or_else(|| MetriqlError::unknown(IdentifierKind::Measure, name))?;
        let site = if owner.name == self.primary().name {
            0
        } else {
            let path = self.measure_path(name, owner)?;
            tracing::debug!(measure = %name, source = %owner.name, hops = path.len(), "measure needs join");
            self.sites.register(&path, self.graph)?
        };
        let measure = &owner.measures[name];
        let expr = ElementExpr::for_element(name, measure.expr.as_deref());
        check_column(owner, &expr)?;
        Ok(ResolvedMeasure {
            name: name.to_string(),
            site,
            agg: measure.agg,
            expr,
        })
    }

    /// Shortest path to a measure's source. Every hop except the last must be
    /// fan-out safe: sites in between are joined unaggregated.
    fn measure_path(&self, name: &str, owner: &'g Source) -> Result<Vec<JoinEdge>> {
        if let Some(path) = self.reachable.get(&owner.name) {
            return Ok(path.clone());
        }
        let mut best: Option<Vec<JoinEdge>> = None;
        for (source, path) in &self.reachable {
            for edge in self.graph.edges_from(source) {
                if edge.to_source != owner.name {
                    continue;
                }
                if best.as_ref().map_or(true, |b| path.len() + 1 < b.len()) {
                    let mut hops = path.clone();
                    hops.push(edge.clone());
                    best = Some(hops);
                }
            }
        }
        if let Some(path) = best {
            return Ok(path);
        }

        let primary = self.primary();
        match self.graph.join_path(&primary.name, &owner.name, EdgeFilter::Any) {
            Some(path) => {
                let via = path
                    .iter()
                    .find(|e| !e.cardinality.is_fanout_safe())
                    .map_or_else(|| owner.name.clone(), |e| e.to_source.clone());
                tracing::debug!(measure = %name, from = %primary.name, via = %via, "measure join would fan out");
                Err(MetriqlError::FanOutJoin {
                    name: name.to_string(),
                    from: primary.name.clone(),
                    via,
                })
            }
            None => Err(MetriqlError::UnreachableDimension {
                name: name.to_string(),
                from: primary.name.clone(),
                to: owner.name.clone(),
            }),
        }
    }

    fn resolve_dimension(&mut self, dim_ref: &DimensionRef) -> Result<ResolvedDimension> {
        let (site, element) = match dim_ref {
            DimensionRef::Bare { name, .. } => self.resolve_bare(name)?,
            DimensionRef::Qualified { path, name, .. } => self.resolve_qualified(path, name)?,
        };

        let grain = dim_ref.grain();
        let truncate_to = requested_truncation(dim_ref.name(), element.dimension, grain)?;

        let mut output_parts: Vec<String> = match dim_ref {
            DimensionRef::Bare { .. } => self
                .sites
                .get(site)
                .entity_path()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            DimensionRef::Qualified { path, .. } => path.clone(),
        };
        output_parts.push(element.name.clone());
        if let Some(g) = grain {
            output_parts.push(g.to_string());
        }
        let output = output_parts.join(QUALIFIER_SEP);

        // The join entity of a site holds the same values as the parent's
        // key column, which is already read.
        let mut site = site;
        let mut expr = element.expr;
        if element.kind == ColumnKind::Entity {
            let joined = self.sites.get(site);
            if let (Some(entity), Some(parent)) = (joined.entity(), joined.parent) {
                if entity == element.name {
                    let parent_source = self.sites.get(parent).source;
                    if let Some(parent_entity) = parent_source.entities.get(entity) {
                        expr = ElementExpr::for_element(entity, parent_entity.expr.as_deref());
                        site = parent;
                    }
                }
            }
        }
        check_column(self.sites.get(site).source, &expr)?;

        tracing::debug!(dimension = %dim_ref, site, output = %output, "resolved dimension");
        Ok(ResolvedDimension {
            output,
            kind: element.kind,
            column: SiteColumn {
                site,
                local: local_name(&element.name, grain),
                expr,
                truncate_to,
            },
        })
    }

    fn resolve_bare(&mut self, name: &str) -> Result<(usize, Element<'g>)> {
        let primary = self.primary();
        if primary.entities.contains_key(name) {
            if let Some(element) = element_on(primary, name) {
                return Ok((0, element));
            }
        }

        let graph = self.graph;
        let candidates: Vec<(&str, &Vec<JoinEdge>)> = self
            .reachable
            .iter()
            .filter(|(source, _)| {
                graph
                    .get_source(source)
                    .map(|s| s.dimensions.contains_key(name) || s.entities.contains_key(name))
                    .unwrap_or(false)
            })
            .map(|(s, path)| (s.as_str(), path))
            .collect();

        match candidates.as_slice() {
            [] => {
                let elsewhere = graph
                    .sources()
                    .find(|s| s.dimensions.contains_key(name) || s.entities.contains_key(name));
                match elsewhere {
                    Some(owner) => Err(MetriqlError::UnreachableDimension {
                        name: name.to_string(),
                        from: primary.name.clone(),
                        to: owner.name.clone(),
                    }),
                    None => Err(MetriqlError::unknown(IdentifierKind::Dimension, name)),
                }
            }
            [(source_name, path)] => {
                let path = (*path).clone();
                let source = graph
                    .get_source(source_name)
                    .ok_or_else(|| MetriqlError::unknown(IdentifierKind::Source, *source_name))?;
                let element = element_on(source, name)
                    .ok_or_else(|| MetriqlError::unknown(IdentifierKind::Dimension, name))?;
                let site = self.sites.register(&path, graph)?;
                Ok((site, element))
            }
            many => Err(MetriqlError::AmbiguousDimension {
                name: name.to_string(),
                sources: many.iter().map(|(s, _)| s.to_string()).collect(),
            }),
        }
    }

    /// Walk the entity path from the primary source. Each step either hops
    /// to a source unique on the entity or stays on the current source when
    /// it is itself unique on it.
    fn resolve_qualified(&mut self, path: &[String], name: &str) -> Result<(usize, Element<'g>)> {
        let graph = self.graph;
        let primary = self.primary();
        let mut states: Vec<(&'g Source, Vec<JoinEdge>)> = vec![(primary, Vec::new())];

        for entity in path {
            let mut next = Vec::new();
            for (source, edges) in &states {
                if source.is_unique_on(entity) {
                    next.push((*source, edges.clone()));
                }
                for edge in graph.edges_from(&source.name) {
                    if &edge.entity != entity || !edge.cardinality.is_fanout_safe() {
                        continue;
                    }
                    if let Some(target) = graph.get_source(&edge.to_source) {
                        let mut hop = edges.clone();
                        hop.push(edge.clone());
                        next.push((target, hop));
                    }
                }
            }
            if next.is_empty() {
                return Err(MetriqlError::unknown(IdentifierKind::Entity, entity));
            }
            states = next;
        }

        let mut found: Vec<(&'g Source, Vec<JoinEdge>)> = states
            .into_iter()
            .filter(|(s, _)| s.dimensions.contains_key(name) || s.entities.contains_key(name))
            .collect();
        found.dedup_by(|a, b| a.0.name == b.0.name && a.1 == b.1);

        match found.len() {
            0 => {
                let qualified = format!("{}{QUALIFIER_SEP}{name}", path.join(QUALIFIER_SEP));
                match graph.sources().find(|s| s.has_element(name)) {
                    Some(owner) => Err(MetriqlError::UnreachableDimension {
                        name: qualified,
                        from: primary.name.clone(),
                        to: owner.name.clone(),
                    }),
                    None => Err(MetriqlError::unknown(IdentifierKind::Dimension, qualified)),
                }
            }
            1 => {
                let (source, edges) = found.remove(0);
                let element = element_on(source, name)
                    .ok_or_else(|| MetriqlError::unknown(IdentifierKind::Dimension, name))?;
                let site = self.sites.register(&edges, graph)?;
                Ok((site, element))
            }
            _ => {
                let mut sources: Vec<String> = found.iter().map(|(s, _)| s.name.clone()).collect();
                sources.sort();
                sources.dedup();
                Err(MetriqlError::AmbiguousDimension {
                    name: format!("{}{QUALIFIER_SEP}{name}", path.join(QUALIFIER_SEP)),
                    sources,
                })
            }
        }
    }

    /// One inclusive range predicate per distinct aggregation time dimension
    /// of each measure-bearing site.
    fn resolve_time_range(
        &mut self,
        range: &crate::request::TimeRange,
        measures: &[ResolvedMeasure],
    ) -> Result<Vec<TimeConstraint>> {
        let mut targets: Vec<(usize, &'g Source, String)> = Vec::new();
        if measures.is_empty() {
            let primary = self.primary();
            let (dim_name, _) = primary.primary_time_dimension().ok_or_else(|| {
                MetriqlError::InvalidTimeRange(format!(
                    "source {} has no primary time dimension",
                    primary.name
                ))
            })?;
            targets.push((0, primary, dim_name.to_string()));
        }
        for measure in measures {
            let source = self.sites.get(measure.site).source;
            let (dim_name, _) = source.agg_time_dimension(&measure.name).ok_or_else(|| {
                MetriqlError::InvalidTimeRange(format!(
                    "measure {} has no aggregation time dimension",
                    measure.name
                ))
            })?;
            if !targets
                .iter()
                .any(|(site, _, d)| *site == measure.site && d == dim_name)
            {
                targets.push((measure.site, source, dim_name.to_string()));
            }
        }

        let mut constraints = Vec::new();
        for (site, source, dim_name) in targets {
            let dimension = &source.dimensions[&dim_name];
            if !dimension.is_time() {
                return Err(MetriqlError::InvalidTimeRange(format!(
                    "{dim_name} on {} is not a time dimension",
                    source.name
                )));
            }
            check_range_grain(range, &dim_name, dimension)?;
            let expr = ElementExpr::for_element(&dim_name, dimension.expr.as_deref());
            check_column(source, &expr)?;
            constraints.push(TimeConstraint {
                column: SiteColumn {
                    site,
                    local: dim_name,
                    expr,
                    truncate_to: None,
                },
                start: range.start,
                end: range.end,
            });
        }
        Ok(constraints)
    }
}
