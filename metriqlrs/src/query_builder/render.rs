//! Turns a [`QueryPlan`] into nested SELECT statements.
//!
//! Every non-scan node reads its children as subqueries aliased `subq_<n>`,
//! numbered in the order the children are wrapped. Scans alias their table
//! as `<source>_src_<n>`, counting per source.

use std::collections::HashMap;

use crate::error::{MetriqlError, Result};
use crate::expr_parser::{ArithOp, MetricExpr};
use crate::models::ElementExpr;
use crate::sql_ast::{
    CastType, Join, OrderItem, SelectItem, SelectQuery, SqlBinaryOperator, SqlExpr, SqlJoinType,
    TableRef,
};

use super::filters::render_predicate;
use super::plan::{
    AggregateNode, AggregateStage, ComputeExpr, ComputeNode, FilterNode, JoinKind, JoinNode,
    NodeId, NodeKind, Predicate, QueryPlan, ScanNode,
};

const RANGE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Default)]
struct RenderContext {
    next_subquery: usize,
    scan_counters: HashMap<String, usize>,
}

impl RenderContext {
    fn subquery_alias(&mut self) -> String {
        let alias = format!("subq_{}", self.next_subquery);
        self.next_subquery += 1;
        alias
    }

    fn scan_alias(&mut self, source: &str) -> String {
        let counter = self.scan_counters.entry(source.to_string()).or_insert(0);
        let alias = format!("{source}_src_{counter}");
        *counter += 1;
        alias
    }
}

pub(crate) fn render_plan(plan: &QueryPlan) -> Result<SelectQuery> {
    let mut ctx = RenderContext::default();
    render_node(plan, plan.root(), &mut ctx)
}

fn render_node(plan: &QueryPlan, id: NodeId, ctx: &mut RenderContext) -> Result<SelectQuery> {
    let node = plan.node(id);
    match &node.kind {
        NodeKind::Scan(scan) => Ok(render_scan(scan, ctx)),
        NodeKind::Filter(filter) => render_filter(plan, id, filter, ctx),
        NodeKind::Join(join) => render_join(plan, id, join, ctx),
        NodeKind::Aggregate(agg) => render_aggregate(plan, id, agg, ctx),
        NodeKind::Compute(compute) => render_compute(plan, id, compute, ctx),
    }
}

/// Render `child` and wrap it as the next numbered subquery.
fn wrap_child(
    plan: &QueryPlan,
    child: NodeId,
    ctx: &mut RenderContext,
) -> Result<(TableRef, String)> {
    let query = render_node(plan, child, ctx)?;
    let alias = ctx.subquery_alias();
    Ok((TableRef::subquery(query, &alias), alias))
}

fn require(plan: &QueryPlan, node: NodeId, child: NodeId, column: &str) -> Result<()> {
    if plan.output(child).iter().any(|c| c == column) {
        return Ok(());
    }
    tracing::error!(
        node,
        child,
        column = %column,
        "plan node reads a column its input does not produce"
    );
    Err(MetriqlError::RenderContractViolation {
        node,
        column: column.to_string(),
    })
}

fn only_child(plan: &QueryPlan, id: NodeId) -> Result<NodeId> {
    plan.node(id).children.first().copied().ok_or_else(|| {
        MetriqlError::RenderContractViolation {
            node: id,
            column: String::new(),
        }
    })
}

fn passthrough_items(plan: &QueryPlan, child: NodeId, alias: &str) -> Vec<SelectItem> {
    plan.output(child)
        .iter()
        .map(|name| SelectItem {
            expr: SqlExpr::column(alias, name),
            alias: Some(name.clone()),
        })
        .collect()
}

fn render_scan(scan: &ScanNode, ctx: &mut RenderContext) -> SelectQuery {
    let alias = ctx.scan_alias(&scan.source);
    let select: Vec<SelectItem> = scan
        .columns
        .iter()
        .map(|column| {
            let base = match &column.expr {
                ElementExpr::Column(col) => SqlExpr::column(&alias, col),
                ElementExpr::Sql(sql) => SqlExpr::Raw(sql.clone()),
            };
            let expr = match column.truncate_to {
                Some(grain) => SqlExpr::DateTrunc {
                    grain,
                    expr: Box::new(base),
                },
                None => base,
            };
            SelectItem {
                expr,
                alias: Some(column.name.clone()),
            }
        })
        .collect();
    let listed: Vec<String> = scan.columns.iter().map(|c| format!("'{}'", c.name)).collect();
    SelectQuery {
        comments: vec![
            format!("Read Elements From Source '{}'", scan.source),
            format!("  [{}]", listed.join(", ")),
        ],
        select,
        from: TableRef::table(&scan.table, &alias),
        ..Default::default()
    }
}

fn render_filter(
    plan: &QueryPlan,
    id: NodeId,
    filter: &FilterNode,
    ctx: &mut RenderContext,
) -> Result<SelectQuery> {
    let child = only_child(plan, id)?;
    for predicate in &filter.predicates {
        require(plan, id, child, predicate.column())?;
    }
    let (from, alias) = wrap_child(plan, child, ctx)?;

    let mut comments = Vec::new();
    for predicate in &filter.predicates {
        if let Predicate::TimeRange { start, end, .. } = predicate {
            let comment = format!(
                "Constrain Time Range to [{}, {}]",
                start.format(RANGE_FORMAT),
                end.format(RANGE_FORMAT)
            );
            if !comments.contains(&comment) {
                comments.push(comment);
            }
        }
    }
    if filter
        .predicates
        .iter()
        .any(|p| matches!(p, Predicate::Compare { .. }))
    {
        comments.push("Constrain Output with WHERE".to_string());
    }

    let filters = filter
        .predicates
        .iter()
        .flat_map(|p| render_predicate(SqlExpr::column(&alias, p.column()), p))
        .collect();

    Ok(SelectQuery {
        comments,
        select: passthrough_items(plan, child, &alias),
        from,
        filters,
        ..Default::default()
    })
}

fn render_join(
    plan: &QueryPlan,
    id: NodeId,
    join: &JoinNode,
    ctx: &mut RenderContext,
) -> Result<SelectQuery> {
    let children = &plan.node(id).children;
    if children.len() != join.targets.len() + 1 {
        return Err(MetriqlError::RenderContractViolation {
            node: id,
            column: String::new(),
        });
    }
    for (pos, target) in join.targets.iter().enumerate() {
        let right = children[pos + 1];
        let left = children
            .get(target.left_input)
            .copied()
            .ok_or_else(|| MetriqlError::RenderContractViolation {
                node: id,
                column: target.left_column.clone(),
            })?;
        require(plan, id, left, &target.left_column)?;
        require(plan, id, right, &target.right_column)?;
        for binding in &target.columns {
            require(plan, id, right, &binding.input)?;
        }
    }

    let mut relations = Vec::with_capacity(children.len());
    for child in children {
        relations.push(wrap_child(plan, *child, ctx)?);
    }
    let aliases: Vec<String> = relations.iter().map(|(_, a)| a.clone()).collect();
    let mut relations = relations.into_iter();
    let (from, base_alias) = relations
        .next()
        .ok_or_else(|| MetriqlError::RenderContractViolation {
            node: id,
            column: String::new(),
        })?;
    let rest: Vec<(TableRef, String)> = relations.collect();

    let mut select = passthrough_items(plan, children[0], &base_alias);
    let mut joins = Vec::with_capacity(rest.len());
    for (pos, target) in join.targets.iter().enumerate() {
        let (table, right_alias) = &rest[pos];
        select.extend(target.columns.iter().map(|binding| SelectItem {
            expr: SqlExpr::column(right_alias, &binding.input),
            alias: Some(binding.output.clone()),
        }));
        joins.push(Join {
            join_type: match target.join_type {
                JoinKind::Inner => SqlJoinType::Inner,
                JoinKind::LeftOuter => SqlJoinType::LeftOuter,
            },
            table: table.clone(),
            on: vec![SqlExpr::binary(
                SqlBinaryOperator::Eq,
                SqlExpr::column(&aliases[target.left_input], &target.left_column),
                SqlExpr::column(right_alias, &target.right_column),
            )],
        });
    }

    Ok(SelectQuery {
        comments: vec!["Join Standard Outputs".to_string()],
        select,
        from,
        joins,
        ..Default::default()
    })
}

fn render_aggregate(
    plan: &QueryPlan,
    id: NodeId,
    agg: &AggregateNode,
    ctx: &mut RenderContext,
) -> Result<SelectQuery> {
    let child = only_child(plan, id)?;
    for measure in &agg.measures {
        require(plan, id, child, &measure.input)?;
    }
    for group in &agg.group_by {
        require(plan, id, child, &group.input)?;
    }
    let (from, alias) = wrap_child(plan, child, ctx)?;

    let mut select: Vec<SelectItem> = agg
        .measures
        .iter()
        .map(|m| SelectItem {
            expr: SqlExpr::Aggregate {
                agg: m.agg,
                expr: Box::new(SqlExpr::column(&alias, &m.input)),
            },
            alias: Some(m.output.clone()),
        })
        .collect();
    select.extend(agg.group_by.iter().map(|g| SelectItem {
        expr: SqlExpr::column(&alias, &g.input),
        alias: Some(g.output.clone()),
    }));
    let group_by = agg
        .group_by
        .iter()
        .map(|g| SqlExpr::column(&alias, &g.input))
        .collect();

    let comment = match agg.stage {
        AggregateStage::PreJoin => "Aggregate Measures Before Join",
        AggregateStage::Final => "Aggregate Measures",
    };
    Ok(SelectQuery {
        comments: vec![comment.to_string()],
        select,
        from,
        group_by,
        ..Default::default()
    })
}

fn render_compute(
    plan: &QueryPlan,
    id: NodeId,
    compute: &ComputeNode,
    ctx: &mut RenderContext,
) -> Result<SelectQuery> {
    let child = only_child(plan, id)?;
    for binding in &compute.passthrough {
        require(plan, id, child, &binding.input)?;
    }
    for metric in &compute.metrics {
        match &metric.expr {
            ComputeExpr::Measure(m) => require(plan, id, child, m)?,
            ComputeExpr::Ratio {
                numerator,
                denominator,
            } => {
                require(plan, id, child, numerator)?;
                require(plan, id, child, denominator)?;
            }
            ComputeExpr::Expr(expr) => {
                let mut refs = Vec::new();
                crate::expr_utils::collect_measure_refs(expr, &mut refs);
                for r in &refs {
                    require(plan, id, child, r)?;
                }
            }
        }
    }
    let (from, alias) = wrap_child(plan, child, ctx)?;

    let mut select: Vec<SelectItem> = compute
        .metrics
        .iter()
        .map(|m| SelectItem {
            expr: compute_to_sql(&m.expr, &alias),
            alias: Some(m.name.clone()),
        })
        .collect();
    select.extend(compute.passthrough.iter().map(|b| SelectItem {
        expr: SqlExpr::column(&alias, &b.input),
        alias: Some(b.output.clone()),
    }));
    let order_by = compute
        .order
        .iter()
        .map(|item| OrderItem {
            expr: SqlExpr::Column {
                table: None,
                name: item.column.clone(),
            },
            direction: item.direction,
        })
        .collect();

    Ok(SelectQuery {
        comments: vec!["Compute Metrics via Expressions".to_string()],
        select,
        from,
        order_by,
        limit: compute.limit,
        ..Default::default()
    })
}

fn compute_to_sql(expr: &ComputeExpr, alias: &str) -> SqlExpr {
    match expr {
        ComputeExpr::Measure(name) => SqlExpr::column(alias, name),
        ComputeExpr::Ratio {
            numerator,
            denominator,
        } => {
            let numerator = SqlExpr::Cast {
                expr: Box::new(SqlExpr::column(alias, numerator)),
                data_type: CastType::Double,
            };
            let guarded = SqlExpr::Function {
                name: "NULLIF".to_string(),
                args: vec![
                    SqlExpr::column(alias, denominator),
                    SqlExpr::Literal(serde_json::Value::from(0)),
                ],
            };
            let denominator = SqlExpr::Cast {
                expr: Box::new(guarded),
                data_type: CastType::Double,
            };
            SqlExpr::binary(SqlBinaryOperator::Divide, numerator, denominator)
        }
        ComputeExpr::Expr(expr) => metric_expr_to_sql(expr, alias),
    }
}

fn metric_expr_to_sql(expr: &MetricExpr, alias: &str) -> SqlExpr {
    match expr {
        MetricExpr::MeasureRef(name) => SqlExpr::column(alias, name),
        MetricExpr::Number(n) => SqlExpr::Raw(n.clone()),
        MetricExpr::Neg(inner) => SqlExpr::Neg(Box::new(metric_expr_to_sql(inner, alias))),
        MetricExpr::Binary { op, left, right } => {
            let op = match op {
                ArithOp::Add => SqlBinaryOperator::Add,
                ArithOp::Subtract => SqlBinaryOperator::Subtract,
                ArithOp::Multiply => SqlBinaryOperator::Multiply,
                ArithOp::Divide => SqlBinaryOperator::Divide,
            };
            SqlExpr::binary(
                op,
                metric_expr_to_sql(left, alias),
                metric_expr_to_sql(right, alias),
            )
        }
        MetricExpr::Func { name, args } => SqlExpr::Function {
            name: name.to_uppercase(),
            args: args.iter().map(|a| metric_expr_to_sql(a, alias)).collect(),
        },
    }
}
