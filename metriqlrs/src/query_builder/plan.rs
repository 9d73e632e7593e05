//! Query plan intermediate representation.
//!
//! The plan separates what the query computes from how it is written out:
//! the planner decides stages and column flow, the renderer turns each node
//! into a nested SELECT. Nodes live in an arena and refer to each other by
//! index; the plan is never mutated once built.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::expr_parser::MetricExpr;
use crate::models::{Aggregation, ElementExpr, TimeGrain};
use crate::request::{FilterOp, OrderItem};

pub type NodeId = usize;

#[derive(Debug, Clone, Serialize)]
pub struct QueryPlan {
    nodes: Vec<PlanNode>,
    root: NodeId,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    /// Column names this node exposes to its parent, in select order.
    pub output: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Scan(ScanNode),
    Filter(FilterNode),
    Join(JoinNode),
    Aggregate(AggregateNode),
    Compute(ComputeNode),
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Scan(_) => "Scan",
            NodeKind::Filter(_) => "Filter",
            NodeKind::Join(_) => "Join",
            NodeKind::Aggregate(_) => "Aggregate",
            NodeKind::Compute(_) => "Compute",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanNode {
    pub source: String,
    pub table: String,
    pub columns: Vec<ScanColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanColumn {
    pub name: String,
    pub expr: ElementExpr,
    /// Truncate the value to this grain.
    pub truncate_to: Option<TimeGrain>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterNode {
    pub predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Inclusive on both ends.
    TimeRange {
        column: String,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    Compare {
        column: String,
        op: FilterOp,
        value: serde_json::Value,
    },
}

impl Predicate {
    pub fn column(&self) -> &str {
        match self {
            Predicate::TimeRange { column, .. } | Predicate::Compare { column, .. } => column,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

/// Input column `input` exposed as `output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnBinding {
    pub input: String,
    pub output: String,
}

impl ColumnBinding {
    pub fn same(name: &str) -> Self {
        ColumnBinding {
            input: name.to_string(),
            output: name.to_string(),
        }
    }
}

/// Joins `children[1..]` onto `children[0]`.
#[derive(Debug, Clone, Serialize)]
pub struct JoinNode {
    /// One entry per joined child, in child order starting at `children[1]`.
    pub targets: Vec<JoinTarget>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinTarget {
    pub join_type: JoinKind,
    /// Position in `children` of the relation holding the left key.
    pub left_input: usize,
    pub left_column: String,
    pub right_column: String,
    pub columns: Vec<ColumnBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStage {
    PreJoin,
    Final,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateNode {
    pub stage: AggregateStage,
    pub measures: Vec<AggregateMeasure>,
    pub group_by: Vec<ColumnBinding>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateMeasure {
    pub input: String,
    pub output: String,
    pub agg: Aggregation,
}

/// Post-aggregation expression for one metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeExpr {
    Measure(String),
    /// Safe division as a floating point value.
    Ratio {
        numerator: String,
        denominator: String,
    },
    Expr(MetricExpr),
}

#[derive(Debug, Clone, Serialize)]
pub struct ComputedMetric {
    pub name: String,
    pub expr: ComputeExpr,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComputeNode {
    pub metrics: Vec<ComputedMetric>,
    pub passthrough: Vec<ColumnBinding>,
    pub order: Vec<OrderItem>,
    pub limit: Option<u64>,
}

impl ComputeNode {
    /// Every output already exists under its own name in the input, and
    /// nothing is sorted or cut.
    pub fn is_passthrough(&self) -> bool {
        self.order.is_empty()
            && self.limit.is_none()
            && self
                .metrics
                .iter()
                .all(|m| matches!(&m.expr, ComputeExpr::Measure(measure) if *measure == m.name))
            && self.passthrough.iter().all(|b| b.input == b.output)
    }
}

impl Default for QueryPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryPlan {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: 0,
        }
    }

    /// Append a node, adopting `children`. The last node added becomes the root.
    pub fn add(&mut self, kind: NodeKind, children: Vec<NodeId>, output: Vec<String>) -> NodeId {
        let id = self.nodes.len();
        for child in &children {
            if let Some(node) = self.nodes.get_mut(*child) {
                node.parent = Some(id);
            }
        }
        self.nodes.push(PlanNode {
            id,
            kind,
            children,
            parent: None,
            output,
        });
        self.root = id;
        id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &PlanNode {
        &self.nodes[id]
    }

    pub fn output(&self, id: NodeId) -> &[String] {
        &self.nodes[id].output
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    /// Node ids in post-order from the root (children before parents).
    pub fn post_order(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        if !self.nodes.is_empty() {
            self.visit(self.root, &mut out);
        }
        out
    }

    fn visit(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for child in &self.nodes[id].children {
            self.visit(*child, out);
        }
        out.push(id);
    }

    pub fn count(&self, label: &str) -> usize {
        self.nodes.iter().filter(|n| n.kind.label() == label).count()
    }

    /// Compact textual shape, e.g. `Compute(Aggregate(Join(Scan, Scan)))`.
    pub fn shape(&self) -> String {
        if self.nodes.is_empty() {
            return String::new();
        }
        self.shape_of(self.root)
    }

    fn shape_of(&self, id: NodeId) -> String {
        let node = &self.nodes[id];
        if node.children.is_empty() {
            return node.kind.label().to_string();
        }
        let inner: Vec<String> = node.children.iter().map(|c| self.shape_of(*c)).collect();
        format!("{}({})", node.kind.label(), inner.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(source: &str) -> NodeKind {
        NodeKind::Scan(ScanNode {
            source: source.to_string(),
            table: format!("demo.{source}"),
            columns: Vec::new(),
        })
    }

    #[test]
    fn add_links_parents_and_tracks_root() {
        let mut plan = QueryPlan::new();
        let a = plan.add(scan("a"), vec![], vec!["x".to_string()]);
        let b = plan.add(scan("b"), vec![], vec!["y".to_string()]);
        let join = plan.add(
            NodeKind::Join(JoinNode { targets: vec![] }),
            vec![a, b],
            vec!["x".to_string(), "y".to_string()],
        );
        assert_eq!(plan.root(), join);
        assert_eq!(plan.node(a).parent, Some(join));
        assert_eq!(plan.post_order(), vec![a, b, join]);
        assert_eq!(plan.shape(), "Join(Scan, Scan)");
        assert_eq!(plan.count("Scan"), 2);
    }

    #[test]
    fn passthrough_compute_detection() {
        let mut node = ComputeNode {
            metrics: vec![],
            passthrough: vec![ColumnBinding::same("ds")],
            order: vec![],
            limit: None,
        };
        assert!(node.is_passthrough());
        node.metrics.push(ComputedMetric {
            name: "bookings".to_string(),
            expr: ComputeExpr::Measure("bookings".to_string()),
        });
        assert!(node.is_passthrough());
        node.limit = Some(5);
        assert!(!node.is_passthrough());
        node.limit = None;
        node.metrics.push(ComputedMetric {
            name: "total_value".to_string(),
            expr: ComputeExpr::Measure("booking_value".to_string()),
        });
        assert!(!node.is_passthrough());
    }
}
