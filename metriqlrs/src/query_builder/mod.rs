use serde::Serialize;

use crate::dialect::Dialect;
use crate::error::Result;
use crate::graph::SemanticGraph;
use crate::request::QueryRequest;
use crate::sql_ast::SqlRenderer;

mod filters;
mod grain;
mod joins;
mod measures;
mod plan;
mod planner;
mod render;
mod resolve;

pub use plan::{
    AggregateMeasure, AggregateNode, AggregateStage, ColumnBinding, ComputeExpr, ComputeNode,
    ComputedMetric, FilterNode, JoinKind, JoinNode, JoinTarget, NodeId, NodeKind, PlanNode,
    Predicate, QueryPlan, ScanColumn, ScanNode,
};
pub use resolve::ColumnKind;

/// A result column of a compiled query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputColumn {
    pub name: String,
    pub kind: ColumnKind,
}

/// SQL text plus what it returns and the plan it was rendered from.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub columns: Vec<OutputColumn>,
    pub plan: QueryPlan,
}

impl CompiledQuery {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Compiles requests against a semantic graph into SQL for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct SqlBuilder {
    comments: bool,
    indent: usize,
}

impl Default for SqlBuilder {
    fn default() -> Self {
        Self {
            comments: true,
            indent: 2,
        }
    }
}

impl SqlBuilder {
    pub fn with_comments(mut self, comments: bool) -> Self {
        self.comments = comments;
        self
    }

    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    /// Build SQL text only.
    pub fn build_with_dialect(
        &self,
        graph: &SemanticGraph,
        request: &QueryRequest,
        dialect: &dyn Dialect,
    ) -> Result<String> {
        Ok(self.compile(graph, request, dialect)?.sql)
    }

    /// Plan a request without rendering it.
    pub fn plan(&self, graph: &SemanticGraph, request: &QueryRequest) -> Result<QueryPlan> {
        let resolved = resolve::resolve(graph, request)?;
        planner::build_plan(&resolved)
    }

    pub fn compile(
        &self,
        graph: &SemanticGraph,
        request: &QueryRequest,
        dialect: &dyn Dialect,
    ) -> Result<CompiledQuery> {
        let resolved = resolve::resolve(graph, request)?;
        let plan = planner::build_plan(&resolved)?;

        let columns: Vec<OutputColumn> = resolved
            .metrics
            .iter()
            .map(|m| OutputColumn {
                name: m.name.clone(),
                kind: ColumnKind::Metric,
            })
            .chain(resolved.dimensions.iter().map(|d| OutputColumn {
                name: d.output.clone(),
                kind: d.kind,
            }))
            .collect();

        let query = render::render_plan(&plan)?;
        let sql = SqlRenderer::new(dialect)
            .with_indent(self.indent)
            .with_comments(self.comments)
            .render_select(&query);

        tracing::debug!(
            dialect = dialect.name(),
            columns = columns.len(),
            shape = %plan.shape(),
            "rendered query"
        );
        tracing::trace!(sql = %sql, "emitted sql");
        Ok(CompiledQuery { sql, columns, plan })
    }
}
