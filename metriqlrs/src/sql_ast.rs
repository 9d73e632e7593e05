use chrono::NaiveDateTime;
use serde_json::Value;

use crate::dialect::Dialect;
use crate::models::{Aggregation, TimeGrain};
use crate::request::SortDirection;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Column {
        table: Option<String>,
        name: String,
    },
    Literal(Value),
    /// SQL text emitted verbatim.
    Raw(String),
    TimestampLiteral(NaiveDateTime),
    Function {
        name: String,
        args: Vec<SqlExpr>,
    },
    BinaryOp {
        op: SqlBinaryOperator,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    Neg(Box<SqlExpr>),
    Aggregate {
        agg: Aggregation,
        expr: Box<SqlExpr>,
    },
    Cast {
        expr: Box<SqlExpr>,
        data_type: CastType,
    },
    DateTrunc {
        grain: TimeGrain,
        expr: Box<SqlExpr>,
    },
    InList {
        expr: Box<SqlExpr>,
        list: Vec<SqlExpr>,
        negated: bool,
    },
}

impl SqlExpr {
    pub fn column(table: &str, name: &str) -> Self {
        SqlExpr::Column {
            table: Some(table.to_string()),
            name: name.to_string(),
        }
    }

    pub fn binary(op: SqlBinaryOperator, left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

/// Dialect-resolved cast targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastType {
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlBinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    And,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
}

impl SqlBinaryOperator {
    fn as_sql(self) -> &'static str {
        match self {
            SqlBinaryOperator::Add => "+",
            SqlBinaryOperator::Subtract => "-",
            SqlBinaryOperator::Multiply => "*",
            SqlBinaryOperator::Divide => "/",
            SqlBinaryOperator::And => "AND",
            SqlBinaryOperator::Eq => "=",
            SqlBinaryOperator::Neq => "!=",
            SqlBinaryOperator::Gt => ">",
            SqlBinaryOperator::Gte => ">=",
            SqlBinaryOperator::Lt => "<",
            SqlBinaryOperator::Lte => "<=",
            SqlBinaryOperator::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: SqlExpr,
    pub alias: Option<String>,
}

/// A relation in FROM/JOIN position: either a named table or a nested query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
    pub subquery: Option<Box<SelectQuery>>,
}

impl TableRef {
    pub fn table(name: &str, alias: &str) -> Self {
        TableRef {
            name: name.to_string(),
            alias: Some(alias.to_string()),
            subquery: None,
        }
    }

    pub fn subquery(query: SelectQuery, alias: &str) -> Self {
        TableRef {
            name: String::new(),
            alias: Some(alias.to_string()),
            subquery: Some(Box::new(query)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlJoinType {
    Inner,
    LeftOuter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: SqlJoinType,
    pub table: TableRef,
    pub on: Vec<SqlExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: SqlExpr,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectQuery {
    /// Comment lines emitted above the SELECT.
    pub comments: Vec<String>,
    pub select: Vec<SelectItem>,
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub filters: Vec<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<u64>,
}

/// Renders a [`SelectQuery`] as indented, multi-line SQL with nested
/// subqueries and optional stage comments.
pub struct SqlRenderer<'d> {
    dialect: &'d dyn Dialect,
    indent: usize,
    comments: bool,
}

impl<'d> SqlRenderer<'d> {
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        Self {
            dialect,
            indent: 2,
            comments: true,
        }
    }

    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    pub fn with_comments(mut self, comments: bool) -> Self {
        self.comments = comments;
        self
    }

    pub fn render_select(&self, query: &SelectQuery) -> String {
        let mut lines = Vec::new();
        self.write_select(query, 0, &mut lines);
        lines.join("\n")
    }

    fn pad(&self, depth: usize) -> String {
        " ".repeat(self.indent * depth)
    }

    fn write_select(&self, query: &SelectQuery, depth: usize, out: &mut Vec<String>) {
        let pad = self.pad(depth);
        let inner = self.pad(depth + 1);

        if self.comments {
            for comment in &query.comments {
                out.push(format!("{pad}-- {comment}"));
            }
        }

        out.push(format!("{pad}SELECT"));
        for (idx, item) in query.select.iter().enumerate() {
            let sep = if idx == 0 { "" } else { ", " };
            out.push(format!("{inner}{sep}{}", self.render_select_item(item)));
        }

        self.write_relation("FROM", &query.from, depth, out);

        for join in &query.joins {
            let keyword = match join.join_type {
                SqlJoinType::Inner => "INNER JOIN",
                SqlJoinType::LeftOuter => "LEFT OUTER JOIN",
            };
            self.write_relation(keyword, &join.table, depth, out);
            out.push(format!("{pad}ON"));
            for (idx, cond) in join.on.iter().enumerate() {
                let sep = if idx == 0 { "" } else { "AND " };
                out.push(format!("{inner}{sep}{}", self.render_top(cond)));
            }
        }

        if !query.filters.is_empty() {
            out.push(format!("{pad}WHERE"));
            for (idx, filter) in query.filters.iter().enumerate() {
                let sep = if idx == 0 { "" } else { "AND " };
                out.push(format!("{inner}{sep}{}", self.render_top(filter)));
            }
        }

        if !query.group_by.is_empty() {
            out.push(format!("{pad}GROUP BY"));
            for (idx, group) in query.group_by.iter().enumerate() {
                let sep = if idx == 0 { "" } else { ", " };
                out.push(format!("{inner}{sep}{}", self.render_expr(group)));
            }
        }

        if !query.order_by.is_empty() {
            out.push(format!("{pad}ORDER BY"));
            for (idx, order) in query.order_by.iter().enumerate() {
                let sep = if idx == 0 { "" } else { ", " };
                let dir = match order.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                out.push(format!("{inner}{sep}{} {dir}", self.render_expr(&order.expr)));
            }
        }

        if let Some(limit) = query.limit {
            out.push(format!("{pad}LIMIT {limit}"));
        }
    }

    fn write_relation(&self, keyword: &str, table: &TableRef, depth: usize, out: &mut Vec<String>) {
        let pad = self.pad(depth);
        let alias = table
            .alias
            .as_deref()
            .map(|a| format!(" {}", self.dialect.quote_ident(a)))
            .unwrap_or_default();
        match &table.subquery {
            Some(sub) => {
                out.push(format!("{pad}{keyword} ("));
                self.write_select(sub, depth + 1, out);
                out.push(format!("{pad}){alias}"));
            }
            None => out.push(format!(
                "{pad}{keyword} {}{alias}",
                self.dialect.qualify_table(&table.name)
            )),
        }
    }

    fn render_select_item(&self, item: &SelectItem) -> String {
        let expr_sql = self.render_top(&item.expr);
        match (&item.alias, &item.expr) {
            (Some(alias), SqlExpr::Column { name, .. }) if alias == name => expr_sql,
            (Some(alias), _) => format!("{expr_sql} AS {}", self.dialect.quote_ident(alias)),
            (None, _) => expr_sql,
        }
    }

    /// Render without wrapping a top-level binary operation in parentheses.
    fn render_top(&self, expr: &SqlExpr) -> String {
        match expr {
            SqlExpr::BinaryOp { op, left, right } => format!(
                "{} {} {}",
                self.render_expr(left),
                op.as_sql(),
                self.render_expr(right)
            ),
            other => self.render_expr(other),
        }
    }

    pub fn render_expr(&self, expr: &SqlExpr) -> String {
        match expr {
            SqlExpr::Column { table, name } => match table {
                Some(t) => format!(
                    "{}.{}",
                    self.dialect.quote_ident(t),
                    self.dialect.quote_ident(name)
                ),
                None => self.dialect.quote_ident(name),
            },
            SqlExpr::Literal(v) => self.dialect.render_literal(v),
            SqlExpr::Raw(sql) => sql.clone(),
            SqlExpr::TimestampLiteral(ts) => self.dialect.render_timestamp_literal(ts),
            SqlExpr::Function { name, args } => {
                let rendered: Vec<String> = args.iter().map(|a| self.render_expr(a)).collect();
                format!("{name}({})", rendered.join(", "))
            }
            SqlExpr::BinaryOp { op, left, right } => format!(
                "({} {} {})",
                self.render_expr(left),
                op.as_sql(),
                self.render_expr(right)
            ),
            SqlExpr::Neg(inner) => {
                let rendered = self.render_expr(inner);
                // `--` would start a line comment.
                if rendered.starts_with('-') {
                    format!("-({rendered})")
                } else {
                    format!("-{rendered}")
                }
            }
            SqlExpr::Aggregate { agg, expr } => self
                .dialect
                .render_aggregation(*agg, &self.render_expr(expr)),
            SqlExpr::Cast { expr, data_type } => {
                let ty = match data_type {
                    CastType::Double => self.dialect.double_type(),
                };
                self.dialect.render_cast(&self.render_expr(expr), ty)
            }
            SqlExpr::DateTrunc { grain, expr } => self
                .dialect
                .render_date_trunc(*grain, &self.render_expr(expr)),
            SqlExpr::InList {
                expr,
                list,
                negated,
            } => {
                let rendered_values: Vec<String> =
                    list.iter().map(|v| self.render_expr(v)).collect();
                let not_kw = if *negated { "NOT " } else { "" };
                format!(
                    "{} {}IN ({})",
                    self.render_expr(expr),
                    not_kw,
                    rendered_values.join(", ")
                )
            }
        }
    }
}
