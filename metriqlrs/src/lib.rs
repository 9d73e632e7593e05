//! Compiles metric queries against a semantic model into SQL.
//!
//! A [`QueryRequest`] names metrics and dimensions; the [`SqlBuilder`]
//! resolves them on a [`SemanticGraph`], builds a [`QueryPlan`] and renders
//! it as nested SELECT statements for a [`Dialect`].

pub mod cache;
pub mod config;
pub mod dialect;
pub mod error;
pub mod expr_parser;
pub mod expr_utils;
pub mod graph;
pub mod models;
pub mod query_builder;
pub mod request;
pub mod runtime;
pub mod sql_ast;

pub use cache::PlanCache;
pub use config::MetriqlConfig;
pub use dialect::{Dialect, DialectKind};
pub use error::{MetriqlError, Result};
pub use graph::SemanticGraph;
pub use models::{Metric, Source, TimeGrain};
pub use query_builder::{ColumnKind, CompiledQuery, OutputColumn, QueryPlan, SqlBuilder};
pub use request::{DimensionRef, FilterOp, QueryRequest, SortDirection, TimeRange, ValueFilter};
pub use runtime::MetriqlRuntime;
