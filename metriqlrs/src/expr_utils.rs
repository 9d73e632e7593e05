//! Expression utility functions.
//!
//! Shared helpers for traversing metric expressions and classifying raw SQL.

use crate::expr_parser::MetricExpr;

/// Recursively collect measure references from an expression, in first-seen
/// order and without duplicates.
pub fn collect_measure_refs(expr: &MetricExpr, out: &mut Vec<String>) {
    match expr {
        MetricExpr::MeasureRef(name) => push_unique(out, name),
        MetricExpr::Func { args, .. } => args.iter().for_each(|a| collect_measure_refs(a, out)),
        MetricExpr::Binary { left, right, .. } => {
            collect_measure_refs(left, out);
            collect_measure_refs(right, out);
        }
        MetricExpr::Neg(inner) => collect_measure_refs(inner, out),
        MetricExpr::Number(_) => {}
    }
}

/// Append `name` unless already present.
pub fn push_unique(out: &mut Vec<String>, name: &str) {
    if !out.iter().any(|n| n == name) {
        out.push(name.to_string());
    }
}

/// True for a plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
