// Unit-style tests for request parsing, metric expressions and per-dialect output.
mod dialect_output;
mod metric_expressions;
mod request_json;
