//! Metric expansion and measure aggregation rules.

use crate::error::{IdentifierKind, MetriqlError, Result};
use crate::expr_parser::parse_metric_expr;
use crate::expr_utils::{collect_measure_refs, push_unique};
use crate::graph::SemanticGraph;
use crate::models::{Aggregation, Metric, MetricType};

use super::plan::ComputeExpr;

/// A metric reduced to the measures it reads and the expression computed
/// over their aggregated values.
#[derive(Debug, Clone)]
pub(crate) struct ExpandedMetric {
    pub name: String,
    pub measures: Vec<String>,
    pub compute: ComputeExpr,
}

pub(crate) fn expand_metric(graph: &SemanticGraph, metric: &Metric) -> Result<ExpandedMetric> {
    let invalid = |reason: &str| MetriqlError::InvalidMetricExpression {
        metric: metric.name.clone(),
        reason: reason.to_string(),
    };
    let params = &metric.type_params;
    let (measures, compute) = match metric.metric_type {
        MetricType::MeasureProxy => {
            let measure = params
                .measure
                .clone()
                .or_else(|| match params.measures.as_slice() {
                    [only] => Some(only.clone()),
                    _ => None,
                })
                .ok_or_else(|| invalid("measure_proxy metric needs exactly one measure"))?;
            (vec![measure.clone()], ComputeExpr::Measure(measure))
        }
        MetricType::Ratio => {
            let numerator = params
                .numerator
                .clone()
                .ok_or_else(|| invalid("ratio metric needs a numerator"))?;
            let denominator = params
                .denominator
                .clone()
                .ok_or_else(|| invalid("ratio metric needs a denominator"))?;
            let mut measures = Vec::new();
            push_unique(&mut measures, &numerator);
            push_unique(&mut measures, &denominator);
            (
                measures,
                ComputeExpr::Ratio {
                    numerator,
                    denominator,
                },
            )
        }
        MetricType::Expr => {
            let text = params
                .expr
                .as_deref()
                .ok_or_else(|| invalid("expr metric needs an expression"))?;
            let expr = parse_metric_expr(text).map_err(|reason| invalid(reason.as_str()))?;
            let mut refs = Vec::new();
            collect_measure_refs(&expr, &mut refs);
            if refs.is_empty() {
                return Err(invalid("expression references no measures"));
            }
            let measures = if params.measures.is_empty() {
                refs
            } else {
                if let Some(missing) = refs.iter().find(|r| !params.measures.contains(r)) {
                    let reason = format!("'{missing}' is not listed in the metric's measures");
                    return Err(invalid(reason.as_str()));
                }
                params.measures.clone()
            };
            (measures, ComputeExpr::Expr(expr))
        }
    };

    for measure in &measures {
        if graph.measure_owner(measure).is_none() {
            return Err(MetriqlError::unknown(IdentifierKind::Measure, measure));
        }
    }

    Ok(ExpandedMetric {
        name: metric.name.clone(),
        measures,
        compute,
    })
}

/// Aggregation applied by the final aggregate for a measure.
pub(crate) fn final_aggregation(
    measure: &str,
    agg: Aggregation,
    pre_aggregated: bool,
) -> Result<Aggregation> {
    if !pre_aggregated {
        return Ok(agg);
    }
    agg.reaggregation()
        .ok_or_else(|| MetriqlError::NonAdditiveMeasure {
            measure: measure.to_string(),
            agg: agg.as_str().to_string(),
        })
}
