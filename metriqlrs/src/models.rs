use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::expr_utils::is_identifier;

/// A named table or view along with the semantic elements it exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Source {
    pub name: String,
    /// Fully qualified relation name, e.g. `demo.fct_bookings`.
    pub table: String,
    /// Physical columns available on the relation. Empty means "not declared";
    /// column checks are skipped in that case.
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub entities: BTreeMap<String, Entity>,
    #[serde(default)]
    pub measures: BTreeMap<String, Measure>,
    #[serde(default)]
    pub dimensions: BTreeMap<String, Dimension>,
    pub description: Option<String>,
}

impl Source {
    /// Time dimension flagged `is_primary`, falling back to the only time dimension.
    pub fn primary_time_dimension(&self) -> Option<(&str, &Dimension)> {
        let time_dims: Vec<(&String, &Dimension)> = self
            .dimensions
            .iter()
            .filter(|(_, d)| d.is_time())
            .collect();
        if let Some((name, dim)) = time_dims.iter().find(|(_, d)| d.is_primary) {
            return Some((name.as_str(), dim));
        }
        match time_dims.as_slice() {
            [(name, dim)] => Some((name.as_str(), dim)),
            _ => None,
        }
    }

    /// Aggregation time dimension of a measure on this source.
    pub fn agg_time_dimension(&self, measure: &str) -> Option<(&str, &Dimension)> {
        let m = self.measures.get(measure)?;
        match &m.agg_time_dimension {
            Some(name) => self
                .dimensions
                .get_key_value(name)
                .map(|(k, d)| (k.as_str(), d)),
            None => self.primary_time_dimension(),
        }
    }

    /// True when the source declares `entity` as primary or unique.
    pub fn is_unique_on(&self, entity: &str) -> bool {
        self.entities
            .get(entity)
            .map(|e| e.entity_type.is_unique())
            .unwrap_or(false)
    }

    pub fn has_element(&self, name: &str) -> bool {
        self.dimensions.contains_key(name)
            || self.entities.contains_key(name)
            || self.measures.contains_key(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Primary,
    Unique,
    Foreign,
}

impl EntityType {
    pub fn is_unique(self) -> bool {
        matches!(self, EntityType::Primary | EntityType::Unique)
    }
}

/// A join key exposed by a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// Column or SQL expression; defaults to the entity name.
    pub expr: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Measure {
    pub agg: Aggregation,
    pub expr: Option<String>,
    /// Time dimension this measure is constrained on; the source's primary
    /// time dimension when unset.
    pub agg_time_dimension: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionType {
    #[default]
    Categorical,
    Time,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dimension {
    #[serde(rename = "type", default)]
    pub dimension_type: DimensionType,
    pub expr: Option<String>,
    /// Native grain of a time dimension. Defaults to day.
    pub time_grain: Option<TimeGrain>,
    #[serde(default)]
    pub is_primary: bool,
    pub description: Option<String>,
}

impl Dimension {
    pub fn is_time(&self) -> bool {
        self.dimension_type == DimensionType::Time
    }

    pub fn native_grain(&self) -> TimeGrain {
        self.time_grain.unwrap_or(TimeGrain::Day)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Count,
    CountDistinct,
    Min,
    Max,
    Average,
    SumBoolean,
}

impl Aggregation {
    /// Aggregation that combines partial results of `self`, if one exists.
    pub fn reaggregation(self) -> Option<Aggregation> {
        match self {
            Aggregation::Sum | Aggregation::Count | Aggregation::SumBoolean => {
                Some(Aggregation::Sum)
            }
            Aggregation::Min => Some(Aggregation::Min),
            Aggregation::Max => Some(Aggregation::Max),
            Aggregation::CountDistinct | Aggregation::Average => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Count => "count",
            Aggregation::CountDistinct => "count_distinct",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Average => "average",
            Aggregation::SumBoolean => "sum_boolean",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGrain {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGrain {
    pub const ALL: [TimeGrain; 5] = [
        TimeGrain::Day,
        TimeGrain::Week,
        TimeGrain::Month,
        TimeGrain::Quarter,
        TimeGrain::Year,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TimeGrain::Day => "day",
            TimeGrain::Week => "week",
            TimeGrain::Month => "month",
            TimeGrain::Quarter => "quarter",
            TimeGrain::Year => "year",
        }
    }

    fn rank(self) -> u8 {
        match self {
            TimeGrain::Day => 0,
            TimeGrain::Week => 1,
            TimeGrain::Month => 2,
            TimeGrain::Quarter => 3,
            TimeGrain::Year => 4,
        }
    }
}

// Finer grains order first.
impl PartialOrd for TimeGrain {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeGrain {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for TimeGrain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeGrain {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeGrain::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == s)
            .ok_or(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    MeasureProxy,
    Ratio,
    Expr,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricTypeParams {
    pub measure: Option<String>,
    pub numerator: Option<String>,
    pub denominator: Option<String>,
    pub expr: Option<String>,
    /// Measures an `expr` metric reads; inferred from the expression when empty.
    #[serde(default)]
    pub measures: Vec<String>,
}

/// A named computation over aggregated measures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metric {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    #[serde(default)]
    pub type_params: MetricTypeParams,
    pub description: Option<String>,
}

impl Metric {
    pub fn measure_proxy(name: &str, measure: &str) -> Self {
        Metric {
            name: name.to_string(),
            metric_type: MetricType::MeasureProxy,
            type_params: MetricTypeParams {
                measure: Some(measure.to_string()),
                ..Default::default()
            },
            description: None,
        }
    }

    pub fn ratio(name: &str, numerator: &str, denominator: &str) -> Self {
        Metric {
            name: name.to_string(),
            metric_type: MetricType::Ratio,
            type_params: MetricTypeParams {
                numerator: Some(numerator.to_string()),
                denominator: Some(denominator.to_string()),
                ..Default::default()
            },
            description: None,
        }
    }

    pub fn expr(name: &str, expr: &str) -> Self {
        Metric {
            name: name.to_string(),
            metric_type: MetricType::Expr,
            type_params: MetricTypeParams {
                expr: Some(expr.to_string()),
                ..Default::default()
            },
            description: None,
        }
    }
}

/// How a source element is read from its relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ElementExpr {
    /// A physical column of the relation.
    Column(String),
    /// Raw SQL emitted verbatim (constants, CASE expressions, ...).
    Sql(String),
}

impl ElementExpr {
    pub fn for_element(name: &str, expr: Option<&str>) -> Self {
        match expr.map(str::trim) {
            None => ElementExpr::Column(name.to_string()),
            Some(e) if is_identifier(e) => ElementExpr::Column(e.to_string()),
            Some(e) => ElementExpr::Sql(e.to_string()),
        }
    }
}
