//! Query request model: what the caller asked for, before resolution.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{MetriqlError, Result};
use crate::models::TimeGrain;

/// Separator between entity path segments, dimension name and grain.
pub const QUALIFIER_SEP: &str = "__";

const DATE_FORMAT: &str = "%Y-%m-%d";
const TS_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryRequest {
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<DimensionRef>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub filters: Vec<ValueFilter>,
    #[serde(default)]
    pub order: Vec<OrderItem>,
    pub limit: Option<u64>,
}

impl QueryRequest {
    pub fn new(metrics: &[&str], dimensions: &[&str]) -> Result<Self> {
        let dimensions = dimensions
            .iter()
            .map(|d| d.parse())
            .collect::<Result<Vec<DimensionRef>>>()?;
        Ok(QueryRequest {
            metrics: metrics.iter().map(|m| m.to_string()).collect(),
            dimensions,
            ..Default::default()
        })
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn with_filter(mut self, filter: ValueFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_order(mut self, column: &str, direction: SortDirection) -> Self {
        self.order.push(OrderItem {
            column: column.to_string(),
            direction,
        });
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Reference to a dimension or entity as written in a request.
///
/// `country_latest` is bare; `listing__country_latest` is qualified by the
/// entity path `[listing]`. Either form may end in a time grain
/// (`ds__month`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DimensionRef {
    Bare {
        name: String,
        grain: Option<TimeGrain>,
    },
    Qualified {
        path: Vec<String>,
        name: String,
        grain: Option<TimeGrain>,
    },
}

impl DimensionRef {
    pub fn bare(name: &str) -> Self {
        DimensionRef::Bare {
            name: name.to_string(),
            grain: None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DimensionRef::Bare { name, .. } | DimensionRef::Qualified { name, .. } => name,
        }
    }

    pub fn path(&self) -> &[String] {
        match self {
            DimensionRef::Bare { .. } => &[],
            DimensionRef::Qualified { path, .. } => path,
        }
    }

    pub fn grain(&self) -> Option<TimeGrain> {
        match self {
            DimensionRef::Bare { grain, .. } | DimensionRef::Qualified { grain, .. } => *grain,
        }
    }
}

impl std::str::FromStr for DimensionRef {
    type Err = MetriqlError;

    fn from_str(s: &str) -> Result<Self> {
        let mut segments: Vec<&str> = s.split(QUALIFIER_SEP).collect();
        if segments.iter().any(|seg| seg.is_empty()) {
            return Err(MetriqlError::unknown(
                crate::error::IdentifierKind::Dimension,
                s,
            ));
        }
        let mut grain = None;
        if segments.len() > 1 {
            if let Some(Ok(g)) = segments.last().map(|last| last.parse::<TimeGrain>()) {
                grain = Some(g);
                segments.pop();
            }
        }
        let name = segments.pop().unwrap_or_default().to_string();
        if segments.is_empty() {
            Ok(DimensionRef::Bare { name, grain })
        } else {
            Ok(DimensionRef::Qualified {
                path: segments.into_iter().map(str::to_string).collect(),
                name,
                grain,
            })
        }
    }
}

impl TryFrom<String> for DimensionRef {
    type Error = MetriqlError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DimensionRef> for String {
    fn from(value: DimensionRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DimensionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in self.path() {
            write!(f, "{segment}{QUALIFIER_SEP}")?;
        }
        f.write_str(self.name())?;
        if let Some(grain) = self.grain() {
            write!(f, "{QUALIFIER_SEP}{grain}")?;
        }
        Ok(())
    }
}

/// Inclusive time range constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeRange {
    #[serde(with = "time_bound")]
    pub start: NaiveDateTime,
    #[serde(with = "time_bound")]
    pub end: NaiveDateTime,
    /// Grain the bounds are expressed at; defaults to day.
    #[serde(default)]
    pub grain: Option<TimeGrain>,
}

impl TimeRange {
    /// Parse bounds written as `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM:SS`.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Ok(TimeRange {
            start: parse_time_bound(start)?,
            end: parse_time_bound(end)?,
            grain: None,
        })
    }

    pub fn with_grain(mut self, grain: TimeGrain) -> Self {
        self.grain = Some(grain);
        self
    }

    pub fn effective_grain(&self) -> TimeGrain {
        self.grain.unwrap_or(TimeGrain::Day)
    }
}

pub fn parse_time_bound(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    for fmt in TS_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(ts);
        }
    }
    Err(MetriqlError::InvalidTimeRange(format!(
        "cannot parse '{s}' as a date or timestamp"
    )))
}

mod time_bound {
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format("%Y-%m-%dT%H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_time_bound(&raw).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueFilter {
    pub field: DimensionRef,
    pub op: FilterOp,
    pub value: serde_json::Value,
}

impl ValueFilter {
    pub fn new(field: &str, op: FilterOp, value: serde_json::Value) -> Result<Self> {
        Ok(ValueFilter {
            field: field.parse()?,
            op,
            value,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Like,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}
