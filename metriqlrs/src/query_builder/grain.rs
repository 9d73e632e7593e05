//! Time grain rules for requested dimensions and time range constraints.

use crate::error::{MetriqlError, Result};
use crate::models::{Dimension, TimeGrain};
use crate::request::TimeRange;

/// Validate a grain requested on a dimension reference (`ds__month`).
///
/// Returns the grain to truncate to, or `None` when the column is read as-is
/// (no grain requested, or the requested grain equals the native one).
pub(crate) fn requested_truncation(
    name: &str,
    dimension: Option<&Dimension>,
    requested: Option<TimeGrain>,
) -> Result<Option<TimeGrain>> {
    let Some(requested) = requested else {
        return Ok(None);
    };
    let dimension = match dimension {
        Some(d) if d.is_time() => d,
        _ => {
            return Err(MetriqlError::InvalidGranularity {
                dimension: name.to_string(),
                requested: requested.to_string(),
                native: "none (not a time dimension)".to_string(),
            })
        }
    };
    let native = dimension.native_grain();
    match requested.cmp(&native) {
        std::cmp::Ordering::Less => Err(MetriqlError::InvalidGranularity {
            dimension: name.to_string(),
            requested: requested.to_string(),
            native: native.to_string(),
        }),
        std::cmp::Ordering::Equal => Ok(None),
        std::cmp::Ordering::Greater => Ok(Some(requested)),
    }
}

/// A range expressed at a grain finer than the dimension it constrains
/// cannot be applied faithfully.
pub(crate) fn check_range_grain(range: &TimeRange, name: &str, dimension: &Dimension) -> Result<()> {
    let range_grain = range.effective_grain();
    let native = dimension.native_grain();
    if range_grain < native {
        return Err(MetriqlError::InvalidTimeRange(format!(
            "range grain {range_grain} is finer than grain {native} of time dimension {name}"
        )));
    }
    Ok(())
}

pub(crate) fn check_range_order(range: &TimeRange) -> Result<()> {
    if range.start > range.end {
        return Err(MetriqlError::InvalidTimeRange(format!(
            "start {} is after end {}",
            range.start, range.end
        )));
    }
    Ok(())
}
