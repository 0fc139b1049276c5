//! Range filters over aligned channels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::align::{AlignedChannelSet, TimeSeries};
use crate::CalmapError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterCondition {
    WithinRange,
    OutsideRange,
}

impl FilterCondition {
    /// NaN never matches either condition.
    pub fn matches(self, value: f64, min: f64, max: f64) -> bool {
        match self {
            FilterCondition::WithinRange => value >= min && value <= max,
            FilterCondition::OutsideRange => value < min || value > max,
        }
    }
}

impl FromStr for FilterCondition {
    type Err = CalmapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "within" | "within_range" | "in" => Ok(FilterCondition::WithinRange),
            "outside" | "outside_range" | "out" => Ok(FilterCondition::OutsideRange),
            _ => Err(CalmapError::InvalidParameter(format!(
                "unknown filter condition '{s}'"
            ))),
        }
    }
}

impl fmt::Display for FilterCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterCondition::WithinRange => f.write_str("within"),
            FilterCondition::OutsideRange => f.write_str("outside"),
        }
    }
}

/// Keep samples whose `channel` value is within (or outside) `[min, max]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeFilter {
    pub channel: String,
    pub condition: FilterCondition,
    pub min: f64,
    pub max: f64,
}

impl RangeFilter {
    pub fn new(channel: impl Into<String>, condition: FilterCondition, min: f64, max: f64) -> Self {
        Self {
            channel: channel.into(),
            condition,
            min,
            max,
        }
    }

    pub fn validate(&self) -> Result<(), CalmapError> {
        if self.channel.trim().is_empty() {
            return Err(CalmapError::InvalidParameter(
                "filter channel name is empty".to_string(),
            ));
        }
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(CalmapError::InvalidParameter(format!(
                "filter on '{}' has invalid range [{}, {}]",
                self.channel, self.min, self.max
            )));
        }
        Ok(())
    }

    pub fn matches(&self, value: f64) -> bool {
        self.condition.matches(value, self.min, self.max)
    }
}

/// Parses `channel:condition:min:max`; the channel name may itself contain `:`.
impl FromStr for RangeFilter {
    type Err = CalmapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            CalmapError::InvalidParameter(format!(
                "filter '{s}' is not of the form channel:within|outside:min:max"
            ))
        };
        let mut parts = s.rsplitn(4, ':');
        let max = parts.next().ok_or_else(invalid)?;
        let min = parts.next().ok_or_else(invalid)?;
        let condition = parts.next().ok_or_else(invalid)?;
        let channel = parts.next().ok_or_else(invalid)?;
        let filter = RangeFilter {
            channel: channel.trim().to_string(),
            condition: condition.parse()?,
            min: min.trim().parse().map_err(|_| invalid())?,
            max: max.trim().parse().map_err(|_| invalid())?,
        };
        filter.validate()?;
        Ok(filter)
    }
}

/// A filter that could not be applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterSkip {
    pub channel: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FilterMask {
    pub keep: Vec<bool>,
    pub skipped: Vec<FilterSkip>,
}

impl FilterMask {
    pub fn kept(&self) -> usize {
        self.keep.iter().filter(|k| **k).count()
    }
}

/// AND of all applicable filters. Invalid filters and filters on channels
/// missing from the set are skipped and reported.
pub fn filter_mask(set: &AlignedChannelSet, filters: &[RangeFilter]) -> FilterMask {
    let mut keep = vec![true; set.len()];
    let mut skipped = Vec::new();
    for filter in filters {
        if let Err(err) = filter.validate() {
            warn!(channel = %filter.channel, %err, "filter skipped");
            skipped.push(FilterSkip {
                channel: filter.channel.clone(),
                reason: err.to_string(),
            });
            continue;
        }
        let Some(samples) = set.samples(&filter.channel) else {
            warn!(channel = %filter.channel, "filter channel not available, skipped");
            skipped.push(FilterSkip {
                channel: filter.channel.clone(),
                reason: "channel not available".to_string(),
            });
            continue;
        };
        for (k, v) in keep.iter_mut().zip(samples) {
            *k = *k && filter.matches(*v);
        }
    }
    FilterMask { keep, skipped }
}

/// Time a filter keeps on a native channel: matched samples times the first
/// sampling step (or `fallback_step` for a single sample).
pub fn matched_duration(series: &TimeSeries, filter: &RangeFilter, fallback_step: f64) -> f64 {
    let ts = series.timestamps();
    let step = if ts.len() > 1 { ts[1] - ts[0] } else { fallback_step };
    let matched = series.samples().iter().filter(|v| filter.matches(**v)).count();
    matched as f64 * step
}
