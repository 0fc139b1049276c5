//! Operating-point occupancy per grid cell, for one or many logs.
//!
//! Samples inside the grid's bounding rectangle are binned to the node nearest
//! on each axis. Per-log statistics are plain sums, so they merge in any order
//! and grouping; percentages are derived only after merging.

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::align::{align_channels, AlignMode, AlignedChannelSet, AlignmentWarning};
use crate::filter::{filter_mask, FilterSkip, RangeFilter};
use crate::grid::SurfaceGrid;
use crate::source::TimeSeriesSource;
use crate::CalmapError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `100 * count / points_inside`.
    #[default]
    InsidePoints,
    /// Cell percentages rescaled to sum to exactly 100.
    InsideOnly,
    /// `100 * count / points_total`, the share of every logged point.
    AllPoints,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CellStatistics {
    /// Same shape as the grid: rows follow the Y axis.
    pub counts: Array2<u64>,
    pub points_inside: u64,
    pub points_outside: u64,
    pub points_total: u64,
    pub time_outside_s: f64,
    pub total_time_s: f64,
}

impl CellStatistics {
    pub fn empty(shape: (usize, usize)) -> Self {
        Self {
            counts: Array2::zeros(shape),
            points_inside: 0,
            points_outside: 0,
            points_total: 0,
            time_outside_s: 0.0,
            total_time_s: 0.0,
        }
    }

    pub fn for_grid(grid: &SurfaceGrid) -> Self {
        Self::empty(grid.shape())
    }

    pub fn shape(&self) -> (usize, usize) {
        self.counts.dim()
    }

    /// Cell-wise sum of another statistics block into this one.
    pub fn merge(&mut self, other: &CellStatistics) -> Result<(), CalmapError> {
        if self.shape() != other.shape() {
            return Err(CalmapError::ShapeMismatch {
                expected: self.shape(),
                got: other.shape(),
            });
        }
        self.counts += &other.counts;
        self.points_inside += other.points_inside;
        self.points_outside += other.points_outside;
        self.points_total += other.points_total;
        self.time_outside_s += other.time_outside_s;
        self.total_time_s += other.total_time_s;
        Ok(())
    }

    pub fn merged(mut self, other: &CellStatistics) -> Result<Self, CalmapError> {
        self.merge(other)?;
        Ok(self)
    }

    /// Zero denominators give all-zero percentages.
    pub fn percentages(&self, normalization: Normalization) -> Array2<f64> {
        let denominator = match normalization {
            Normalization::InsidePoints => self.points_inside,
            Normalization::InsideOnly => self.counts.sum(),
            Normalization::AllPoints => self.points_total,
        };
        if denominator == 0 {
            return Array2::zeros(self.shape());
        }
        let scale = 100.0 / denominator as f64;
        self.counts.mapv(|c| c as f64 * scale)
    }

    pub fn is_consistent(&self) -> bool {
        self.points_inside + self.points_outside == self.points_total
            && self.counts.sum() == self.points_inside
    }
}

/// Bin paired X/Y samples into the grid's cells.
///
/// Samples with `keep[k] == false` are not counted at all. Non-finite samples
/// count as outside. Each counted sample represents `sample_period_s` seconds.
pub fn accumulate(
    grid: &SurfaceGrid,
    x: &[f64],
    y: &[f64],
    keep: Option<&[bool]>,
    sample_period_s: f64,
) -> Result<CellStatistics, CalmapError> {
    if x.len() != y.len() {
        return Err(CalmapError::InvalidParameter(format!(
            "x has {} samples but y has {}",
            x.len(),
            y.len()
        )));
    }
    if let Some(keep) = keep {
        if keep.len() != x.len() {
            return Err(CalmapError::InvalidParameter(format!(
                "mask has {} entries for {} samples",
                keep.len(),
                x.len()
            )));
        }
    }

    let mut stats = CellStatistics::for_grid(grid);
    for (k, (&xv, &yv)) in x.iter().zip(y).enumerate() {
        if keep.is_some_and(|m| !m[k]) {
            continue;
        }
        stats.points_total += 1;
        if xv.is_finite() && yv.is_finite() && grid.contains(xv, yv) {
            stats.points_inside += 1;
            stats.counts[[grid.nearest_y_index(yv), grid.nearest_x_index(xv)]] += 1;
        } else {
            stats.points_outside += 1;
        }
    }
    stats.time_outside_s = stats.points_outside as f64 * sample_period_s;
    stats.total_time_s = stats.points_total as f64 * sample_period_s;
    Ok(stats)
}

/// Bin two channels of an aligned set, after applying range filters.
pub fn accumulate_aligned(
    grid: &SurfaceGrid,
    set: &AlignedChannelSet,
    x_channel: &str,
    y_channel: &str,
    filters: &[RangeFilter],
) -> Result<(CellStatistics, Vec<FilterSkip>), CalmapError> {
    let channel = |name: &str| {
        set.samples(name).ok_or_else(|| CalmapError::ChannelNotFound {
            channel: name.to_string(),
            source_id: "aligned channel set".to_string(),
        })
    };
    let x = channel(x_channel)?;
    let y = channel(y_channel)?;
    let mask = filter_mask(set, filters);
    let stats = accumulate(grid, x, y, Some(&mask.keep), set.sample_period_s())?;
    Ok((stats, mask.skipped))
}

/// Sum of statistics blocks of the given shape.
pub fn aggregate<'a>(
    shape: (usize, usize),
    stats: impl IntoIterator<Item = &'a CellStatistics>,
) -> Result<CellStatistics, CalmapError> {
    stats
        .into_iter()
        .try_fold(CellStatistics::empty(shape), |acc, s| acc.merged(s))
}

/// One grid cell of a flattened usage matrix, row-major.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageCell {
    pub row: usize,
    pub col: usize,
    pub x: f64,
    pub y: f64,
    pub count: u64,
    pub percent: f64,
}

pub fn flatten_percentages(
    grid: &SurfaceGrid,
    stats: &CellStatistics,
    normalization: Normalization,
) -> Result<Vec<UsageCell>, CalmapError> {
    if stats.shape() != grid.shape() {
        return Err(CalmapError::ShapeMismatch {
            expected: grid.shape(),
            got: stats.shape(),
        });
    }
    let percent = stats.percentages(normalization);
    Ok(stats
        .counts
        .indexed_iter()
        .map(|((row, col), &count)| UsageCell {
            row,
            col,
            x: grid.x_axis()[col],
            y: grid.y_axis()[row],
            count,
            percent: percent[[row, col]],
        })
        .collect())
}

/// Which channels of a log describe the operating point, and how to align them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperatingPointRequest {
    pub x_channel: String,
    pub y_channel: String,
    pub raster_s: f64,
    #[serde(default)]
    pub align_mode: AlignMode,
    #[serde(default)]
    pub filters: Vec<RangeFilter>,
}

pub(crate) struct OperatingPoints {
    pub set: AlignedChannelSet,
    pub keep: Vec<bool>,
    pub skipped: Vec<FilterSkip>,
}

/// Align the request's channels (plus `extra`) and evaluate its filters.
/// Filters on channels the source lacks are skipped.
pub(crate) fn operating_points<S>(
    source: &S,
    request: &OperatingPointRequest,
    extra: &[&str],
) -> Result<OperatingPoints, CalmapError>
where
    S: TimeSeriesSource + ?Sized,
{
    let mut names: Vec<&str> = vec![request.x_channel.as_str(), request.y_channel.as_str()];
    names.extend_from_slice(extra);
    let mut skipped = Vec::new();
    let mut applicable = Vec::new();
    for filter in &request.filters {
        if source.contains(&filter.channel) {
            if !names.contains(&filter.channel.as_str()) {
                names.push(filter.channel.as_str());
            }
            applicable.push(filter.clone());
        } else {
            warn!(
                source = source.id(),
                channel = %filter.channel,
                "filter channel missing, skipped"
            );
            skipped.push(FilterSkip {
                channel: filter.channel.clone(),
                reason: format!("channel not found in {}", source.id()),
            });
        }
    }

    let set = align_channels(source, &names, request.raster_s, request.align_mode)?;
    let mask = filter_mask(&set, &applicable);
    skipped.extend(mask.skipped);
    Ok(OperatingPoints {
        set,
        keep: mask.keep,
        skipped,
    })
}

#[derive(Clone, Debug)]
pub struct SourceUsage {
    pub source_id: String,
    pub statistics: CellStatistics,
    pub warnings: Vec<AlignmentWarning>,
    pub skipped_filters: Vec<FilterSkip>,
}

/// Occupancy statistics of one log; errors carry the log's id.
pub fn usage_for_source<S>(
    grid: &SurfaceGrid,
    source: &S,
    request: &OperatingPointRequest,
) -> Result<SourceUsage, CalmapError>
where
    S: TimeSeriesSource + ?Sized,
{
    let run = || -> Result<SourceUsage, CalmapError> {
        let points = operating_points(source, request, &[])?;
        let x = points.set.samples(&request.x_channel).unwrap_or_default();
        let y = points.set.samples(&request.y_channel).unwrap_or_default();
        let statistics = accumulate(grid, x, y, Some(&points.keep), points.set.sample_period_s())?;
        debug!(
            source = source.id(),
            inside = statistics.points_inside,
            outside = statistics.points_outside,
            "usage accumulated"
        );
        Ok(SourceUsage {
            source_id: source.id().to_string(),
            statistics,
            warnings: points.set.warnings().to_vec(),
            skipped_filters: points.skipped,
        })
    };
    run().map_err(|e| e.in_source(source.id()))
}

#[derive(Debug)]
pub struct SourceFailure {
    pub source_id: String,
    pub error: CalmapError,
}

#[derive(Debug)]
pub struct UsageBatch {
    /// Sum over every source that succeeded.
    pub total: CellStatistics,
    pub per_source: Vec<SourceUsage>,
    pub failures: Vec<SourceFailure>,
}

/// Per-log statistics in parallel, summed in input order. A failing log is
/// reported and contributes nothing.
pub fn aggregate_sources<S>(
    grid: &SurfaceGrid,
    sources: &[S],
    request: &OperatingPointRequest,
) -> Result<UsageBatch, CalmapError>
where
    S: TimeSeriesSource + Sync,
{
    let results: Vec<(String, Result<SourceUsage, CalmapError>)> = sources
        .par_iter()
        .map(|s| (s.id().to_string(), usage_for_source(grid, s, request)))
        .collect();

    let mut total = CellStatistics::for_grid(grid);
    let mut per_source = Vec::new();
    let mut failures = Vec::new();
    for (source_id, result) in results {
        match result {
            Ok(usage) => {
                total.merge(&usage.statistics)?;
                per_source.push(usage);
            }
            Err(error) => {
                warn!(source = %source_id, %error, "log skipped");
                failures.push(SourceFailure { source_id, error });
            }
        }
    }
    info!(
        sources = per_source.len(),
        failed = failures.len(),
        inside = total.points_inside,
        outside = total.points_outside,
        "usage aggregated"
    );
    Ok(UsageBatch {
        total,
        per_source,
        failures,
    })
}
