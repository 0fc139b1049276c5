//! Surface-table modeling and vehicle-log resampling engine.
//!
//! Builds dense grids from scattered calibration samples, evaluates them at
//! logged operating points, aligns independently sampled channels onto a
//! shared raster and accumulates per-cell usage statistics across logs.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod align;
pub mod calc;
pub mod compare;
pub mod evaluate;
pub mod filter;
pub mod grid;
pub mod source;
pub mod surface;
pub mod table;
pub mod usage;

pub use align::{
    align_at, align_channels, analyze_channels, analyze_sampling, recommend_raster, resample_hold,
    resample_linear, uniform_timestamps, AlignMode, AlignedChannelSet, AlignmentWarning,
    ChannelAnalysis, SamplingStats, TimeSeries,
};
pub use calc::{calculate_channel, grid_fingerprint, CalculatedChannel, ChannelMapping, TimeBase};
pub use compare::{compare_surfaces, difference, DiffMode};
pub use evaluate::{evaluate, evaluate_points, evaluate_series, Evaluation};
pub use filter::{
    filter_mask, matched_duration, FilterCondition, FilterMask, FilterSkip, RangeFilter,
};
pub use grid::{
    build_grid, build_grid_with_diagnostics, linspace, resample_grid, AxisSpec, BuildDiagnostics,
    GridBuild, GridSpec, SurfaceGrid,
};
pub use source::{
    open_log, parse_log, ChannelLog, DelimitedLog, DelimitedTiming, LogSource, NativeInterpolation,
    TimeSeriesSource,
};
pub use surface::{accumulate_sources, SurfaceAccumulator, SurfaceBatch};
pub use table::{
    read_columns, read_surface_table, read_surface_table_path, SurfacePoint, SurfaceTable,
    TableColumns,
};
pub use usage::{
    accumulate, accumulate_aligned, aggregate, aggregate_sources, flatten_percentages,
    usage_for_source, CellStatistics, Normalization, OperatingPointRequest, SourceFailure,
    SourceUsage, UsageBatch, UsageCell,
};

/// Raster used when no channel timing is available to recommend one.
pub const DEFAULT_RASTER_S: f64 = 0.001;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => f.write_str("X"),
            Axis::Y => f.write_str("Y"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CalmapError {
    #[error("no valid data points found in surface table")]
    NoValidData,
    #[error("{axis} axis needs at least 2 distinct values, got {got}")]
    InsufficientAxis { axis: Axis, got: usize },
    #[error("duplicate point ({x}, {y}) has inconsistent values {first} and {second}")]
    InconsistentDuplicate {
        x: f64,
        y: f64,
        first: f64,
        second: f64,
    },
    #[error("column '{0}' not found")]
    MissingColumn(String),
    #[error("invalid {axis} axis: {reason}")]
    InvalidAxis { axis: Axis, reason: String },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("channel '{channel}' not found in {source_id}")]
    ChannelNotFound { channel: String, source_id: String },
    #[error("channel '{channel}' has {got} samples, need at least 2")]
    EmptyChannel { channel: String, got: usize },
    #[error("invalid time series: {0}")]
    InvalidTimeSeries(String),
    #[error(
        "channel '{channel}' resampled to {channel_len} samples while '{reference}' has {reference_len}"
    )]
    AlignmentLengthMismatch {
        channel: String,
        channel_len: usize,
        reference: String,
        reference_len: usize,
    },
    #[error("channels {channels:?} share no common time span")]
    NoCommonTimeBase { channels: Vec<String> },
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error("unsupported log format: {0}")]
    UnsupportedFormat(String),
    #[error("{source_id}: {cause}")]
    Source {
        source_id: String,
        #[source]
        cause: Box<CalmapError>,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CalmapError {
    /// Attach the identifier of the file (or other unit of work) that failed.
    pub fn in_source(self, source_id: impl Into<String>) -> Self {
        match self {
            CalmapError::Source { .. } => self,
            other => CalmapError::Source {
                source_id: source_id.into(),
                cause: Box::new(other),
            },
        }
    }

    /// The underlying error with any source context peeled off.
    pub fn root(&self) -> &CalmapError {
        match self {
            CalmapError::Source { cause, .. } => cause.root(),
            other => other,
        }
    }
}

/// Resolved processing choices supplied by the calling application.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    pub grid: GridSpec,
    pub raster_s: Option<f64>,
    pub align_mode: AlignMode,
    pub normalization: Normalization,
    pub filters: Vec<RangeFilter>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            grid: GridSpec::default(),
            raster_s: None,
            align_mode: AlignMode::TruncateToShortest,
            normalization: Normalization::InsidePoints,
            filters: Vec::new(),
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), CalmapError> {
        if let Some(raster) = self.raster_s {
            align::check_raster(raster)?;
        }
        self.grid.validate()?;
        for filter in &self.filters {
            filter.validate()?;
        }
        Ok(())
    }

    /// Explicit raster if set, else the slowest channel's safe floor, else
    /// [`DEFAULT_RASTER_S`].
    pub fn resolve_raster<'a>(&self, stats: impl IntoIterator<Item = &'a SamplingStats>) -> f64 {
        self.raster_s
            .or_else(|| recommend_raster(stats))
            .unwrap_or(DEFAULT_RASTER_S)
    }
}
