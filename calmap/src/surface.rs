//! Averaged surfaces measured from logs.
//!
//! Samples are binned by cell boundary (the largest axis value not above the
//! sample) rather than by nearest node, and each cell averages its Z samples.

use ndarray::Array2;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::grid::{check_axis, SurfaceGrid};
use crate::source::TimeSeriesSource;
use crate::usage::{operating_points, OperatingPointRequest, SourceFailure};
use crate::{Axis, CalmapError};

#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceAccumulator {
    x_axis: Vec<f64>,
    y_axis: Vec<f64>,
    z_sum: Array2<f64>,
    counts: Array2<u64>,
    pub points: u64,
    pub points_rejected: u64,
}

impl SurfaceAccumulator {
    pub fn new(x_axis: Vec<f64>, y_axis: Vec<f64>) -> Result<Self, CalmapError> {
        check_axis(Axis::X, &x_axis)?;
        check_axis(Axis::Y, &y_axis)?;
        let shape = (y_axis.len(), x_axis.len());
        Ok(Self {
            x_axis,
            y_axis,
            z_sum: Array2::zeros(shape),
            counts: Array2::zeros(shape),
            points: 0,
            points_rejected: 0,
        })
    }

    /// An empty accumulator on the axes of an existing grid.
    pub fn matching(grid: &SurfaceGrid) -> Self {
        Self {
            x_axis: grid.x_axis().to_vec(),
            y_axis: grid.y_axis().to_vec(),
            z_sum: Array2::zeros(grid.shape()),
            counts: Array2::zeros(grid.shape()),
            points: 0,
            points_rejected: 0,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.counts.dim()
    }

    pub fn counts(&self) -> &Array2<u64> {
        &self.counts
    }

    /// Returns whether the sample was binned.
    pub fn add(&mut self, x: f64, y: f64, z: f64) -> bool {
        let inside = x.is_finite()
            && y.is_finite()
            && z.is_finite()
            && x >= self.x_axis[0]
            && x <= self.x_axis[self.x_axis.len() - 1]
            && y >= self.y_axis[0]
            && y <= self.y_axis[self.y_axis.len() - 1];
        if !inside {
            self.points_rejected += 1;
            return false;
        }
        let cell = [bin_index(&self.y_axis, y), bin_index(&self.x_axis, x)];
        self.z_sum[cell] += z;
        self.counts[cell] += 1;
        self.points += 1;
        true
    }

    pub fn add_series(
        &mut self,
        x: &[f64],
        y: &[f64],
        z: &[f64],
        keep: Option<&[bool]>,
    ) -> Result<(), CalmapError> {
        if x.len() != y.len() || x.len() != z.len() || keep.is_some_and(|k| k.len() != x.len()) {
            return Err(CalmapError::InvalidParameter(
                "x, y, z and mask lengths differ".to_string(),
            ));
        }
        for k in 0..x.len() {
            if keep.map_or(true, |m| m[k]) {
                self.add(x[k], y[k], z[k]);
            }
        }
        Ok(())
    }

    pub fn merge(&mut self, other: &SurfaceAccumulator) -> Result<(), CalmapError> {
        if self.shape() != other.shape() {
            return Err(CalmapError::ShapeMismatch {
                expected: self.shape(),
                got: other.shape(),
            });
        }
        if self.x_axis != other.x_axis || self.y_axis != other.y_axis {
            return Err(CalmapError::InvalidParameter(
                "accumulators use different axes".to_string(),
            ));
        }
        self.z_sum += &other.z_sum;
        self.counts += &other.counts;
        self.points += other.points;
        self.points_rejected += other.points_rejected;
        Ok(())
    }

    /// Mean Z per cell; cells without samples are missing.
    pub fn averaged(&self) -> Result<SurfaceGrid, CalmapError> {
        let mut z = Array2::from_elem(self.shape(), None);
        for ((cell, sum), count) in self.z_sum.indexed_iter().zip(self.counts.iter()) {
            if *count > 0 {
                z[cell] = Some(sum / *count as f64);
            }
        }
        SurfaceGrid::new(self.x_axis.clone(), self.y_axis.clone(), z)
    }
}

/// Largest index with `axis[k] <= v`, clamped to the axis.
fn bin_index(axis: &[f64], v: f64) -> usize {
    axis.partition_point(|a| *a <= v)
        .saturating_sub(1)
        .min(axis.len() - 1)
}

#[derive(Debug)]
pub struct SurfaceBatch {
    pub surface: SurfaceAccumulator,
    pub sources: Vec<String>,
    pub failures: Vec<SourceFailure>,
}

/// Average `z_channel` over the operating points of many logs in parallel.
pub fn accumulate_sources<S>(
    x_axis: &[f64],
    y_axis: &[f64],
    sources: &[S],
    request: &OperatingPointRequest,
    z_channel: &str,
) -> Result<SurfaceBatch, CalmapError>
where
    S: TimeSeriesSource + Sync,
{
    let mut surface = SurfaceAccumulator::new(x_axis.to_vec(), y_axis.to_vec())?;
    let results: Vec<(String, Result<SurfaceAccumulator, CalmapError>)> = sources
        .par_iter()
        .map(|source| {
            let result = source_surface(x_axis, y_axis, source, request, z_channel)
                .map_err(|e| e.in_source(source.id()));
            (source.id().to_string(), result)
        })
        .collect();

    let mut ok = Vec::new();
    let mut failures = Vec::new();
    for (source_id, result) in results {
        match result {
            Ok(acc) => {
                surface.merge(&acc)?;
                ok.push(source_id);
            }
            Err(error) => {
                warn!(source = %source_id, %error, "log skipped");
                failures.push(SourceFailure { source_id, error });
            }
        }
    }
    info!(
        sources = ok.len(),
        failed = failures.len(),
        points = surface.points,
        "surface accumulated"
    );
    Ok(SurfaceBatch {
        surface,
        sources: ok,
        failures,
    })
}

fn source_surface<S>(
    x_axis: &[f64],
    y_axis: &[f64],
    source: &S,
    request: &OperatingPointRequest,
    z_channel: &str,
) -> Result<SurfaceAccumulator, CalmapError>
where
    S: TimeSeriesSource + ?Sized,
{
    let points = operating_points(source, request, &[z_channel])?;
    let samples = |name: &str| points.set.samples(name).unwrap_or_default();
    let mut acc = SurfaceAccumulator::new(x_axis.to_vec(), y_axis.to_vec())?;
    acc.add_series(
        samples(&request.x_channel),
        samples(&request.y_channel),
        samples(z_channel),
        Some(&points.keep),
    )?;
    Ok(acc)
}
