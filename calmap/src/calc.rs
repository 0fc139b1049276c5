//! Calculated channels: a surface evaluated along a log's operating points.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::align::{align_at, align_channels, AlignMode, AlignmentWarning};
use crate::evaluate::evaluate_series;
use crate::grid::SurfaceGrid;
use crate::source::TimeSeriesSource;
use crate::CalmapError;

/// Maps the X and Y roles of a surface onto log channels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMapping {
    pub name: String,
    pub x_channel: String,
    pub y_channel: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TimeBase {
    /// Uniform raster in seconds, aligned with the given mode.
    Raster { raster_s: f64, mode: AlignMode },
    /// Explicit ascending timestamps.
    Timestamps(Vec<f64>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CalculatedChannel {
    pub name: String,
    pub unit: String,
    pub timestamps: Vec<f64>,
    pub values: Vec<Option<f64>>,
    pub valid_points: usize,
    pub description: String,
    /// SHA-256 of the surface the values were evaluated on.
    pub surface_fingerprint: String,
    pub warnings: Vec<AlignmentWarning>,
}

impl CalculatedChannel {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub fn calculate_channel<S>(
    grid: &SurfaceGrid,
    source: &S,
    mapping: &ChannelMapping,
    time_base: &TimeBase,
) -> Result<CalculatedChannel, CalmapError>
where
    S: TimeSeriesSource + ?Sized,
{
    let run = || -> Result<CalculatedChannel, CalmapError> {
        let names = [mapping.x_channel.as_str(), mapping.y_channel.as_str()];
        let set = match time_base {
            TimeBase::Raster { raster_s, mode } => {
                align_channels(source, &names, *raster_s, *mode)?
            }
            TimeBase::Timestamps(timestamps) => align_at(source, &names, timestamps)?,
        };
        let x = set.samples(&mapping.x_channel).unwrap_or_default();
        let y = set.samples(&mapping.y_channel).unwrap_or_default();
        let evaluation = evaluate_series(grid, x, y)?;

        let origin = format!(
            "surface evaluated at '{}' (X) and '{}' (Y)",
            mapping.x_channel, mapping.y_channel
        );
        let description = if mapping.comment.trim().is_empty() {
            origin
        } else {
            format!("{}; {origin}", mapping.comment.trim())
        };
        debug!(
            channel = %mapping.name,
            samples = evaluation.len(),
            valid = evaluation.valid_points,
            "calculated channel"
        );
        Ok(CalculatedChannel {
            name: mapping.name.clone(),
            unit: mapping.unit.clone(),
            timestamps: set.timestamps().to_vec(),
            valid_points: evaluation.valid_points,
            values: evaluation.values,
            description,
            surface_fingerprint: grid_fingerprint(grid),
            warnings: set.warnings().to_vec(),
        })
    };
    run().map_err(|e| e.in_source(source.id()))
}

/// SHA-256 over the axes and node values of a grid, hex encoded.
pub fn grid_fingerprint(grid: &SurfaceGrid) -> String {
    let mut hasher = Sha256::new();
    for axis in [grid.x_axis(), grid.y_axis()] {
        hasher.update((axis.len() as u64).to_le_bytes());
        for v in axis {
            hasher.update(v.to_le_bytes());
        }
    }
    for node in grid.values() {
        match node {
            Some(v) => {
                hasher.update([1u8]);
                hasher.update(v.to_le_bytes());
            }
            None => hasher.update([0u8]),
        }
    }
    sha256_hex(&hasher.finalize())
}

fn sha256_hex(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
