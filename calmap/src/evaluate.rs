//! Point evaluation of a [`SurfaceGrid`].
//!
//! Inside the grid's bounding rectangle values are bilinear in the enclosing
//! cell. Outside it the nearest node is returned, looked up independently per
//! axis, so the surface is extended flat rather than extrapolated.

use rayon::prelude::*;

use crate::grid::SurfaceGrid;
use crate::CalmapError;

/// Z at `(x, y)`, or `None` when no valid node value can be reached.
pub fn evaluate(grid: &SurfaceGrid, x: f64, y: f64) -> Option<f64> {
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    if !grid.contains(x, y) {
        return nearest_node(grid, x, y);
    }

    let xs = grid.x_axis();
    let ys = grid.y_axis();
    let j = cell_index(xs, x);
    let i = cell_index(ys, y);
    let (x1, x2) = (xs[j], xs[j + 1]);
    let (y1, y2) = (ys[i], ys[i + 1]);

    // (x1, y1), (x1, y2), (x2, y1), (x2, y2)
    let corners = [
        (x1, y1, grid.value(i, j)),
        (x1, y2, grid.value(i + 1, j)),
        (x2, y1, grid.value(i, j + 1)),
        (x2, y2, grid.value(i + 1, j + 1)),
    ];
    let [(_, _, Some(q11)), (_, _, Some(q12)), (_, _, Some(q21)), (_, _, Some(q22))] = corners
    else {
        return nearest_valid_corner(&corners, x, y);
    };

    let wx1 = (x2 - x) / (x2 - x1);
    let wx2 = (x - x1) / (x2 - x1);
    let wy1 = (y2 - y) / (y2 - y1);
    let wy2 = (y - y1) / (y2 - y1);
    let r1 = wx1 * q11 + wx2 * q21;
    let r2 = wx1 * q12 + wx2 * q22;
    let z = wy1 * r1 + wy2 * r2;

    let lo = q11.min(q12).min(q21).min(q22);
    let hi = q11.max(q12).max(q21).max(q22);
    Some(z.clamp(lo, hi))
}

/// Largest index with `axis[k] <= v`, clamped to a valid cell.
fn cell_index(axis: &[f64], v: f64) -> usize {
    axis.partition_point(|a| *a <= v)
        .saturating_sub(1)
        .min(axis.len() - 2)
}

/// Valid corner closest to the query in raw axis units; ties keep corner order.
fn nearest_valid_corner(corners: &[(f64, f64, Option<f64>); 4], x: f64, y: f64) -> Option<f64> {
    corners
        .iter()
        .filter_map(|&(cx, cy, z)| z.map(|z| ((cx - x).powi(2) + (cy - y).powi(2), z)))
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, z)| z)
}

fn nearest_node(grid: &SurfaceGrid, x: f64, y: f64) -> Option<f64> {
    let cols = nearest_candidates(grid.x_axis(), x);
    let rows = nearest_candidates(grid.y_axis(), y);
    let mut sum = 0.0;
    let mut n = 0usize;
    for i in rows.iter().flatten() {
        for j in cols.iter().flatten() {
            if let Some(z) = grid.value(*i, *j) {
                sum += z;
                n += 1;
            }
        }
    }
    (n > 0).then(|| sum / n as f64)
}

/// Nearest axis index, plus the other index when `v` is exactly halfway.
fn nearest_candidates(axis: &[f64], v: f64) -> [Option<usize>; 2] {
    let upper = axis.partition_point(|a| *a < v);
    if upper == 0 {
        return [Some(0), None];
    }
    if upper >= axis.len() {
        return [Some(axis.len() - 1), None];
    }
    let below = v - axis[upper - 1];
    let above = axis[upper] - v;
    if above < below {
        [Some(upper), None]
    } else if below < above {
        [Some(upper - 1), None]
    } else {
        [Some(upper - 1), Some(upper)]
    }
}

/// Values of a batch evaluation with a per-point validity flag.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub values: Vec<Option<f64>>,
    pub valid_points: usize,
}

impl Evaluation {
    fn from_values(values: Vec<Option<f64>>) -> Self {
        let valid_points = values.iter().filter(|v| v.is_some()).count();
        Self {
            values,
            valid_points,
        }
    }

    pub fn validity(&self) -> Vec<bool> {
        self.values.iter().map(Option::is_some).collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub fn evaluate_points(grid: &SurfaceGrid, points: &[(f64, f64)]) -> Evaluation {
    let values = points
        .par_iter()
        .map(|&(x, y)| evaluate(grid, x, y))
        .collect();
    Evaluation::from_values(values)
}

/// Evaluate paired X and Y sample sequences, e.g. two aligned channels.
pub fn evaluate_series(
    grid: &SurfaceGrid,
    x: &[f64],
    y: &[f64],
) -> Result<Evaluation, CalmapError> {
    if x.len() != y.len() {
        return Err(CalmapError::InvalidParameter(format!(
            "x has {} samples but y has {}",
            x.len(),
            y.len()
        )));
    }
    let values = x
        .par_iter()
        .zip(y.par_iter())
        .map(|(&x, &y)| evaluate(grid, x, y))
        .collect();
    Ok(Evaluation::from_values(values))
}
