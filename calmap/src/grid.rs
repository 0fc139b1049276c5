//! Dense surface grids built from scattered calibration samples.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::Array2;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use spade::{DelaunayTriangulation, FloatTriangulation, HasPosition, Point2, Triangulation};
use tracing::{debug, warn};

use crate::table::SurfacePoint;
use crate::{Axis, CalmapError};

/// How the values of one grid axis are chosen.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AxisSpec {
    /// The distinct sample values, sorted.
    #[default]
    Native,
    /// `intervals + 1` evenly spaced values from `min` to `max`.
    Linspace { min: f64, max: f64, intervals: usize },
}

impl AxisSpec {
    pub fn validate(&self, axis: Axis) -> Result<(), CalmapError> {
        match *self {
            AxisSpec::Native => Ok(()),
            AxisSpec::Linspace { min, max, intervals } => {
                linspace(axis, min, max, intervals).map(|_| ())
            }
        }
    }

    fn resolve(&self, axis: Axis, distinct: &[f64]) -> Result<Vec<f64>, CalmapError> {
        match *self {
            AxisSpec::Native => {
                if distinct.len() < 2 {
                    return Err(CalmapError::InsufficientAxis {
                        axis,
                        got: distinct.len(),
                    });
                }
                Ok(distinct.to_vec())
            }
            AxisSpec::Linspace { min, max, intervals } => linspace(axis, min, max, intervals),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpec {
    pub x: AxisSpec,
    pub y: AxisSpec,
}

impl GridSpec {
    pub fn validate(&self) -> Result<(), CalmapError> {
        self.x.validate(Axis::X)?;
        self.y.validate(Axis::Y)
    }
}

/// Evenly spaced axis values; the last value is exactly `max`.
pub fn linspace(axis: Axis, min: f64, max: f64, intervals: usize) -> Result<Vec<f64>, CalmapError> {
    if !min.is_finite() || !max.is_finite() {
        return Err(CalmapError::InvalidAxis {
            axis,
            reason: format!("bounds must be finite, got [{min}, {max}]"),
        });
    }
    if min >= max {
        return Err(CalmapError::InvalidAxis {
            axis,
            reason: format!("min {min} must be below max {max}"),
        });
    }
    if intervals == 0 {
        return Err(CalmapError::InvalidAxis {
            axis,
            reason: "at least one interval is required".to_string(),
        });
    }
    let step = (max - min) / intervals as f64;
    let mut values: Vec<f64> = (0..=intervals).map(|k| min + step * k as f64).collect();
    values[intervals] = max;
    check_axis(axis, &values)?;
    Ok(values)
}

pub(crate) fn check_axis(axis: Axis, values: &[f64]) -> Result<(), CalmapError> {
    if values.len() < 2 {
        return Err(CalmapError::InsufficientAxis {
            axis,
            got: values.len(),
        });
    }
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(CalmapError::InvalidAxis {
            axis,
            reason: format!("non-finite value {bad}"),
        });
    }
    if let Some(w) = values.windows(2).find(|w| w[1] <= w[0]) {
        return Err(CalmapError::InvalidAxis {
            axis,
            reason: format!("values must be strictly increasing, got {} then {}", w[0], w[1]),
        });
    }
    Ok(())
}

/// Rectangular grid of Z values; `z[[i, j]]` belongs to `(x_axis[j], y_axis[i])`.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceGrid {
    x_axis: Vec<f64>,
    y_axis: Vec<f64>,
    z: Array2<Option<f64>>,
}

impl SurfaceGrid {
    /// Validate an externally supplied grid. Non-finite node values become missing.
    pub fn new(
        x_axis: Vec<f64>,
        y_axis: Vec<f64>,
        z: Array2<Option<f64>>,
    ) -> Result<Self, CalmapError> {
        check_axis(Axis::X, &x_axis)?;
        check_axis(Axis::Y, &y_axis)?;
        let expected = (y_axis.len(), x_axis.len());
        if z.dim() != expected {
            return Err(CalmapError::ShapeMismatch {
                expected,
                got: z.dim(),
            });
        }
        let z = z.mapv(|v| v.filter(|v| v.is_finite()));
        Ok(Self { x_axis, y_axis, z })
    }

    pub fn x_axis(&self) -> &[f64] {
        &self.x_axis
    }

    pub fn y_axis(&self) -> &[f64] {
        &self.y_axis
    }

    pub fn values(&self) -> &Array2<Option<f64>> {
        &self.z
    }

    /// `(rows, cols)` = `(len(y_axis), len(x_axis))`.
    pub fn shape(&self) -> (usize, usize) {
        self.z.dim()
    }

    pub fn value(&self, i: usize, j: usize) -> Option<f64> {
        self.z.get((i, j)).copied().flatten()
    }

    pub fn x_bounds(&self) -> (f64, f64) {
        (self.x_axis[0], self.x_axis[self.x_axis.len() - 1])
    }

    pub fn y_bounds(&self) -> (f64, f64) {
        (self.y_axis[0], self.y_axis[self.y_axis.len() - 1])
    }

    /// Inclusive bounding-rectangle test.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let (x0, x1) = self.x_bounds();
        let (y0, y1) = self.y_bounds();
        x >= x0 && x <= x1 && y >= y0 && y <= y1
    }

    pub fn nearest_x_index(&self, x: f64) -> usize {
        nearest_index(&self.x_axis, x)
    }

    pub fn nearest_y_index(&self, y: f64) -> usize {
        nearest_index(&self.y_axis, y)
    }

    /// Copy of the grid with one node replaced.
    pub fn with_value(&self, i: usize, j: usize, value: Option<f64>) -> Result<Self, CalmapError> {
        let (rows, cols) = self.shape();
        if i >= rows || j >= cols {
            return Err(CalmapError::InvalidParameter(format!(
                "node ({i}, {j}) outside grid of shape ({rows}, {cols})"
            )));
        }
        let mut edited = self.clone();
        edited.z[[i, j]] = value.filter(|v| v.is_finite());
        Ok(edited)
    }

    pub fn missing_nodes(&self) -> usize {
        self.z.iter().filter(|v| v.is_none()).count()
    }

    /// Every non-missing node as a scattered point.
    pub fn valid_points(&self) -> Vec<SurfacePoint> {
        self.z
            .indexed_iter()
            .filter_map(|((i, j), z)| {
                z.map(|z| SurfacePoint::new(self.x_axis[j], self.y_axis[i], z))
            })
            .collect()
    }

    pub fn evaluate(&self, x: f64, y: f64) -> Option<f64> {
        crate::evaluate::evaluate(self, x, y)
    }
}

/// Index of the axis value nearest to `v`; ties go to the lower index.
pub(crate) fn nearest_index(axis: &[f64], v: f64) -> usize {
    let upper = axis.partition_point(|a| *a < v);
    if upper == 0 {
        return 0;
    }
    if upper >= axis.len() {
        return axis.len() - 1;
    }
    if axis[upper] - v < v - axis[upper - 1] {
        upper
    } else {
        upper - 1
    }
}

/// Node counts produced by each stage of a grid build.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDiagnostics {
    pub input_points: usize,
    pub distinct_points: usize,
    pub linear_nodes: usize,
    pub nearest_filled_nodes: usize,
    /// The triangulation was unusable and every node took its nearest input point.
    pub degenerate_fallback: bool,
}

#[derive(Clone, Debug)]
pub struct GridBuild {
    pub grid: SurfaceGrid,
    pub diagnostics: BuildDiagnostics,
}

pub fn build_grid(points: &[SurfacePoint], spec: &GridSpec) -> Result<SurfaceGrid, CalmapError> {
    build_grid_with_diagnostics(points, spec).map(|b| b.grid)
}

/// Build a gap-free grid from scattered samples.
///
/// Nodes inside the convex hull of the samples are interpolated linearly on a
/// Delaunay triangulation; the rest take the nearest sample. When no
/// triangulation can be formed (fewer than three non-collinear samples) every
/// node takes the nearest sample by Euclidean distance.
pub fn build_grid_with_diagnostics(
    points: &[SurfacePoint],
    spec: &GridSpec,
) -> Result<GridBuild, CalmapError> {
    let canonical = canonicalize(points)?;
    let x_axis = spec.x.resolve(Axis::X, &distinct_values(&canonical, |p| p.x))?;
    let y_axis = spec.y.resolve(Axis::Y, &distinct_values(&canonical, |p| p.y))?;

    let mut diagnostics = BuildDiagnostics {
        input_points: points.len(),
        distinct_points: canonical.len(),
        ..BuildDiagnostics::default()
    };
    let z = fill_mesh(&canonical, &x_axis, &y_axis, &mut diagnostics);
    debug!(
        cols = x_axis.len(),
        rows = y_axis.len(),
        distinct_points = diagnostics.distinct_points,
        linear = diagnostics.linear_nodes,
        nearest = diagnostics.nearest_filled_nodes,
        "surface grid built"
    );
    let grid = SurfaceGrid::new(x_axis, y_axis, z)?;
    Ok(GridBuild { grid, diagnostics })
}

/// Re-seed a grid onto other axes from the source grid's valid nodes.
pub fn resample_grid(
    source: &SurfaceGrid,
    x_axis: Vec<f64>,
    y_axis: Vec<f64>,
) -> Result<SurfaceGrid, CalmapError> {
    let points = source.valid_points();
    let z = if points.is_empty() {
        Array2::from_elem((y_axis.len(), x_axis.len()), None)
    } else {
        fill_mesh(&points, &x_axis, &y_axis, &mut BuildDiagnostics::default())
    };
    SurfaceGrid::new(x_axis, y_axis, z)
}

fn distinct_values(points: &[SurfacePoint], key: impl Fn(&SurfacePoint) -> f64) -> Vec<f64> {
    points
        .iter()
        .map(|p| OrderedFloat(key(p)))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|v| v.0)
        .collect()
}

/// Sort by (x, y), drop non-finite samples and collapse exact duplicates.
fn canonicalize(points: &[SurfacePoint]) -> Result<Vec<SurfacePoint>, CalmapError> {
    let mut by_position: BTreeMap<(OrderedFloat<f64>, OrderedFloat<f64>), f64> = BTreeMap::new();
    for p in points.iter().filter(|p| p.is_finite()) {
        let key = (OrderedFloat(p.x), OrderedFloat(p.y));
        match by_position.get(&key) {
            Some(&first) if first != p.z => {
                return Err(CalmapError::InconsistentDuplicate {
                    x: p.x,
                    y: p.y,
                    first,
                    second: p.z,
                });
            }
            Some(_) => {}
            None => {
                by_position.insert(key, p.z);
            }
        }
    }
    if by_position.is_empty() {
        return Err(CalmapError::NoValidData);
    }
    Ok(by_position
        .into_iter()
        .map(|((x, y), z)| SurfacePoint::new(x.0, y.0, z))
        .collect())
}

struct SurfaceVertex {
    position: Point2<f64>,
    z: f64,
}

impl HasPosition for SurfaceVertex {
    type Scalar = f64;

    fn position(&self) -> Point2<f64> {
        self.position
    }
}

fn fill_mesh(
    points: &[SurfacePoint],
    x_axis: &[f64],
    y_axis: &[f64],
    diagnostics: &mut BuildDiagnostics,
) -> Array2<Option<f64>> {
    let vertices: Vec<SurfaceVertex> = points
        .iter()
        .map(|p| SurfaceVertex {
            position: Point2::new(p.x, p.y),
            z: p.z,
        })
        .collect();
    let shape = (y_axis.len(), x_axis.len());

    let dt = match DelaunayTriangulation::<SurfaceVertex>::bulk_load_stable(vertices) {
        Ok(dt) if dt.num_inner_faces() > 0 => dt,
        Ok(_) => {
            warn!(points = points.len(), "degenerate sample layout, using nearest sample per node");
            return nearest_point_fill(points, x_axis, y_axis, diagnostics);
        }
        Err(err) => {
            warn!(?err, "triangulation failed, using nearest sample per node");
            return nearest_point_fill(points, x_axis, y_axis, diagnostics);
        }
    };

    let linear = dt.barycentric();
    Array2::from_shape_fn(shape, |(i, j)| {
        let node = Point2::new(x_axis[j], y_axis[i]);
        match linear.interpolate(|v| v.data().z, node) {
            Some(z) if z.is_finite() => {
                diagnostics.linear_nodes += 1;
                Some(z)
            }
            _ => {
                let nearest = dt.nearest_neighbor(node).map(|v| v.data().z);
                if nearest.is_some() {
                    diagnostics.nearest_filled_nodes += 1;
                }
                nearest
            }
        }
    })
}

fn nearest_point_fill(
    points: &[SurfacePoint],
    x_axis: &[f64],
    y_axis: &[f64],
    diagnostics: &mut BuildDiagnostics,
) -> Array2<Option<f64>> {
    diagnostics.degenerate_fallback = true;
    Array2::from_shape_fn((y_axis.len(), x_axis.len()), |(i, j)| {
        let (x, y) = (x_axis[j], y_axis[i]);
        let nearest = points.iter().min_by(|a, b| {
            let da = (a.x - x).powi(2) + (a.y - y).powi(2);
            let db = (b.x - x).powi(2) + (b.y - y).powi(2);
            da.total_cmp(&db)
        });
        if nearest.is_some() {
            diagnostics.nearest_filled_nodes += 1;
        }
        nearest.map(|p| p.z)
    })
}
