//! Cell-wise comparison of usage matrices and surfaces.

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::grid::{resample_grid, SurfaceGrid};
use crate::CalmapError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffMode {
    /// `main - other`
    #[default]
    Absolute,
    /// `100 * (main - other) / other`, 0 where `other` is zero or not finite.
    Relative,
}

impl DiffMode {
    fn apply(self, main: f64, other: f64) -> f64 {
        match self {
            DiffMode::Absolute => main - other,
            DiffMode::Relative if other.is_finite() && other != 0.0 => {
                100.0 * (main - other) / other
            }
            DiffMode::Relative => 0.0,
        }
    }
}

pub fn difference(
    main: &Array2<f64>,
    other: &Array2<f64>,
    mode: DiffMode,
) -> Result<Array2<f64>, CalmapError> {
    if main.dim() != other.dim() {
        return Err(CalmapError::ShapeMismatch {
            expected: main.dim(),
            got: other.dim(),
        });
    }
    Ok(Zip::from(main)
        .and(other)
        .map_collect(|&m, &o| mode.apply(m, o)))
}

/// Node-wise difference of two surfaces on `main`'s axes. `other` is
/// resampled onto those axes first when they differ.
pub fn compare_surfaces(
    main: &SurfaceGrid,
    other: &SurfaceGrid,
    mode: DiffMode,
) -> Result<Array2<Option<f64>>, CalmapError> {
    let resampled;
    let other = if main.x_axis() == other.x_axis() && main.y_axis() == other.y_axis() {
        other
    } else {
        resampled = resample_grid(other, main.x_axis().to_vec(), main.y_axis().to_vec())?;
        &resampled
    };
    Ok(Zip::from(main.values())
        .and(other.values())
        .map_collect(|m, o| match (m, o) {
            (Some(m), Some(o)) => Some(mode.apply(*m, *o)),
            _ => None,
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn absolute_and_relative_differences() {
        let main = array![[10.0, 5.0], [0.0, 3.0]];
        let other = array![[8.0, 0.0], [2.0, f64::NAN]];
        assert_eq!(
            difference(&main, &other, DiffMode::Absolute).unwrap().row(0).to_vec(),
            vec![2.0, 5.0]
        );
        assert_eq!(
            difference(&main, &other, DiffMode::Relative).unwrap(),
            array![[25.0, 0.0], [-100.0, 0.0]]
        );
        assert!(difference(&main, &array![[1.0]], DiffMode::Absolute).is_err());
    }

    #[test]
    fn surfaces_on_other_axes_are_resampled() {
        let main = SurfaceGrid::new(
            vec![0.0, 1.0, 2.0],
            vec![0.0, 1.0],
            array![[Some(1.0), Some(2.0), None], [Some(1.0), Some(2.0), Some(3.0)]],
        )
        .unwrap();
        let other = SurfaceGrid::new(
            vec![0.0, 2.0],
            vec![0.0, 1.0],
            array![[Some(0.0), Some(2.0)], [Some(0.0), Some(2.0)]],
        )
        .unwrap();
        let diff = compare_surfaces(&main, &other, DiffMode::Absolute).unwrap();
        assert_eq!(diff[[0, 0]], Some(1.0));
        assert!((diff[[0, 1]].unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(diff[[0, 2]], None);
        assert!((diff[[1, 2]].unwrap() - 1.0).abs() < 1e-9);
    }
}
