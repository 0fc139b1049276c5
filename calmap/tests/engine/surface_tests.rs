use calmap::{
    build_grid, evaluate, read_surface_table, AxisSpec, CalmapError, GridSpec, SurfaceGrid,
    SurfacePoint, TableColumns,
};

type CalmapResult = Result<(), CalmapError>;

const ATOL: f64 = 1e-9;

#[inline]
fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= ATOL
}

const TABLE: &str = "Engine Speed,Relative Load,Fuel Flow\n\
                     rpm,%,g/s\n\
                     1000,0.0,10.0\n\
                     1000,1.0,20.0\n\
                     2000,0.0,30.0\n\
                     2000,1.0,40.0\n";

fn example_grid() -> Result<SurfaceGrid, CalmapError> {
    let columns = TableColumns::new("Engine Speed", "Relative Load", "Fuel Flow");
    let table = read_surface_table(TABLE.as_bytes(), &columns)?;
    build_grid(&table.points, &GridSpec::default())
}

/// Scattered table with an irregular layout, used for the property checks.
fn scattered() -> Vec<SurfacePoint> {
    let mut points = Vec::new();
    for (k, x) in [800.0, 1200.0, 2000.0, 2600.0, 3500.0].iter().enumerate() {
        for (m, y) in [0.1, 0.35, 0.6, 0.95].iter().enumerate() {
            if (k + m) % 3 == 2 {
                continue;
            }
            points.push(SurfacePoint::new(*x, *y, x / 100.0 + 40.0 * y * y + k as f64));
        }
    }
    points
}

#[test]
fn example_cell_centre() -> CalmapResult {
    let grid = example_grid()?;
    assert_eq!(grid.x_axis(), &[1000.0, 2000.0]);
    assert_eq!(grid.y_axis(), &[0.0, 1.0]);
    assert_eq!(evaluate(&grid, 1500.0, 0.5), Some(25.0));
    Ok(())
}

#[test]
fn example_beyond_x_bound() -> CalmapResult {
    let grid = example_grid()?;
    assert_eq!(evaluate(&grid, 3000.0, 0.5), Some(35.0));
    Ok(())
}

#[test]
fn nodes_evaluate_to_stored_values() -> CalmapResult {
    let grid = build_grid(&scattered(), &GridSpec::default())?;
    for (i, y) in grid.y_axis().iter().enumerate() {
        for (j, x) in grid.x_axis().iter().enumerate() {
            assert_eq!(evaluate(&grid, *x, *y), grid.value(i, j), "node ({i}, {j})");
        }
    }
    Ok(())
}

#[test]
fn interior_values_stay_within_cell_corners() -> CalmapResult {
    let grid = build_grid(&scattered(), &GridSpec::default())?;
    let (xs, ys) = (grid.x_axis(), grid.y_axis());
    for i in 0..ys.len() - 1 {
        for j in 0..xs.len() - 1 {
            let corners: Vec<f64> = [(i, j), (i + 1, j), (i, j + 1), (i + 1, j + 1)]
                .iter()
                .filter_map(|&(a, b)| grid.value(a, b))
                .collect();
            let lo = corners.iter().cloned().fold(f64::INFINITY, f64::min);
            let hi = corners.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            for (fx, fy) in [(0.1, 0.9), (0.5, 0.5), (0.73, 0.21), (0.999, 0.001)] {
                let x = xs[j] + fx * (xs[j + 1] - xs[j]);
                let y = ys[i] + fy * (ys[i + 1] - ys[i]);
                let z = evaluate(&grid, x, y).unwrap();
                assert!(z >= lo && z <= hi, "{z} outside [{lo}, {hi}] at ({x}, {y})");
            }
        }
    }
    Ok(())
}

#[test]
fn exterior_values_match_nearest_node() -> CalmapResult {
    let grid = build_grid(&scattered(), &GridSpec::default())?;
    for (x, y) in [(100.0, 0.4), (5000.0, 0.05), (1900.0, -3.0), (9000.0, 9.0)] {
        let i = grid.nearest_y_index(y);
        let j = grid.nearest_x_index(x);
        assert_eq!(evaluate(&grid, x, y), grid.value(i, j), "query ({x}, {y})");
    }
    Ok(())
}

#[test]
fn build_is_independent_of_row_order() -> CalmapResult {
    let points = scattered();
    let mut reversed = points.clone();
    reversed.reverse();
    let mut rotated = points.clone();
    rotated.rotate_left(5);
    let a = build_grid(&points, &GridSpec::default())?;
    assert_eq!(a, build_grid(&reversed, &GridSpec::default())?);
    assert_eq!(a, build_grid(&rotated, &GridSpec::default())?);
    assert_eq!(a.missing_nodes(), 0);
    Ok(())
}

#[test]
fn resampled_load_axis_is_gap_free() -> CalmapResult {
    let spec = GridSpec {
        x: AxisSpec::Native,
        y: AxisSpec::Linspace {
            min: 0.0,
            max: 1.0,
            intervals: 20,
        },
    };
    let grid = build_grid(&scattered(), &spec)?;
    assert_eq!(grid.shape(), (21, 5));
    assert_eq!(grid.missing_nodes(), 0);
    assert!(approx_eq(grid.y_axis()[20], 1.0));
    Ok(())
}

#[test]
fn table_without_usable_rows_fails_to_build() {
    let columns = TableColumns::new("a", "b", "c");
    let err = read_surface_table("a,b,c\nx,y,z\n".as_bytes(), &columns).unwrap_err();
    assert!(matches!(err, CalmapError::NoValidData));
}
