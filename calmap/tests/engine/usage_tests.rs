use calmap::{
    accumulate, aggregate, aggregate_sources, compare_surfaces, flatten_percentages,
    AlignMode, CalmapError, CellStatistics, ChannelLog, DiffMode, FilterCondition, Normalization,
    OperatingPointRequest, RangeFilter, SurfaceAccumulator, SurfaceGrid, TimeSeries,
};
use ndarray::Array2;

type CalmapResult = Result<(), CalmapError>;

fn grid() -> SurfaceGrid {
    SurfaceGrid::new(
        vec![1000.0, 2000.0, 3000.0, 4000.0],
        vec![0.0, 0.25, 0.5, 0.75, 1.0],
        Array2::from_elem((5, 4), Some(0.0)),
    )
    .unwrap()
}

/// Deterministic pseudo-random operating points, some outside the grid.
fn trace(seed: u64, n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut state = seed;
    let mut next = || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    let mut x = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    for _ in 0..n {
        x.push(500.0 + 4000.0 * next());
        y.push(-0.1 + 1.2 * next());
    }
    (x, y)
}

fn per_file_stats() -> Result<Vec<CellStatistics>, CalmapError> {
    (1..=5)
        .map(|seed| {
            let (x, y) = trace(seed, 400);
            accumulate(&grid(), &x, &y, None, 0.01)
        })
        .collect()
}

#[test]
fn aggregation_is_associative() -> CalmapResult {
    let stats = per_file_stats()?;
    let all_at_once = aggregate(grid().shape(), &stats)?;

    let mut sequential = CellStatistics::for_grid(&grid());
    for s in &stats {
        sequential.merge(s)?;
    }
    let grouped = aggregate(grid().shape(), &stats[..2])?
        .merged(&aggregate(grid().shape(), &stats[2..])?)?;
    let reversed = aggregate(grid().shape(), stats.iter().rev())?;

    assert_eq!(all_at_once.counts, sequential.counts);
    assert_eq!(all_at_once.counts, grouped.counts);
    assert_eq!(all_at_once.counts, reversed.counts);
    assert_eq!(all_at_once.points_total, 2000);
    assert!(all_at_once.is_consistent());
    Ok(())
}

#[test]
fn inside_only_percentages_sum_to_hundred() -> CalmapResult {
    let total = aggregate(grid().shape(), &per_file_stats()?)?;
    assert!(total.points_outside > 0);
    let inside_only = total.percentages(Normalization::InsideOnly);
    assert!((inside_only.sum() - 100.0).abs() < 1e-9);
    let all_points = total.percentages(Normalization::AllPoints);
    assert!(all_points.sum() < 100.0);
    Ok(())
}

#[test]
fn percentages_use_inside_points_across_files() -> CalmapResult {
    let a = accumulate(&grid(), &[1000.0, 1000.0, 9999.0], &[0.0, 0.0, 0.0], None, 1.0)?;
    let b = accumulate(&grid(), &[4000.0, 4000.0], &[1.0, 1.0], None, 1.0)?;
    let total = a.merged(&b)?;
    let cells = flatten_percentages(&grid(), &total, Normalization::InsidePoints)?;
    let first = &cells[0];
    let last = &cells[cells.len() - 1];
    assert_eq!((first.count, first.percent), (2, 50.0));
    assert_eq!((last.x, last.y, last.count, last.percent), (4000.0, 1.0, 2, 50.0));
    assert_eq!(total.time_outside_s, 1.0);
    Ok(())
}

fn drive(id: &str, offset: f64) -> ChannelLog {
    let ts: Vec<f64> = (0..50).map(|k| k as f64 * 0.1).collect();
    let rpm = ts.iter().map(|t| 1000.0 + offset + 600.0 * t).collect();
    let load = ts.iter().map(|t| (t / 5.0).min(1.0)).collect();
    let gear = ts.iter().map(|t| if *t < 2.5 { 2.0 } else { 3.0 }).collect();
    let mut log = ChannelLog::new(id);
    log.insert("rpm", TimeSeries::new(rpm, ts.clone()).unwrap());
    log.insert("load", TimeSeries::new(load, ts.clone()).unwrap());
    log.insert("gear", TimeSeries::new(gear, ts).unwrap());
    log
}

#[test]
fn multi_log_batch_with_filters() -> CalmapResult {
    let sources = vec![drive("a.json", 0.0), drive("b.json", 500.0)];
    let request = OperatingPointRequest {
        x_channel: "rpm".into(),
        y_channel: "load".into(),
        raster_s: 0.1,
        align_mode: AlignMode::TruncateToShortest,
        filters: vec![
            RangeFilter::new("gear", FilterCondition::WithinRange, 3.0, 3.0),
            RangeFilter::new("brake", FilterCondition::OutsideRange, 0.0, 0.5),
        ],
    };
    let batch = aggregate_sources(&grid(), &sources, &request)?;
    assert!(batch.failures.is_empty());
    assert_eq!(batch.per_source.len(), 2);
    for usage in &batch.per_source {
        assert_eq!(usage.skipped_filters.len(), 1);
        assert_eq!(usage.skipped_filters[0].channel, "brake");
        assert_eq!(usage.statistics.points_total, 25);
    }
    let summed = aggregate(
        grid().shape(),
        batch.per_source.iter().map(|u| &u.statistics),
    )?;
    assert_eq!(summed, batch.total);
    Ok(())
}

#[test]
fn averaged_surfaces_compare_cell_by_cell() -> CalmapResult {
    let mut measured = SurfaceAccumulator::matching(&grid());
    measured.add(1000.0, 0.0, 12.0);
    measured.add(1200.0, 0.1, 8.0);
    let averaged = measured.averaged()?;
    let reference = SurfaceGrid::new(
        grid().x_axis().to_vec(),
        grid().y_axis().to_vec(),
        Array2::from_elem((5, 4), Some(8.0)),
    )?;
    let diff = compare_surfaces(&averaged, &reference, DiffMode::Relative)?;
    assert_eq!(diff[[0, 0]], Some(25.0));
    assert_eq!(diff[[1, 1]], None);
    Ok(())
}

#[test]
fn same_surface_on_coarser_axes_compares_equal() -> CalmapResult {
    let plane = |x: f64, y: f64| 0.01 * x + 20.0 * y;
    let nodes = |xs: &[f64], ys: &[f64]| {
        Array2::from_shape_fn((ys.len(), xs.len()), |(i, j)| Some(plane(xs[j], ys[i])))
    };
    let (fine_x, coarse_x, y) = (
        vec![1000.0, 2000.0, 3000.0],
        vec![1000.0, 3000.0],
        vec![0.0, 1.0],
    );
    let fine = SurfaceGrid::new(fine_x.clone(), y.clone(), nodes(&fine_x, &y))?;
    let coarse = SurfaceGrid::new(coarse_x.clone(), y.clone(), nodes(&coarse_x, &y))?;

    let diff = compare_surfaces(&fine, &coarse, DiffMode::Absolute)?;
    assert_eq!(diff.dim(), (2, 3));
    for d in diff.iter() {
        assert!(d.is_some_and(|d| d.abs() < 1e-9), "difference {d:?}");
    }
    Ok(())
}
