use calmap::{
    align_channels, analyze_channels, parse_log, resample_linear, AlignMode, AlignmentWarning,
    CalmapError, ChannelAnalysis, ChannelLog, DelimitedTiming, TimeSeries, TimeSeriesSource,
};

type CalmapResult = Result<(), CalmapError>;

fn ramp(n: usize, step: f64, offset: f64) -> TimeSeries {
    let timestamps: Vec<f64> = (0..n).map(|k| offset + k as f64 * step).collect();
    let samples = timestamps.iter().map(|t| 2.0 * t).collect();
    TimeSeries::new(samples, timestamps).unwrap()
}

#[test]
fn resampled_length_matches_span_over_raster() -> CalmapResult {
    let series = TimeSeries::new(vec![0.0, 1.0, 5.0, 2.0], vec![0.0, 0.013, 0.4, 2.37])?;
    for raster in [0.01, 0.05, 0.1, 0.3, 1.0, 2.37, 5.0] {
        let resampled = resample_linear(&series, raster)?;
        let expected = ((2.37 - 0.0) / raster).floor() as usize + 1;
        let len = resampled.len();
        assert!(
            len == expected || len == expected + 1,
            "raster {raster}: got {len}, expected about {expected}"
        );
        assert_eq!(resampled.timestamps()[0], 0.0);
    }
    Ok(())
}

#[test]
fn channels_at_different_rates_share_one_time_base() -> CalmapResult {
    let mut log = ChannelLog::new("mixed");
    log.insert("fast", ramp(201, 0.01, 0.0));
    log.insert("slow", ramp(11, 0.2, 0.0));
    log.insert("late", ramp(30, 0.1, 0.5));

    let set = align_channels(&log, &["fast", "slow", "late"], 0.1, AlignMode::TruncateToShortest)?;
    let n = set.len();
    for name in ["fast", "slow", "late"] {
        assert_eq!(set.samples(name).map(<[f64]>::len), Some(n));
    }
    // the slow channel only spans 2.0 s
    assert_eq!(n, 21);
    assert!(set.warnings().iter().any(|w| matches!(
        w,
        AlignmentWarning::FinerThanNative { channel, .. } if channel == "slow"
    )));
    Ok(())
}

#[test]
fn overlap_window_interpolates_every_channel_on_common_span() -> CalmapResult {
    let mut log = ChannelLog::new("mixed");
    log.insert("fast", ramp(201, 0.01, 0.0));
    log.insert("late", ramp(30, 0.1, 0.5));
    let set = align_channels(&log, &["fast", "late"], 0.25, AlignMode::OverlapWindow)?;
    assert_eq!(set.timestamps()[0], 0.5);
    assert_eq!(*set.timestamps().last().unwrap(), 2.0);
    let fast = set.samples("fast").unwrap();
    let late = set.samples("late").unwrap();
    for (a, b) in fast.iter().zip(late) {
        assert!((a - b).abs() < 1e-9);
    }
    Ok(())
}

#[test]
fn csv_log_analysis_reports_untimed_channels() -> CalmapResult {
    let csv = "rpm,load\n1000,0.1\n1100,0.2\n1200,0.3\n";
    let source = parse_log(csv.as_bytes(), "log.csv", "log.csv", &DelimitedTiming::default())?;
    let analysis = analyze_channels(&source, &["rpm", "speed"]);
    assert_eq!(
        analysis.get("rpm"),
        Some(&ChannelAnalysis::Untimed { sample_count: 3 })
    );
    assert!(matches!(analysis.get("speed"), Some(ChannelAnalysis::Failed { .. })));
    assert!(source.contains("load"));
    Ok(())
}

#[test]
fn json_log_analysis_recommends_slowest_floor() -> CalmapResult {
    let json = r#"{"channels": {
        "rpm": {"timestamps": [0.0, 0.01, 0.02, 0.03], "samples": [1, 2, 3, 4]},
        "load": {"timestamps": [0.0, 0.1, 0.2], "samples": [1, 2, 3]}
    }}"#;
    let source = parse_log(json.as_bytes(), "log.json", "json", &DelimitedTiming::default())?;
    let names = source.channel_names();
    let analysis = analyze_channels(&source, names.as_slice());
    let stats: Vec<_> = analysis
        .values()
        .filter_map(|a| match a {
            ChannelAnalysis::Timed(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(stats.len(), 2);
    let raster = calmap::recommend_raster(stats).unwrap();
    assert!((raster - 0.11).abs() < 1e-9);
    Ok(())
}
