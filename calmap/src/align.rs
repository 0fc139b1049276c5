//! Channel timing analysis and alignment onto a common time base.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::source::TimeSeriesSource;
use crate::CalmapError;

/// Margin above the fastest native interval for a safe resampling step.
pub const RASTER_SAFETY_FACTOR: f64 = 1.1;

const MAX_RASTER_POINTS: usize = 100_000_000;

/// One measured channel: samples with strictly increasing timestamps.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeSeries {
    samples: Vec<f64>,
    timestamps: Vec<f64>,
}

impl TimeSeries {
    /// Samples may be NaN; timestamps must be finite and strictly increasing.
    pub fn new(samples: Vec<f64>, timestamps: Vec<f64>) -> Result<Self, CalmapError> {
        if samples.len() != timestamps.len() {
            return Err(CalmapError::InvalidTimeSeries(format!(
                "{} samples but {} timestamps",
                samples.len(),
                timestamps.len()
            )));
        }
        if let Some(t) = timestamps.iter().find(|t| !t.is_finite()) {
            return Err(CalmapError::InvalidTimeSeries(format!("non-finite timestamp {t}")));
        }
        if let Some(k) = timestamps.windows(2).position(|w| w[1] <= w[0]) {
            return Err(CalmapError::InvalidTimeSeries(format!(
                "timestamps not strictly increasing at index {}",
                k + 1
            )));
        }
        Ok(Self {
            samples,
            timestamps,
        })
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn start(&self) -> Option<f64> {
        self.timestamps.first().copied()
    }

    pub fn end(&self) -> Option<f64> {
        self.timestamps.last().copied()
    }

    pub fn duration(&self) -> f64 {
        match (self.start(), self.end()) {
            (Some(s), Some(e)) => e - s,
            _ => 0.0,
        }
    }

    /// Linear value at `t`, held flat beyond either end.
    pub fn value_at(&self, t: f64) -> Option<f64> {
        interpolate_sorted(&self.timestamps, &self.samples, &[t])
            .into_iter()
            .next()
    }

    /// Value of the last sample at or before `t` (the first sample before the start).
    pub fn held_value_at(&self, t: f64) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let k = self.timestamps.partition_point(|s| *s <= t).saturating_sub(1);
        Some(self.samples[k])
    }

    /// The first `len` samples.
    pub fn truncated(&self, len: usize) -> TimeSeries {
        let len = len.min(self.len());
        TimeSeries {
            samples: self.samples[..len].to_vec(),
            timestamps: self.timestamps[..len].to_vec(),
        }
    }

    pub fn into_parts(self) -> (Vec<f64>, Vec<f64>) {
        (self.samples, self.timestamps)
    }
}

pub(crate) fn check_raster(raster: f64) -> Result<(), CalmapError> {
    if raster.is_finite() && raster > 0.0 {
        Ok(())
    } else {
        Err(CalmapError::InvalidParameter(format!(
            "raster must be positive and finite, got {raster}"
        )))
    }
}

/// `start + k * raster` for `k` in `0..=floor((end - start) / raster)`.
pub fn uniform_timestamps(start: f64, end: f64, raster: f64) -> Result<Vec<f64>, CalmapError> {
    check_raster(raster)?;
    if !start.is_finite() || !end.is_finite() || end < start {
        return Err(CalmapError::InvalidParameter(format!("invalid time span [{start}, {end}]")));
    }
    let steps = ((end - start) / raster + 1e-9).floor();
    if steps >= MAX_RASTER_POINTS as f64 {
        return Err(CalmapError::InvalidParameter(format!(
            "raster {raster} over [{start}, {end}] exceeds {MAX_RASTER_POINTS} points"
        )));
    }
    let len = steps as usize + 1;
    Ok((0..len).map(|k| start + k as f64 * raster).collect())
}

/// Linear interpolation of `(times, values)` at ascending `targets`, flat
/// beyond the ends.
pub(crate) fn interpolate_sorted(times: &[f64], values: &[f64], targets: &[f64]) -> Vec<f64> {
    if times.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(targets.len());
    let mut idx = 0;
    for &target in targets {
        while idx + 1 < times.len() && times[idx + 1] < target {
            idx += 1;
        }
        let (t0, s0) = (times[idx], values[idx]);
        if idx + 1 < times.len() {
            let (t1, s1) = (times[idx + 1], values[idx + 1]);
            let frac = ((target - t0) / (t1 - t0)).clamp(0.0, 1.0);
            let value = if frac == 0.0 {
                s0
            } else if frac == 1.0 {
                s1
            } else {
                s0 * (1.0 - frac) + s1 * frac
            };
            out.push(value);
        } else {
            out.push(s0);
        }
    }
    out
}

/// Previous-sample hold of `(times, values)` at ascending `targets`.
pub(crate) fn hold_sorted(times: &[f64], values: &[f64], targets: &[f64]) -> Vec<f64> {
    if times.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(targets.len());
    let mut idx = 0;
    for &target in targets {
        while idx + 1 < times.len() && times[idx + 1] <= target {
            idx += 1;
        }
        out.push(values[idx]);
    }
    out
}

/// Linear resampling over the series' own span.
pub fn resample_linear(series: &TimeSeries, raster: f64) -> Result<TimeSeries, CalmapError> {
    resample_with(series, raster, interpolate_sorted)
}

/// Previous-sample-hold resampling over the series' own span.
pub fn resample_hold(series: &TimeSeries, raster: f64) -> Result<TimeSeries, CalmapError> {
    resample_with(series, raster, hold_sorted)
}

fn resample_with(
    series: &TimeSeries,
    raster: f64,
    interp: fn(&[f64], &[f64], &[f64]) -> Vec<f64>,
) -> Result<TimeSeries, CalmapError> {
    check_raster(raster)?;
    let (Some(start), Some(end)) = (series.start(), series.end()) else {
        return Ok(TimeSeries {
            samples: Vec::new(),
            timestamps: Vec::new(),
        });
    };
    let timestamps = uniform_timestamps(start, end, raster)?;
    let samples = interp(&series.timestamps, &series.samples, &timestamps);
    Ok(TimeSeries {
        samples,
        timestamps,
    })
}

/// Native sampling characteristics of one channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingStats {
    pub channel: String,
    pub sample_count: usize,
    pub duration_s: f64,
    pub min_interval_s: f64,
    pub avg_interval_s: f64,
    pub max_interval_s: f64,
    pub suggested_min_raster_s: f64,
}

pub fn analyze_sampling(channel: &str, series: &TimeSeries) -> Result<SamplingStats, CalmapError> {
    if series.len() < 2 {
        return Err(CalmapError::EmptyChannel {
            channel: channel.to_string(),
            got: series.len(),
        });
    }
    let (mut min, mut max) = (f64::INFINITY, 0.0f64);
    for w in series.timestamps.windows(2) {
        let dt = w[1] - w[0];
        min = min.min(dt);
        max = max.max(dt);
    }
    let duration = series.duration();
    Ok(SamplingStats {
        channel: channel.to_string(),
        sample_count: series.len(),
        duration_s: duration,
        min_interval_s: min,
        avg_interval_s: duration / (series.len() - 1) as f64,
        max_interval_s: max,
        suggested_min_raster_s: min * RASTER_SAFETY_FACTOR,
    })
}

/// The slowest channel's safe floor, i.e. the largest suggested minimum.
pub fn recommend_raster<'a>(stats: impl IntoIterator<Item = &'a SamplingStats>) -> Option<f64> {
    stats
        .into_iter()
        .map(|s| s.suggested_min_raster_s)
        .filter(|r| r.is_finite() && *r > 0.0)
        .reduce(f64::max)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChannelAnalysis {
    Timed(SamplingStats),
    /// The source carries no native timing for this channel.
    Untimed { sample_count: usize },
    Failed { reason: String },
}

/// Per-channel analysis; a failing channel never aborts the others.
pub fn analyze_channels<S, N>(source: &S, names: &[N]) -> BTreeMap<String, ChannelAnalysis>
where
    S: TimeSeriesSource + ?Sized,
    N: AsRef<str>,
{
    names
        .iter()
        .map(|name| {
            let name = name.as_ref();
            let analysis = match source.get(name) {
                Ok(series) if !source.has_native_timing() => ChannelAnalysis::Untimed {
                    sample_count: series.len(),
                },
                Ok(series) => match analyze_sampling(name, &series) {
                    Ok(stats) => ChannelAnalysis::Timed(stats),
                    Err(err) => ChannelAnalysis::Failed {
                        reason: err.to_string(),
                    },
                },
                Err(err) => ChannelAnalysis::Failed {
                    reason: err.to_string(),
                },
            };
            (name.to_string(), analysis)
        })
        .collect()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignMode {
    /// Resample each channel over its own span, then cut all to the shortest.
    #[default]
    TruncateToShortest,
    /// One time base spanning only the interval every channel covers.
    OverlapWindow,
}

/// Recoverable alignment conditions the caller should surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlignmentWarning {
    FinerThanNative {
        channel: String,
        raster_s: f64,
        suggested_min_raster_s: f64,
    },
    NativeResampleFailed { channel: String, reason: String },
    Truncated { channel: String, dropped: usize },
}

impl fmt::Display for AlignmentWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignmentWarning::FinerThanNative {
                channel,
                raster_s,
                suggested_min_raster_s,
            } => write!(
                f,
                "raster {raster_s} s is finer than the {suggested_min_raster_s} s suggested for '{channel}'; values are interpolated"
            ),
            AlignmentWarning::NativeResampleFailed { channel, reason } => {
                write!(
                    f,
                    "native resampling of '{channel}' failed ({reason}); interpolated instead"
                )
            }
            AlignmentWarning::Truncated { channel, dropped } => {
                write!(f, "dropped {dropped} trailing samples of '{channel}' to align lengths")
            }
        }
    }
}

/// Channels sharing one timestamp vector, index for index.
#[derive(Clone, Debug, PartialEq)]
pub struct AlignedChannelSet {
    raster_s: Option<f64>,
    timestamps: Vec<f64>,
    channels: Vec<(String, Vec<f64>)>,
    warnings: Vec<AlignmentWarning>,
}

impl AlignedChannelSet {
    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn samples(&self, name: &str) -> Option<&[f64]> {
        self.channels
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.as_slice())
    }

    pub fn series(&self, name: &str) -> Option<TimeSeries> {
        self.samples(name).map(|s| TimeSeries {
            samples: s.to_vec(),
            timestamps: self.timestamps.clone(),
        })
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// The requested raster, `None` for an explicit time base.
    pub fn raster_s(&self) -> Option<f64> {
        self.raster_s
    }

    /// Step represented by one aligned sample.
    pub fn sample_period_s(&self) -> f64 {
        match self.raster_s {
            Some(r) => r,
            None if self.timestamps.len() >= 2 => self.timestamps[1] - self.timestamps[0],
            None => 0.0,
        }
    }

    pub fn warnings(&self) -> &[AlignmentWarning] {
        &self.warnings
    }
}

fn fetch_channels<S, N>(source: &S, names: &[N]) -> Result<Vec<(String, TimeSeries)>, CalmapError>
where
    S: TimeSeriesSource + ?Sized,
    N: AsRef<str>,
{
    if names.is_empty() {
        return Err(CalmapError::InvalidParameter(
            "no channels requested".to_string(),
        ));
    }
    let channels = names
        .iter()
        .map(|n| Ok((n.as_ref().to_string(), source.get(n.as_ref())?)))
        .collect::<Result<Vec<_>, CalmapError>>()?;
    check_lengths(channels.iter().map(|(n, s)| (n.as_str(), s.len())))?;
    Ok(channels)
}

/// An empty channel next to non-empty ones is a mismatch, not a truncation.
fn check_lengths<'a>(
    lengths: impl Iterator<Item = (&'a str, usize)> + Clone,
) -> Result<(), CalmapError> {
    let reference = lengths.clone().find(|(_, len)| *len > 0);
    let empty = lengths.clone().find(|(_, len)| *len == 0);
    match (empty, reference) {
        (None, _) => Ok(()),
        (Some((channel, _)), Some((reference, reference_len))) => {
            Err(CalmapError::AlignmentLengthMismatch {
                channel: channel.to_string(),
                channel_len: 0,
                reference: reference.to_string(),
                reference_len,
            })
        }
        (Some((channel, _)), None) => Err(CalmapError::EmptyChannel {
            channel: channel.to_string(),
            got: 0,
        }),
    }
}

fn finer_than_native<S: TimeSeriesSource + ?Sized>(
    source: &S,
    channels: &[(String, TimeSeries)],
    raster: f64,
) -> Vec<AlignmentWarning> {
    if !source.has_native_timing() {
        return Vec::new();
    }
    channels
        .iter()
        .filter_map(|(name, series)| analyze_sampling(name, series).ok())
        .filter(|stats| raster < stats.suggested_min_raster_s)
        .map(|stats| {
            warn!(
                channel = %stats.channel,
                raster_s = raster,
                suggested_min_raster_s = stats.suggested_min_raster_s,
                "raster finer than native sampling"
            );
            AlignmentWarning::FinerThanNative {
                channel: stats.channel,
                raster_s: raster,
                suggested_min_raster_s: stats.suggested_min_raster_s,
            }
        })
        .collect()
}

/// Align channels of one source onto a uniform raster.
///
/// The source's native resampling is tried first for each channel; when it is
/// unavailable or fails the channel is interpolated linearly.
pub fn align_channels<S, N>(
    source: &S,
    names: &[N],
    raster: f64,
    mode: AlignMode,
) -> Result<AlignedChannelSet, CalmapError>
where
    S: TimeSeriesSource + ?Sized,
    N: AsRef<str>,
{
    check_raster(raster)?;
    let channels = fetch_channels(source, names)?;
    let mut warnings = finer_than_native(source, &channels, raster);

    let (timestamps, samples) = match mode {
        AlignMode::TruncateToShortest => {
            let mut resampled = Vec::with_capacity(channels.len());
            for (name, series) in &channels {
                let series = match source.resample_native(name, raster) {
                    Some(Ok(native)) => native,
                    Some(Err(err)) => {
                        warn!(channel = %name, %err, "native resampling failed, interpolating");
                        warnings.push(AlignmentWarning::NativeResampleFailed {
                            channel: name.clone(),
                            reason: err.to_string(),
                        });
                        resample_linear(series, raster)?
                    }
                    None => resample_linear(series, raster)?,
                };
                resampled.push((name.clone(), series));
            }
            check_lengths(resampled.iter().map(|(n, s)| (n.as_str(), s.len())))?;

            let shortest = resampled.iter().map(|(_, s)| s.len()).min().unwrap_or(0);
            let mut timestamps = Vec::new();
            let mut samples = Vec::with_capacity(resampled.len());
            for (k, (name, series)) in resampled.into_iter().enumerate() {
                let dropped = series.len() - shortest;
                if dropped > 0 {
                    debug!(channel = %name, dropped, "truncating to shortest channel");
                    warnings.push(AlignmentWarning::Truncated {
                        channel: name.clone(),
                        dropped,
                    });
                }
                let (mut s, mut t) = series.into_parts();
                s.truncate(shortest);
                if k == 0 {
                    t.truncate(shortest);
                    timestamps = t;
                }
                samples.push((name, s));
            }
            (timestamps, samples)
        }
        AlignMode::OverlapWindow => {
            let start = channels
                .iter()
                .filter_map(|(_, s)| s.start())
                .fold(f64::NEG_INFINITY, f64::max);
            let end = channels
                .iter()
                .filter_map(|(_, s)| s.end())
                .fold(f64::INFINITY, f64::min);
            if start > end {
                return Err(CalmapError::NoCommonTimeBase {
                    channels: channels.iter().map(|(n, _)| n.clone()).collect(),
                });
            }
            let timestamps = uniform_timestamps(start, end, raster)?;
            let samples = channels
                .iter()
                .map(|(name, series)| {
                    let s = onto_timestamps(source, name, series, &timestamps, &mut warnings);
                    (name.clone(), s)
                })
                .collect();
            (timestamps, samples)
        }
    };

    debug!(
        channels = samples.len(),
        samples = timestamps.len(),
        raster_s = raster,
        ?mode,
        "channels aligned"
    );
    Ok(AlignedChannelSet {
        raster_s: Some(raster),
        timestamps,
        channels: samples,
        warnings,
    })
}

/// Align channels of one source onto explicit, strictly increasing timestamps.
///
/// The smallest step of the time base is checked against each channel's
/// native sampling like a raster would be.
pub fn align_at<S, N>(
    source: &S,
    names: &[N],
    timestamps: &[f64],
) -> Result<AlignedChannelSet, CalmapError>
where
    S: TimeSeriesSource + ?Sized,
    N: AsRef<str>,
{
    if timestamps.is_empty() {
        return Err(CalmapError::InvalidParameter(
            "explicit time base is empty".to_string(),
        ));
    }
    if timestamps.iter().any(|t| !t.is_finite()) || timestamps.windows(2).any(|w| w[1] <= w[0]) {
        return Err(CalmapError::InvalidParameter(
            "explicit time base must be finite and strictly increasing".to_string(),
        ));
    }
    let channels = fetch_channels(source, names)?;
    let finest_step = timestamps
        .windows(2)
        .map(|w| w[1] - w[0])
        .reduce(f64::min);
    let mut warnings = match finest_step {
        Some(step) => finer_than_native(source, &channels, step),
        None => Vec::new(),
    };
    let samples = channels
        .iter()
        .map(|(name, series)| {
            let s = onto_timestamps(source, name, series, timestamps, &mut warnings);
            (name.clone(), s)
        })
        .collect();
    Ok(AlignedChannelSet {
        raster_s: None,
        timestamps: timestamps.to_vec(),
        channels: samples,
        warnings,
    })
}

fn onto_timestamps<S: TimeSeriesSource + ?Sized>(
    source: &S,
    name: &str,
    series: &TimeSeries,
    timestamps: &[f64],
    warnings: &mut Vec<AlignmentWarning>,
) -> Vec<f64> {
    match source.resample_onto(name, timestamps) {
        Some(Ok(samples)) if samples.len() == timestamps.len() => return samples,
        Some(Ok(samples)) => {
            warnings.push(AlignmentWarning::NativeResampleFailed {
                channel: name.to_string(),
                reason: format!("returned {} of {} samples", samples.len(), timestamps.len()),
            });
        }
        Some(Err(err)) => {
            warn!(channel = %name, %err, "native resampling failed, interpolating");
            warnings.push(AlignmentWarning::NativeResampleFailed {
                channel: name.to_string(),
                reason: err.to_string(),
            });
        }
        None => {}
    }
    interpolate_sorted(series.timestamps(), series.samples(), timestamps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ChannelLog;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn series(samples: &[f64], timestamps: &[f64]) -> TimeSeries {
        TimeSeries::new(samples.to_vec(), timestamps.to_vec()).unwrap()
    }

    #[test]
    fn rejects_unordered_timestamps() {
        assert!(TimeSeries::new(vec![1.0, 2.0], vec![0.0, 0.0]).is_err());
        assert!(TimeSeries::new(vec![1.0], vec![0.0, 1.0]).is_err());
        assert!(TimeSeries::new(vec![f64::NAN], vec![0.0]).is_ok());
    }

    #[test]
    fn uniform_timestamps_include_end_on_raster() {
        let ts = uniform_timestamps(0.0, 1.0, 0.1).unwrap();
        assert_eq!(ts.len(), 11);
        assert!(approx_eq(ts[10], 1.0));
        assert_eq!(uniform_timestamps(0.0, 1.05, 0.1).unwrap().len(), 11);
        assert_eq!(uniform_timestamps(2.0, 2.0, 0.1).unwrap(), vec![2.0]);
        assert!(uniform_timestamps(0.0, 1.0, 0.0).is_err());
    }

    #[test]
    fn linear_resampling_clamps_beyond_span() {
        let s = series(&[0.0, 10.0], &[0.0, 1.0]);
        let r = resample_linear(&s, 0.25).unwrap();
        assert_eq!(r.len(), 5);
        assert!(approx_eq(r.samples()[1], 2.5));
        assert_eq!(s.value_at(-3.0), Some(0.0));
        assert_eq!(s.value_at(7.0), Some(10.0));
    }

    #[test]
    fn hold_resampling_keeps_previous_sample() {
        let s = series(&[1.0, 2.0, 3.0], &[0.0, 1.0, 2.0]);
        let r = resample_hold(&s, 0.5).unwrap();
        assert_eq!(r.samples(), &[1.0, 1.0, 2.0, 2.0, 3.0]);
        assert_eq!(s.held_value_at(-1.0), Some(1.0));
    }

    #[test]
    fn sampling_stats_and_recommendation() {
        let fast = series(&[0.0; 4], &[0.0, 0.1, 0.2, 0.4]);
        let slow = series(&[0.0; 3], &[0.0, 0.5, 1.0]);
        let a = analyze_sampling("fast", &fast).unwrap();
        let b = analyze_sampling("slow", &slow).unwrap();
        assert!(approx_eq(a.min_interval_s, 0.1));
        assert!(approx_eq(a.max_interval_s, 0.2));
        assert!(approx_eq(a.suggested_min_raster_s, 0.11));
        assert!(approx_eq(recommend_raster([&a, &b]).unwrap(), 0.55));
        assert_eq!(recommend_raster(std::iter::empty()), None);
        assert!(matches!(
            analyze_sampling("one", &series(&[1.0], &[0.0])),
            Err(CalmapError::EmptyChannel { got: 1, .. })
        ));
    }

    fn two_channel_log() -> ChannelLog {
        let mut log = ChannelLog::new("log");
        log.insert("a", series(&[0.0, 1.0, 2.0], &[0.0, 1.0, 2.0]));
        log.insert("b", series(&[5.0, 5.0], &[0.5, 3.0]));
        log
    }

    #[test]
    fn truncation_lines_up_indices() {
        let log = two_channel_log();
        let set = align_channels(&log, &["a", "b"], 0.5, AlignMode::TruncateToShortest).unwrap();
        // a spans 2.0 s -> 5 samples, b spans 2.5 s -> 6 samples
        assert_eq!(set.len(), 5);
        assert_eq!(set.samples("b").unwrap().len(), 5);
        assert_eq!(set.timestamps()[0], 0.0);
        assert!(set
            .warnings()
            .contains(&AlignmentWarning::Truncated { channel: "b".into(), dropped: 1 }));
    }

    #[test]
    fn overlap_window_uses_common_span() {
        let log = two_channel_log();
        let set = align_channels(&log, &["a", "b"], 0.5, AlignMode::OverlapWindow).unwrap();
        assert_eq!(set.timestamps(), &[0.5, 1.0, 1.5, 2.0]);
        assert_eq!(set.samples("a").unwrap(), &[0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn disjoint_channels_have_no_common_time_base() {
        let mut log = ChannelLog::new("log");
        log.insert("a", series(&[0.0, 1.0], &[0.0, 1.0]));
        log.insert("b", series(&[0.0, 1.0], &[2.0, 3.0]));
        let err = align_channels(&log, &["a", "b"], 0.5, AlignMode::OverlapWindow).unwrap_err();
        assert!(matches!(err, CalmapError::NoCommonTimeBase { .. }));
    }

    #[test]
    fn empty_channel_is_a_length_mismatch() {
        let mut log = two_channel_log();
        log.insert("empty", series(&[], &[]));
        let err =
            align_channels(&log, &["a", "empty"], 0.5, AlignMode::TruncateToShortest).unwrap_err();
        assert!(matches!(
            err,
            CalmapError::AlignmentLengthMismatch {
                ref channel,
                channel_len: 0,
                reference_len: 3,
                ..
            } if channel == "empty"
        ));
    }

    #[test]
    fn finer_raster_warns_but_proceeds() {
        let log = two_channel_log();
        let set = align_channels(&log, &["a"], 0.1, AlignMode::TruncateToShortest).unwrap();
        assert_eq!(set.len(), 21);
        assert!(matches!(
            set.warnings()[0],
            AlignmentWarning::FinerThanNative { ref channel, .. } if channel == "a"
        ));
    }

    #[test]
    fn explicit_time_base_is_kept() {
        let log = two_channel_log();
        let set = align_at(&log, &["a"], &[-1.0, 0.25, 5.0]).unwrap();
        assert_eq!(set.samples("a").unwrap(), &[0.0, 0.25, 2.0]);
        assert_eq!(set.raster_s(), None);
        assert!(approx_eq(set.sample_period_s(), 1.25));
        assert!(align_at(&log, &["a"], &[1.0, 0.0]).is_err());
        assert!(set.warnings().is_empty());
    }

    #[test]
    fn explicit_time_base_rejects_repeated_timestamps() {
        let log = two_channel_log();
        let err = align_at(&log, &["a"], &[0.5, 0.5, 0.5]).unwrap_err();
        assert!(matches!(err, CalmapError::InvalidParameter(_)));
        assert!(align_at(&log, &["a"], &[0.0, 1.0, 1.0, 2.0]).is_err());
    }

    #[test]
    fn explicit_time_base_warns_when_finer_than_native() {
        let log = two_channel_log();
        let set = align_at(&log, &["a"], &[0.0, 0.5, 2.0]).unwrap();
        assert!(matches!(
            set.warnings(),
            [AlignmentWarning::FinerThanNative { channel, raster_s, .. }]
                if channel == "a" && *raster_s == 0.5
        ));
        let series = set.series("a").unwrap();
        assert!(TimeSeries::new(series.samples().to_vec(), series.timestamps().to_vec()).is_ok());
    }

    #[test]
    fn missing_channel_is_reported() {
        let log = two_channel_log();
        let err = align_channels(&log, &["a", "nope"], 0.5, AlignMode::TruncateToShortest)
            .unwrap_err();
        assert!(
            matches!(err, CalmapError::ChannelNotFound { ref channel, .. } if channel == "nope")
        );
    }
}
