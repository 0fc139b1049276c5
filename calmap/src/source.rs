//! Log sources exposing named channels as [`TimeSeries`].
//!
//! Every log format is read into a [`LogSource`] variant once; alignment,
//! evaluation and aggregation only see the [`TimeSeriesSource`] capability.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::align::{self, hold_sorted, interpolate_sorted, TimeSeries};
use crate::table::{delimited_reader, parse_numeric};
use crate::CalmapError;

/// Read access to the channels of one log.
pub trait TimeSeriesSource {
    /// Identifier used in error context, usually the file path.
    fn id(&self) -> &str;

    fn channel_names(&self) -> Vec<String>;

    fn get(&self, name: &str) -> Result<TimeSeries, CalmapError>;

    /// Whether timestamps were recorded rather than synthesized.
    fn has_native_timing(&self) -> bool {
        true
    }

    /// Resample a channel with the source's own method, if it has one.
    fn resample_native(
        &self,
        _name: &str,
        _raster: f64,
    ) -> Option<Result<TimeSeries, CalmapError>> {
        None
    }

    /// Sample a channel at ascending timestamps with the source's own method.
    fn resample_onto(
        &self,
        _name: &str,
        _timestamps: &[f64],
    ) -> Option<Result<Vec<f64>, CalmapError>> {
        None
    }

    fn contains(&self, name: &str) -> bool {
        self.channel_names().iter().any(|n| n == name)
    }
}

/// Where a delimited log takes its timestamps from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DelimitedTiming {
    /// A column holding time in seconds.
    Column { name: String },
    /// Row `k` is at `k * period_s`.
    FixedPeriod { period_s: f64 },
}

impl Default for DelimitedTiming {
    fn default() -> Self {
        DelimitedTiming::FixedPeriod { period_s: 0.01 }
    }
}

/// Delimited text log stored column by column. Non-numeric cells read as NaN.
#[derive(Clone, Debug)]
pub struct DelimitedLog {
    id: String,
    columns: Vec<String>,
    data: Vec<Vec<f64>>,
    timestamps: Vec<f64>,
    time_column: Option<usize>,
}

impl DelimitedLog {
    pub fn from_reader<R: Read>(
        id: impl Into<String>,
        reader: R,
        timing: &DelimitedTiming,
    ) -> Result<Self, CalmapError> {
        Self::read(id.into(), reader, b',', timing)
    }

    fn read<R: Read>(
        id: String,
        reader: R,
        delimiter: u8,
        timing: &DelimitedTiming,
    ) -> Result<Self, CalmapError> {
        let mut rdr = delimited_reader(reader, delimiter);
        let columns: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let mut data: Vec<Vec<f64>> = vec![Vec::new(); columns.len()];

        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            if row == 0 && is_units_row(&record) {
                continue;
            }
            for (k, column) in data.iter_mut().enumerate() {
                column.push(record.get(k).and_then(parse_numeric).unwrap_or(f64::NAN));
            }
        }

        let rows = data.first().map_or(0, Vec::len);
        let (timestamps, time_column) = match timing {
            DelimitedTiming::FixedPeriod { period_s } => {
                align::check_raster(*period_s)?;
                ((0..rows).map(|k| k as f64 * period_s).collect(), None)
            }
            DelimitedTiming::Column { name } => {
                let index = columns
                    .iter()
                    .position(|c| c == name)
                    .ok_or_else(|| CalmapError::MissingColumn(name.clone()))?;
                let keep: Vec<bool> = data[index].iter().map(|t| t.is_finite()).collect();
                if keep.iter().any(|k| !k) {
                    let dropped = keep.iter().filter(|k| !**k).count();
                    debug!(log = %id, dropped, "rows without time dropped");
                    for column in data.iter_mut() {
                        let mut flags = keep.iter();
                        column.retain(|_| flags.next().copied().unwrap_or(false));
                    }
                }
                let timestamps = data[index].clone();
                if let Some(k) = timestamps.windows(2).position(|w| w[1] <= w[0]) {
                    return Err(CalmapError::InvalidTimeSeries(format!(
                        "time column '{name}' not strictly increasing at row {}",
                        k + 1
                    )));
                }
                (timestamps, Some(index))
            }
        };

        debug!(log = %id, columns = columns.len(), rows = timestamps.len(), "delimited log read");
        Ok(Self {
            id,
            columns,
            data,
            timestamps,
            time_column,
        })
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// A units row has no numeric field and at least one non-empty one.
fn is_units_row(record: &csv::StringRecord) -> bool {
    let mut non_empty = record.iter().filter(|f| !f.is_empty()).peekable();
    non_empty.peek().is_some() && non_empty.all(|f| f.parse::<f64>().is_err())
}

impl TimeSeriesSource for DelimitedLog {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(k, _)| Some(*k) != self.time_column)
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn get(&self, name: &str) -> Result<TimeSeries, CalmapError> {
        let index = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| CalmapError::ChannelNotFound {
                channel: name.to_string(),
                source_id: self.id.clone(),
            })?;
        TimeSeries::new(self.data[index].clone(), self.timestamps.clone())
    }

    fn has_native_timing(&self) -> bool {
        self.time_column.is_some()
    }

    fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }
}

/// How a container channel is resampled between its own samples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeInterpolation {
    #[default]
    Linear,
    /// Previous-sample hold, for discrete states.
    Hold,
}

#[derive(Clone, Debug)]
struct LoggedChannel {
    series: TimeSeries,
    interpolation: NativeInterpolation,
}

/// Container of independently timed channels.
#[derive(Clone, Debug)]
pub struct ChannelLog {
    id: String,
    channels: BTreeMap<String, LoggedChannel>,
}

#[derive(Deserialize)]
struct RawContainer {
    channels: BTreeMap<String, RawChannel>,
}

#[derive(Deserialize)]
struct RawChannel {
    timestamps: Vec<f64>,
    samples: Vec<Option<f64>>,
    #[serde(default)]
    interpolation: NativeInterpolation,
}

impl ChannelLog {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            channels: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, series: TimeSeries) {
        self.insert_with(name, series, NativeInterpolation::Linear);
    }

    pub fn insert_with(
        &mut self,
        name: impl Into<String>,
        series: TimeSeries,
        interpolation: NativeInterpolation,
    ) {
        self.channels.insert(
            name.into(),
            LoggedChannel {
                series,
                interpolation,
            },
        );
    }

    /// Read `{"channels": {name: {timestamps, samples, interpolation}}}`; null samples are NaN.
    pub fn from_json_reader<R: Read>(
        id: impl Into<String>,
        reader: R,
    ) -> Result<Self, CalmapError> {
        let raw: RawContainer = serde_json::from_reader(reader)?;
        let mut log = ChannelLog::new(id);
        for (name, channel) in raw.channels {
            let samples = channel
                .samples
                .into_iter()
                .map(|s| s.unwrap_or(f64::NAN))
                .collect();
            let series = TimeSeries::new(samples, channel.timestamps).map_err(|e| {
                CalmapError::InvalidTimeSeries(format!("channel '{name}': {}", e.root()))
            })?;
            log.insert_with(name, series, channel.interpolation);
        }
        debug!(log = %log.id, channels = log.channels.len(), "channel log read");
        Ok(log)
    }
}

impl TimeSeriesSource for ChannelLog {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    fn get(&self, name: &str) -> Result<TimeSeries, CalmapError> {
        self.channels
            .get(name)
            .map(|c| c.series.clone())
            .ok_or_else(|| CalmapError::ChannelNotFound {
                channel: name.to_string(),
                source_id: self.id.clone(),
            })
    }

    fn resample_native(&self, name: &str, raster: f64) -> Option<Result<TimeSeries, CalmapError>> {
        let channel = self.channels.get(name)?;
        Some(match channel.interpolation {
            NativeInterpolation::Linear => align::resample_linear(&channel.series, raster),
            NativeInterpolation::Hold => align::resample_hold(&channel.series, raster),
        })
    }

    fn resample_onto(
        &self,
        name: &str,
        timestamps: &[f64],
    ) -> Option<Result<Vec<f64>, CalmapError>> {
        let channel = self.channels.get(name)?;
        let (times, values) = (channel.series.timestamps(), channel.series.samples());
        Some(Ok(match channel.interpolation {
            NativeInterpolation::Linear => interpolate_sorted(times, values, timestamps),
            NativeInterpolation::Hold => hold_sorted(times, values, timestamps),
        }))
    }

    fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }
}

/// A loaded log of any supported format.
#[derive(Clone, Debug)]
pub enum LogSource {
    Delimited(DelimitedLog),
    Channels(ChannelLog),
}

impl TimeSeriesSource for LogSource {
    fn id(&self) -> &str {
        match self {
            LogSource::Delimited(log) => log.id(),
            LogSource::Channels(log) => log.id(),
        }
    }

    fn channel_names(&self) -> Vec<String> {
        match self {
            LogSource::Delimited(log) => log.channel_names(),
            LogSource::Channels(log) => log.channel_names(),
        }
    }

    fn get(&self, name: &str) -> Result<TimeSeries, CalmapError> {
        match self {
            LogSource::Delimited(log) => log.get(name),
            LogSource::Channels(log) => log.get(name),
        }
    }

    fn has_native_timing(&self) -> bool {
        match self {
            LogSource::Delimited(log) => log.has_native_timing(),
            LogSource::Channels(log) => log.has_native_timing(),
        }
    }

    fn resample_native(&self, name: &str, raster: f64) -> Option<Result<TimeSeries, CalmapError>> {
        match self {
            LogSource::Delimited(log) => log.resample_native(name, raster),
            LogSource::Channels(log) => log.resample_native(name, raster),
        }
    }

    fn resample_onto(
        &self,
        name: &str,
        timestamps: &[f64],
    ) -> Option<Result<Vec<f64>, CalmapError>> {
        match self {
            LogSource::Delimited(log) => log.resample_onto(name, timestamps),
            LogSource::Channels(log) => log.resample_onto(name, timestamps),
        }
    }

    fn contains(&self, name: &str) -> bool {
        match self {
            LogSource::Delimited(log) => log.contains(name),
            LogSource::Channels(log) => log.contains(name),
        }
    }
}

/// Parse a log from bytes using the provided format hint (extension or name).
pub fn parse_log(
    input: &[u8],
    id: &str,
    format: &str,
    timing: &DelimitedTiming,
) -> Result<LogSource, CalmapError> {
    let format_lc = format.to_ascii_lowercase();
    let parsed = if format_lc.ends_with(".csv") || format_lc == "csv" {
        DelimitedLog::read(id.to_string(), input, b',', timing).map(LogSource::Delimited)
    } else if format_lc.ends_with(".tsv") || format_lc == "tsv" {
        DelimitedLog::read(id.to_string(), input, b'\t', timing).map(LogSource::Delimited)
    } else if format_lc.ends_with(".json") || format_lc == "json" {
        ChannelLog::from_json_reader(id, input).map(LogSource::Channels)
    } else {
        Err(CalmapError::UnsupportedFormat(format.to_string()))
    };
    parsed.map_err(|e| e.in_source(id))
}

pub fn open_log(path: &Path, timing: &DelimitedTiming) -> Result<LogSource, CalmapError> {
    let id = path.display().to_string();
    let bytes = fs::read(path).map_err(|e| CalmapError::from(e).in_source(&id))?;
    let format = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parse_log(&bytes, &id, &format, timing)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "time,rpm,load,gear\n\
                       s,1/min,-,-\n\
                       0.0,1000,0.1,1\n\
                       0.5,1500,0.2,2\n\
                       1.0,2000,n/a,2\n";

    #[test]
    fn delimited_log_with_time_column() {
        let timing = DelimitedTiming::Column {
            name: "time".into(),
        };
        let log = DelimitedLog::from_reader("drive.csv", LOG.as_bytes(), &timing).unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log.channel_names(), vec!["rpm", "load", "gear"]);
        assert!(log.has_native_timing());
        let load = log.get("load").unwrap();
        assert_eq!(load.timestamps(), &[0.0, 0.5, 1.0]);
        assert!(load.samples()[2].is_nan());
    }

    #[test]
    fn delimited_log_with_fixed_period() {
        let log =
            DelimitedLog::from_reader("drive.csv", LOG.as_bytes(), &DelimitedTiming::default())
                .unwrap();
        assert!(!log.has_native_timing());
        let rpm = log.get("rpm").unwrap();
        assert_eq!(rpm.timestamps(), &[0.0, 0.01, 0.02]);
        assert!(log.channel_names().contains(&"time".to_string()));
    }

    #[test]
    fn missing_channel_names_the_source() {
        let log =
            DelimitedLog::from_reader("drive.csv", LOG.as_bytes(), &DelimitedTiming::default())
                .unwrap();
        let err = log.get("speed").unwrap_err();
        assert_eq!(err.to_string(), "channel 'speed' not found in drive.csv");
    }

    #[test]
    fn channel_container_keeps_per_channel_timing() {
        let json = r#"{"channels": {
            "rpm": {"timestamps": [0.0, 1.0, 2.0], "samples": [1000, null, 3000]},
            "gear": {"timestamps": [0.0, 1.5], "samples": [1, 2], "interpolation": "hold"}
        }}"#;
        let source = parse_log(json.as_bytes(), "run.json", "run.json", &DelimitedTiming::default())
            .unwrap();
        assert!(matches!(source, LogSource::Channels(_)));
        assert_eq!(source.channel_names(), vec!["gear", "rpm"]);
        assert!(source.get("rpm").unwrap().samples()[1].is_nan());
        let gear = source.resample_native("gear", 0.5).unwrap().unwrap();
        assert_eq!(gear.samples(), &[1.0, 1.0, 1.0, 2.0]);
        let onto = source.resample_onto("gear", &[1.4, 1.6]).unwrap().unwrap();
        assert_eq!(onto, vec![1.0, 2.0]);
    }

    #[test]
    fn tab_separated_logs_are_supported() {
        let tsv = "t\tspeed\n0\t10\n1\t20\n";
        let timing = DelimitedTiming::Column { name: "t".into() };
        let source = parse_log(tsv.as_bytes(), "a.tsv", "a.tsv", &timing).unwrap();
        assert_eq!(source.get("speed").unwrap().samples(), &[10.0, 20.0]);
    }

    #[test]
    fn unknown_format_is_rejected_with_context() {
        let err = parse_log(b"", "x.mf4", "x.mf4", &DelimitedTiming::default()).unwrap_err();
        assert!(matches!(err.root(), CalmapError::UnsupportedFormat(_)));
        assert!(err.to_string().starts_with("x.mf4: "));
    }

    #[test]
    fn non_increasing_time_column_is_rejected() {
        let csv = "t,v\n0,1\n0,2\n";
        let timing = DelimitedTiming::Column { name: "t".into() };
        assert!(matches!(
            DelimitedLog::from_reader("a.csv", csv.as_bytes(), &timing),
            Err(CalmapError::InvalidTimeSeries(_))
        ));
    }
}
