use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use calmap::{
    accumulate_sources, aggregate_sources, analyze_channels, build_grid_with_diagnostics,
    calculate_channel, difference, flatten_percentages, open_log, read_surface_table_path,
    recommend_raster, uniform_timestamps, AlignMode, AxisSpec, CalculatedChannel,
    ChannelAnalysis, ChannelMapping, DelimitedTiming, DiffMode, GridSpec, LogSource,
    Normalization, OperatingPointRequest, Params, RangeFilter, SamplingStats, SurfaceGrid,
    TableColumns, TimeBase, TimeSeriesSource,
};
use chrono::Local;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use ndarray::Array2;
use rayon::prelude::*;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Surface-table and drive-log usage CLI", long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the dense grid of a surface table and write it as a matrix CSV
    Grid(GridArgs),
    /// Report channel sampling intervals and a recommended raster
    Analyze(AnalyzeArgs),
    /// Evaluate surfaces along logs and write calculated-channel CSVs
    Calc(CalcArgs),
    /// Operating-point occupancy of one or more logs on a surface grid
    Usage(UsageArgs),
    /// Average a logged channel per grid cell
    Surface(SurfaceArgs),
}

#[derive(Args, Debug, Clone)]
struct TableArgs {
    /// Surface table CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    table: Option<PathBuf>,

    /// Table column used as X
    #[arg(long, default_value = "x")]
    x_col: String,

    /// Table column used as Y
    #[arg(long, default_value = "y")]
    y_col: String,

    /// Table column used as Z
    #[arg(long, default_value = "z")]
    z_col: String,

    /// Resample the X axis as min:max:intervals
    #[arg(long)]
    x_axis: Option<String>,

    /// Resample the Y axis as min:max:intervals
    #[arg(long)]
    y_axis: Option<String>,
}

impl TableArgs {
    fn columns(&self) -> TableColumns {
        TableColumns::new(&self.x_col, &self.y_col, &self.z_col)
    }

    /// Axis flags override the configured grid spec.
    fn grid_spec(&self, base: &GridSpec) -> Result<GridSpec> {
        let mut spec = base.clone();
        if let Some(axis) = self.x_axis.as_deref() {
            spec.x = parse_axis(axis)?;
        }
        if let Some(axis) = self.y_axis.as_deref() {
            spec.y = parse_axis(axis)?;
        }
        spec.validate()?;
        Ok(spec)
    }
}

#[derive(Args, Debug, Clone)]
struct LogArgs {
    /// Time column (seconds) of delimited logs; without it rows are `--period` apart
    #[arg(long)]
    time_column: Option<String>,

    /// Row period (seconds) of delimited logs without a time column
    #[arg(long, default_value_t = 0.01)]
    period: f64,
}

impl LogArgs {
    fn timing(&self) -> DelimitedTiming {
        match &self.time_column {
            Some(name) => DelimitedTiming::Column { name: name.clone() },
            None => DelimitedTiming::FixedPeriod {
                period_s: self.period,
            },
        }
    }
}

#[derive(Parser, Debug)]
struct GridArgs {
    #[command(flatten)]
    table: TableArgs,

    /// Output matrix CSV path (`-` for stdout)
    #[arg(short, long, default_value = "grid.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct AnalyzeArgs {
    /// Logs to inspect (.csv, .tsv, .json)
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    #[command(flatten)]
    log: LogArgs,

    /// Channels to analyze (comma separated; default all)
    #[arg(long, value_delimiter = ',')]
    channels: Vec<String>,

    /// Emit a JSON report instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Report path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct CalcArgs {
    /// Logs to extend with calculated channels
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// JSON job file with `params` and `channels`
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    #[command(flatten)]
    table: TableArgs,

    #[command(flatten)]
    log: LogArgs,

    /// Name of the calculated channel (with --table)
    #[arg(long)]
    name: Option<String>,

    /// Log channel mapped onto the table's X axis (with --table)
    #[arg(long)]
    x_channel: Option<String>,

    /// Log channel mapped onto the table's Y axis (with --table)
    #[arg(long)]
    y_channel: Option<String>,

    /// Unit of the calculated channel
    #[arg(long, default_value = "")]
    unit: String,

    /// Free-text comment stored with the channel
    #[arg(long, default_value = "")]
    comment: String,

    /// Target raster in seconds (default: recommended from the mapped channels)
    #[arg(long)]
    raster: Option<f64>,

    /// Directory for the output CSVs (default: next to each log)
    #[arg(long, value_hint = ValueHint::DirPath)]
    output_dir: Option<PathBuf>,

    /// Also write a JSON sidecar with channel provenance
    #[arg(long, action = ArgAction::SetTrue)]
    metadata: bool,
}

#[derive(Parser, Debug)]
struct UsageArgs {
    /// Logs to aggregate
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// JSON job file with `params`
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    #[command(flatten)]
    table: TableArgs,

    #[command(flatten)]
    log: LogArgs,

    /// Log channel on the X axis
    #[arg(long)]
    x_channel: String,

    /// Log channel on the Y axis
    #[arg(long)]
    y_channel: String,

    /// Target raster in seconds
    #[arg(long)]
    raster: Option<f64>,

    #[arg(long, value_enum)]
    align_mode: Option<AlignModeOpt>,

    #[arg(long, value_enum)]
    normalization: Option<NormalizationOpt>,

    /// Range filter `channel:within|outside:min:max` (repeatable)
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Logs to compare against
    #[arg(long, value_hint = ValueHint::FilePath)]
    compare: Vec<PathBuf>,

    #[arg(long, value_enum, default_value_t = DiffModeOpt::Absolute)]
    diff_mode: DiffModeOpt,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "usage.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct SurfaceArgs {
    /// Logs to average
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// JSON job file with `params`
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    // axes come from the table's grid, or from --x-axis/--y-axis alone
    #[command(flatten)]
    table: TableArgs,

    #[command(flatten)]
    log: LogArgs,

    #[arg(long)]
    x_channel: String,

    #[arg(long)]
    y_channel: String,

    /// Channel averaged per cell
    #[arg(long)]
    z_channel: String,

    #[arg(long)]
    raster: Option<f64>,

    #[arg(long, value_enum)]
    align_mode: Option<AlignModeOpt>,

    /// Range filter `channel:within|outside:min:max` (repeatable)
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Output matrix CSV path (`-` for stdout)
    #[arg(short, long, default_value = "surface.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum AlignModeOpt {
    Truncate,
    Overlap,
}

impl From<AlignModeOpt> for AlignMode {
    fn from(value: AlignModeOpt) -> Self {
        match value {
            AlignModeOpt::Truncate => AlignMode::TruncateToShortest,
            AlignModeOpt::Overlap => AlignMode::OverlapWindow,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum NormalizationOpt {
    Inside,
    InsideOnly,
    All,
}

impl From<NormalizationOpt> for Normalization {
    fn from(value: NormalizationOpt) -> Self {
        match value {
            NormalizationOpt::Inside => Normalization::InsidePoints,
            NormalizationOpt::InsideOnly => Normalization::InsideOnly,
            NormalizationOpt::All => Normalization::AllPoints,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DiffModeOpt {
    Absolute,
    Relative,
}

impl From<DiffModeOpt> for DiffMode {
    fn from(value: DiffModeOpt) -> Self {
        match value {
            DiffModeOpt::Absolute => DiffMode::Absolute,
            DiffModeOpt::Relative => DiffMode::Relative,
        }
    }
}

/// Job file: resolved processing params plus calculated-channel definitions.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct JobFile {
    params: Params,
    channels: Vec<ChannelJob>,
}

#[derive(Deserialize, Debug)]
struct ChannelJob {
    #[serde(flatten)]
    mapping: ChannelMapping,
    table: PathBuf,
    columns: TableColumns,
    #[serde(default)]
    grid: Option<GridSpec>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Grid(args) => handle_grid(args),
        Command::Analyze(args) => handle_analyze(args),
        Command::Calc(args) => handle_calc(args),
        Command::Usage(args) => handle_usage(args),
        Command::Surface(args) => handle_surface(args),
    }
}

fn handle_grid(args: GridArgs) -> Result<()> {
    let table_path = args
        .table
        .table
        .as_ref()
        .ok_or_else(|| anyhow!("--table is required"))?;
    let spec = args.table.grid_spec(&GridSpec::default())?;
    let table = read_surface_table_path(table_path, &args.table.columns())?;
    let build = build_grid_with_diagnostics(&table.points, &spec)
        .with_context(|| format!("failed to build grid from {}", table_path.display()))?;
    let d = &build.diagnostics;
    info!(
        "{}: {} rows read, {} dropped, {} distinct points -> {}x{} grid ({} linear, {} nearest-filled{})",
        table_path.display(),
        table.rows_read,
        table.rows_dropped,
        d.distinct_points,
        build.grid.y_axis().len(),
        build.grid.x_axis().len(),
        d.linear_nodes,
        d.nearest_filled_nodes,
        if d.degenerate_fallback {
            ", degenerate layout"
        } else {
            ""
        }
    );
    write_matrix(
        &args.output,
        build.grid.x_axis(),
        build.grid.y_axis(),
        build.grid.values(),
    )
}

fn handle_analyze(args: AnalyzeArgs) -> Result<()> {
    let logs = load_logs(&args.inputs, &args.log.timing());
    if logs.is_empty() {
        bail!("no log could be loaded");
    }

    let mut report: BTreeMap<String, BTreeMap<String, ChannelAnalysis>> = BTreeMap::new();
    for log in &logs {
        let names = if args.channels.is_empty() {
            log.channel_names()
        } else {
            args.channels.clone()
        };
        report.insert(log.id().to_string(), analyze_channels(log, names.as_slice()));
    }
    let timed: Vec<&SamplingStats> = report
        .values()
        .flat_map(|channels| channels.values())
        .filter_map(|a| match a {
            ChannelAnalysis::Timed(stats) => Some(stats),
            _ => None,
        })
        .collect();
    let recommended = recommend_raster(timed);

    let mut out = open_output(&args.output)?;
    if args.json {
        let doc = json!({
            "logs": report,
            "recommended_raster_s": recommended,
        });
        serde_json::to_writer_pretty(&mut out, &doc)?;
        writeln!(out)?;
    } else {
        for (log, channels) in &report {
            writeln!(out, "{log}")?;
            for (name, analysis) in channels {
                match analysis {
                    ChannelAnalysis::Timed(s) => writeln!(
                        out,
                        "  {name}: {} samples over {:.3} s, interval min {:.6} / avg {:.6} / max {:.6} s, suggested raster >= {:.6} s",
                        s.sample_count,
                        s.duration_s,
                        s.min_interval_s,
                        s.avg_interval_s,
                        s.max_interval_s,
                        s.suggested_min_raster_s
                    )?,
                    ChannelAnalysis::Untimed { sample_count } => {
                        writeln!(out, "  {name}: {sample_count} samples, no native timing")?
                    }
                    ChannelAnalysis::Failed { reason } => writeln!(out, "  {name}: {reason}")?,
                }
            }
        }
        match recommended {
            Some(r) => writeln!(out, "recommended raster: {r:.6} s")?,
            None => writeln!(
                out,
                "recommended raster: none available, default {} s",
                calmap::DEFAULT_RASTER_S
            )?,
        }
    }
    Ok(())
}

fn handle_calc(args: CalcArgs) -> Result<()> {
    let job = load_job(args.config.as_deref())?;
    let mut params = job.params;
    if args.raster.is_some() {
        params.raster_s = args.raster;
    }
    params.validate()?;

    let mut surfaces: Vec<(ChannelMapping, SurfaceGrid)> = Vec::new();
    for channel in &job.channels {
        let spec = channel.grid.clone().unwrap_or_else(|| params.grid.clone());
        let grid = build_table_grid(&channel.table, &channel.columns, &spec)?;
        surfaces.push((channel.mapping.clone(), grid));
    }
    if let Some(table) = args.table.table.as_ref() {
        let mapping = ChannelMapping {
            name: args
                .name
                .clone()
                .ok_or_else(|| anyhow!("--name is required with --table"))?,
            x_channel: args
                .x_channel
                .clone()
                .ok_or_else(|| anyhow!("--x-channel is required with --table"))?,
            y_channel: args
                .y_channel
                .clone()
                .ok_or_else(|| anyhow!("--y-channel is required with --table"))?,
            unit: args.unit.clone(),
            comment: args.comment.clone(),
        };
        let spec = args.table.grid_spec(&params.grid)?;
        let grid = build_table_grid(table, &args.table.columns(), &spec)?;
        surfaces.push((mapping, grid));
    }
    if surfaces.is_empty() {
        bail!("no calculated channel configured; pass --table or --config");
    }

    if let Some(dir) = args.output_dir.as_ref() {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let logs = load_logs(&args.inputs, &args.log.timing());
    let mut written = 0usize;
    for log in &logs {
        match calc_log(log, &surfaces, &params, args.output_dir.as_deref(), args.metadata) {
            Ok(path) => {
                info!("{} -> {}", log.id(), path.display());
                written += 1;
            }
            Err(err) => warn!("{}: {err:#}", log.id()),
        }
    }
    if written == 0 {
        bail!("no calculated channels were written");
    }
    Ok(())
}

fn calc_log(
    log: &LogSource,
    surfaces: &[(ChannelMapping, SurfaceGrid)],
    params: &Params,
    output_dir: Option<&Path>,
    metadata: bool,
) -> Result<PathBuf> {
    let mut names: Vec<&str> = Vec::new();
    for (mapping, _) in surfaces {
        for name in [mapping.x_channel.as_str(), mapping.y_channel.as_str()] {
            if log.contains(name) && !names.contains(&name) {
                names.push(name);
            }
        }
    }
    if names.is_empty() {
        bail!("none of the mapped channels are present");
    }

    let analysis = analyze_channels(log, names.as_slice());
    let stats: Vec<&SamplingStats> = analysis
        .values()
        .filter_map(|a| match a {
            ChannelAnalysis::Timed(stats) => Some(stats),
            _ => None,
        })
        .collect();
    let raster = params.resolve_raster(stats);

    let mut start = f64::INFINITY;
    let mut end = f64::NEG_INFINITY;
    for name in &names {
        let series = log.get(name)?;
        if let (Some(s), Some(e)) = (series.start(), series.end()) {
            start = start.min(s);
            end = end.max(e);
        }
    }
    if start > end {
        bail!("mapped channels have no samples");
    }
    // every mapping shares one explicit time base, so no alignment mode applies
    let time_base = TimeBase::Timestamps(uniform_timestamps(start, end, raster)?);
    debug!("{}: raster {raster} s over [{start}, {end}]", log.id());

    let mut channels: Vec<CalculatedChannel> = Vec::new();
    for (mapping, grid) in surfaces {
        match calculate_channel(grid, log, mapping, &time_base) {
            Ok(channel) => {
                info!(
                    "{}: '{}' has {}/{} valid points",
                    log.id(),
                    channel.name,
                    channel.valid_points,
                    channel.len()
                );
                channels.push(channel);
            }
            Err(err) => warn!("skipping '{}': {err}", mapping.name),
        }
    }
    let Some(first) = channels.first() else {
        bail!("every calculated channel failed");
    };

    let path = calculated_output_path(Path::new(log.id()), output_dir);
    let file =
        File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    let mut header = vec!["Time".to_string()];
    header.extend(channels.iter().map(|c| c.name.clone()));
    writer.write_record(&header)?;
    for (k, t) in first.timestamps.iter().enumerate() {
        let mut row = vec![t.to_string()];
        row.extend(
            channels
                .iter()
                .map(|c| c.values[k].map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&row)?;
    }
    writer.flush()?;

    if metadata {
        let doc = json!({
            "source": log.id(),
            "raster_s": raster,
            "channels": channels.iter().map(|c| json!({
                "name": c.name,
                "unit": c.unit,
                "description": c.description,
                "valid_points": c.valid_points,
                "surface_sha256": c.surface_fingerprint,
            })).collect::<Vec<_>>(),
        });
        let meta_path = path.with_extension("json");
        fs::write(&meta_path, serde_json::to_string_pretty(&doc)?)
            .with_context(|| format!("failed to write {}", meta_path.display()))?;
    }
    Ok(path)
}

fn calculated_output_path(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log".to_string());
    let name = format!(
        "{stem}_with_calculated_channels_{}.csv",
        Local::now().format("%Y%m%d_%H%M%S")
    );
    match output_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

fn handle_usage(args: UsageArgs) -> Result<()> {
    let job = load_job(args.config.as_deref())?;
    let mut params = job.params;
    apply_overrides(&mut params, args.raster, args.align_mode, &args.filters)?;
    if let Some(normalization) = args.normalization {
        params.normalization = normalization.into();
    }
    params.validate()?;

    let table = args
        .table
        .table
        .as_ref()
        .ok_or_else(|| anyhow!("--table is required"))?;
    let spec = args.table.grid_spec(&params.grid)?;
    let grid = build_table_grid(table, &args.table.columns(), &spec)?;

    let timing = args.log.timing();
    let logs = load_logs(&args.inputs, &timing);
    if logs.is_empty() {
        bail!("no log could be loaded");
    }
    let channels = [args.x_channel.as_str(), args.y_channel.as_str()];
    let request = OperatingPointRequest {
        x_channel: args.x_channel.clone(),
        y_channel: args.y_channel.clone(),
        raster_s: params.raster_s.unwrap_or_else(|| {
            recommended_raster(&logs, &channels).unwrap_or(calmap::DEFAULT_RASTER_S)
        }),
        align_mode: params.align_mode,
        filters: params.filters.clone(),
    };
    info!("aligning {} log(s) at {} s", logs.len(), request.raster_s);

    let batch = aggregate_sources(&grid, &logs, &request)?;
    if batch.per_source.is_empty() {
        bail!("no log could be processed");
    }
    for usage in &batch.per_source {
        for skipped in &usage.skipped_filters {
            warn!(
                "{}: filter on '{}' skipped ({})",
                usage.source_id, skipped.channel, skipped.reason
            );
        }
    }
    let total = &batch.total;
    info!(
        "{} inside / {} outside of {} points, {:.1} s of {:.1} s outside the table",
        total.points_inside,
        total.points_outside,
        total.points_total,
        total.time_outside_s,
        total.total_time_s
    );

    let cells = flatten_percentages(&grid, total, params.normalization)?;
    let comparison = if args.compare.is_empty() {
        None
    } else {
        let compare_logs = load_logs(&args.compare, &timing);
        let compare_batch = aggregate_sources(&grid, &compare_logs, &request)?;
        if compare_batch.per_source.is_empty() {
            bail!("no comparison log could be processed");
        }
        let main_pct = total.percentages(params.normalization);
        let other_pct = compare_batch.total.percentages(params.normalization);
        let diff = difference(&main_pct, &other_pct, args.diff_mode.into())?;
        Some((other_pct, diff))
    };

    let mut writer = csv::Writer::from_writer(open_output(&args.output)?);
    let mut header = vec!["x", "y", "count", "percent"];
    if comparison.is_some() {
        header.extend(["compare_percent", "difference"]);
    }
    writer.write_record(&header)?;
    for cell in &cells {
        let mut row = vec![
            cell.x.to_string(),
            cell.y.to_string(),
            cell.count.to_string(),
            cell.percent.to_string(),
        ];
        if let Some((other, diff)) = comparison.as_ref() {
            row.push(other[[cell.row, cell.col]].to_string());
            row.push(diff[[cell.row, cell.col]].to_string());
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn handle_surface(args: SurfaceArgs) -> Result<()> {
    let job = load_job(args.config.as_deref())?;
    let mut params = job.params;
    apply_overrides(&mut params, args.raster, args.align_mode, &args.filters)?;
    params.validate()?;

    let spec = args.table.grid_spec(&params.grid)?;
    let (x_axis, y_axis) = match args.table.table.as_ref() {
        Some(table) => {
            let grid = build_table_grid(table, &args.table.columns(), &spec)?;
            (grid.x_axis().to_vec(), grid.y_axis().to_vec())
        }
        None => match (&spec.x, &spec.y) {
            (
                AxisSpec::Linspace {
                    min: x0,
                    max: x1,
                    intervals: nx,
                },
                AxisSpec::Linspace {
                    min: y0,
                    max: y1,
                    intervals: ny,
                },
            ) => (
                calmap::linspace(calmap::Axis::X, *x0, *x1, *nx)?,
                calmap::linspace(calmap::Axis::Y, *y0, *y1, *ny)?,
            ),
            _ => bail!("pass --table, or both --x-axis and --y-axis"),
        },
    };

    let logs = load_logs(&args.inputs, &args.log.timing());
    if logs.is_empty() {
        bail!("no log could be loaded");
    }
    let channels = [
        args.x_channel.as_str(),
        args.y_channel.as_str(),
        args.z_channel.as_str(),
    ];
    let request = OperatingPointRequest {
        x_channel: args.x_channel.clone(),
        y_channel: args.y_channel.clone(),
        raster_s: params.raster_s.unwrap_or_else(|| {
            recommended_raster(&logs, &channels).unwrap_or(calmap::DEFAULT_RASTER_S)
        }),
        align_mode: params.align_mode,
        filters: params.filters.clone(),
    };
    let batch = accumulate_sources(&x_axis, &y_axis, &logs, &request, &args.z_channel)?;
    if batch.sources.is_empty() {
        bail!("no log could be processed");
    }
    info!(
        "{} samples binned, {} outside the axes",
        batch.surface.points, batch.surface.points_rejected
    );
    let averaged = batch.surface.averaged()?;
    write_matrix(
        &args.output,
        averaged.x_axis(),
        averaged.y_axis(),
        averaged.values(),
    )
}

fn apply_overrides(
    params: &mut Params,
    raster: Option<f64>,
    align_mode: Option<AlignModeOpt>,
    filters: &[String],
) -> Result<()> {
    if raster.is_some() {
        params.raster_s = raster;
    }
    if let Some(mode) = align_mode {
        params.align_mode = mode.into();
    }
    for filter in filters {
        let parsed: RangeFilter = filter
            .parse()
            .with_context(|| format!("invalid --filter '{filter}'"))?;
        params.filters.push(parsed);
    }
    Ok(())
}

fn parse_axis(text: &str) -> Result<AxisSpec> {
    let parts: Vec<&str> = text.split(':').map(str::trim).collect();
    let [min, max, intervals] = parts.as_slice() else {
        bail!("axis '{text}' is not of the form min:max:intervals");
    };
    Ok(AxisSpec::Linspace {
        min: min
            .parse()
            .with_context(|| format!("invalid axis minimum '{min}'"))?,
        max: max
            .parse()
            .with_context(|| format!("invalid axis maximum '{max}'"))?,
        intervals: intervals
            .parse()
            .with_context(|| format!("invalid interval count '{intervals}'"))?,
    })
}

fn load_job(path: Option<&Path>) -> Result<JobFile> {
    let Some(path) = path else {
        return Ok(JobFile::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read job file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid job file", path.display()))
}

fn build_table_grid(path: &Path, columns: &TableColumns, spec: &GridSpec) -> Result<SurfaceGrid> {
    let table = read_surface_table_path(path, columns)?;
    if table.rows_dropped > 0 {
        debug!(
            "{}: dropped {} rows with non-numeric values",
            path.display(),
            table.rows_dropped
        );
    }
    let build = build_grid_with_diagnostics(&table.points, spec)
        .with_context(|| format!("failed to build grid from {}", path.display()))?;
    if build.diagnostics.degenerate_fallback {
        warn!(
            "{}: degenerate sample layout, grid uses nearest samples",
            path.display()
        );
    }
    Ok(build.grid)
}

/// Logs are parsed in parallel; a file that fails to load is reported and skipped.
fn load_logs(paths: &[PathBuf], timing: &DelimitedTiming) -> Vec<LogSource> {
    let loaded: Vec<Result<LogSource>> = paths
        .par_iter()
        .map(|path| {
            open_log(path, timing).with_context(|| format!("failed to load {}", path.display()))
        })
        .collect();
    loaded
        .into_iter()
        .filter_map(|result| match result {
            Ok(log) => Some(log),
            Err(err) => {
                warn!("{err:#}");
                None
            }
        })
        .collect()
}

fn recommended_raster(logs: &[LogSource], channels: &[&str]) -> Option<f64> {
    let stats: Vec<SamplingStats> = logs
        .iter()
        .flat_map(|log| analyze_channels(log, channels).into_values())
        .filter_map(|a| match a {
            ChannelAnalysis::Timed(stats) => Some(stats),
            _ => None,
        })
        .collect();
    recommend_raster(&stats)
}

fn open_output(path: &Path) -> Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        Ok(Box::new(io::stdout().lock()))
    } else {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Box::new(io::BufWriter::new(file)))
    }
}

/// First row holds the X axis, first column the Y axis; missing nodes are empty.
fn write_matrix(
    output: &Path,
    x_axis: &[f64],
    y_axis: &[f64],
    values: &Array2<Option<f64>>,
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(open_output(output)?);
    let mut header = vec!["y\\x".to_string()];
    header.extend(x_axis.iter().map(|x| x.to_string()));
    writer.write_record(&header)?;
    for (i, y) in y_axis.iter().enumerate() {
        let mut row = vec![y.to_string()];
        row.extend(
            values
                .row(i)
                .iter()
                .map(|z| z.map(|z| z.to_string()).unwrap_or_default()),
        );
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}
