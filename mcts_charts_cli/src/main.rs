use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use mcts_charts::{
    derive_node_metrics, derive_run_metrics, load_node_table, load_run_table, plan_charts,
    run_pipeline, ChartSpec, Column, OutputFormat, PipelineConfig, RenderOptions, SliceFilter,
    SliceFilters, Table, DEFAULT_FIXED_EXPLORATION_FACTOR, DEFAULT_FIXED_NUM_RUNS,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "MCTS tuning benchmark charts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render the full chart battery from the node and run tables
    Render(RenderArgs),
    /// Print the chart battery without loading any data
    Plan(PlanArgs),
    /// Summarise the node and run tables after deriving metrics
    Inspect(InspectArgs),
}

#[derive(Parser, Debug)]
struct SourceArgs {
    /// Node table CSV (numRuns, explorationFactor, wins, playouts)
    #[arg(long, env = "MCTS_NODE_TABLE", value_hint = ValueHint::FilePath)]
    node_table: PathBuf,

    /// Run table CSV (numRuns, explorationFactor, explore_time, select_time, sim_time, bp_time)
    #[arg(long, env = "MCTS_RUN_TABLE", value_hint = ValueHint::FilePath)]
    run_table: PathBuf,
}

#[derive(Parser, Debug)]
struct SliceArgs {
    /// numRuns value isolated by the fixed-slice bar charts
    #[arg(long, default_value_t = DEFAULT_FIXED_NUM_RUNS)]
    fixed_num_runs: u32,

    /// explorationFactor value isolated by the fixed-slice bar charts
    #[arg(long, default_value_t = DEFAULT_FIXED_EXPLORATION_FACTOR)]
    fixed_exploration_factor: f64,
}

impl SliceArgs {
    fn filters(&self) -> SliceFilters {
        SliceFilters::new(self.fixed_num_runs, self.fixed_exploration_factor)
    }
}

#[derive(Parser, Debug)]
struct RenderArgs {
    #[command(flatten)]
    sources: SourceArgs,

    #[command(flatten)]
    slices: SliceArgs,

    /// Directory for chart files (defaults next to the node table)
    #[arg(short, long, value_hint = ValueHint::DirPath)]
    output_dir: Option<PathBuf>,

    /// Chart file format
    #[arg(long, value_enum, default_value_t = FormatOpt::Pdf)]
    format: FormatOpt,

    /// Canvas width in pixels
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Canvas height in pixels
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Stop at the first chart that fails instead of continuing
    #[arg(long, action = ArgAction::SetTrue)]
    fail_fast: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct PlanArgs {
    #[command(flatten)]
    slices: SliceArgs,

    /// Output path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Emit JSON instead of CSV
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    #[command(flatten)]
    sources: SourceArgs,

    #[command(flatten)]
    slices: SliceArgs,

    /// Report path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatOpt {
    Pdf,
    Svg,
}

impl From<FormatOpt> for OutputFormat {
    fn from(value: FormatOpt) -> Self {
        match value {
            FormatOpt::Pdf => OutputFormat::Pdf,
            FormatOpt::Svg => OutputFormat::Svg,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Render(args) => args.verbose,
        Command::Plan(args) => args.verbose,
        Command::Inspect(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Render(args) => handle_render(args),
        Command::Plan(args) => handle_plan(args),
        Command::Inspect(args) => handle_inspect(args),
    }
}

fn handle_render(args: RenderArgs) -> Result<()> {
    if args.width == 0 || args.height == 0 {
        return Err(anyhow!("canvas size must be non-zero"));
    }

    let mut config = PipelineConfig::new(&args.sources.node_table, &args.sources.run_table);
    config.output_dir = args.output_dir.clone();
    config.slices = args.slices.filters();
    config.render = RenderOptions {
        width: args.width,
        height: args.height,
        format: args.format.into(),
    };
    config.fail_fast = args.fail_fast;

    let report = run_pipeline(&config).context("failed to load benchmark tables")?;

    info!(
        "Charts written: {} of {} ({})",
        report.written.len(),
        report.written.len() + report.failures.len(),
        config.resolved_output_dir().display()
    );
    if report.aborted {
        warn!("Stopped after first failure (--fail-fast)");
    }
    if !report.is_success() {
        for failure in &report.failures {
            warn!("Failed: {}", failure.error);
        }
        return Err(anyhow!("{} chart(s) failed", report.failures.len()));
    }
    Ok(())
}

fn handle_plan(args: PlanArgs) -> Result<()> {
    let specs = plan_charts(&args.slices.filters());
    let to_stdout = args.output.as_os_str() == "-";

    if args.json {
        let text = serde_json::to_string_pretty(&specs)?;
        if to_stdout {
            println!("{}", text);
        } else {
            fs::write(&args.output, text)
                .with_context(|| format!("failed to write {}", args.output.display()))?;
        }
    } else if to_stdout {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_plan_rows(&specs, &mut writer)?;
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_plan_rows(&specs, &mut writer)?;
    }

    if !to_stdout {
        info!("Wrote chart plan: {}", args.output.display());
    }
    Ok(())
}

fn write_plan_rows<W: Write>(specs: &[ChartSpec], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "file_name",
        "kind",
        "table",
        "x",
        "y",
        "hue",
        "filter",
        "title",
        "x_label",
        "y_label",
        "legend_title",
        "grid",
    ])?;

    for spec in specs {
        writer.write_record([
            spec.file_name.clone(),
            spec.kind.to_string(),
            spec.table.to_string(),
            spec.x.to_string(),
            spec.y.to_string(),
            spec.hue.map(|c| c.to_string()).unwrap_or_default(),
            spec.filter
                .as_ref()
                .map(|f| f.to_string())
                .unwrap_or_default(),
            spec.title.clone(),
            spec.x_label.clone(),
            spec.y_label.clone(),
            spec.legend_title.clone().unwrap_or_default(),
            spec.grid.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn handle_inspect(args: InspectArgs) -> Result<()> {
    let report = inspect_report(
        &args.sources.node_table,
        &args.sources.run_table,
        &args.slices.filters(),
    )?;

    if args.output.as_os_str() == "-" {
        print!("{}", report);
        io::stdout().flush()?;
    } else {
        write_report(&args.output, &report)?;
        info!("Inspection report written: {}", args.output.display());
    }
    Ok(())
}

fn inspect_report(node_path: &Path, run_path: &Path, slices: &SliceFilters) -> Result<String> {
    let node = load_node_table(node_path)
        .with_context(|| format!("failed to load {}", node_path.display()))?;
    let run = load_run_table(run_path)
        .with_context(|| format!("failed to load {}", run_path.display()))?;
    let node = derive_node_metrics(node)?;
    let run = derive_run_metrics(run)?;

    let mut report = String::new();
    report.push_str(&format!("NODE TABLE: {}\n", node_path.display()));
    summarize_table(&mut report, &node.table);
    report.push_str(&format!(
        "  undefined {}: {}\n",
        Column::WinRatio,
        node.undefined.len()
    ));
    report.push_str(&format!(
        "  {} range: {}\n",
        Column::WinRatio,
        value_range(&node.table, Column::WinRatio)
    ));
    report.push('\n');

    report.push_str(&format!("RUN TABLE: {}\n", run_path.display()));
    summarize_table(&mut report, &run.table);
    report.push_str(&format!(
        "  undefined {}: {}\n",
        Column::TotalTime,
        run.undefined.len()
    ));
    report.push_str(&format!(
        "  {} range: {}\n",
        Column::TotalTime,
        value_range(&run.table, Column::TotalTime)
    ));
    for slice in [&slices.num_runs, &slices.exploration_factor] {
        report.push_str(&format!("  slice {}: {}\n", slice, slice_rows(&run.table, slice)));
    }
    Ok(report)
}

fn summarize_table(report: &mut String, table: &Table) {
    report.push_str(&format!("  rows: {}\n", table.len()));
    for column in [Column::NumRuns, Column::ExplorationFactor] {
        let levels: Vec<String> = table
            .levels(column)
            .into_iter()
            .map(|v| column.format_value(v))
            .collect();
        report.push_str(&format!(
            "  {} levels ({}): {}\n",
            column,
            levels.len(),
            levels.join(", ")
        ));
    }
}

fn value_range(table: &Table, column: Column) -> String {
    let finite: Vec<f64> = table
        .column(column)
        .unwrap_or(&[])
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .collect();
    if finite.is_empty() {
        return "n/a".into();
    }
    let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    format!("{:.3} .. {:.3}", min, max)
}

fn slice_rows(table: &Table, slice: &SliceFilter) -> String {
    table
        .filter(slice)
        .map(|t| format!("{} rows", t.len()))
        .unwrap_or_else(|| "n/a".into())
}

fn write_report(path: &Path, report: &str) -> Result<()> {
    fs::write(path, report).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_args_defaults() {
        let cli = Cli::try_parse_from([
            "mcts-charts",
            "render",
            "--node-table",
            "bestNode.csv",
            "--run-table",
            "mctsRunTime.csv",
        ])
        .unwrap();
        match cli.command {
            Command::Render(args) => {
                assert_eq!(args.slices.fixed_num_runs, 128);
                assert_eq!(args.slices.fixed_exploration_factor, 1.14);
                assert!(matches!(args.format, FormatOpt::Pdf));
                assert_eq!((args.width, args.height), (640, 480));
                assert!(!args.fail_fast);
                assert!(args.output_dir.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_slice_overrides() {
        let cli = Cli::try_parse_from([
            "mcts-charts",
            "plan",
            "--fixed-num-runs",
            "64",
            "--fixed-exploration-factor",
            "2.0",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Command::Plan(args) => {
                let filters = args.slices.filters();
                assert_eq!(filters.num_runs.tag, "64");
                assert_eq!(filters.exploration_factor.value, 2.0);
                assert!(args.json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    const NODE_CSV: &str = "numRuns,explorationFactor,playouts,wins\n\
                            32,1.0,10,5\n\
                            128,1.14,0,0\n\
                            128,2.0,10,8\n";
    const RUN_CSV: &str = "numRuns,explorationFactor,explore_time,select_time,sim_time,bp_time\n\
                           128,1.14,1.0,2.0,3.0,4.0\n\
                           64,0.5,2,2,2,2\n";

    fn write_sources(dir: &Path) -> (PathBuf, PathBuf) {
        let node = dir.join("bestNode.csv");
        let run = dir.join("mctsRunTime.csv");
        fs::write(&node, NODE_CSV).unwrap();
        fs::write(&run, RUN_CSV).unwrap();
        (node, run)
    }

    #[test]
    fn test_inspect_report() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (node, run) = write_sources(tmp.path());
        let report = inspect_report(&node, &run, &SliceFilters::default()).unwrap();

        assert!(report.contains("  rows: 3\n"));
        assert!(report.contains("  numRuns levels (2): 32, 128\n"));
        assert!(report.contains("  explorationFactor levels (3): 1.0, 1.14, 2.0\n"));
        assert!(report.contains("  undefined winRatio: 1\n"));
        assert!(report.contains("  winRatio range: 0.500 .. 0.800\n"));
        assert!(report.contains("  totalTime range: 8.000 .. 10.000\n"));
        assert!(report.contains("  slice numRuns == 128: 1 rows\n"));
        assert!(report.contains("  slice explorationFactor == 1.14: 1 rows\n"));
    }

    #[test]
    fn test_inspect_missing_source_names_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (node, _) = write_sources(tmp.path());
        let missing = tmp.path().join("absent.csv");
        let err = inspect_report(&node, &missing, &SliceFilters::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("absent.csv"));
    }

    #[test]
    fn test_render_fails_when_any_chart_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (node, run) = write_sources(tmp.path());
        let out = tmp.path().join("missing").join("dir");
        let argv: Vec<std::ffi::OsString> = vec![
            "mcts-charts".into(),
            "render".into(),
            "--node-table".into(),
            node.into_os_string(),
            "--run-table".into(),
            run.into_os_string(),
            "--output-dir".into(),
            out.into_os_string(),
        ];
        let cli = Cli::try_parse_from(argv).unwrap();
        let Command::Render(args) = cli.command else {
            panic!("expected render");
        };
        let err = handle_render(args).unwrap_err();
        assert_eq!(err.to_string(), "22 chart(s) failed");
    }

    #[test]
    fn test_plan_csv_rows() {
        let specs = plan_charts(&SliceFilters::default());
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_plan_rows(&specs, &mut writer).unwrap();
        let bytes = writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 23);
        assert!(lines[1].starts_with("wrnr.pdf,line,node table,numRuns,winRatio,explorationFactor,,"));
        assert!(lines[22].starts_with("totalTime_ef_root2.pdf,bar,run table,numRuns,totalTime,,explorationFactor == 1.14,"));
    }
}
