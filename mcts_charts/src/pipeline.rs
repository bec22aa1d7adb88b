//! Load → derive → plan → render, one chart at a time.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::derive::{derive_node_metrics, derive_run_metrics};
use crate::load::{load_node_table, load_run_table};
use crate::plan::{plan_charts, ChartSpec, SliceFilters};
use crate::render::{render_chart, RenderOptions};
use crate::{ChartError, Table, TableSource};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub node_table: PathBuf,
    pub run_table: PathBuf,
    /// Defaults to the directory holding the node table.
    pub output_dir: Option<PathBuf>,
    pub slices: SliceFilters,
    pub render: RenderOptions,
    /// Stop at the first chart failure instead of skipping to the next chart.
    pub fail_fast: bool,
}

impl PipelineConfig {
    pub fn new(node_table: impl Into<PathBuf>, run_table: impl Into<PathBuf>) -> Self {
        Self {
            node_table: node_table.into(),
            run_table: run_table.into(),
            output_dir: None,
            slices: SliceFilters::default(),
            render: RenderOptions::default(),
            fail_fast: false,
        }
    }

    pub fn resolved_output_dir(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None => match self.node_table.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            },
        }
    }
}

#[derive(Debug)]
pub struct ChartFailure {
    pub file_name: String,
    pub error: ChartError,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub written: Vec<PathBuf>,
    pub failures: Vec<ChartFailure>,
    /// Rows whose derived value is NaN; charted as gaps.
    pub undefined: Vec<ChartError>,
    /// Set when `fail_fast` stopped the run before every chart was attempted.
    pub aborted: bool,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run the whole chart battery. Only loading errors are returned as `Err`.
pub fn run_pipeline(config: &PipelineConfig) -> Result<RunReport, ChartError> {
    let t_load = Instant::now();
    let node = load_node_table(&config.node_table)?;
    let run = load_run_table(&config.run_table)?;
    info!(
        "Loaded {} node rows, {} run rows ({:.1} ms)",
        node.len(),
        run.len(),
        t_load.elapsed().as_secs_f64() * 1000.0
    );

    let node = derive_node_metrics(node)?;
    let run = derive_run_metrics(run)?;
    let mut report = RunReport::default();
    for gap in node.undefined.into_iter().chain(run.undefined) {
        debug!("{}", gap);
        report.undefined.push(gap);
    }
    if !report.undefined.is_empty() {
        warn!(
            "{} derived values undefined; charted as gaps",
            report.undefined.len()
        );
    }

    let specs = plan_charts(&config.slices);
    let dir = config.resolved_output_dir();
    render_all(&specs, &node.table, &run.table, &dir, config, &mut report);
    Ok(report)
}

fn render_all(
    specs: &[ChartSpec],
    node: &Table,
    run: &Table,
    dir: &Path,
    config: &PipelineConfig,
    report: &mut RunReport,
) {
    for (idx, spec) in specs.iter().enumerate() {
        let table = match spec.table {
            TableSource::Node => node,
            TableSource::Run => run,
        };
        debug!("Rendering {}", spec.id());
        match render_chart(spec, table, dir, &config.render) {
            Ok(path) => {
                info!("Wrote chart: {}", path.display());
                report.written.push(path);
            }
            Err(error) => {
                warn!("Skipping chart {}: {}", spec.file_name, error);
                report.failures.push(ChartFailure {
                    file_name: spec.file_name.clone(),
                    error,
                });
                if config.fail_fast {
                    report.aborted = idx + 1 < specs.len();
                    return;
                }
            }
        }
    }
}
