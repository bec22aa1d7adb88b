//! The fixed chart battery, expressed as data.

use std::fmt;

use serde::Serialize;

use crate::{Column, TableSource};

pub const DEFAULT_FIXED_NUM_RUNS: u32 = 128;
pub const DEFAULT_FIXED_EXPLORATION_FACTOR: f64 = 1.14;

const EXPLORATION_SLICE_DEFAULT_TAG: &str = "root2";

/// Timing metrics charted from the run table, in output order.
pub const TIME_METRICS: [Column; 5] = [
    Column::ExploreTime,
    Column::SelectTime,
    Column::SimTime,
    Column::BpTime,
    Column::TotalTime,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    /// One line per hue level, circle markers at each point.
    Line,
    /// One bar per distinct x value.
    Bar,
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartKind::Line => f.write_str("line"),
            ChartKind::Bar => f.write_str("bar"),
        }
    }
}

/// `column == value` row predicate used for the fixed-slice views.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SliceFilter {
    pub column: Column,
    pub value: f64,
    /// Suffix used in the output file name.
    pub tag: String,
}

impl SliceFilter {
    pub fn num_runs(value: u32) -> Self {
        Self {
            column: Column::NumRuns,
            value: value as f64,
            tag: value.to_string(),
        }
    }

    pub fn exploration_factor(value: f64) -> Self {
        let tag = if value == DEFAULT_FIXED_EXPLORATION_FACTOR {
            EXPLORATION_SLICE_DEFAULT_TAG.to_string()
        } else {
            Column::ExplorationFactor.format_value(value)
        };
        Self {
            column: Column::ExplorationFactor,
            value,
            tag,
        }
    }

    /// Exact equality, as the harness writes the same literal it was given.
    pub fn matches(&self, value: f64) -> bool {
        value == self.value
    }
}

impl fmt::Display for SliceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} == {}",
            self.column,
            self.column.format_value(self.value)
        )
    }
}

/// The two fixed-parameter views of the run table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SliceFilters {
    pub num_runs: SliceFilter,
    pub exploration_factor: SliceFilter,
}

impl SliceFilters {
    pub fn new(num_runs: u32, exploration_factor: f64) -> Self {
        Self {
            num_runs: SliceFilter::num_runs(num_runs),
            exploration_factor: SliceFilter::exploration_factor(exploration_factor),
        }
    }
}

impl Default for SliceFilters {
    fn default() -> Self {
        Self::new(DEFAULT_FIXED_NUM_RUNS, DEFAULT_FIXED_EXPLORATION_FACTOR)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChartSpec {
    pub table: TableSource,
    pub x: Column,
    pub y: Column,
    pub hue: Option<Column>,
    pub filter: Option<SliceFilter>,
    pub kind: ChartKind,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub legend_title: Option<String>,
    pub grid: bool,
    pub file_name: String,
}

impl ChartSpec {
    /// Identity used when reporting a failure for this chart.
    pub fn id(&self) -> String {
        match &self.filter {
            Some(filter) => format!("{} (y={}, {})", self.file_name, self.y, filter),
            None => format!("{} (y={})", self.file_name, self.y),
        }
    }

    pub fn file_stem(&self) -> &str {
        self.file_name
            .strip_suffix(".pdf")
            .unwrap_or(&self.file_name)
    }
}

/// Enumerate the full chart battery in output order.
pub fn plan_charts(slices: &SliceFilters) -> Vec<ChartSpec> {
    let mut specs = Vec::with_capacity(22);

    specs.push(line(
        TableSource::Node,
        Column::NumRuns,
        Column::WinRatio,
        "Number of Runs vs. Winning Ratio".to_string(),
        "wrnr.pdf".to_string(),
    ));
    specs.push(line(
        TableSource::Node,
        Column::ExplorationFactor,
        Column::WinRatio,
        "Exploration Factors vs. Winning Ratio".to_string(),
        "wref.pdf".to_string(),
    ));

    for metric in TIME_METRICS {
        specs.push(line(
            TableSource::Run,
            Column::NumRuns,
            metric,
            format!("Number of Runs vs. {}", metric.label()),
            format!("{}_nr.pdf", metric),
        ));
        specs.push(line(
            TableSource::Run,
            Column::ExplorationFactor,
            metric,
            format!("Exploration Factors vs {}", metric.label()),
            format!("{}_ef.pdf", metric),
        ));
    }

    for metric in TIME_METRICS {
        specs.push(bar(
            Column::ExplorationFactor,
            metric,
            &slices.num_runs,
            format!("Exploration Factors vs. {}", metric.label()),
            format!("{}_nr_{}.pdf", metric, slices.num_runs.tag),
        ));
        specs.push(bar(
            Column::NumRuns,
            metric,
            &slices.exploration_factor,
            format!("Number of Runs vs {}", metric.label()),
            format!("{}_ef_{}.pdf", metric, slices.exploration_factor.tag),
        ));
    }

    specs
}

/// Line chart whose hue is whichever of the two parameters is not on the x axis.
fn line(table: TableSource, x: Column, y: Column, title: String, file_name: String) -> ChartSpec {
    let hue = match x {
        Column::NumRuns => Column::ExplorationFactor,
        _ => Column::NumRuns,
    };
    ChartSpec {
        table,
        x,
        y,
        hue: Some(hue),
        filter: None,
        kind: ChartKind::Line,
        title,
        x_label: x.label().to_string(),
        y_label: y.label().to_string(),
        legend_title: Some(hue.label().to_string()),
        grid: true,
        file_name,
    }
}

fn bar(x: Column, y: Column, filter: &SliceFilter, title: String, file_name: String) -> ChartSpec {
    ChartSpec {
        table: TableSource::Run,
        x,
        y,
        hue: None,
        filter: Some(filter.clone()),
        kind: ChartKind::Bar,
        title,
        x_label: x.label().to_string(),
        y_label: y.label().to_string(),
        legend_title: None,
        grid: false,
        file_name,
    }
}
