//! Chart pipeline for Monte Carlo Tree Search tuning benchmarks.
//!
//! Reads the node table (`bestNode.csv`) and the run table (`mctsRunTime.csv`)
//! written by the tuning harness, derives the win ratio and total search time,
//! and renders the fixed battery of 22 comparison charts.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

pub mod aggregate;
pub mod derive;
pub mod load;
pub mod pipeline;
pub mod plan;
pub mod render;

pub use aggregate::{bar_groups, line_series, Bar, Series, SeriesPoint};
pub use derive::{derive_node_metrics, derive_run_metrics, total_time, win_ratio, Derived};
pub use load::{load_node_table, load_run_table};
pub use pipeline::{run_pipeline, ChartFailure, PipelineConfig, RunReport};
pub use plan::{
    plan_charts, ChartKind, ChartSpec, SliceFilter, SliceFilters,
    DEFAULT_FIXED_EXPLORATION_FACTOR, DEFAULT_FIXED_NUM_RUNS, TIME_METRICS,
};
pub use render::{render_chart, OutputFormat, RenderOptions};

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },
    #[error("failed to read {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is missing column '{column}' (found: {})", path.display(), found.join(", "))]
    SchemaMismatch {
        path: PathBuf,
        column: Column,
        found: Vec<String>,
    },
    #[error("failed to parse {}{}: {message}", path.display(), line_suffix(*line))]
    ParseError {
        path: PathBuf,
        line: Option<u64>,
        message: String,
    },
    #[error("{column} undefined at row {row}")]
    DerivationUndefined { column: Column, row: usize },
    #[error("cannot render {chart}: {message}")]
    RenderError { chart: String, message: String },
    #[error("cannot write {chart} to {}: {source}", path.display())]
    IoWriteError {
        chart: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn line_suffix(line: Option<u64>) -> String {
    line.map(|l| format!(" (line {})", l)).unwrap_or_default()
}

impl ChartError {
    /// Loading errors abort the whole run; the others are scoped to a row or a chart.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChartError::SourceNotFound { .. }
                | ChartError::SourceUnreadable { .. }
                | ChartError::SchemaMismatch { .. }
                | ChartError::ParseError { .. }
        )
    }
}

/// Every column the pipeline reads, derives, or charts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Column {
    #[serde(rename = "numRuns")]
    NumRuns,
    #[serde(rename = "explorationFactor")]
    ExplorationFactor,
    #[serde(rename = "wins")]
    Wins,
    #[serde(rename = "playouts")]
    Playouts,
    #[serde(rename = "winRatio")]
    WinRatio,
    #[serde(rename = "explore_time")]
    ExploreTime,
    #[serde(rename = "select_time")]
    SelectTime,
    #[serde(rename = "sim_time")]
    SimTime,
    #[serde(rename = "bp_time")]
    BpTime,
    #[serde(rename = "totalTime")]
    TotalTime,
}

impl Column {
    /// Header name as written in the source CSV (or chosen for derived columns).
    pub fn name(self) -> &'static str {
        match self {
            Column::NumRuns => "numRuns",
            Column::ExplorationFactor => "explorationFactor",
            Column::Wins => "wins",
            Column::Playouts => "playouts",
            Column::WinRatio => "winRatio",
            Column::ExploreTime => "explore_time",
            Column::SelectTime => "select_time",
            Column::SimTime => "sim_time",
            Column::BpTime => "bp_time",
            Column::TotalTime => "totalTime",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Column::NumRuns => "Number of Runs",
            Column::ExplorationFactor => "Exploration Factors",
            Column::Wins => "Wins",
            Column::Playouts => "Playouts",
            Column::WinRatio => "# Wins / # Playouts",
            Column::ExploreTime => "Exploration Time",
            Column::SelectTime => "Selection Time",
            Column::SimTime => "Simulation Time",
            Column::BpTime => "Back-propagation Time",
            Column::TotalTime => "Total Time",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Column::NumRuns | Column::Wins | Column::Playouts)
    }

    /// Formats a value of this column for tick and legend labels.
    pub fn format_value(self, value: f64) -> String {
        if !value.is_finite() {
            "nan".to_string()
        } else if self.is_integer() {
            format!("{:.0}", value)
        } else {
            // Up to six decimals, at least one.
            let text = format!("{:.6}", value);
            let text = text.trim_end_matches('0');
            if text.ends_with('.') {
                format!("{}0", text)
            } else {
                text.to_string()
            }
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSource {
    Node,
    Run,
}

impl fmt::Display for TableSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableSource::Node => f.write_str("node table"),
            TableSource::Run => f.write_str("run table"),
        }
    }
}

/// Columnar benchmark table. Row order follows the source file.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    source: TableSource,
    len: usize,
    columns: Vec<(Column, Vec<f64>)>,
}

impl Table {
    pub fn new(source: TableSource, len: usize) -> Self {
        Self {
            source,
            len,
            columns: Vec::new(),
        }
    }

    pub fn source(&self) -> TableSource {
        self.source
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn columns(&self) -> impl Iterator<Item = Column> + '_ {
        self.columns.iter().map(|(c, _)| *c)
    }

    pub fn column(&self, column: Column) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, values)| values.as_slice())
    }

    /// Appends `values` as `column`, replacing an existing column of the same name.
    ///
    /// `values` must hold exactly one entry per row.
    pub fn with_column(mut self, column: Column, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), self.len);
        if let Some(slot) = self.columns.iter_mut().find(|(c, _)| *c == column) {
            slot.1 = values;
        } else {
            self.columns.push((column, values));
        }
        self
    }

    /// Rows matching `filter`, in source order. `None` when the filter column is absent.
    pub fn filter(&self, filter: &SliceFilter) -> Option<Table> {
        let keys = self.column(filter.column)?;
        let keep: Vec<usize> = keys
            .iter()
            .enumerate()
            .filter(|(_, v)| filter.matches(**v))
            .map(|(idx, _)| idx)
            .collect();
        let columns = self
            .columns
            .iter()
            .map(|(c, values)| (*c, keep.iter().map(|&idx| values[idx]).collect()))
            .collect();
        Some(Table {
            source: self.source,
            len: keep.len(),
            columns,
        })
    }

    /// Sorted distinct finite values of `column`.
    pub fn levels(&self, column: Column) -> Vec<f64> {
        let mut values: Vec<f64> = self
            .column(column)
            .unwrap_or(&[])
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .collect();
        values.sort_by(f64::total_cmp);
        values.dedup();
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_table() -> Table {
        Table::new(TableSource::Run, 3)
            .with_column(Column::NumRuns, vec![64.0, 128.0, 128.0])
            .with_column(Column::ExplorationFactor, vec![1.14, 0.5, 1.14])
    }

    #[test]
    fn test_filter_keeps_matching_rows_in_order() {
        let table = run_table();
        let slice = table.filter(&SliceFilter::num_runs(128)).unwrap();
        assert_eq!(slice.len(), 2);
        assert_eq!(
            slice.column(Column::ExplorationFactor).unwrap(),
            &[0.5, 1.14]
        );
    }

    #[test]
    fn test_filter_without_column_is_none() {
        let table = Table::new(TableSource::Run, 0);
        assert!(table.filter(&SliceFilter::num_runs(128)).is_none());
    }

    #[test]
    fn test_with_column_replaces_existing() {
        let table = run_table().with_column(Column::NumRuns, vec![1.0, 2.0, 3.0]);
        assert_eq!(table.columns().count(), 2);
        assert_eq!(table.column(Column::NumRuns).unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_levels_sorted_and_distinct() {
        let table = run_table();
        assert_eq!(table.levels(Column::NumRuns), vec![64.0, 128.0]);
    }

    #[test]
    fn test_format_value() {
        assert_eq!(Column::NumRuns.format_value(128.0), "128");
        assert_eq!(Column::ExplorationFactor.format_value(1.0), "1.0");
        assert_eq!(Column::ExplorationFactor.format_value(1.14), "1.14");
        assert_eq!(Column::ExplorationFactor.format_value(0.125), "0.125");
        assert_eq!(Column::ExplorationFactor.format_value(0.1 + 0.2), "0.3");
        assert_eq!(Column::WinRatio.format_value(f64::NAN), "nan");
    }

    proptest::proptest! {
        #[test]
        fn prop_filter_is_idempotent(
            rows in proptest::collection::vec((0usize..3, 0usize..3), 0..40)
        ) {
            const RUNS: [f64; 3] = [64.0, 128.0, 256.0];
            const FACTORS: [f64; 3] = [0.5, 1.14, 2.0];
            let table = Table::new(TableSource::Run, rows.len())
                .with_column(Column::NumRuns, rows.iter().map(|r| RUNS[r.0]).collect())
                .with_column(
                    Column::ExplorationFactor,
                    rows.iter().map(|r| FACTORS[r.1]).collect(),
                );
            for slice in [SliceFilter::num_runs(128), SliceFilter::exploration_factor(1.14)] {
                let once = table.filter(&slice).unwrap();
                let twice = once.filter(&slice).unwrap();
                proptest::prop_assert_eq!(&once, &twice);
                proptest::prop_assert!(once
                    .column(slice.column)
                    .unwrap()
                    .iter()
                    .all(|v| slice.matches(*v)));
            }
        }
    }

    #[test]
    fn test_scenario_row_in_both_slices() {
        let table = Table::new(TableSource::Run, 1)
            .with_column(Column::NumRuns, vec![128.0])
            .with_column(Column::ExplorationFactor, vec![1.14]);
        let slices = SliceFilters::default();
        assert_eq!(table.filter(&slices.num_runs).unwrap().len(), 1);
        assert_eq!(table.filter(&slices.exploration_factor).unwrap().len(), 1);
    }

    #[test]
    fn test_loading_errors_are_fatal() {
        let err = ChartError::SourceNotFound {
            path: PathBuf::from("bestNode.csv"),
        };
        assert!(err.is_fatal());
        let err = ChartError::DerivationUndefined {
            column: Column::WinRatio,
            row: 3,
        };
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "winRatio undefined at row 3");
    }
}
