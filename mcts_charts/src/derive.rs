//! Derived metrics: win ratio for the node table, total time for the run table.

use crate::{ChartError, Column, Table, TableSource};

/// Augmented table plus the rows whose derived value came out undefined.
#[derive(Debug)]
pub struct Derived {
    pub table: Table,
    pub undefined: Vec<ChartError>,
}

/// `wins / playouts`, or NaN when there were no playouts.
pub fn win_ratio(wins: f64, playouts: f64) -> f64 {
    if playouts > 0.0 {
        wins / playouts
    } else {
        f64::NAN
    }
}

pub fn total_time(explore: f64, select: f64, sim: f64, bp: f64) -> f64 {
    explore + select + sim + bp
}

/// Append `winRatio` to a node table.
pub fn derive_node_metrics(table: Table) -> Result<Derived, ChartError> {
    let wins = required(&table, Column::Wins)?;
    let playouts = required(&table, Column::Playouts)?;

    let ratios: Vec<f64> = wins
        .iter()
        .zip(playouts)
        .map(|(&w, &p)| win_ratio(w, p))
        .collect();
    let undefined = undefined_rows(Column::WinRatio, &ratios);

    Ok(Derived {
        table: table.with_column(Column::WinRatio, ratios),
        undefined,
    })
}

/// Append `totalTime` to a run table.
pub fn derive_run_metrics(table: Table) -> Result<Derived, ChartError> {
    let explore = required(&table, Column::ExploreTime)?;
    let select = required(&table, Column::SelectTime)?;
    let sim = required(&table, Column::SimTime)?;
    let bp = required(&table, Column::BpTime)?;

    let totals: Vec<f64> = (0..table.len())
        .map(|i| total_time(explore[i], select[i], sim[i], bp[i]))
        .collect();
    let undefined = undefined_rows(Column::TotalTime, &totals);

    Ok(Derived {
        table: table.with_column(Column::TotalTime, totals),
        undefined,
    })
}

fn required(table: &Table, column: Column) -> Result<&[f64], ChartError> {
    table.column(column).ok_or_else(|| ChartError::SchemaMismatch {
        path: source_hint(table.source()).into(),
        column,
        found: table.columns().map(|c| c.name().to_string()).collect(),
    })
}

fn source_hint(source: TableSource) -> String {
    format!("<{}>", source)
}

fn undefined_rows(column: Column, values: &[f64]) -> Vec<ChartError> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_finite())
        .map(|(row, _)| ChartError::DerivationUndefined { column, row })
        .collect()
}
