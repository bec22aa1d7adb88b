//! Reduce table rows to the points a chart actually draws.
//!
//! Repeated (hue, x) pairs are averaged over their finite y values. A group
//! with no finite value becomes a gap instead of a point.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;

use crate::{Column, Table};

#[derive(Clone, Debug, PartialEq)]
pub struct SeriesPoint {
    pub x: f64,
    /// `None` marks a gap.
    pub y: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Series {
    /// Hue level, `None` for an ungrouped chart.
    pub level: Option<f64>,
    pub points: Vec<SeriesPoint>,
}

impl Series {
    /// Consecutive runs of defined points; a gap splits the line.
    pub fn segments(&self) -> Vec<Vec<(f64, f64)>> {
        let mut out = Vec::new();
        let mut current = Vec::new();
        for point in &self.points {
            match point.y {
                Some(y) => current.push((point.x, y)),
                None => {
                    if !current.is_empty() {
                        out.push(std::mem::take(&mut current));
                    }
                }
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bar {
    pub category: f64,
    pub value: Option<f64>,
}

#[derive(Default)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn push(&mut self, value: f64) {
        if value.is_finite() {
            self.sum += value;
            self.count += 1;
        }
    }

    fn value(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

/// One series per hue level (ascending), points sorted by x.
///
/// Returns the first missing column as the error.
pub fn line_series(
    table: &Table,
    x: Column,
    y: Column,
    hue: Option<Column>,
) -> Result<Vec<Series>, Column> {
    let xs = table.column(x).ok_or(x)?;
    let ys = table.column(y).ok_or(y)?;
    let hues = match hue {
        Some(column) => Some(table.column(column).ok_or(column)?),
        None => None,
    };

    let mut groups: BTreeMap<Option<OrderedFloat<f64>>, BTreeMap<OrderedFloat<f64>, Mean>> =
        BTreeMap::new();
    for row in 0..table.len() {
        let x_value = xs[row];
        if x_value.is_nan() {
            continue;
        }
        let level = match hues {
            Some(values) if values[row].is_nan() => continue,
            Some(values) => Some(OrderedFloat(values[row])),
            None => None,
        };
        groups
            .entry(level)
            .or_default()
            .entry(OrderedFloat(x_value))
            .or_default()
            .push(ys[row]);
    }

    Ok(groups
        .into_iter()
        .map(|(level, points)| Series {
            level: level.map(|l| l.into_inner()),
            points: points
                .into_iter()
                .map(|(x, mean)| SeriesPoint {
                    x: x.into_inner(),
                    y: mean.value(),
                })
                .collect(),
        })
        .collect())
}

/// One bar per distinct x (ascending), height is the mean of finite y values.
pub fn bar_groups(table: &Table, x: Column, y: Column) -> Result<Vec<Bar>, Column> {
    let series = line_series(table, x, y, None)?;
    Ok(series
        .into_iter()
        .flat_map(|s| s.points)
        .map(|p| Bar {
            category: p.x,
            value: p.y,
        })
        .collect())
}
