//! CSV loading for the node and run tables.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::{ChartError, Column, Table, TableSource};

const NODE_COLUMNS: [Column; 4] = [
    Column::NumRuns,
    Column::ExplorationFactor,
    Column::Wins,
    Column::Playouts,
];

const RUN_COLUMNS: [Column; 6] = [
    Column::NumRuns,
    Column::ExplorationFactor,
    Column::ExploreTime,
    Column::SelectTime,
    Column::SimTime,
    Column::BpTime,
];

#[derive(Clone, Debug, Deserialize)]
struct NodeRecord {
    #[serde(rename = "numRuns")]
    num_runs: u32,
    #[serde(rename = "explorationFactor")]
    exploration_factor: f64,
    wins: u64,
    playouts: u64,
}

#[derive(Clone, Debug, Deserialize)]
struct RunRecord {
    #[serde(rename = "numRuns")]
    num_runs: u32,
    #[serde(rename = "explorationFactor")]
    exploration_factor: f64,
    explore_time: f64,
    select_time: f64,
    sim_time: f64,
    bp_time: f64,
}

/// Value-range constraints a typed field cannot express.
trait CheckedRecord: DeserializeOwned {
    fn check(&self) -> Result<(), String>;
}

fn check_key(num_runs: u32, exploration_factor: f64) -> Result<(), String> {
    if num_runs == 0 {
        return Err("numRuns must be positive".into());
    }
    if !(exploration_factor > 0.0 && exploration_factor.is_finite()) {
        return Err(format!(
            "explorationFactor must be a positive number, got {}",
            exploration_factor
        ));
    }
    Ok(())
}

impl CheckedRecord for NodeRecord {
    fn check(&self) -> Result<(), String> {
        check_key(self.num_runs, self.exploration_factor)?;
        // playouts == 0 is kept; it derives to a gap.
        if self.playouts > 0 && self.wins > self.playouts {
            return Err(format!(
                "wins ({}) exceed playouts ({})",
                self.wins, self.playouts
            ));
        }
        Ok(())
    }
}

impl CheckedRecord for RunRecord {
    fn check(&self) -> Result<(), String> {
        check_key(self.num_runs, self.exploration_factor)?;
        let timings = [
            (Column::ExploreTime, self.explore_time),
            (Column::SelectTime, self.select_time),
            (Column::SimTime, self.sim_time),
            (Column::BpTime, self.bp_time),
        ];
        match timings.iter().find(|(_, value)| *value < 0.0) {
            Some((column, value)) => Err(format!("{} is negative ({})", column, value)),
            None => Ok(()),
        }
    }
}

/// Load the per-trial best-node table (`numRuns, explorationFactor, wins, playouts`).
pub fn load_node_table(path: &Path) -> Result<Table, ChartError> {
    let file = open_source(path)?;
    load_node_table_from_reader(file, path)
}

/// Load the per-run timing table (`numRuns, explorationFactor, explore_time, ...`).
pub fn load_run_table(path: &Path) -> Result<Table, ChartError> {
    let file = open_source(path)?;
    load_run_table_from_reader(file, path)
}

pub(crate) fn load_node_table_from_reader<R: Read>(
    reader: R,
    path: &Path,
) -> Result<Table, ChartError> {
    let records: Vec<NodeRecord> = read_records(reader, path, &NODE_COLUMNS)?;
    Ok(Table::new(TableSource::Node, records.len())
        .with_column(
            Column::NumRuns,
            records.iter().map(|r| r.num_runs as f64).collect(),
        )
        .with_column(
            Column::ExplorationFactor,
            records.iter().map(|r| r.exploration_factor).collect(),
        )
        .with_column(Column::Wins, records.iter().map(|r| r.wins as f64).collect())
        .with_column(
            Column::Playouts,
            records.iter().map(|r| r.playouts as f64).collect(),
        ))
}

pub(crate) fn load_run_table_from_reader<R: Read>(
    reader: R,
    path: &Path,
) -> Result<Table, ChartError> {
    let records: Vec<RunRecord> = read_records(reader, path, &RUN_COLUMNS)?;
    Ok(Table::new(TableSource::Run, records.len())
        .with_column(
            Column::NumRuns,
            records.iter().map(|r| r.num_runs as f64).collect(),
        )
        .with_column(
            Column::ExplorationFactor,
            records.iter().map(|r| r.exploration_factor).collect(),
        )
        .with_column(
            Column::ExploreTime,
            records.iter().map(|r| r.explore_time).collect(),
        )
        .with_column(
            Column::SelectTime,
            records.iter().map(|r| r.select_time).collect(),
        )
        .with_column(Column::SimTime, records.iter().map(|r| r.sim_time).collect())
        .with_column(Column::BpTime, records.iter().map(|r| r.bp_time).collect()))
}

fn open_source(path: &Path) -> Result<File, ChartError> {
    File::open(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ChartError::SourceNotFound {
            path: path.to_path_buf(),
        },
        _ => ChartError::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        },
    })
}

fn read_records<T, R>(reader: R, path: &Path, required: &[Column]) -> Result<Vec<T>, ChartError>
where
    T: CheckedRecord,
    R: Read,
{
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|err| csv_error(path, err))?
        .clone();
    for column in required {
        if !headers.iter().any(|h| h == column.name()) {
            return Err(ChartError::SchemaMismatch {
                path: path.to_path_buf(),
                column: *column,
                found: headers.iter().map(str::to_string).collect(),
            });
        }
    }

    let mut out = Vec::new();
    let mut record = csv::StringRecord::new();
    while reader
        .read_record(&mut record)
        .map_err(|err| csv_error(path, err))?
    {
        let row: T = record
            .deserialize(Some(&headers))
            .map_err(|err| csv_error(path, err))?;
        row.check().map_err(|message| ChartError::ParseError {
            path: path.to_path_buf(),
            line: record.position().map(|pos| pos.line()),
            message,
        })?;
        out.push(row);
    }
    Ok(out)
}

fn csv_error(path: &Path, err: csv::Error) -> ChartError {
    let line = err.position().map(|pos| pos.line());
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(source) => ChartError::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        },
        _ => ChartError::ParseError {
            path: path.to_path_buf(),
            line,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(text: &str) -> Result<Table, ChartError> {
        load_node_table_from_reader(text.as_bytes(), Path::new("bestNode.csv"))
    }

    fn run(text: &str) -> Result<Table, ChartError> {
        load_run_table_from_reader(text.as_bytes(), Path::new("mctsRunTime.csv"))
    }

    #[test]
    fn test_node_table_in_harness_column_order() {
        let table = node("numRuns,explorationFactor,playouts,wins\n32,1.0,10,5\n64,1.14,10,8\n")
            .unwrap();
        assert_eq!(table.source(), TableSource::Node);
        assert_eq!(table.len(), 2);
        assert_eq!(table.column(Column::NumRuns).unwrap(), &[32.0, 64.0]);
        assert_eq!(table.column(Column::ExplorationFactor).unwrap(), &[1.0, 1.14]);
        assert_eq!(table.column(Column::Wins).unwrap(), &[5.0, 8.0]);
        assert_eq!(table.column(Column::Playouts).unwrap(), &[10.0, 10.0]);
    }

    #[test]
    fn test_extra_columns_and_whitespace_ignored() {
        let table = node(" numRuns , explorationFactor ,wins,playouts,seed\n 8 , 2.0 ,1,4,99\n")
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.column(Column::NumRuns).unwrap(), &[8.0]);
        assert!(table.column(Column::WinRatio).is_none());
    }

    #[test]
    fn test_missing_column_is_schema_mismatch() {
        let err = run("numRuns,explorationFactor,explore_time,select_time,sim_time\n1,1.0,1,1,1\n")
            .unwrap_err();
        match err {
            ChartError::SchemaMismatch { column, found, .. } => {
                assert_eq!(column, Column::BpTime);
                assert_eq!(found.len(), 5);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bad_cell_is_parse_error_with_line() {
        let err = node("numRuns,explorationFactor,wins,playouts\n32,1.0,5,10\n64,abc,8,10\n")
            .unwrap_err();
        match err {
            ChartError::ParseError { line, .. } => assert_eq!(line, Some(3)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_fractional_run_count_rejected() {
        let err = node("numRuns,explorationFactor,wins,playouts\n1.5,1.0,5,10\n").unwrap_err();
        assert!(matches!(err, ChartError::ParseError { .. }));
    }

    #[test]
    fn test_out_of_range_rows_rejected_with_line() {
        let err = node("numRuns,explorationFactor,wins,playouts\n32,1.0,5,10\n64,1.0,12,10\n")
            .unwrap_err();
        match err {
            ChartError::ParseError { line, message, .. } => {
                assert_eq!(line, Some(3));
                assert!(message.contains("exceed playouts"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = node("numRuns,explorationFactor,wins,playouts\n0,1.0,1,2\n").unwrap_err();
        assert!(err.to_string().contains("numRuns must be positive"));

        let err = run("numRuns,explorationFactor,explore_time,select_time,sim_time,bp_time\n\
                       128,1.14,1.0,-2.0,3.0,4.0\n")
            .unwrap_err();
        match err {
            ChartError::ParseError { line, message, .. } => {
                assert_eq!(line, Some(2));
                assert!(message.contains("select_time is negative"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_playouts_row_still_loads() {
        let table = node("numRuns,explorationFactor,wins,playouts\n128,1.14,3,0\n").unwrap();
        assert_eq!(table.column(Column::Playouts).unwrap(), &[0.0]);
    }

    #[test]
    fn test_header_only_table_is_empty() {
        let table = run("numRuns,explorationFactor,explore_time,select_time,sim_time,bp_time\n")
            .unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns().count(), 6);
    }

    #[test]
    fn test_missing_file_is_source_not_found() {
        let err = load_node_table(Path::new("/nonexistent/bestNode.csv")).unwrap_err();
        assert!(matches!(err, ChartError::SourceNotFound { .. }));
        assert!(err.is_fatal());
    }
}
