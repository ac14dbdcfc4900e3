//! In-memory CSV table

use crate::error::{not_found_error, validation_error, PipelineResult};
use crate::storage::write_atomic;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

/// A rectangular table of string cells with named columns
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table, rejecting rows whose width does not match the header
    #[cfg(test)]
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<String>>) -> PipelineResult<Self> {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Read a headed CSV file
    pub fn read_csv(path: &Path) -> PipelineResult<Self> {
        if !path.is_file() {
            return Err(not_found_error(format!("table {}", path.display())));
        }
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> PipelineResult<Self> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let columns = reader.headers()?.iter().map(String::from).collect();
        let mut table = Self::new(columns);
        for record in reader.records() {
            let record = record?;
            table.push_row(record.iter().map(String::from).collect())?;
        }
        Ok(table)
    }

    /// Serialize as CSV with a header row
    pub fn to_csv_bytes(&self) -> PipelineResult<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        let bytes = writer.into_inner().map_err(|e| e.into_error())?;
        Ok(bytes)
    }

    /// Overwrite `path` with this table
    pub fn write_csv(&self, path: &Path) -> PipelineResult<()> {
        write_atomic(path, &self.to_csv_bytes()?)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// All values of one column, in row order
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }

    pub fn push_row(&mut self, row: Vec<String>) -> PipelineResult<()> {
        if row.len() != self.columns.len() {
            return Err(validation_error(format!(
                "row has {} cells, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Append a column (or replace it if the name already exists)
    pub fn set_column(&mut self, name: &str, values: Vec<String>) -> PipelineResult<()> {
        if values.len() != self.rows.len() {
            return Err(validation_error(format!(
                "column {} has {} values, table has {} rows",
                name,
                values.len(),
                self.rows.len()
            )));
        }
        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(())
    }

    /// Remove the named columns; unknown names are ignored
    pub fn drop_columns(&mut self, names: &[&str]) {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&i| !names.contains(&self.columns[i].as_str()))
            .collect();
        if keep.len() == self.columns.len() {
            return;
        }
        self.columns = keep.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.rows {
            *row = keep.iter().map(|&i| std::mem::take(&mut row[i])).collect();
        }
    }

    /// Rename columns through `f`
    pub fn rename_columns<F: Fn(&str) -> String>(&mut self, f: F) {
        for column in &mut self.columns {
            *column = f(column);
        }
    }

    /// New table holding the rows at `indices`, in that order
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// Stack `other` under `self`.
    ///
    /// The result carries `self`'s columns followed by any columns only `other`
    /// has; cells missing on either side are left empty.
    pub fn concat(&self, other: &Table) -> Self {
        let mut columns = self.columns.clone();
        for column in &other.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        let position: HashMap<&str, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        let mut rows = Vec::with_capacity(self.rows.len() + other.rows.len());
        for source in [self, other] {
            let mapping: Vec<usize> = source.columns.iter().map(|c| position[c.as_str()]).collect();
            for row in &source.rows {
                let mut out = vec![String::new(); columns.len()];
                for (cell, &target) in row.iter().zip(&mapping) {
                    out[target] = cell.clone();
                }
                rows.push(out);
            }
        }

        Self { columns, rows }
    }

    /// Drop rows equal in every column to an earlier row; first occurrence wins
    pub fn drop_duplicates(&self) -> Self {
        let mut seen: HashSet<&[String]> = HashSet::with_capacity(self.rows.len());
        let rows = self
            .rows
            .iter()
            .filter(|row| seen.insert(row.as_slice()))
            .cloned()
            .collect();
        Self {
            columns: self.columns.clone(),
            rows,
        }
    }
}

#[cfg(test)]
pub(crate) fn table_of(columns: &[&str], rows: &[&[&str]]) -> Table {
    Table::from_rows(
        columns.iter().map(|c| c.to_string()).collect(),
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect(),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_csv_round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.csv");
        let table = table_of(&["id", "merchant"], &[&["1", "fraud_Kirlin, and Sons"], &["2", "x"]]);

        table.write_csv(&path).unwrap();
        let loaded = Table::read_csv(&path).unwrap();

        assert_eq!(loaded, table);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let result = Table::read_csv(Path::new("/definitely/not/here.csv"));
        assert!(matches!(result, Err(crate::error::PipelineError::NotFound(_))));
    }

    #[test]
    fn test_ragged_row_is_rejected() {
        let mut table = Table::new(vec!["a".into(), "b".into()]);
        assert!(table.push_row(vec!["1".into()]).is_err());
    }

    #[test]
    fn test_concat_aligns_columns_by_name() {
        let a = table_of(&["id", "a"], &[&["1", "5"]]);
        let b = table_of(&["a", "id", "extra"], &[&["7", "2", "z"]]);

        let merged = a.concat(&b);

        assert_eq!(merged.columns(), &["id", "a", "extra"]);
        assert_eq!(
            merged.rows(),
            &[
                vec!["1".to_string(), "5".to_string(), String::new()],
                vec!["2".to_string(), "7".to_string(), "z".to_string()],
            ]
        );
    }

    #[test]
    fn test_drop_duplicates_keeps_first_occurrence_order() {
        let table = table_of(&["id", "a"], &[&["2", "7"], &["1", "5"], &["2", "7"], &["1", "6"]]);
        let deduped = table.drop_duplicates();
        assert_eq!(deduped, table_of(&["id", "a"], &[&["2", "7"], &["1", "5"], &["1", "6"]]));
    }

    #[test]
    fn test_drop_and_set_columns() {
        let mut table = table_of(&["a", "b", "c"], &[&["1", "2", "3"]]);
        table.drop_columns(&["b", "missing"]);
        table.set_column("d", vec!["4".into()]).unwrap();
        table.set_column("a", vec!["9".into()]).unwrap();
        assert_eq!(table, table_of(&["a", "c", "d"], &[&["9", "3", "4"]]));
    }
}
