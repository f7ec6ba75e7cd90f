//! Minimal tab-separated table engine: the handful of column operations the
//! pipeline's format translators need, with loud cardinality checks on joins.

use std::path::Path;

use fnv::{FnvHashMap, FnvHashSet};

use crate::{checkpoint, Error};

#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    index: FnvHashMap<String, usize>,
    rows: Vec<Vec<String>>,
    origin: String,
}

impl Table {
    pub fn new<I, S>(columns: I) -> Table
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Table {
            columns: columns.into_iter().map(Into::into).collect(),
            index: FnvHashMap::default(),
            rows: Vec::new(),
            origin: "in-memory table".into(),
        };
        table.rebuild_index();
        table
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
    }

    pub fn from_path(path: &Path) -> Result<Table, Error> {
        let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
        let headers = reader.headers()?.clone();
        let mut table = Table::new(headers.iter());
        table.origin = path.display().to_string();
        for record in reader.records() {
            let record = record?;
            table.rows.push(record.iter().map(String::from).collect());
        }
        Ok(table)
    }

    /// Read only the named columns, in the given order. Any column missing
    /// from the file's header is a data-contract violation, reported loudly.
    pub fn from_path_select(path: &Path, wanted: &[&str]) -> Result<Table, Error> {
        let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
        let headers = reader.headers()?.clone();
        let mut positions = Vec::with_capacity(wanted.len());
        for name in wanted {
            let position = headers.iter().position(|header| header == *name);
            match position {
                Some(position) => positions.push(position),
                None => {
                    return Err(Error::MissingColumn {
                        table: path.display().to_string(),
                        column: (*name).into(),
                    })
                }
            }
        }
        let mut table = Table::new(wanted.iter().copied());
        table.origin = path.display().to_string();
        for record in reader.records() {
            let record = record?;
            table.rows.push(
                positions
                    .iter()
                    .map(|&i| record.get(i).unwrap_or_default().to_string())
                    .collect(),
            );
        }
        Ok(table)
    }

    /// Serialize as tab-separated text and place it atomically (temp file +
    /// rename), so a crash mid-write can never leave a plausible checkpoint.
    pub fn write(&self, path: &Path) -> Result<(), Error> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush().map_err(Error::Io)?;
        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        checkpoint::write_atomic(path, &bytes).map_err(Error::Io)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn column_index(&self, name: &str) -> Result<usize, Error> {
        self.index.get(name).copied().ok_or_else(|| Error::MissingColumn {
            table: self.origin.clone(),
            column: name.into(),
        })
    }

    pub fn value(&self, row: usize, column: &str) -> Result<&str, Error> {
        let column = self.column_index(column)?;
        Ok(self.rows[row][column].as_str())
    }

    pub fn column_values(&self, name: &str) -> Result<Vec<&str>, Error> {
        let column = self.column_index(name)?;
        Ok(self.rows.iter().map(|row| row[column].as_str()).collect())
    }

    pub fn column_owned(&self, name: &str) -> Result<Vec<String>, Error> {
        let column = self.column_index(name)?;
        Ok(self.rows.iter().map(|row| row[column].clone()).collect())
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        assert_eq!(row.len(), self.columns.len(), "row arity mismatch");
        self.rows.push(row);
    }

    /// Replace a column's values, adding the column if it does not exist.
    pub fn set_column(&mut self, name: &str, values: Vec<String>) {
        assert_eq!(values.len(), self.rows.len(), "column length mismatch");
        match self.index.get(name) {
            Some(&column) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[column] = value;
                }
            }
            None => {
                self.columns.push(name.into());
                self.index.insert(name.into(), self.columns.len() - 1);
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
    }

    pub fn set_constant(&mut self, name: &str, value: &str) {
        let values = vec![value.to_string(); self.rows.len()];
        self.set_column(name, values);
    }

    pub fn insert_column(&mut self, at: usize, name: &str, values: Vec<String>) {
        assert_eq!(values.len(), self.rows.len(), "column length mismatch");
        let at = at.min(self.columns.len());
        self.columns.insert(at, name.into());
        self.rebuild_index();
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.insert(at, value);
        }
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<(), Error> {
        let column = self.column_index(from)?;
        self.columns[column] = to.into();
        self.rebuild_index();
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) -> Result<(), Error> {
        let column = self.column_index(name)?;
        self.columns.remove(column);
        self.rebuild_index();
        for row in &mut self.rows {
            row.remove(column);
        }
        Ok(())
    }

    pub fn drop_column_if_present(&mut self, name: &str) {
        if let Some(&column) = self.index.get(name) {
            self.columns.remove(column);
            self.rebuild_index();
            for row in &mut self.rows {
                row.remove(column);
            }
        }
    }

    pub fn select(&self, wanted: &[&str]) -> Result<Table, Error> {
        let mut positions = Vec::with_capacity(wanted.len());
        for name in wanted {
            positions.push(self.column_index(name)?);
        }
        let mut table = Table::new(wanted.iter().copied());
        table.origin = self.origin.clone();
        for row in &self.rows {
            table.rows.push(positions.iter().map(|&i| row[i].clone()).collect());
        }
        Ok(table)
    }

    /// Keep only rows whose cell in `column` satisfies the predicate.
    pub fn retain_by<F>(&mut self, column: &str, mut keep: F) -> Result<(), Error>
    where
        F: FnMut(&str) -> bool,
    {
        let column = self.column_index(column)?;
        self.rows.retain(|row| keep(row[column].as_str()));
        Ok(())
    }

    pub fn retain_mask(&mut self, mask: &[bool]) {
        assert_eq!(mask.len(), self.rows.len(), "mask length mismatch");
        let mut row = 0;
        self.rows.retain(|_| {
            let keep = mask[row];
            row += 1;
            keep
        });
    }

    /// Hyphen-join the named columns into one key per row, the composite
    /// identity convention shared by every table in the workflow.
    pub fn composite_key(&self, columns: &[&str]) -> Result<Vec<String>, Error> {
        let mut positions = Vec::with_capacity(columns.len());
        for name in columns {
            positions.push(self.column_index(name)?);
        }
        Ok(self
            .rows
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|&i| row[i].as_str())
                    .collect::<Vec<_>>()
                    .join("-")
            })
            .collect())
    }

    /// Append another table's rows, aligning columns by name; cells for
    /// columns absent on either side are left empty.
    pub fn append_aligned(&mut self, other: Table) {
        let Table {
            columns: other_columns,
            index: other_index,
            rows: other_rows,
            ..
        } = other;
        for column in &other_columns {
            if !self.index.contains_key(column) {
                self.columns.push(column.clone());
                self.index.insert(column.clone(), self.columns.len() - 1);
                for row in &mut self.rows {
                    row.push(String::new());
                }
            }
        }
        let mapping: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|column| other_index.get(column).copied())
            .collect();
        for other_row in other_rows {
            let row = mapping
                .iter()
                .map(|position| match position {
                    Some(i) => other_row[*i].clone(),
                    None => String::new(),
                })
                .collect();
            self.rows.push(row);
        }
    }

    /// Left join carrying over the right table's non-key columns, requiring
    /// unique keys on BOTH sides (pandas `validate="1:1"` semantics): any
    /// duplicate aborts with `JoinCardinality` rather than fanning out rows.
    pub fn left_join_one_to_one(
        &mut self,
        right: &Table,
        on: &[&str],
        context: &'static str,
    ) -> Result<(), Error> {
        let keys = self.composite_key(on)?;
        let mut seen = FnvHashSet::default();
        for key in &keys {
            if !seen.insert(key.as_str()) {
                return Err(Error::JoinCardinality {
                    context,
                    key: key.clone(),
                });
            }
        }
        self.join_right_unique(right, on, context)
    }

    /// Left join requiring unique keys on the right side only.
    pub fn left_join_many_to_one(
        &mut self,
        right: &Table,
        on: &[&str],
        context: &'static str,
    ) -> Result<(), Error> {
        self.join_right_unique(right, on, context)
    }

    fn join_right_unique(
        &mut self,
        right: &Table,
        on: &[&str],
        context: &'static str,
    ) -> Result<(), Error> {
        let right_keys = right.composite_key(on)?;
        let mut lookup: FnvHashMap<&str, usize> = FnvHashMap::default();
        for (row, key) in right_keys.iter().enumerate() {
            if lookup.insert(key.as_str(), row).is_some() {
                return Err(Error::JoinCardinality {
                    context,
                    key: key.clone(),
                });
            }
        }

        let carried: Vec<usize> = right
            .columns
            .iter()
            .enumerate()
            .filter(|(_, name)| !on.contains(&name.as_str()))
            .map(|(i, _)| i)
            .collect();
        for &column in &carried {
            let name = &right.columns[column];
            if self.index.contains_key(name) {
                return Err(Error::DuplicateColumn {
                    context,
                    column: name.clone(),
                });
            }
        }

        let left_keys = self.composite_key(on)?;
        for &column in &carried {
            let name = right.columns[column].clone();
            let values = left_keys
                .iter()
                .map(|key| match lookup.get(key.as_str()) {
                    Some(&row) => right.rows[row][column].clone(),
                    None => String::new(),
                })
                .collect();
            self.set_column(&name, values);
        }
        Ok(())
    }
}

pub(crate) fn parse_f64(value: &str, column: &str) -> Result<f64, Error> {
    value.trim().parse::<f64>().map_err(|_| Error::Parse {
        column: column.into(),
        value: value.into(),
    })
}

pub(crate) fn parse_i64(value: &str, column: &str) -> Result<i64, Error> {
    value.trim().parse::<i64>().map_err(|_| Error::Parse {
        column: column.into(),
        value: value.into(),
    })
}
