//! Result set models.
//!
//! Native drivers materialize every result set of a command into `DataTable`s.
//! `DataReader` walks them forward-only; `DataSet` keeps them for disconnected use.

use crate::error::{DbError, DbResult};
use crate::models::DbValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A column descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Native type name as reported by the driver (e.g. "INTEGER", "nvarchar")
    pub type_name: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// A single row of values, positionally aligned with the table's columns.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataRow {
    pub values: Vec<DbValue>,
}

impl DataRow {
    pub fn new(values: Vec<DbValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, ordinal: usize) -> Option<&DbValue> {
        self.values.get(ordinal)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One materialized result set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataTable {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<DataRow>,
    /// Rows affected by the statement that produced this table, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_affected: Option<u64>,
}

impl DataTable {
    pub fn new(columns: Vec<ColumnInfo>, rows: Vec<DataRow>) -> Self {
        Self {
            name: String::new(),
            columns,
            rows,
            records_affected: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_records_affected(mut self, affected: u64) -> Self {
        self.records_affected = Some(affected);
        self
    }

    /// Case-insensitive column lookup.
    pub fn ordinal(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(column))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// First column of the first row, if any.
    pub fn first_value(&self) -> Option<&DbValue> {
        self.rows.first().and_then(|r| r.get(0))
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_json_rows(&self) -> Vec<Map<String, JsonValue>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.values.iter())
                    .map(|(col, value)| (col.name.clone(), value.to_json()))
                    .collect()
            })
            .collect()
    }
}

/// Disconnected result of a tabular fetch: one table per result set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataSet {
    pub tables: Vec<DataTable>,
}

impl DataSet {
    /// Build a data set, naming unnamed tables `Table`, `Table1`, `Table2`...
    pub fn new(tables: Vec<DataTable>) -> Self {
        let tables = tables
            .into_iter()
            .enumerate()
            .map(|(i, mut table)| {
                if table.name.is_empty() {
                    table.name = if i == 0 {
                        "Table".to_string()
                    } else {
                        format!("Table{i}")
                    };
                }
                table
            })
            .collect();
        Self { tables }
    }

    pub fn table(&self, name: &str) -> Option<&DataTable> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Forward-only cursor over the result sets of one command execution.
///
/// Results are fully materialized: the native session reads every row of
/// every result set before the reader is built, so the connection is free
/// again as soon as `execute_reader` returns. Large results are held in
/// memory. Once closed, every access fails with `InvalidOperation`.
#[derive(Debug)]
pub struct DataReader {
    tables: Vec<DataTable>,
    table_index: usize,
    /// Current row within the current table; `None` before the first `read`
    row_index: Option<usize>,
    closed: bool,
}

impl DataReader {
    pub fn new(tables: Vec<DataTable>) -> Self {
        Self {
            tables,
            table_index: 0,
            row_index: None,
            closed: false,
        }
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.closed {
            return Err(DbError::invalid_operation("the data reader is closed"));
        }
        Ok(())
    }

    fn current_table(&self) -> Option<&DataTable> {
        self.tables.get(self.table_index)
    }

    /// Advance to the next row of the current result set.
    pub fn read(&mut self) -> DbResult<bool> {
        self.ensure_open()?;
        let Some(table) = self.current_table() else {
            return Ok(false);
        };
        let next = self.row_index.map_or(0, |i| i + 1);
        if next < table.rows.len() {
            self.row_index = Some(next);
            Ok(true)
        } else {
            self.row_index = Some(table.rows.len());
            Ok(false)
        }
    }

    /// Advance to the next result set.
    pub fn next_result(&mut self) -> DbResult<bool> {
        self.ensure_open()?;
        if self.table_index + 1 < self.tables.len() {
            self.table_index += 1;
            self.row_index = None;
            Ok(true)
        } else {
            self.table_index = self.tables.len();
            self.row_index = None;
            Ok(false)
        }
    }

    /// Columns of the current result set.
    pub fn columns(&self) -> DbResult<&[ColumnInfo]> {
        self.ensure_open()?;
        Ok(self
            .current_table()
            .map(|t| t.columns.as_slice())
            .unwrap_or(&[]))
    }

    pub fn field_count(&self) -> DbResult<usize> {
        Ok(self.columns()?.len())
    }

    pub fn ordinal(&self, column: &str) -> DbResult<usize> {
        self.ensure_open()?;
        self.current_table()
            .and_then(|t| t.ordinal(column))
            .ok_or_else(|| DbError::invalid_argument(format!("no column named '{column}'")))
    }

    /// Value at `ordinal` in the current row.
    pub fn get(&self, ordinal: usize) -> DbResult<&DbValue> {
        self.ensure_open()?;
        let row = self
            .current_table()
            .zip(self.row_index)
            .and_then(|(t, i)| t.rows.get(i))
            .ok_or_else(|| DbError::invalid_operation("no current row; call read() first"))?;
        row.get(ordinal).ok_or_else(|| {
            DbError::invalid_argument(format!(
                "column ordinal {ordinal} out of range ({} columns)",
                row.len()
            ))
        })
    }

    /// Value of the named column in the current row.
    pub fn get_by_name(&self, column: &str) -> DbResult<&DbValue> {
        let ordinal = self.ordinal(column)?;
        self.get(ordinal)
    }

    /// Rows affected by the statement behind the current result set.
    pub fn records_affected(&self) -> Option<u64> {
        self.current_table().and_then(|t| t.records_affected)
    }

    pub fn has_rows(&self) -> bool {
        self.current_table().is_some_and(|t| !t.rows.is_empty())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the reader; idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.tables.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> DataTable {
        DataTable::new(
            vec![ColumnInfo::new("id", "INTEGER"), ColumnInfo::new("name", "TEXT")],
            vec![
                DataRow::new(vec![DbValue::Int(1), DbValue::from("ann")]),
                DataRow::new(vec![DbValue::Int(2), DbValue::Null]),
            ],
        )
    }

    #[test]
    fn test_reader_walks_rows() {
        let mut reader = DataReader::new(vec![people()]);
        assert!(reader.get(0).is_err());
        assert!(reader.read().unwrap());
        assert_eq!(reader.get(0).unwrap(), &DbValue::Int(1));
        assert_eq!(reader.get_by_name("NAME").unwrap(), &DbValue::from("ann"));
        assert!(reader.read().unwrap());
        assert!(reader.get(1).unwrap().is_null());
        assert!(!reader.read().unwrap());
        assert!(!reader.read().unwrap());
    }

    #[test]
    fn test_reader_multiple_results() {
        let second = DataTable::new(vec![ColumnInfo::new("n", "INTEGER")], vec![]);
        let mut reader = DataReader::new(vec![people(), second]);
        assert_eq!(reader.field_count().unwrap(), 2);
        assert!(reader.next_result().unwrap());
        assert_eq!(reader.field_count().unwrap(), 1);
        assert!(!reader.has_rows());
        assert!(!reader.read().unwrap());
        assert!(!reader.next_result().unwrap());
    }

    #[test]
    fn test_closed_reader_rejects_access() {
        let mut reader = DataReader::new(vec![people()]);
        reader.close();
        reader.close();
        assert!(reader.is_closed());
        assert!(matches!(reader.read(), Err(DbError::InvalidOperation { .. })));
        assert!(matches!(reader.columns(), Err(DbError::InvalidOperation { .. })));
    }

    #[test]
    fn test_data_set_names_tables() {
        let set = DataSet::new(vec![people(), people(), people().with_name("custom")]);
        let names: Vec<_> = set.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Table", "Table1", "custom"]);
        assert!(set.table("table1").is_some());
    }

    #[test]
    fn test_to_json_rows() {
        let rows = people().to_json_rows();
        assert_eq!(rows[0]["id"], serde_json::json!(1));
        assert_eq!(rows[1]["name"], JsonValue::Null);
    }
}
