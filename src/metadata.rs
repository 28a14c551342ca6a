//! Logical table column metadata used when a `SELECT *` hides the real column list.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct TableMetadata {
    tables: HashMap<String, Vec<String>>,
}

impl TableMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: &str, columns: &[&str]) -> Self {
        self.add_table(table, columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn add_table(&mut self, table: &str, columns: Vec<String>) {
        self.tables.insert(table.to_lowercase(), columns);
    }

    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.tables.get(&table.to_lowercase()).map(Vec::as_slice)
    }

    /// `None` when the table is unknown.
    pub fn contains_column(&self, table: &str, column: &str) -> Option<bool> {
        self.columns(table)
            .map(|cols| cols.iter().any(|c| c.eq_ignore_ascii_case(column)))
    }
}
