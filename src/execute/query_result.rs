use crate::error::{DbError, DbResult};
use crate::value::Value;

/// Forward-only cursor over one physical result set.
///
/// Column indexes are 0-based. A cursor is positioned before the first row
/// until `next` returns `true`.
pub trait QueryResult: Send {
    fn next(&mut self) -> DbResult<bool>;

    fn value(&self, column_index: usize) -> DbResult<Value>;

    fn column_count(&self) -> usize;

    fn column_label(&self, column_index: usize) -> DbResult<String>;
}

/// Fully materialised result; what connection-strict execution hands to the merger.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueryResult {
    labels: Vec<String>,
    rows: Vec<Vec<Value>>,
    position: Option<usize>,
}

impl MemoryQueryResult {
    pub fn new(labels: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            labels,
            rows,
            position: None,
        }
    }

    /// Drain another cursor so its connection can be reused.
    pub fn load(mut source: Box<dyn QueryResult>) -> DbResult<Self> {
        let count = source.column_count();
        let labels = (0..count)
            .map(|i| source.column_label(i))
            .collect::<DbResult<Vec<_>>>()?;

        let mut rows = Vec::new();
        while source.next()? {
            rows.push((0..count).map(|i| source.value(i)).collect::<DbResult<Vec<_>>>()?);
        }
        Ok(Self::new(labels, rows))
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn current(&self) -> DbResult<&Vec<Value>> {
        self.position
            .and_then(|p| self.rows.get(p))
            .ok_or_else(|| DbError::InternalError("Cursor is not on a row".to_string()))
    }
}

impl QueryResult for MemoryQueryResult {
    fn next(&mut self) -> DbResult<bool> {
        let next = self.position.map_or(0, |p| p + 1);
        // park one past the end so repeated calls keep returning false
        self.position = Some(next.min(self.rows.len()));
        Ok(next < self.rows.len())
    }

    fn value(&self, column_index: usize) -> DbResult<Value> {
        self.current()?
            .get(column_index)
            .cloned()
            .ok_or_else(|| DbError::InternalError(format!("Column index {} out of range", column_index)))
    }

    fn column_count(&self) -> usize {
        self.labels.len()
    }

    fn column_label(&self, column_index: usize) -> DbResult<String> {
        self.labels
            .get(column_index)
            .cloned()
            .ok_or_else(|| DbError::InternalError(format!("Column index {} out of range", column_index)))
    }
}
