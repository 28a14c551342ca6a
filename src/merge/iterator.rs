use super::MergedResult;
use crate::error::{DbError, DbResult};
use crate::execute::QueryResult;
use crate::value::Value;

/// Concatenates shard results in execution-unit order.
pub struct IteratorMerge {
    results: Vec<Box<dyn QueryResult>>,
    current: usize,
    on_row: bool,
}

impl IteratorMerge {
    pub fn new(results: Vec<Box<dyn QueryResult>>) -> Self {
        Self {
            results,
            current: 0,
            on_row: false,
        }
    }
}

impl MergedResult for IteratorMerge {
    fn next(&mut self) -> DbResult<bool> {
        while let Some(result) = self.results.get_mut(self.current) {
            if result.next()? {
                self.on_row = true;
                return Ok(true);
            }
            self.current += 1;
        }
        self.on_row = false;
        Ok(false)
    }

    fn value(&self, column_index: usize) -> DbResult<Value> {
        match self.results.get(self.current) {
            Some(result) if self.on_row => result.value(column_index),
            _ => Err(DbError::Merge("Result set is not positioned on a row".to_string())),
        }
    }
}
