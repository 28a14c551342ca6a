use std::cmp::Ordering;

use super::{read_row, MergedResult, SortKey};
use crate::error::{DbError, DbResult};
use crate::execute::QueryResult;
use crate::value::Value;

/// Compare two rows on the given keys.
pub fn compare_rows(left: &[Value], right: &[Value], keys: &[SortKey]) -> Ordering {
    for key in keys {
        let a = left.get(key.index).unwrap_or(&Value::Null);
        let b = right.get(key.index).unwrap_or(&Value::Null);
        let ordering = match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) if key.nulls_first => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, true) if key.nulls_first => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) if key.descending => b.compare(a),
            (false, false) => a.compare(b),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// K-way merge of shard results that are each already sorted.
///
/// Keeps the head row of every shard and always yields the smallest one; on
/// ties the earlier shard wins.
pub struct OrderByStreamMerge {
    results: Vec<Box<dyn QueryResult>>,
    heads: Vec<Option<Vec<Value>>>,
    keys: Vec<SortKey>,
    current: Option<Vec<Value>>,
}

impl OrderByStreamMerge {
    pub fn new(mut results: Vec<Box<dyn QueryResult>>, keys: Vec<SortKey>) -> DbResult<Self> {
        let mut heads = Vec::with_capacity(results.len());
        for result in results.iter_mut() {
            heads.push(advance(result.as_mut())?);
        }
        Ok(Self {
            results,
            heads,
            keys,
            current: None,
        })
    }
}

fn advance(result: &mut dyn QueryResult) -> DbResult<Option<Vec<Value>>> {
    if result.next()? {
        Ok(Some(read_row(result)?))
    } else {
        Ok(None)
    }
}

impl MergedResult for OrderByStreamMerge {
    fn next(&mut self) -> DbResult<bool> {
        let mut smallest: Option<usize> = None;
        for (index, head) in self.heads.iter().enumerate() {
            let Some(row) = head else { continue };
            let better = match smallest.and_then(|s| self.heads[s].as_ref()) {
                Some(best) => compare_rows(row, best, &self.keys) == Ordering::Less,
                None => true,
            };
            if better {
                smallest = Some(index);
            }
        }

        let Some(index) = smallest else {
            self.current = None;
            return Ok(false);
        };
        let next_head = advance(self.results[index].as_mut())?;
        self.current = std::mem::replace(&mut self.heads[index], next_head);
        Ok(true)
    }

    fn value(&self, column_index: usize) -> DbResult<Value> {
        self.current
            .as_ref()
            .and_then(|row| row.get(column_index))
            .cloned()
            .ok_or_else(|| DbError::Merge(format!("No value at column {}", column_index)))
    }
}
