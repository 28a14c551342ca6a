use super::MergedResult;
use crate::error::DbResult;
use crate::value::Value;

/// Re-applies OFFSET and LIMIT on the merged stream.
pub struct LimitDecorator {
    inner: Box<dyn MergedResult>,
    offset: u64,
    /// `None` means unbounded
    row_count: Option<u64>,
    skipped: bool,
    returned: u64,
}

impl LimitDecorator {
    pub fn new(inner: Box<dyn MergedResult>, offset: i64, row_count: Option<i64>) -> Self {
        Self {
            inner,
            offset: offset.max(0) as u64,
            row_count: row_count.filter(|n| *n >= 0).map(|n| n as u64),
            skipped: false,
            returned: 0,
        }
    }
}

impl MergedResult for LimitDecorator {
    fn next(&mut self) -> DbResult<bool> {
        if !self.skipped {
            self.skipped = true;
            for _ in 0..self.offset {
                if !self.inner.next()? {
                    return Ok(false);
                }
            }
        }
        if self.row_count.is_some_and(|limit| self.returned >= limit) {
            return Ok(false);
        }
        let has_row = self.inner.next()?;
        if has_row {
            self.returned += 1;
        }
        Ok(has_row)
    }

    fn value(&self, column_index: usize) -> DbResult<Value> {
        self.inner.value(column_index)
    }
}
