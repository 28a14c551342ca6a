use serde::{Deserialize, Serialize};

/// What the template does with an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionPolicy {
    /// Return the error to the caller.
    #[default]
    Throw,
    /// Log it and return an empty result.
    Swallow,
}

/// Per-connection flags threaded through routing, execution and transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    pub exception_policy: ExceptionPolicy,
    /// read from masters regardless of statement type
    pub force_master: bool,
    /// set after the first write so later reads see it
    pub master_visited: bool,
    /// run every unit on the caller thread
    pub serial: bool,
}

impl ExecutionContext {
    pub fn new(exception_policy: ExceptionPolicy) -> Self {
        Self {
            exception_policy,
            ..Default::default()
        }
    }

    pub fn use_master(&self) -> bool {
        self.force_master || self.master_visited
    }

    /// Reset to defaults when the logical connection closes.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_resets_flags() {
        let mut ctx = ExecutionContext::new(ExceptionPolicy::Swallow);
        ctx.force_master = true;
        ctx.master_visited = true;
        assert!(ctx.use_master());
        ctx.clear();
        assert_eq!(ctx, ExecutionContext::default());
    }
}
