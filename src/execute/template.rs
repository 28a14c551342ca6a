//! SQL Execute Template
//!
//! Wraps every engine invocation in overall lifecycle events and applies the
//! caller's exception policy.

use std::sync::Arc;

use super::context::{ExceptionPolicy, ExecutionContext};
use super::engine::{ExecuteCallback, ExecuteEngine};
use super::prepare::ExecutionGroup;
use crate::error::{DbError, DbResult};
use crate::event::{EventDispatcher, ExecutionEvent};

#[derive(Clone)]
pub struct SqlExecuteTemplate {
    engine: Arc<ExecuteEngine>,
    events: EventDispatcher,
}

impl SqlExecuteTemplate {
    pub fn new(engine: Arc<ExecuteEngine>, events: EventDispatcher) -> Self {
        Self { engine, events }
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Run `callback` once per connection group. Exactly one started and one
    /// finished event are published per call.
    ///
    /// With [`ExceptionPolicy::Swallow`] a failure yields an empty list.
    pub fn execute<O, C>(
        &self,
        groups: Vec<(String, Vec<ExecutionGroup>)>,
        context: &ExecutionContext,
        callback: Arc<C>,
    ) -> DbResult<Vec<O>>
    where
        O: Send + 'static,
        C: ExecuteCallback<ExecutionGroup, Vec<O>> + 'static,
    {
        let unit_count: usize = groups
            .iter()
            .flat_map(|(_, gs)| gs.iter())
            .map(ExecutionGroup::unit_count)
            .sum();
        self.events.publish(ExecutionEvent::OverallStarted {
            parallel: unit_count > 1,
            unit_count,
        });

        let result = if context.serial {
            let inputs: Vec<ExecutionGroup> = groups.into_iter().flat_map(|(_, gs)| gs).collect();
            self.engine
                .execute_serial(inputs, callback.as_ref())
                .map(|outputs| outputs.into_iter().flatten().collect())
        } else {
            self.engine.group_execute(groups, callback)
        };

        match result {
            Ok(outputs) => {
                self.events
                    .publish(ExecutionEvent::OverallSucceeded { unit_count });
                Ok(outputs)
            }
            Err(e) => {
                self.events.publish(ExecutionEvent::OverallFailed {
                    unit_count,
                    error: e.to_string(),
                });
                self.handle_failure(e, context).map(|_| Vec::new())
            }
        }
    }

    /// `Ok(())` when the policy swallows the error.
    pub fn handle_failure(&self, error: DbError, context: &ExecutionContext) -> DbResult<()> {
        match context.exception_policy {
            ExceptionPolicy::Throw => Err(error),
            ExceptionPolicy::Swallow => {
                tracing::warn!("Execution failure swallowed: {}", error);
                Ok(())
            }
        }
    }
}
