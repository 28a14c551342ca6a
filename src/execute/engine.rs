//! Execute Engine
//!
//! Runs callbacks over an ordered list of inputs. The first input runs on the
//! caller thread, the rest on the blocking pool of an owned tokio runtime.
//! Results come back in input order; the caller waits on each pending task in
//! submission order.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};

use crate::error::{DbError, DbResult};

/// Upper bound of the blocking pool when no executor size is configured.
const CACHED_POOL_LIMIT: usize = 512;

/// Work applied to every input. Implemented for any matching closure.
pub trait ExecuteCallback<I, O>: Send + Sync {
    fn execute(&self, input: I) -> DbResult<O>;
}

impl<I, O, F> ExecuteCallback<I, O> for F
where
    F: Fn(I) -> DbResult<O> + Send + Sync,
{
    fn execute(&self, input: I) -> DbResult<O> {
        self(input)
    }
}

pub struct ExecuteEngine {
    runtime: Mutex<Option<Runtime>>,
    shutdown_timeout: Duration,
}

impl ExecuteEngine {
    /// `executor_size == 0` gives a cached pool that grows on demand.
    pub fn new(executor_size: usize, shutdown_timeout: Duration) -> DbResult<Self> {
        let next_id = Arc::new(AtomicUsize::new(0));
        let max_blocking = if executor_size > 0 {
            executor_size
        } else {
            CACHED_POOL_LIMIT
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(max_blocking)
            .thread_name_fn(move || {
                format!("shardmesh-exec-{}", next_id.fetch_add(1, Ordering::Relaxed))
            })
            .enable_all()
            .build()?;

        tracing::debug!(
            "Execute engine started (executor_size={}, shutdown_timeout={:?})",
            executor_size,
            shutdown_timeout
        );

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            shutdown_timeout,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.runtime.lock().is_none()
    }

    fn handle(&self) -> DbResult<Handle> {
        self.runtime
            .lock()
            .as_ref()
            .map(|rt| rt.handle().clone())
            .ok_or_else(|| DbError::InternalError("Execute engine is closed".to_string()))
    }

    pub fn execute<I, O, C>(&self, inputs: Vec<I>, callback: Arc<C>) -> DbResult<Vec<O>>
    where
        I: Send + 'static,
        O: Send + 'static,
        C: ExecuteCallback<I, O> + 'static,
    {
        let first = Arc::clone(&callback);
        self.execute_with_first(inputs, move |input| first.execute(input), callback)
    }

    /// Like [`execute`](Self::execute) but the caller-thread input uses `first`.
    ///
    /// The first failure in input order is returned. Tasks already handed to
    /// the pool keep running; their results and errors are dropped.
    pub fn execute_with_first<I, O, F, C>(
        &self,
        inputs: Vec<I>,
        first: F,
        callback: Arc<C>,
    ) -> DbResult<Vec<O>>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: FnOnce(I) -> DbResult<O>,
        C: ExecuteCallback<I, O> + 'static,
    {
        let mut inputs = inputs.into_iter();
        let Some(first_input) = inputs.next() else {
            return Ok(Vec::new());
        };
        let handle = self.handle()?;

        let pending: Vec<_> = inputs
            .map(|input| {
                let callback = Arc::clone(&callback);
                handle.spawn_blocking(move || callback.execute(input))
            })
            .collect();

        let mut results = Vec::with_capacity(pending.len() + 1);
        results.push(first(first_input)?);
        for task in pending {
            let output = futures::executor::block_on(task)
                .map_err(|e| DbError::InternalError(format!("Execution task failed: {}", e)))??;
            results.push(output);
        }
        Ok(results)
    }

    /// Each group input yields a list; output is flattened in group order,
    /// then in list order inside a group.
    pub fn group_execute<K, I, O, C>(&self, groups: Vec<(K, Vec<I>)>, callback: Arc<C>) -> DbResult<Vec<O>>
    where
        I: Send + 'static,
        O: Send + 'static,
        C: ExecuteCallback<I, Vec<O>> + 'static,
    {
        let inputs: Vec<I> = groups.into_iter().flat_map(|(_, inputs)| inputs).collect();
        Ok(self.execute(inputs, callback)?.into_iter().flatten().collect())
    }

    /// Everything on the caller thread, stopping at the first failure.
    pub fn execute_serial<I, O, C>(&self, inputs: Vec<I>, callback: &C) -> DbResult<Vec<O>>
    where
        C: ExecuteCallback<I, O> + ?Sized,
    {
        inputs.into_iter().map(|input| callback.execute(input)).collect()
    }

    /// Hand the runtime to a closer thread so the caller never waits on drains.
    pub fn close(&self) {
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };
        let timeout = self.shutdown_timeout;
        let closer = std::thread::Builder::new()
            .name("shardmesh-exec-closer".to_string())
            .spawn(move || {
                runtime.shutdown_timeout(timeout);
                tracing::debug!("Execute engine shut down");
            });
        if let Err(e) = closer {
            tracing::error!("Failed to start execute engine closer: {}", e);
        }
    }
}

impl Drop for ExecuteEngine {
    fn drop(&mut self) {
        self.close();
    }
}
