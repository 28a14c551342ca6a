//! Execution lifecycle events
//!
//! Emission goes through an explicit [`EventDispatcher`] owned by the runtime;
//! consumers plug in as [`EventSink`]s (tracing, a broadcast channel, or the
//! BASE journal).

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::value::Value;

/// Identifies one execution unit inside an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitInfo {
    pub index: usize,
    pub data_source: String,
    pub sql: String,
    pub parameter_sets: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    OverallStarted { parallel: bool, unit_count: usize },
    OverallSucceeded { unit_count: usize },
    OverallFailed { unit_count: usize, error: String },
    UnitStarted { unit: UnitInfo },
    UnitSucceeded { unit: UnitInfo },
    UnitFailed { unit: UnitInfo, error: String },
}

impl ExecutionEvent {
    pub fn is_unit_failure(&self) -> bool {
        matches!(self, ExecutionEvent::UnitFailed { .. })
    }
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: &ExecutionEvent);
}

/// Logs events; unit failures carry their data source.
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::OverallStarted { parallel, unit_count } => {
                tracing::trace!("Execution started: {} unit(s), parallel={}", unit_count, parallel);
            }
            ExecutionEvent::OverallSucceeded { unit_count } => {
                tracing::trace!("Execution finished: {} unit(s)", unit_count);
            }
            ExecutionEvent::OverallFailed { error, .. } => {
                tracing::debug!("Execution failed: {}", error);
            }
            ExecutionEvent::UnitStarted { unit } => {
                tracing::trace!("[{}] start: {}", unit.data_source, unit.sql);
            }
            ExecutionEvent::UnitSucceeded { unit } => {
                tracing::trace!("[{}] done: {}", unit.data_source, unit.sql);
            }
            ExecutionEvent::UnitFailed { unit, error } => {
                tracing::error!("[{}] failed: {} ({})", unit.data_source, error, unit.sql);
            }
        }
    }
}

/// Fans events out on a tokio broadcast channel for telemetry consumers.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: broadcast::Sender<ExecutionEvent>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for ChannelEventSink {
    fn publish(&self, event: &ExecutionEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event.clone());
    }
}

#[derive(Clone, Default)]
pub struct EventDispatcher {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn publish(&self, event: ExecutionEvent) {
        for sink in &self.sinks {
            sink.publish(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_delivers_to_subscribers() {
        let sink = Arc::new(ChannelEventSink::new(16));
        let mut rx = sink.subscribe();
        let dispatcher = EventDispatcher::new()
            .with_sink(Arc::new(TracingEventSink))
            .with_sink(sink.clone());

        dispatcher.publish(ExecutionEvent::OverallStarted {
            parallel: true,
            unit_count: 2,
        });

        assert_eq!(
            rx.try_recv().unwrap(),
            ExecutionEvent::OverallStarted {
                parallel: true,
                unit_count: 2
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let dispatcher = EventDispatcher::new().with_sink(Arc::new(ChannelEventSink::new(1)));
        dispatcher.publish(ExecutionEvent::OverallSucceeded { unit_count: 0 });
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(ExecutionEvent::OverallSucceeded { unit_count: 3 }).unwrap();
        assert_eq!(json["event"], "overall_succeeded");
        assert_eq!(json["unit_count"], 3);
    }
}
