//! Typed in-process event bus.
//!
//! Decouples the producers (workflow engine, multi-agent flow, progress
//! broadcaster) from the consumers (connection manager, observability sinks,
//! tests). Topics form a closed set; handlers for a topic observe events in
//! publish order from a single producer.
//!
//! # Failure semantics
//!
//! Handlers run on the publisher's stack. A panicking handler is caught,
//! logged, and skipped; the bus never retries and a misbehaving handler
//! cannot block the other handlers or the publisher.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::progress::ProgressUpdate;
use crate::push::DisconnectReason;
use crate::workflow::{StepError, StepKind};

/// Closed set of bus topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// A workflow transitioned to running.
    WorkflowStarted,
    /// A step began executing.
    WorkflowStepStarted,
    /// A step finished (successfully or not).
    WorkflowStepCompleted,
    /// Terminal: the workflow completed (possibly partially).
    WorkflowCompleted,
    /// Terminal: the workflow failed.
    WorkflowFailed,
    /// A progress percentage/stage update.
    ProgressUpdate,
    /// A push subscriber attached.
    ConnectionOpened,
    /// A push subscriber detached.
    ConnectionClosed,
}

impl Topic {
    /// All topics, in declaration order.
    pub const ALL: [Topic; 8] = [
        Topic::WorkflowStarted,
        Topic::WorkflowStepStarted,
        Topic::WorkflowStepCompleted,
        Topic::WorkflowCompleted,
        Topic::WorkflowFailed,
        Topic::ProgressUpdate,
        Topic::ConnectionOpened,
        Topic::ConnectionClosed,
    ];
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::WorkflowStarted => "workflow.started",
            Self::WorkflowStepStarted => "workflow.step.started",
            Self::WorkflowStepCompleted => "workflow.step.completed",
            Self::WorkflowCompleted => "workflow.completed",
            Self::WorkflowFailed => "workflow.failed",
            Self::ProgressUpdate => "progress.update",
            Self::ConnectionOpened => "connection.opened",
            Self::ConnectionClosed => "connection.closed",
        };
        write!(f, "{name}")
    }
}

/// An event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// Workflow transitioned to running.
    WorkflowStarted {
        workflow_id: String,
        initial_task: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        estimated_steps: Option<usize>,
        timestamp: DateTime<Utc>,
    },

    /// Step began executing.
    StepStarted {
        workflow_id: String,
        step_index: usize,
        description: String,
        kind: StepKind,
        timestamp: DateTime<Utc>,
    },

    /// Step finished.
    StepCompleted {
        workflow_id: String,
        step_index: usize,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<StepError>,
        timestamp: DateTime<Utc>,
    },

    /// Terminal success (possibly partial).
    WorkflowCompleted {
        workflow_id: String,
        summary: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        partial_results_note: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Terminal failure.
    WorkflowFailed {
        workflow_id: String,
        error: StepError,
        #[serde(skip_serializing_if = "Option::is_none")]
        partial_results: Option<serde_json::Value>,
        timestamp: DateTime<Utc>,
    },

    /// Progress percentage/stage update.
    Progress(ProgressUpdate),

    /// Subscriber attached.
    ConnectionOpened {
        client_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Subscriber detached.
    ConnectionClosed {
        client_id: String,
        reason: DisconnectReason,
        timestamp: DateTime<Utc>,
    },
}

impl BusEvent {
    /// The topic this event is published on.
    #[must_use]
    pub fn topic(&self) -> Topic {
        match self {
            Self::WorkflowStarted { .. } => Topic::WorkflowStarted,
            Self::StepStarted { .. } => Topic::WorkflowStepStarted,
            Self::StepCompleted { .. } => Topic::WorkflowStepCompleted,
            Self::WorkflowCompleted { .. } => Topic::WorkflowCompleted,
            Self::WorkflowFailed { .. } => Topic::WorkflowFailed,
            Self::Progress(_) => Topic::ProgressUpdate,
            Self::ConnectionOpened { .. } => Topic::ConnectionOpened,
            Self::ConnectionClosed { .. } => Topic::ConnectionClosed,
        }
    }

    /// The workflow this event belongs to, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::WorkflowStarted { workflow_id, .. }
            | Self::StepStarted { workflow_id, .. }
            | Self::StepCompleted { workflow_id, .. }
            | Self::WorkflowCompleted { workflow_id, .. }
            | Self::WorkflowFailed { workflow_id, .. } => Some(workflow_id),
            Self::Progress(update) => Some(&update.task_id),
            Self::ConnectionOpened { .. } | Self::ConnectionClosed { .. } => None,
        }
    }

    /// Whether this event ends a workflow.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::WorkflowCompleted { .. } | Self::WorkflowFailed { .. })
    }
}

type Handler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// Token returned by [`EventBus::subscribe`], used to deregister.
#[derive(Debug)]
pub struct SubscriptionToken {
    topic: Topic,
    id: u64,
}

/// Typed publish/subscribe bus.
pub struct EventBus {
    handlers: RwLock<HashMap<Topic, Vec<(u64, Handler)>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handler_count", &self.handler_count())
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for a topic.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionToken
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut handlers = self.handlers.write();
        handlers
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));
        SubscriptionToken { topic, id }
    }

    /// Deregister a handler.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        let mut handlers = self.handlers.write();
        if let Some(entries) = handlers.get_mut(&token.topic) {
            entries.retain(|(id, _)| *id != token.id);
        }
    }

    /// Deliver an event to every handler registered on its topic.
    ///
    /// Dispatch happens on the caller's stack against a snapshot of the
    /// registration list, so handlers may subscribe or publish re-entrantly.
    pub fn publish(&self, event: &BusEvent) {
        let topic = event.topic();
        let snapshot: Vec<Handler> = {
            let handlers = self.handlers.read();
            handlers
                .get(&topic)
                .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::warn!(topic = %topic, "event handler panicked; skipping");
            }
        }
    }

    /// Total number of registered handlers across all topics.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn progress_event(task_id: &str, progress: f32) -> BusEvent {
        BusEvent::Progress(ProgressUpdate {
            task_id: task_id.to_string(),
            stage: "Testing".to_string(),
            progress,
            execution_type: None,
            agents: None,
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn delivers_to_registered_handlers_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(Topic::ProgressUpdate, move |_| {
                seen.lock().push(tag);
            });
        }

        bus.publish(&progress_event("wf-1", 10.0));
        assert_eq!(*seen.lock(), vec!["a", "b"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&count);
        let token = bus.subscribe(Topic::ProgressUpdate, move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        bus.publish(&progress_event("wf-1", 10.0));
        bus.unsubscribe(token);
        bus.publish(&progress_event("wf-1", 20.0));

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        bus.subscribe(Topic::ProgressUpdate, |_| panic!("broken handler"));
        let counter = Arc::clone(&count);
        bus.subscribe(Topic::ProgressUpdate, move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        bus.publish(&progress_event("wf-1", 50.0));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn topics_are_isolated() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&count);
        bus.subscribe(Topic::WorkflowCompleted, move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        bus.publish(&progress_event("wf-1", 10.0));
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn terminal_detection() {
        let completed = BusEvent::WorkflowCompleted {
            workflow_id: "wf-1".to_string(),
            summary: serde_json::json!({}),
            partial_results_note: None,
            timestamp: Utc::now(),
        };
        assert!(completed.is_terminal());
        assert_eq!(completed.task_id(), Some("wf-1"));
        assert!(!progress_event("wf-1", 1.0).is_terminal());
    }
}
