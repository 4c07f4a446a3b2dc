//! Connection manager: subscriber lifecycle and message delivery.
//!
//! Each subscriber owns a bounded FIFO outbox drained by one cooperative
//! task. A full outbox drops its oldest pending frame in favour of the new
//! one (progress is a stream; stale frames are worth less than fresh ones).
//! Terminal frames are exempt: they wait for space up to a deadline, and a
//! subscriber that cannot take one in time is disconnected as unhealthy.
//!
//! The manager is safe for concurrent `accept` / `disconnect` / `send` /
//! `broadcast`; the subscriber index sits behind one mutex with short
//! critical sections and all per-subscriber work happens off that lock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{DisconnectReason, Frame};
use crate::events::{BusEvent, EventBus, Topic};

/// Transport-side write half of one push channel.
#[async_trait]
pub trait PushSink: Send {
    /// Write one frame. An error is treated as permanent and closes the
    /// subscriber.
    async fn send(&mut self, frame: &Frame) -> anyhow::Result<()>;

    /// Release transport resources. Called exactly once, after the last
    /// write attempt.
    async fn close(&mut self) {}
}

/// Delivery tuning for the manager.
#[derive(Debug, Clone)]
pub struct ConnectionManagerConfig {
    /// Outbox depth per subscriber.
    pub outbox_capacity: usize,
    /// How long a terminal frame may wait for outbox space.
    pub terminal_enqueue_timeout: Duration,
    /// Idle interval after which the drain task emits a heartbeat frame.
    pub heartbeat_interval: Duration,
    /// Subscribers silent longer than this are disconnected on the next tick.
    pub liveness_deadline: Duration,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: 256,
            terminal_enqueue_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(15),
            liveness_deadline: Duration::from_secs(30),
        }
    }
}

/// Result of a targeted send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Enqueued without evicting anything.
    Delivered,
    /// No subscriber with that id.
    NotFound,
    /// Enqueued, but the oldest pending frame was evicted to make room.
    Dropped,
}

/// Result of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Frames enqueued (including those that evicted an older frame).
    pub delivered: usize,
    /// Evictions performed across all subscribers.
    pub dropped: usize,
}

/// Bounded FIFO with drop-oldest overflow and a blocking path for
/// drop-exempt frames.
struct Outbox {
    queue: Mutex<VecDeque<Frame>>,
    capacity: usize,
    data_ready: Notify,
    space_ready: Notify,
    dropped: AtomicU64,
}

impl Outbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            data_ready: Notify::new(),
            space_ready: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue, evicting the oldest pending frame when full.
    ///
    /// Returns `true` when an eviction happened.
    fn push(&self, frame: Frame) -> bool {
        let evicted = {
            let mut queue = self.queue.lock();
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            } else {
                false
            };
            queue.push_back(frame);
            evicted
        };
        self.data_ready.notify_one();
        evicted
    }

    /// Enqueue only if there is room.
    fn try_push(&self, frame: Frame) -> Result<(), Frame> {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                return Err(frame);
            }
            queue.push_back(frame);
        }
        self.data_ready.notify_one();
        Ok(())
    }

    /// Enqueue without eviction, waiting for space up to `timeout`.
    ///
    /// Returns `false` when the deadline passed with the outbox still full.
    async fn push_blocking(&self, frame: Frame, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut pending = frame;
        loop {
            let space = self.space_ready.notified();
            match self.try_push(pending) {
                Ok(()) => return true,
                Err(frame) => pending = frame,
            }
            if tokio::time::timeout_at(deadline, space).await.is_err() {
                return false;
            }
        }
    }

    /// Wait for and remove the oldest pending frame.
    async fn pop(&self) -> Frame {
        loop {
            let ready = self.data_ready.notified();
            if let Some(frame) = self.queue.lock().pop_front() {
                self.space_ready.notify_waiters();
                return frame;
            }
            ready.await;
        }
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// One attached push channel.
struct Subscriber {
    client_id: String,
    connected_at: DateTime<Utc>,
    last_seen: Mutex<DateTime<Utc>>,
    task_filter: Mutex<Option<String>>,
    outbox: Outbox,
    closed: AtomicBool,
    shutdown: Notify,
}

impl Subscriber {
    fn new(client_id: String, outbox_capacity: usize) -> Self {
        let now = Utc::now();
        Self {
            client_id,
            connected_at: now,
            last_seen: Mutex::new(now),
            task_filter: Mutex::new(None),
            outbox: Outbox::new(outbox_capacity),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.notify_waiters();
        // release any terminal pusher stuck waiting for space
        self.outbox.space_ready.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether this subscriber wants frames for the given task.
    fn wants(&self, frame: &Frame) -> bool {
        if frame.task_id.is_empty() {
            return true;
        }
        match self.task_filter.lock().as_deref() {
            Some(filter) => filter == frame.task_id,
            None => true,
        }
    }
}

/// Tracks active push subscribers and delivers frames to them.
///
/// Cheap to clone; all clones share the same subscriber index.
#[derive(Clone)]
pub struct ConnectionManager {
    subscribers: Arc<Mutex<HashMap<String, Arc<Subscriber>>>>,
    config: ConnectionManagerConfig,
    bus: Arc<EventBus>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("subscribers", &self.subscriber_count())
            .field("config", &self.config)
            .finish()
    }
}

impl ConnectionManager {
    /// Create a manager publishing connection lifecycle events on `bus`.
    #[must_use]
    pub fn new(config: ConnectionManagerConfig, bus: Arc<EventBus>) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            config,
            bus,
        }
    }

    /// Forward workflow and progress events from the bus to subscribers.
    pub fn attach_to_bus(&self) {
        let workflow_topics = [
            Topic::WorkflowStarted,
            Topic::WorkflowStepStarted,
            Topic::WorkflowStepCompleted,
            Topic::WorkflowCompleted,
            Topic::WorkflowFailed,
            Topic::ProgressUpdate,
        ];
        for topic in workflow_topics {
            let manager = self.clone();
            self.bus.subscribe(topic, move |event| {
                if let Some(frame) = Frame::from_event(event) {
                    manager.broadcast(frame);
                }
            });
        }
    }

    /// Register a subscriber. An existing subscriber with the same id is
    /// closed first (last-writer-wins).
    pub fn accept(&self, client_id: &str, sink: Box<dyn PushSink>) {
        let replaced = self.subscribers.lock().remove(client_id);
        if let Some(previous) = replaced {
            previous.close();
            self.bus.publish(&BusEvent::ConnectionClosed {
                client_id: client_id.to_string(),
                reason: DisconnectReason::Replaced,
                timestamp: Utc::now(),
            });
        }

        let subscriber = Arc::new(Subscriber::new(
            client_id.to_string(),
            self.config.outbox_capacity,
        ));
        self.subscribers
            .lock()
            .insert(client_id.to_string(), Arc::clone(&subscriber));

        self.bus.publish(&BusEvent::ConnectionOpened {
            client_id: client_id.to_string(),
            timestamp: Utc::now(),
        });
        tracing::debug!(client_id = %client_id, "subscriber accepted");

        let manager = self.clone();
        tokio::spawn(drain(manager, subscriber, sink));
    }

    /// Close and remove a subscriber. Idempotent.
    pub fn disconnect(&self, client_id: &str, reason: DisconnectReason) {
        let removed = self.subscribers.lock().remove(client_id);
        if let Some(subscriber) = removed {
            subscriber.close();
            tracing::debug!(client_id = %client_id, reason = %reason, "subscriber disconnected");
            self.bus.publish(&BusEvent::ConnectionClosed {
                client_id: client_id.to_string(),
                reason,
                timestamp: Utc::now(),
            });
        }
    }

    /// Enqueue a frame for one subscriber.
    pub fn send(&self, client_id: &str, frame: Frame) -> SendOutcome {
        let subscriber = match self.subscribers.lock().get(client_id) {
            Some(subscriber) => Arc::clone(subscriber),
            None => return SendOutcome::NotFound,
        };

        if frame.is_terminal() {
            self.enqueue_terminal(&subscriber, frame);
            SendOutcome::Delivered
        } else if subscriber.outbox.push(frame) {
            SendOutcome::Dropped
        } else {
            SendOutcome::Delivered
        }
    }

    /// Enqueue a frame for every subscriber whose filter accepts it.
    ///
    /// A slow or full subscriber never affects the others, and a
    /// per-subscriber failure never reaches the caller.
    pub fn broadcast(&self, frame: Frame) -> BroadcastReport {
        let targets: Vec<Arc<Subscriber>> = {
            let subscribers = self.subscribers.lock();
            subscribers.values().map(Arc::clone).collect()
        };

        let mut report = BroadcastReport::default();
        for subscriber in targets {
            if !subscriber.wants(&frame) {
                continue;
            }
            if frame.is_terminal() {
                self.enqueue_terminal(&subscriber, frame.clone());
                report.delivered += 1;
            } else {
                if subscriber.outbox.push(frame.clone()) {
                    report.dropped += 1;
                }
                report.delivered += 1;
            }
        }
        report
    }

    /// Disconnect every subscriber silent past the liveness deadline.
    pub fn heartbeat_tick(&self) {
        let deadline = self.config.liveness_deadline;
        let stale: Vec<String> = {
            let subscribers = self.subscribers.lock();
            let now = Utc::now();
            subscribers
                .values()
                .filter(|subscriber| {
                    let last_seen = *subscriber.last_seen.lock();
                    (now - last_seen).to_std().unwrap_or_default() > deadline
                })
                .map(|subscriber| subscriber.client_id.clone())
                .collect()
        };

        for client_id in stale {
            self.disconnect(&client_id, DisconnectReason::Timeout);
        }
    }

    /// Record client traffic for liveness accounting.
    pub fn touch(&self, client_id: &str) {
        if let Some(subscriber) = self.subscribers.lock().get(client_id) {
            *subscriber.last_seen.lock() = Utc::now();
        }
    }

    /// Restrict a subscriber to a single task's stream, or clear with `None`.
    pub fn set_task_filter(&self, client_id: &str, task_id: Option<String>) {
        if let Some(subscriber) = self.subscribers.lock().get(client_id) {
            *subscriber.task_filter.lock() = task_id;
        }
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Whether a subscriber with this id is attached.
    #[must_use]
    pub fn contains(&self, client_id: &str) -> bool {
        self.subscribers.lock().contains_key(client_id)
    }

    /// Frames evicted from a subscriber's outbox so far.
    #[must_use]
    pub fn dropped_count(&self, client_id: &str) -> Option<u64> {
        self.subscribers
            .lock()
            .get(client_id)
            .map(|subscriber| subscriber.outbox.dropped())
    }

    /// Time a subscriber attached, if present.
    #[must_use]
    pub fn connected_at(&self, client_id: &str) -> Option<DateTime<Utc>> {
        self.subscribers
            .lock()
            .get(client_id)
            .map(|subscriber| subscriber.connected_at)
    }

    /// Terminal frames never drop: enqueue inline when possible, otherwise
    /// wait for space on a spawned task so the caller is not blocked.
    fn enqueue_terminal(&self, subscriber: &Arc<Subscriber>, frame: Frame) {
        if let Err(frame) = subscriber.outbox.try_push(frame) {
            let manager = self.clone();
            let subscriber = Arc::clone(subscriber);
            let timeout = self.config.terminal_enqueue_timeout;
            tokio::spawn(async move {
                if subscriber.is_closed() {
                    return;
                }
                if !subscriber.outbox.push_blocking(frame, timeout).await {
                    manager.disconnect(&subscriber.client_id, DisconnectReason::Unhealthy);
                }
            });
        }
    }
}

/// Drain one subscriber's outbox into its sink.
async fn drain(manager: ConnectionManager, subscriber: Arc<Subscriber>, mut sink: Box<dyn PushSink>) {
    let heartbeat = manager.config.heartbeat_interval;
    loop {
        if subscriber.is_closed() {
            break;
        }
        let frame = tokio::select! {
            frame = subscriber.outbox.pop() => frame,
            () = subscriber.shutdown.notified() => break,
            () = tokio::time::sleep(heartbeat) => Frame::heartbeat(),
        };
        if let Err(error) = sink.send(&frame).await {
            tracing::debug!(
                client_id = %subscriber.client_id,
                error = %error,
                "push sink write failed"
            );
            manager.disconnect(&subscriber.client_id, DisconnectReason::SinkError);
            break;
        }
    }
    sink.close().await;
}
