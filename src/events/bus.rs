//! Event Bus
//!
//! In-process publish/subscribe with one dispatch task per bus instance.
//! Events are dequeued strictly FIFO; every handler subscribed to an event
//! type runs as its own task, and each event's handler group is supervised
//! off the dispatch loop so a stuck handler only holds up its own event.
//!
//! The queue is bounded (`EventBusConfig::queue_capacity`): `publish` waits
//! for space while the bus is running, and drops with a warning while it is
//! stopped. Handler failures become `ErrorOccurred` events, rate limited and
//! never re-routed when the failing event is itself an `ErrorOccurred`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::handler::{EventHandler, HandlerResult};
use super::types::{Event, EventType};
use crate::config::EventBusConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBusStats {
    pub running: bool,
    pub events_published: u64,
    pub events_processed: u64,
    pub events_failed: u64,
    pub errors_suppressed: u64,
    pub queue_size: usize,
    pub handler_count: usize,
    pub subscribed_types: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusState {
    Idle,
    Running,
    Stopped,
}

struct Lifecycle {
    state: BusState,
    dispatcher: Option<JoinHandle<()>>,
}

/// Fixed one-second window limiter for synthetic error events
struct ErrorRateLimiter {
    max_per_window: u32,
    window_start: Instant,
    emitted: u32,
}

impl ErrorRateLimiter {
    fn new(max_per_window: u32) -> Self {
        Self {
            max_per_window,
            window_start: Instant::now(),
            emitted: 0,
        }
    }

    fn allow(&mut self) -> bool {
        if self.window_start.elapsed().as_secs() >= 1 {
            self.window_start = Instant::now();
            self.emitted = 0;
        }
        if self.emitted < self.max_per_window {
            self.emitted += 1;
            true
        } else {
            false
        }
    }
}

type HandlerMap = HashMap<EventType, Vec<Arc<dyn EventHandler>>>;

/// Handler tasks for one event. Dropping the group (when the dispatcher is
/// cancelled on stop) aborts any handler still running.
struct HandlerTasks(Vec<(String, JoinHandle<HandlerResult>)>);

impl Drop for HandlerTasks {
    fn drop(&mut self) {
        for (_, task) in &self.0 {
            task.abort();
        }
    }
}

struct BusInner {
    config: EventBusConfig,
    subscriptions: RwLock<HandlerMap>,
    lifecycle: Mutex<Lifecycle>,
    running: AtomicBool,
    sender: StdMutex<Option<mpsc::Sender<Event>>>,
    queued: AtomicUsize,
    events_published: AtomicU64,
    events_processed: AtomicU64,
    events_failed: AtomicU64,
    errors_suppressed: AtomicU64,
    error_limiter: StdMutex<ErrorRateLimiter>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn same_handler(a: &Arc<dyn EventHandler>, b: &Arc<dyn EventHandler>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Cloneable handle to one event bus instance
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let limiter = ErrorRateLimiter::new(config.max_error_events_per_sec);
        Self {
            inner: Arc::new(BusInner {
                config,
                subscriptions: RwLock::new(HashMap::new()),
                lifecycle: Mutex::new(Lifecycle {
                    state: BusState::Idle,
                    dispatcher: None,
                }),
                running: AtomicBool::new(false),
                sender: StdMutex::new(None),
                queued: AtomicUsize::new(0),
                events_published: AtomicU64::new(0),
                events_processed: AtomicU64::new(0),
                events_failed: AtomicU64::new(0),
                errors_suppressed: AtomicU64::new(0),
                error_limiter: StdMutex::new(limiter),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start the dispatch task. Idempotent while running; a stopped bus
    /// must be `reset` first.
    pub async fn start(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            match lifecycle.state {
                BusState::Running => {
                    debug!("Event bus already running");
                    return;
                }
                BusState::Stopped => {
                    warn!("Event bus has been stopped; reset it before starting again");
                    return;
                }
                BusState::Idle => {}
            }

            let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity);
            *lock(&self.inner.sender) = Some(tx);
            self.inner.running.store(true, Ordering::SeqCst);
            lifecycle.state = BusState::Running;

            let inner = self.inner.clone();
            lifecycle.dispatcher = Some(tokio::spawn(inner.dispatch_loop(rx)));
        }

        info!("Event bus started");
        self.publish(Event::new(EventType::SystemStartup).with_data("source", "event_bus"))
            .await;
    }

    /// Stop the bus: announce shutdown, refuse new events, let queued events
    /// drain for the grace period, then cancel whatever is left.
    pub async fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.state != BusState::Running {
            debug!("Event bus not running; nothing to stop");
            return;
        }

        let stats = self.get_stats().await;
        let snapshot = serde_json::to_value(&stats).unwrap_or(serde_json::Value::Null);
        self.publish(Event::new(EventType::SystemShutdown).with_data("stats", snapshot))
            .await;

        self.inner.running.store(false, Ordering::SeqCst);
        lifecycle.state = BusState::Stopped;
        // closing the channel lets the loop exit once the queue is drained
        lock(&self.inner.sender).take();

        if let Some(mut dispatcher) = lifecycle.dispatcher.take() {
            match timeout(self.inner.config.drain_grace(), &mut dispatcher).await {
                Ok(_) => debug!("Event bus drained"),
                Err(_) => {
                    warn!(
                        "Event bus did not drain within {:?}; cancelling {} queued events",
                        self.inner.config.drain_grace(),
                        self.inner.queued.load(Ordering::SeqCst)
                    );
                    dispatcher.abort();
                    let _ = dispatcher.await;
                }
            }
        }

        info!("Event bus stopped");
    }

    /// Return a stopped bus to its initial state. Subscriptions are kept.
    pub async fn reset(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.state == BusState::Running {
            warn!("Refusing to reset a running event bus");
            return;
        }

        lifecycle.state = BusState::Idle;
        self.inner.queued.store(0, Ordering::SeqCst);
        self.inner.events_published.store(0, Ordering::SeqCst);
        self.inner.events_processed.store(0, Ordering::SeqCst);
        self.inner.events_failed.store(0, Ordering::SeqCst);
        self.inner.errors_suppressed.store(0, Ordering::SeqCst);
        *lock(&self.inner.error_limiter) =
            ErrorRateLimiter::new(self.inner.config.max_error_events_per_sec);
        debug!("Event bus reset");
    }

    pub async fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        debug!("Subscribing handler {} to {}", handler.name(), event_type);
        self.inner
            .subscriptions
            .write()
            .await
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Remove a handler; returns false if it was not subscribed
    pub async fn unsubscribe(&self, event_type: EventType, handler: &Arc<dyn EventHandler>) -> bool {
        let mut subscriptions = self.inner.subscriptions.write().await;
        let Some(handlers) = subscriptions.get_mut(&event_type) else {
            return false;
        };

        let before = handlers.len();
        handlers.retain(|h| !same_handler(h, handler));
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            subscriptions.remove(&event_type);
        }
        if removed {
            debug!("Unsubscribed handler {} from {}", handler.name(), event_type);
        }
        removed
    }

    /// Enqueue an event for dispatch. Never fails: while the bus is stopped
    /// the event is dropped with a warning.
    pub async fn publish(&self, event: Event) {
        if !self.is_running() {
            warn!(
                "Event bus not running; dropping {} event {}",
                event.event_type, event.event_id
            );
            return;
        }
        let Some(sender) = lock(&self.inner.sender).clone() else {
            warn!("Event bus closed; dropping {} event {}", event.event_type, event.event_id);
            return;
        };

        self.inner.queued.fetch_add(1, Ordering::SeqCst);
        match sender.send(event).await {
            Ok(()) => {
                self.inner.events_published.fetch_add(1, Ordering::SeqCst);
            }
            Err(mpsc::error::SendError(event)) => {
                self.inner.queued.fetch_sub(1, Ordering::SeqCst);
                warn!(
                    "Event bus closed while publishing; dropping {} event {}",
                    event.event_type, event.event_id
                );
            }
        }
    }

    pub async fn get_stats(&self) -> EventBusStats {
        let subscriptions = self.inner.subscriptions.read().await;
        EventBusStats {
            running: self.is_running(),
            events_published: self.inner.events_published.load(Ordering::SeqCst),
            events_processed: self.inner.events_processed.load(Ordering::SeqCst),
            events_failed: self.inner.events_failed.load(Ordering::SeqCst),
            errors_suppressed: self.inner.errors_suppressed.load(Ordering::SeqCst),
            queue_size: self.inner.queued.load(Ordering::SeqCst),
            handler_count: subscriptions.values().map(Vec::len).sum(),
            subscribed_types: subscriptions.len(),
        }
    }
}

impl BusInner {
    async fn dispatch_loop(self: Arc<Self>, mut rx: mpsc::Receiver<Event>) {
        let mut in_flight = JoinSet::new();

        loop {
            while in_flight.try_join_next().is_some() {}

            match timeout(self.config.poll_interval(), rx.recv()).await {
                Ok(Some(event)) => {
                    self.queued.fetch_sub(1, Ordering::SeqCst);
                    in_flight.spawn(self.clone().dispatch(event));
                }
                // every sender is gone and the queue is empty
                Ok(None) => break,
                Err(_) => {
                    if !self.running.load(Ordering::SeqCst) && self.queued.load(Ordering::SeqCst) == 0 {
                        break;
                    }
                }
            }
        }

        while in_flight.join_next().await.is_some() {}
        debug!("Event bus dispatch loop exited");
    }

    async fn dispatch(self: Arc<Self>, event: Event) {
        let handlers = self
            .subscriptions
            .read()
            .await
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        let event = Arc::new(event);
        let mut tasks = HandlerTasks(
            handlers
                .into_iter()
                .map(|handler| {
                    let name = handler.name().to_string();
                    let event = event.clone();
                    let task = tokio::spawn(async move { handler.handle(&event).await });
                    (name, task)
                })
                .collect(),
        );

        for (name, task) in tasks.0.iter_mut() {
            let failure = match task.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(join_error) => Some(format!("handler task aborted: {}", join_error)),
            };
            if let Some(message) = failure {
                self.events_failed.fetch_add(1, Ordering::SeqCst);
                self.route_failure(&event, name.as_str(), &message);
            }
        }

        self.events_processed.fetch_add(1, Ordering::SeqCst);
    }

    fn route_failure(&self, event: &Event, handler: &str, message: &str) {
        error!(
            "Event handler {} failed on {} event {}: {}",
            handler, event.event_type, event.event_id, message
        );

        if event.event_type == EventType::ErrorOccurred {
            return;
        }
        if !lock(&self.error_limiter).allow() {
            self.errors_suppressed.fetch_add(1, Ordering::SeqCst);
            warn!("Error event rate limit reached; suppressing error for {}", event.event_id);
            return;
        }

        let mut error_event = Event::new(EventType::ErrorOccurred)
            .with_data("original_event_id", event.event_id.clone())
            .with_data("original_event_type", event.event_type.as_str())
            .with_data("handler", handler)
            .with_data("error", message);
        error_event.user_id = event.user_id.clone();
        error_event.session_id = event.session_id.clone();

        self.enqueue_nowait(error_event);
    }

    /// Enqueue without waiting for space; used from inside dispatch where
    /// blocking on our own queue could deadlock.
    fn enqueue_nowait(&self, event: Event) {
        let Some(sender) = lock(&self.sender).clone() else {
            warn!("Event bus closed; dropping {} event {}", event.event_type, event.event_id);
            return;
        };

        self.queued.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(event) {
            Ok(()) => {
                self.events_published.fetch_add(1, Ordering::SeqCst);
            }
            Err(TrySendError::Full(event)) | Err(TrySendError::Closed(event)) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                warn!(
                    "Event bus queue unavailable; dropping {} event {}",
                    event.event_type, event.event_id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::handler::{handler_fn, HandlerError};
    use std::time::Duration;

    fn test_config() -> EventBusConfig {
        EventBusConfig {
            queue_capacity: 128,
            poll_interval_ms: 20,
            drain_grace_ms: 1_000,
            max_error_events_per_sec: 100,
        }
    }

    #[test]
    fn test_rate_limiter_window() {
        let mut limiter = ErrorRateLimiter::new(2);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[tokio::test]
    async fn test_publish_while_stopped_is_dropped() {
        let bus = EventBus::new(test_config());
        bus.publish(Event::new(EventType::UserLogin)).await;

        let stats = bus.get_stats().await;
        assert_eq!(stats.queue_size, 0);
        assert_eq!(stats.events_published, 0);
        assert!(!stats.running);
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::new(test_config());
        let a = handler_fn("a", |_: &Event| Ok(()));
        let b = handler_fn("b", |_: &Event| Ok(()));

        bus.subscribe(EventType::UserLogin, a.clone()).await;
        bus.subscribe(EventType::UserLogin, b.clone()).await;
        bus.subscribe(EventType::UserLogout, a.clone()).await;

        let stats = bus.get_stats().await;
        assert_eq!(stats.handler_count, 3);
        assert_eq!(stats.subscribed_types, 2);

        assert!(bus.unsubscribe(EventType::UserLogout, &a).await);
        assert!(!bus.unsubscribe(EventType::UserLogout, &a).await);
        assert!(!bus.unsubscribe(EventType::DocumentUploaded, &b).await);

        let stats = bus.get_stats().await;
        assert_eq!(stats.handler_count, 2);
        assert_eq!(stats.subscribed_types, 1);
    }

    #[tokio::test]
    async fn test_start_stop_are_idempotent() {
        let bus = EventBus::new(test_config());
        bus.start().await;
        bus.start().await;
        assert!(bus.is_running());

        bus.stop().await;
        bus.stop().await;
        assert!(!bus.is_running());

        // stopped is terminal until reset
        bus.start().await;
        assert!(!bus.is_running());

        bus.reset().await;
        assert_eq!(bus.get_stats().await.events_published, 0);
        bus.start().await;
        assert!(bus.is_running());
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_error_events_are_not_rerouted() {
        let bus = EventBus::new(test_config());
        let always_fails = handler_fn("always-fails", |_: &Event| Err(HandlerError::new("boom")));
        bus.subscribe(EventType::UserLogin, always_fails.clone()).await;
        bus.subscribe(EventType::ErrorOccurred, always_fails).await;

        bus.start().await;
        bus.publish(Event::new(EventType::UserLogin)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        bus.stop().await;

        let stats = bus.get_stats().await;
        // login handler fails once, its error event's handler fails once, nothing more
        assert_eq!(stats.events_failed, 2);
        // startup, login, one error event, shutdown
        assert_eq!(stats.events_published, 4);
        assert_eq!(stats.events_processed, 4);
    }
}
