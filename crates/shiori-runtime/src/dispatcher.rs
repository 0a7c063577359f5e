//! Normalizes inbound notification events from either source (channel push
//! or poll delta), drives side effects, and fans out to registered
//! listeners.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use shiori_core::debug_log::{SharedEventLog, SyncEvent};
use shiori_core::models::{Notification, RawNotification};

/// How many recently seen notification ids to remember for deduplication.
const SEEN_CAPACITY: usize = 256;

type NotificationCallback = Arc<dyn Fn(Notification) + Send + Sync>;
type CountCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// Local side effects fired on delivery. Implementations are best-effort:
/// they log their own failures and never propagate them into the receipt
/// path.
pub trait AlertSink: Send + Sync {
    /// Show a local alert for the notification.
    fn notify_alert(&self, notification: &Notification);

    /// Play the audio cue.
    fn play_cue(&self);
}

/// Default sink for headless use (tests, background mode).
pub struct NoopAlerts;

impl AlertSink for NoopAlerts {
    fn notify_alert(&self, _notification: &Notification) {}
    fn play_cue(&self) {}
}

/// Bounded set of recently observed ids.
pub(crate) struct SeenSet {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenSet {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert an id; returns false if it was already present.
    pub(crate) fn insert(&mut self, id: String) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        self.ids.insert(id.clone());
        self.order.push_back(id);
        true
    }
}

enum ListenerKind {
    Notification,
    Count,
}

/// Handle returned from listener registration; dropping it does nothing,
/// call [`unsubscribe`](ListenerGuard::unsubscribe) to detach.
pub struct ListenerGuard {
    inner: Arc<DispatcherInner>,
    id: u64,
    kind: ListenerKind,
}

impl ListenerGuard {
    pub fn unsubscribe(self) {
        match self.kind {
            ListenerKind::Notification => {
                self.inner.listeners.lock().unwrap().remove(&self.id);
            }
            ListenerKind::Count => {
                self.inner.count_listeners.lock().unwrap().remove(&self.id);
            }
        }
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    listeners: Mutex<HashMap<u64, NotificationCallback>>,
    count_listeners: Mutex<HashMap<u64, CountCallback>>,
    next_id: AtomicU64,
    seen: Mutex<SeenSet>,
    unread: Mutex<Option<u32>>,
    alerts: Box<dyn AlertSink>,
    log: SharedEventLog,
}

impl NotificationDispatcher {
    pub fn new(alerts: Box<dyn AlertSink>, log: SharedEventLog) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                listeners: Mutex::new(HashMap::new()),
                count_listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                seen: Mutex::new(SeenSet::new(SEEN_CAPACITY)),
                unread: Mutex::new(None),
                alerts,
                log,
            }),
        }
    }

    /// Normalize and deliver one inbound event, from either source.
    ///
    /// Side effects run in fixed order: local alert, audio cue, listener
    /// fan-out. Fan-out is deferred to a spawned task so listener work never
    /// blocks the receipt path. Duplicate ids (channel and poll racing) are
    /// dropped here.
    pub fn handle_inbound(&self, raw: RawNotification) {
        let notification = raw.normalize();

        if !self
            .inner
            .seen
            .lock()
            .unwrap()
            .insert(notification.id.clone())
        {
            debug!(id = %notification.id, "duplicate notification dropped");
            return;
        }

        if let Ok(mut log) = self.inner.log.lock() {
            log.push(SyncEvent::NotificationDelivered {
                id: notification.id.clone(),
            });
        }

        self.inner.alerts.notify_alert(&notification);
        self.inner.alerts.play_cue();

        let callbacks: Vec<NotificationCallback> = self
            .inner
            .listeners
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        if !callbacks.is_empty() {
            tokio::spawn(async move {
                for cb in callbacks {
                    cb(notification.clone());
                }
            });
        }
    }

    /// Record a new authoritative unread count. A repeat of the last
    /// observed value is a no-op, so racing writers (channel vs. poll)
    /// cannot cause redundant UI churn.
    pub fn handle_unread_count_change(&self, count: u32) {
        {
            let mut unread = self.inner.unread.lock().unwrap();
            if *unread == Some(count) {
                return;
            }
            *unread = Some(count);
        }

        let callbacks: Vec<CountCallback> = self
            .inner
            .count_listeners
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        if !callbacks.is_empty() {
            tokio::spawn(async move {
                for cb in callbacks {
                    cb(count);
                }
            });
        }
    }

    /// Last observed unread count, if any source has reported one yet.
    pub fn unread_count(&self) -> Option<u32> {
        *self.inner.unread.lock().unwrap()
    }

    pub fn on_notification<F>(&self, callback: F) -> ListenerGuard
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap()
            .insert(id, Arc::new(callback));
        ListenerGuard {
            inner: self.inner.clone(),
            id,
            kind: ListenerKind::Notification,
        }
    }

    pub fn on_unread_count<F>(&self, callback: F) -> ListenerGuard
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .count_listeners
            .lock()
            .unwrap()
            .insert(id, Arc::new(callback));
        ListenerGuard {
            inner: self.inner.clone(),
            id,
            kind: ListenerKind::Count,
        }
    }
}
