use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

/// Maximum number of events retained in the ring buffer.
const EVENT_LOG_CAPACITY: usize = 200;

/// A typed event from the sync/notification pipeline, for the diagnostics
/// panel.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    SessionStarted {
        movie_id: String,
        movie_title: String,
    },
    ProgressPushed {
        movie_id: String,
        percentage: f64,
    },
    ProgressPushFailed {
        movie_id: String,
        message: String,
    },
    ViewTracked {
        movie_id: String,
        milestone: Option<f64>,
    },
    ChannelConnected {
        attempt: u32,
    },
    ChannelLost {
        message: String,
    },
    ChannelGaveUp {
        attempts: u32,
    },
    PollDelta {
        previous: u32,
        current: u32,
        synthesized: usize,
    },
    NotificationDelivered {
        id: String,
    },
    Error {
        source: String,
        message: String,
    },
}

/// A timestamped event entry.
pub type EventEntry = (DateTime<Utc>, SyncEvent);

/// Bounded ring buffer of sync events.
#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<EventEntry>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(EVENT_LOG_CAPACITY),
        }
    }

    /// Push a new event, evicting the oldest if at capacity.
    pub fn push(&mut self, event: SyncEvent) {
        if self.entries.len() >= EVENT_LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back((Utc::now(), event));
    }

    /// Return a snapshot of all entries (newest last).
    pub fn snapshot(&self) -> Vec<EventEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Thread-safe handle to the event log.
pub type SharedEventLog = Arc<Mutex<EventLog>>;

/// Create a new shared event log.
pub fn shared_event_log() -> SharedEventLog {
    Arc::new(Mutex::new(EventLog::new()))
}
