//! Polling fallback for the event channel.
//!
//! Runs on a fixed interval regardless of channel state and never assumes
//! the channel is connected. When the authoritative unread count rises
//! without a corresponding push, it fetches the delta and synthesizes
//! inbound events identical in shape to channel pushes. This is the sole
//! correctness backstop once the channel's retry budget is spent.

use std::sync::{Arc, Mutex};

use tokio::time::MissedTickBehavior;
use tracing::debug;

use shiori_api::traits::{NotificationFeed, NotificationQuery};
use shiori_core::config::PollingConfig;
use shiori_core::debug_log::{SharedEventLog, SyncEvent};

use crate::dispatcher::{NotificationDispatcher, SeenSet};

/// Ids remembered across poll ticks, so one notification is never
/// synthesized twice.
const POLL_SEEN_CAPACITY: usize = 256;

pub struct NotificationPoller<F: NotificationFeed> {
    feed: Arc<F>,
    dispatcher: NotificationDispatcher,
    user_id: String,
    config: PollingConfig,
    log: SharedEventLog,
    state: Mutex<PollState>,
}

struct PollState {
    last_count: Option<u32>,
    seen: SeenSet,
}

impl<F: NotificationFeed> NotificationPoller<F> {
    pub fn new(
        feed: Arc<F>,
        dispatcher: NotificationDispatcher,
        user_id: impl Into<String>,
        config: PollingConfig,
        log: SharedEventLog,
    ) -> Self {
        Self {
            feed,
            dispatcher,
            user_id: user_id.into(),
            config,
            log,
            state: Mutex::new(PollState {
                last_count: None,
                seen: SeenSet::new(POLL_SEEN_CAPACITY),
            }),
        }
    }

    /// Poll until the owning task is aborted.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick fires immediately; use it as the baseline
        // observation.
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    /// One reconciliation pass. All failures are swallowed; the next tick
    /// is the retry.
    pub async fn poll_once(&self) {
        let count = match self.feed.get_unread_count(&self.user_id).await {
            Ok(count) => count,
            Err(err) => {
                debug!(error = %err, "unread-count poll failed");
                return;
            }
        };

        let previous = self.state.lock().unwrap().last_count;
        let Some(previous) = previous else {
            // First observation: record the baseline, nothing to deliver.
            self.state.lock().unwrap().last_count = Some(count);
            return;
        };

        if count > previous {
            self.synthesize_delta(previous, count).await;
        }

        // Any received value is authoritative, including a drop (reads on
        // another device). The dispatcher suppresses no-op repeats.
        self.state.lock().unwrap().last_count = Some(count);
        self.dispatcher.handle_unread_count_change(count);
    }

    /// Fetch the most recent page and synthesize inbound events for unread
    /// entries not yet observed, newest first, one per missing count.
    async fn synthesize_delta(&self, previous: u32, count: u32) {
        let query = NotificationQuery::recent(self.config.page_size);
        let page = match self.feed.list_notifications(&self.user_id, &query).await {
            Ok(page) => page,
            Err(err) => {
                debug!(error = %err, "notification delta fetch failed");
                return;
            }
        };

        let missing = (count - previous) as usize;
        let mut synthesized = 0;
        for raw in page.items {
            if synthesized >= missing {
                break;
            }
            if raw.is_read.unwrap_or(false) {
                continue;
            }
            let Some(id) = raw.id.clone() else {
                continue;
            };
            if !self.state.lock().unwrap().seen.insert(id) {
                continue;
            }
            self.dispatcher.handle_inbound(raw);
            synthesized += 1;
        }

        if let Ok(mut log) = self.log.lock() {
            log.push(SyncEvent::PollDelta {
                previous,
                current: count,
                synthesized,
            });
        }
        debug!(previous, count, synthesized, "poll reconciliation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::NoopAlerts;
    use shiori_api::traits::NotificationPage;
    use shiori_core::debug_log::shared_event_log;
    use shiori_core::models::RawNotification;
    use std::collections::HashSet;
    use std::time::Duration;
    use thiserror::Error;
    use tokio::sync::mpsc;

    #[derive(Debug, Error)]
    #[error("feed down")]
    struct FeedDown;

    struct MockFeed {
        count: Mutex<Result<u32, ()>>,
        items: Mutex<Vec<RawNotification>>,
    }

    impl MockFeed {
        fn new(count: u32) -> Self {
            Self {
                count: Mutex::new(Ok(count)),
                items: Mutex::new(Vec::new()),
            }
        }

        fn set_count(&self, count: u32) {
            *self.count.lock().unwrap() = Ok(count);
        }

        fn fail(&self) {
            *self.count.lock().unwrap() = Err(());
        }

        fn set_items(&self, items: Vec<RawNotification>) {
            *self.items.lock().unwrap() = items;
        }
    }

    impl NotificationFeed for MockFeed {
        type Error = FeedDown;

        async fn get_unread_count(&self, _user_id: &str) -> Result<u32, FeedDown> {
            self.count.lock().unwrap().map_err(|_| FeedDown)
        }

        async fn list_notifications(
            &self,
            _user_id: &str,
            _query: &NotificationQuery,
        ) -> Result<NotificationPage, FeedDown> {
            let items = self.items.lock().unwrap().clone();
            Ok(NotificationPage {
                total: items.len() as u32,
                unread: items.len() as u32,
                items,
            })
        }

        async fn mark_read(&self, _id: &str) -> Result<(), FeedDown> {
            Ok(())
        }

        async fn mark_all_read(&self, _user_id: &str) -> Result<(), FeedDown> {
            Ok(())
        }

        async fn delete_notification(&self, _id: &str) -> Result<(), FeedDown> {
            Ok(())
        }
    }

    fn unread(id: &str) -> RawNotification {
        RawNotification {
            id: Some(id.into()),
            title: Some("t".into()),
            message: Some("m".into()),
            is_read: Some(false),
            ..Default::default()
        }
    }

    fn poller(feed: Arc<MockFeed>) -> (NotificationPoller<MockFeed>, NotificationDispatcher) {
        let dispatcher =
            NotificationDispatcher::new(Box::new(NoopAlerts), shared_event_log());
        let config = PollingConfig {
            interval_secs: 30,
            page_size: 20,
        };
        let p = NotificationPoller::new(
            feed,
            dispatcher.clone(),
            "u1",
            config,
            shared_event_log(),
        );
        (p, dispatcher)
    }

    async fn recv_one(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no synthesized event")
            .unwrap()
    }

    #[tokio::test]
    async fn first_observation_is_baseline_only() {
        let feed = Arc::new(MockFeed::new(3));
        feed.set_items(vec![unread("a"), unread("b"), unread("c")]);
        let (poller, dispatcher) = poller(feed);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = dispatcher.on_notification(move |n| {
            let _ = tx.send(n.id);
        });

        poller.poll_once().await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(dispatcher.unread_count(), None);
    }

    #[tokio::test]
    async fn rising_count_synthesizes_exactly_the_delta() {
        let feed = Arc::new(MockFeed::new(3));
        let (poller, dispatcher) = poller(feed.clone());
        poller.poll_once().await; // baseline at 3

        // Channel is down; two new notifications arrive server-side.
        feed.set_count(5);
        feed.set_items(vec![unread("n-5"), unread("n-4"), unread("n-3")]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = dispatcher.on_notification(move |n| {
            let _ = tx.send(n.id);
        });

        poller.poll_once().await;

        let mut ids = HashSet::new();
        ids.insert(recv_one(&mut rx).await);
        ids.insert(recv_one(&mut rx).await);
        assert_eq!(ids.len(), 2, "two events with distinct ids");
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(dispatcher.unread_count(), Some(5));
    }

    #[tokio::test]
    async fn already_seen_entries_are_not_resynthesized() {
        let feed = Arc::new(MockFeed::new(0));
        let (poller, dispatcher) = poller(feed.clone());
        poller.poll_once().await;

        feed.set_count(1);
        feed.set_items(vec![unread("n-1")]);
        poller.poll_once().await;

        // Count rises again but the page still contains the old entry.
        feed.set_count(2);
        feed.set_items(vec![unread("n-2"), unread("n-1")]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = dispatcher.on_notification(move |n| {
            let _ = tx.send(n.id);
        });
        poller.poll_once().await;

        assert_eq!(recv_one(&mut rx).await, "n-2");
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn poll_failures_are_swallowed() {
        let feed = Arc::new(MockFeed::new(3));
        let (poller, dispatcher) = poller(feed.clone());
        poller.poll_once().await; // baseline

        feed.fail();
        poller.poll_once().await; // must not panic or reset the baseline

        feed.set_count(4);
        feed.set_items(vec![unread("n-4")]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = dispatcher.on_notification(move |n| {
            let _ = tx.send(n.id);
        });
        poller.poll_once().await;
        assert_eq!(recv_one(&mut rx).await, "n-4");
    }
}
