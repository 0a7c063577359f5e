//! Timer-driven progress sync.
//!
//! Each tick reads a live playback snapshot from the player and pushes it
//! remotely, best-effort. On a slower, throttled cadence it additionally
//! fires view/trending tracking through the forwarder.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use shiori_api::traits::{ProgressUpdate, TrendingMetrics, ViewMetrics, WatchStore};
use shiori_core::config::SyncConfig;
use shiori_core::error::ShioriError;
use shiori_core::debug_log::{SharedEventLog, SyncEvent};
use shiori_core::models::PlaybackPosition;

use crate::metrics::ViewForwarder;

/// Completion milestones that force a view tick regardless of the throttle.
pub const VIEW_MILESTONES: [f64; 4] = [30.0, 50.0, 80.0, 95.0];

/// Why a view tick fired.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackReason {
    /// Crossed a completion milestone (the highest one crossed this tick).
    Milestone(f64),
    /// Enough time passed since the last tracked tick.
    Elapsed,
}

impl TrackReason {
    fn milestone(self) -> Option<f64> {
        match self {
            Self::Milestone(m) => Some(m),
            Self::Elapsed => None,
        }
    }
}

/// Decides when a progress tick should also count as a view.
///
/// Keeps its own monotonic "last tracked" timestamp, so view cadence is
/// independent of how often raw progress is persisted.
pub struct ViewThrottle {
    last_tracked: Instant,
    last_percentage: f64,
    min_interval: Duration,
}

impl ViewThrottle {
    pub fn new(min_interval: Duration, now: Instant) -> Self {
        Self {
            last_tracked: now,
            last_percentage: 0.0,
            min_interval,
        }
    }

    /// Record the current percentage and decide whether to track a view.
    pub fn check(&mut self, percentage: f64, now: Instant) -> Option<TrackReason> {
        let previous = self.last_percentage;
        self.last_percentage = percentage;

        let crossed = VIEW_MILESTONES
            .iter()
            .filter(|m| previous < **m && percentage >= **m)
            .last()
            .copied();
        if let Some(milestone) = crossed {
            self.last_tracked = now;
            return Some(TrackReason::Milestone(milestone));
        }

        if now.duration_since(self.last_tracked) >= self.min_interval {
            self.last_tracked = now;
            return Some(TrackReason::Elapsed);
        }
        None
    }
}

pub struct ProgressSync<S, V, T>
where
    S: WatchStore + 'static,
    V: ViewMetrics + 'static,
    T: TrendingMetrics + 'static,
{
    store: Arc<S>,
    forwarder: Arc<ViewForwarder<V, T>>,
    config: SyncConfig,
    log: SharedEventLog,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S, V, T> ProgressSync<S, V, T>
where
    S: WatchStore + 'static,
    V: ViewMetrics + 'static,
    T: TrendingMetrics + 'static,
{
    pub fn new(
        store: Arc<S>,
        forwarder: Arc<ViewForwarder<V, T>>,
        config: SyncConfig,
        log: SharedEventLog,
    ) -> Self {
        Self {
            store,
            forwarder,
            config,
            log,
            task: Mutex::new(None),
        }
    }

    /// Begin periodic sync for one session, replacing any previous timer.
    ///
    /// `position` is read on every tick; a zero `current_time` skips the
    /// push (nothing has played yet). Push failures are logged and the timer
    /// keeps running: losing one tick of progress is acceptable, the next
    /// tick overwrites it.
    pub fn start_tracking<P>(
        &self,
        user_id: &str,
        movie_id: &str,
        position: P,
        interval: Option<Duration>,
    ) where
        P: Fn() -> PlaybackPosition + Send + Sync + 'static,
    {
        self.stop_tracking();

        let interval = interval.unwrap_or_else(|| self.config.progress_interval());
        let store = self.store.clone();
        let forwarder = self.forwarder.clone();
        let log = self.log.clone();
        let user_id = user_id.to_string();
        let movie_id = movie_id.to_string();
        let mut throttle = ViewThrottle::new(self.config.view_throttle(), Instant::now());

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately; the position guard below makes
            // it a no-op until playback actually starts.
            loop {
                ticker.tick().await;
                let pos = position();
                if pos.current_time <= 0.0 {
                    continue;
                }

                let update = ProgressUpdate {
                    user_id: user_id.clone(),
                    movie_id: movie_id.clone(),
                    current_time: pos.current_time,
                    total_duration: pos.total_duration,
                };
                match store.update_progress(&update).await {
                    Ok(()) => {
                        debug!(movie_id = %movie_id, current = pos.current_time, "progress pushed");
                        if let Ok(mut log) = log.lock() {
                            log.push(SyncEvent::ProgressPushed {
                                movie_id: movie_id.clone(),
                                percentage: pos.percentage(),
                            });
                        }
                    }
                    Err(err) => {
                        // Swallowed as transient: the next tick is the retry.
                        let err = ShioriError::TransientSync(err.to_string());
                        warn!(movie_id = %movie_id, error = %err, "progress push failed; next tick retries");
                        if let Ok(mut log) = log.lock() {
                            log.push(SyncEvent::ProgressPushFailed {
                                movie_id: movie_id.clone(),
                                message: err.to_string(),
                            });
                        }
                    }
                }

                if let Some(reason) = throttle.check(pos.percentage(), Instant::now()) {
                    forwarder.forward(&movie_id).await;
                    if let Ok(mut log) = log.lock() {
                        log.push(SyncEvent::ViewTracked {
                            movie_id: movie_id.clone(),
                            milestone: reason.milestone(),
                        });
                    }
                }
            }
        });

        *self.task.lock().unwrap() = Some(handle);
    }

    /// Cancel the timer. Idempotent and safe when no session is tracked.
    pub fn stop_tracking(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
            debug!("progress tracking stopped");
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.task.lock().unwrap().is_some()
    }
}

impl<S, V, T> Drop for ProgressSync<S, V, T>
where
    S: WatchStore + 'static,
    V: ViewMetrics + 'static,
    T: TrendingMetrics + 'static,
{
    fn drop(&mut self) {
        self.stop_tracking();
    }
}
