//! The watch session manager: owns "what is the user watching right now",
//! persists session lifecycle against the remote store, and keeps the
//! locally cached watching list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use shiori_api::traits::{ResumePosition, WatchStartRequest, WatchStats, WatchStore};
use shiori_core::debug_log::{SharedEventLog, SyncEvent};
use shiori_core::error::ShioriError;
use shiori_core::models::{WatchSession, WatchingListEntry};

pub struct WatchSessionManager<S: WatchStore> {
    store: Arc<S>,
    active: RwLock<Option<WatchSession>>,
    watching: RwLock<Vec<WatchingListEntry>>,
    stats: RwLock<Option<WatchStats>>,
    /// Raised when a list/stats fetch fails, so dependent UI stops hammering
    /// the backend; cleared by the next successful fetch.
    api_unavailable: AtomicBool,
    log: SharedEventLog,
}

impl<S: WatchStore> WatchSessionManager<S> {
    pub fn new(store: Arc<S>, log: SharedEventLog) -> Self {
        Self {
            store,
            active: RwLock::new(None),
            watching: RwLock::new(Vec::new()),
            stats: RwLock::new(None),
            api_unavailable: AtomicBool::new(false),
            log,
        }
    }

    /// Start a viewing session.
    ///
    /// Fails with `Validation` before any transport call if identifiers are
    /// missing. Starting is not best-effort: if the remote "start" record
    /// cannot be persisted, no local session is kept.
    pub async fn start_watching(
        &self,
        user_id: &str,
        movie_id: &str,
        movie_title: &str,
        total_duration: f64,
    ) -> Result<WatchSession, ShioriError> {
        if user_id.trim().is_empty() {
            return Err(ShioriError::Validation("user_id is required".into()));
        }
        if movie_id.trim().is_empty() {
            return Err(ShioriError::Validation("movie_id is required".into()));
        }
        if movie_title.trim().is_empty() {
            return Err(ShioriError::Validation("movie_title is required".into()));
        }

        let req = WatchStartRequest {
            user_id: user_id.to_string(),
            movie_id: movie_id.to_string(),
            movie_title: movie_title.to_string(),
            total_duration,
        };
        self.store
            .start_watching(&req)
            .await
            .map_err(|e| ShioriError::Unavailable(e.to_string()))?;

        let session = WatchSession::new(
            req.user_id,
            req.movie_id,
            req.movie_title,
            total_duration,
        );
        // At most one active session per user: a new start replaces any
        // previous one.
        *self.active.write().await = Some(session.clone());
        info!(movie_id = %session.movie_id, title = %session.movie_title, "watch session started");
        if let Ok(mut log) = self.log.lock() {
            log.push(SyncEvent::SessionStarted {
                movie_id: session.movie_id.clone(),
                movie_title: session.movie_title.clone(),
            });
        }

        // The list now has a new row server-side; refresh is best-effort.
        if let Err(err) = self.refresh_watching_list(user_id).await {
            debug!(error = %err, "post-start list refresh failed");
        }

        Ok(session)
    }

    pub async fn active_session(&self) -> Option<WatchSession> {
        self.active.read().await.clone()
    }

    /// Record a playback position on the active session, clamped
    /// non-negative.
    pub async fn set_position(&self, current_time: f64) {
        if let Some(session) = self.active.write().await.as_mut() {
            session.set_position(current_time);
        }
    }

    /// Drop the active session without touching the remote store (logout).
    pub async fn clear_session(&self) {
        *self.active.write().await = None;
    }

    /// Fetch the watching list and replace the cache wholesale.
    ///
    /// On transport failure the previous cache is left untouched and the
    /// unavailable flag is raised.
    pub async fn refresh_watching_list(
        &self,
        user_id: &str,
    ) -> Result<Vec<WatchingListEntry>, ShioriError> {
        match self.store.get_watching_list(user_id).await {
            Ok(list) => {
                *self.watching.write().await = list.clone();
                self.api_unavailable.store(false, Ordering::SeqCst);
                Ok(list)
            }
            Err(err) => {
                self.api_unavailable.store(true, Ordering::SeqCst);
                warn!(error = %err, "watching list refresh failed; keeping cached list");
                Err(ShioriError::Unavailable(err.to_string()))
            }
        }
    }

    /// The cached list, as of the last successful refresh.
    pub async fn watching_list(&self) -> Vec<WatchingListEntry> {
        self.watching.read().await.clone()
    }

    pub fn api_unavailable(&self) -> bool {
        self.api_unavailable.load(Ordering::SeqCst)
    }

    /// Mark a movie completed: optimistic local removal first, remote call
    /// best-effort. The next full refresh is the reconciliation point.
    pub async fn mark_completed(&self, user_id: &str, movie_id: &str) {
        self.remove_cached(movie_id).await;
        if let Err(err) = self.store.mark_completed(user_id, movie_id).await {
            warn!(movie_id, error = %err, "completion push failed; next refresh reconciles");
        }
    }

    /// Remove a movie from the watching list, same optimistic discipline as
    /// [`mark_completed`](Self::mark_completed).
    pub async fn remove_from_watching(&self, user_id: &str, movie_id: &str) {
        self.remove_cached(movie_id).await;
        if let Err(err) = self.store.remove_from_watching(user_id, movie_id).await {
            warn!(movie_id, error = %err, "removal push failed; next refresh reconciles");
        }
    }

    async fn remove_cached(&self, movie_id: &str) {
        self.watching
            .write()
            .await
            .retain(|entry| entry.movie_id != movie_id);
        let mut active = self.active.write().await;
        if active.as_ref().is_some_and(|s| s.movie_id == movie_id) {
            *active = None;
        }
    }

    /// Resolve where playback should resume.
    ///
    /// The remote store is authoritative; a caller-supplied hint only covers
    /// the no-record case. Transport failure degrades to starting from the
    /// beginning, never to an error.
    pub async fn resume_position(
        &self,
        user_id: &str,
        movie_id: &str,
        hint: Option<f64>,
    ) -> ResumePosition {
        let remote = match self.store.get_resume_position(user_id, movie_id).await {
            Ok(resume) => resume,
            Err(err) => {
                warn!(movie_id, error = %err, "resume lookup failed; starting from zero");
                ResumePosition::default()
            }
        };

        if remote.resume_time > 0.0 {
            remote
        } else if let Some(hint) = hint.filter(|h| *h > 0.0) {
            ResumePosition {
                resume_time: hint,
                ..remote
            }
        } else {
            remote
        }
    }

    /// Fetch aggregate watch stats. The last good value stays cached when
    /// the fetch fails.
    pub async fn watch_stats(&self, user_id: &str) -> Result<WatchStats, ShioriError> {
        match self.store.get_stats(user_id).await {
            Ok(stats) => {
                *self.stats.write().await = Some(stats.clone());
                self.api_unavailable.store(false, Ordering::SeqCst);
                Ok(stats)
            }
            Err(err) => {
                self.api_unavailable.store(true, Ordering::SeqCst);
                Err(ShioriError::Unavailable(err.to_string()))
            }
        }
    }

    pub async fn cached_stats(&self) -> Option<WatchStats> {
        self.stats.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiori_api::traits::ProgressUpdate;
    use shiori_core::debug_log::shared_event_log;
    use shiori_core::models::watch_percentage;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("store down")]
    struct StoreDown;

    #[derive(Default)]
    struct MockStore {
        start_calls: AtomicU32,
        fail_start: AtomicBool,
        fail_list: AtomicBool,
        fail_mutations: AtomicBool,
        list: Mutex<Vec<WatchingListEntry>>,
        resume: Mutex<Option<ResumePosition>>,
    }

    impl MockStore {
        fn entry(movie_id: &str) -> WatchingListEntry {
            WatchingListEntry {
                movie_id: movie_id.into(),
                movie_title: format!("title {movie_id}"),
                current_time: 100.0,
                total_duration: 1000.0,
                percentage: watch_percentage(100.0, 1000.0),
                last_watched: None,
                movie_poster: None,
                episode_number: None,
                total_episodes: None,
                source: None,
            }
        }
    }

    impl WatchStore for MockStore {
        type Error = StoreDown;

        async fn start_watching(&self, _req: &WatchStartRequest) -> Result<(), StoreDown> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(StoreDown);
            }
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn update_progress(&self, _update: &ProgressUpdate) -> Result<(), StoreDown> {
            Ok(())
        }

        async fn get_watching_list(
            &self,
            _user_id: &str,
        ) -> Result<Vec<WatchingListEntry>, StoreDown> {
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(StoreDown);
            }
            Ok(self.list.lock().unwrap().clone())
        }

        async fn get_resume_position(
            &self,
            _user_id: &str,
            _movie_id: &str,
        ) -> Result<ResumePosition, StoreDown> {
            self.resume.lock().unwrap().clone().ok_or(StoreDown)
        }

        async fn mark_completed(&self, _user_id: &str, _movie_id: &str) -> Result<(), StoreDown> {
            if self.fail_mutations.load(Ordering::SeqCst) {
                return Err(StoreDown);
            }
            Ok(())
        }

        async fn remove_from_watching(
            &self,
            _user_id: &str,
            _movie_id: &str,
        ) -> Result<(), StoreDown> {
            if self.fail_mutations.load(Ordering::SeqCst) {
                return Err(StoreDown);
            }
            Ok(())
        }

        async fn get_stats(&self, _user_id: &str) -> Result<WatchStats, StoreDown> {
            Err(StoreDown)
        }
    }

    fn manager(store: Arc<MockStore>) -> WatchSessionManager<MockStore> {
        WatchSessionManager::new(store, shared_event_log())
    }

    #[tokio::test]
    async fn empty_movie_id_fails_without_contacting_the_store() {
        let store = Arc::new(MockStore::default());
        let m = manager(store.clone());

        let err = m.start_watching("u1", "", "Foo", 7200.0).await.unwrap_err();
        assert!(matches!(err, ShioriError::Validation(_)));
        assert_eq!(store.start_calls.load(Ordering::SeqCst), 0);
        assert!(m.active_session().await.is_none());
    }

    #[tokio::test]
    async fn start_failure_keeps_no_local_session() {
        let store = Arc::new(MockStore::default());
        store.fail_start.store(true, Ordering::SeqCst);
        let m = manager(store);

        assert!(m.start_watching("u1", "m1", "Foo", 7200.0).await.is_err());
        assert!(m.active_session().await.is_none());
    }

    #[tokio::test]
    async fn a_new_start_replaces_the_previous_session() {
        let store = Arc::new(MockStore::default());
        let m = manager(store);

        m.start_watching("u1", "m1", "Foo", 7200.0).await.unwrap();
        m.start_watching("u1", "m2", "Bar", 5400.0).await.unwrap();

        let active = m.active_session().await.unwrap();
        assert_eq!(active.movie_id, "m2");
    }

    #[tokio::test]
    async fn refresh_failure_preserves_cache_and_raises_flag() {
        let store = Arc::new(MockStore::default());
        *store.list.lock().unwrap() = vec![MockStore::entry("m1")];
        let m = manager(store.clone());

        m.refresh_watching_list("u1").await.unwrap();
        assert_eq!(m.watching_list().await.len(), 1);
        assert!(!m.api_unavailable());

        store.fail_list.store(true, Ordering::SeqCst);
        let err = m.refresh_watching_list("u1").await.unwrap_err();
        assert!(matches!(err, ShioriError::Unavailable(_)));
        assert!(m.api_unavailable());
        // Previous cache untouched.
        assert_eq!(m.watching_list().await.len(), 1);
    }

    #[tokio::test]
    async fn removal_is_optimistic_even_when_the_remote_call_fails() {
        let store = Arc::new(MockStore::default());
        *store.list.lock().unwrap() = vec![MockStore::entry("m1"), MockStore::entry("m2")];
        let m = manager(store.clone());
        m.refresh_watching_list("u1").await.unwrap();

        store.fail_mutations.store(true, Ordering::SeqCst);
        m.remove_from_watching("u1", "m1").await;

        let cached = m.watching_list().await;
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].movie_id, "m2");
    }

    #[tokio::test]
    async fn completing_the_active_movie_ends_the_session() {
        let store = Arc::new(MockStore::default());
        let m = manager(store);
        m.start_watching("u1", "m1", "Foo", 7200.0).await.unwrap();

        m.mark_completed("u1", "m1").await;
        assert!(m.active_session().await.is_none());
    }

    #[tokio::test]
    async fn resume_failure_returns_zero_default() {
        let store = Arc::new(MockStore::default());
        let m = manager(store);

        let resume = m.resume_position("u1", "m1", None).await;
        assert_eq!(resume.resume_time, 0.0);
        assert_eq!(resume.percentage, 0.0);
    }

    #[tokio::test]
    async fn remote_resume_beats_the_caller_hint() {
        let store = Arc::new(MockStore::default());
        *store.resume.lock().unwrap() = Some(ResumePosition {
            resume_time: 1200.0,
            percentage: 40.0,
            last_watched: None,
        });
        let m = manager(store.clone());

        let resume = m.resume_position("u1", "m1", Some(300.0)).await;
        assert_eq!(resume.resume_time, 1200.0);

        // No remote record: the hint covers.
        *store.resume.lock().unwrap() = Some(ResumePosition::default());
        let resume = m.resume_position("u1", "m1", Some(300.0)).await;
        assert_eq!(resume.resume_time, 300.0);
    }
}
