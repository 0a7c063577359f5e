//! Trait definitions for the backend collaborators.
//!
//! The runtime is written against these, so session management, progress
//! sync, and notification polling can be exercised with in-memory fakes.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shiori_core::models::{RawNotification, WatchingListEntry};

/// Persisting and reading the user's watch state on the remote store.
pub trait WatchStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Record the start of a viewing session.
    fn start_watching(
        &self,
        req: &WatchStartRequest,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Push a full playback snapshot for the active session.
    fn update_progress(
        &self,
        update: &ProgressUpdate,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Fetch the user's full "continue watching" list.
    fn get_watching_list(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<WatchingListEntry>, Self::Error>> + Send;

    /// Last known position for a movie, for resume-on-start.
    fn get_resume_position(
        &self,
        user_id: &str,
        movie_id: &str,
    ) -> impl Future<Output = Result<ResumePosition, Self::Error>> + Send;

    fn mark_completed(
        &self,
        user_id: &str,
        movie_id: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn remove_from_watching(
        &self,
        user_id: &str,
        movie_id: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn get_stats(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<WatchStats, Self::Error>> + Send;
}

/// View-count subsystem.
pub trait ViewMetrics: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn track_view(&self, movie_id: &str)
        -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn get_view_count(
        &self,
        movie_id: &str,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send;

    /// Batch lookup. A movie absent from the result means "unknown", not
    /// zero — callers must tolerate partial maps.
    fn get_batch_view_counts(
        &self,
        movie_ids: &[String],
    ) -> impl Future<Output = Result<HashMap<String, u64>, Self::Error>> + Send;
}

/// Trending subsystem, independent of plain view counts.
pub trait TrendingMetrics: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn track_trending_view(
        &self,
        movie_id: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn get_trending_stats(
        &self,
    ) -> impl Future<Output = Result<Vec<TrendingEntry>, Self::Error>> + Send;
}

/// Authoritative notification feed, used by the polling fallback and the
/// notification UI.
pub trait NotificationFeed: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn get_unread_count(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<u32, Self::Error>> + Send;

    fn list_notifications(
        &self,
        user_id: &str,
        query: &NotificationQuery,
    ) -> impl Future<Output = Result<NotificationPage, Self::Error>> + Send;

    fn mark_read(
        &self,
        notification_id: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn mark_all_read(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn delete_notification(
        &self,
        notification_id: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Opaque bearer-token source. Re-read before every channel connect attempt,
/// so a token refreshed elsewhere is picked up without a restart.
pub trait CredentialSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

// ── Request/response shapes ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchStartRequest {
    pub user_id: String,
    pub movie_id: String,
    pub movie_title: String,
    pub total_duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub user_id: String,
    pub movie_id: String,
    pub current_time: f64,
    pub total_duration: f64,
}

/// Resume point for a movie. `Default` is the zero-value safe fallback:
/// resume at the beginning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumePosition {
    pub resume_time: f64,
    pub percentage: f64,
    pub last_watched: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchStats {
    pub total_watched: u32,
    pub completed: u32,
    pub in_progress: u32,
    pub total_watch_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendingEntry {
    pub movie_id: String,
    pub movie_title: Option<String>,
    pub score: f64,
    pub views: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NotificationQuery {
    pub page: u32,
    pub size: u32,
    pub unread_only: bool,
}

impl NotificationQuery {
    /// Most recent page, newest first.
    pub fn recent(size: u32) -> Self {
        Self {
            page: 0,
            size,
            unread_only: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationPage {
    pub items: Vec<RawNotification>,
    pub total: u32,
    pub unread: u32,
}
