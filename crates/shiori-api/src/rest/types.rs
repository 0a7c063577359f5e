use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use shiori_core::models::{watch_percentage, WatchingListEntry};

use crate::traits::ResumePosition;

// ── Watch store responses ───────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WireWatchingList {
    pub items: Vec<WireWatchingEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WireWatchingEntry {
    pub movie_id: String,
    pub movie_title: String,
    pub current_time: f64,
    pub total_duration: f64,
    pub last_watched: Option<DateTime<Utc>>,
    pub movie_poster: Option<String>,
    pub episode_number: Option<u32>,
    pub total_episodes: Option<u32>,
    pub source: Option<String>,
}

impl WireWatchingEntry {
    /// Convert to the domain projection, recomputing the clamped percentage
    /// client-side rather than trusting the server's arithmetic.
    pub fn into_entry(self) -> WatchingListEntry {
        let percentage = watch_percentage(self.current_time, self.total_duration);
        WatchingListEntry {
            movie_id: self.movie_id,
            movie_title: self.movie_title,
            current_time: self.current_time,
            total_duration: self.total_duration,
            percentage,
            last_watched: self.last_watched,
            movie_poster: self.movie_poster,
            episode_number: self.episode_number,
            total_episodes: self.total_episodes,
            source: self.source,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WireResumePosition {
    pub resume_time: Option<f64>,
    pub total_duration: Option<f64>,
    pub last_watched: Option<DateTime<Utc>>,
}

impl WireResumePosition {
    pub fn into_resume(self) -> ResumePosition {
        let resume_time = self.resume_time.unwrap_or(0.0).max(0.0);
        let percentage = watch_percentage(resume_time, self.total_duration.unwrap_or(0.0));
        ResumePosition {
            resume_time,
            percentage,
            last_watched: self.last_watched,
        }
    }
}

// ── Metrics responses ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WireCount {
    pub count: u64,
}

#[derive(Debug, Deserialize)]
pub struct WireUnreadCount {
    pub count: u32,
}

#[derive(Debug, Deserialize)]
pub struct WireBatchCounts {
    /// Keyed by movie id. Movies the server knows nothing about are simply
    /// absent — absence means "unknown", not zero.
    pub counts: HashMap<String, u64>,
}
