use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The user's in-progress viewing session. At most one exists per user;
/// owned by the session manager for the lifetime of active playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSession {
    pub user_id: String,
    pub movie_id: String,
    pub movie_title: String,
    pub current_time: f64,
    pub total_duration: f64,
    pub started_at: DateTime<Utc>,
    pub session_id: Uuid,
}

impl WatchSession {
    pub fn new(user_id: String, movie_id: String, movie_title: String, total_duration: f64) -> Self {
        Self {
            user_id,
            movie_id,
            movie_title,
            current_time: 0.0,
            total_duration: total_duration.max(0.0),
            started_at: Utc::now(),
            session_id: Uuid::new_v4(),
        }
    }

    /// Record a new playback position, clamped non-negative.
    pub fn set_position(&mut self, current_time: f64) {
        self.current_time = current_time.max(0.0);
    }

    pub fn percentage(&self) -> f64 {
        watch_percentage(self.current_time, self.total_duration)
    }
}

/// A live playback snapshot read from the player on each sync tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackPosition {
    pub current_time: f64,
    pub total_duration: f64,
}

impl PlaybackPosition {
    pub fn percentage(&self) -> f64 {
        watch_percentage(self.current_time, self.total_duration)
    }
}

/// Server-reconciled projection of one "continue watching" row.
///
/// The cached list is rebuilt wholesale on every successful refresh and never
/// partially merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchingListEntry {
    pub movie_id: String,
    pub movie_title: String,
    pub current_time: f64,
    pub total_duration: f64,
    pub percentage: f64,
    pub last_watched: Option<DateTime<Utc>>,
    pub movie_poster: Option<String>,
    pub episode_number: Option<u32>,
    pub total_episodes: Option<u32>,
    /// Upstream stream-source tag. The client carries it for display only.
    pub source: Option<String>,
}

/// Completion percentage, clamped to [0, 100]. A zero or negative duration
/// yields 0 rather than dividing by it.
pub fn watch_percentage(current_time: f64, total_duration: f64) -> f64 {
    if total_duration <= 0.0 {
        return 0.0;
    }
    (100.0 * current_time / total_duration).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_clamps_to_bounds() {
        assert_eq!(watch_percentage(3600.0, 7200.0), 50.0);
        assert_eq!(watch_percentage(-5.0, 7200.0), 0.0);
        assert_eq!(watch_percentage(9000.0, 7200.0), 100.0);
    }

    #[test]
    fn percentage_of_zero_duration_is_zero() {
        assert_eq!(watch_percentage(100.0, 0.0), 0.0);
        assert_eq!(watch_percentage(100.0, -1.0), 0.0);
    }

    #[test]
    fn set_position_clamps_negative() {
        let mut session =
            WatchSession::new("u1".into(), "m1".into(), "Foo".into(), 7200.0);
        session.set_position(-30.0);
        assert_eq!(session.current_time, 0.0);
        session.set_position(3600.0);
        assert_eq!(session.percentage(), 50.0);
    }
}
