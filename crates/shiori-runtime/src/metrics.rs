//! Fan-out of progress ticks into the view-count and trending subsystems.
//! The two backends are independent: failure of one never blocks or rolls
//! back the other, and both are swallowed as transient.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use shiori_api::traits::{TrendingEntry, TrendingMetrics, ViewMetrics};
use shiori_core::error::ShioriError;

pub struct ViewForwarder<V: ViewMetrics, T: TrendingMetrics> {
    views: Arc<V>,
    trending: Arc<T>,
}

impl<V: ViewMetrics, T: TrendingMetrics> ViewForwarder<V, T> {
    pub fn new(views: Arc<V>, trending: Arc<T>) -> Self {
        Self { views, trending }
    }

    /// Fire a view tick toward both subsystems.
    pub async fn forward(&self, movie_id: &str) {
        let (view, trending) = tokio::join!(
            self.views.track_view(movie_id),
            self.trending.track_trending_view(movie_id),
        );
        match view {
            Ok(()) => debug!(movie_id, "view tracked"),
            Err(err) => {
                let err = ShioriError::TransientSync(err.to_string());
                warn!(movie_id, error = %err, "view tracking failed");
            }
        }
        match trending {
            Ok(()) => debug!(movie_id, "trending view tracked"),
            Err(err) => {
                let err = ShioriError::TransientSync(err.to_string());
                warn!(movie_id, error = %err, "trending tracking failed");
            }
        }
    }

    pub async fn view_count(&self, movie_id: &str) -> Result<u64, ShioriError> {
        self.views
            .get_view_count(movie_id)
            .await
            .map_err(|e| ShioriError::Unavailable(e.to_string()))
    }

    /// Batch lookup. Movies absent from the result are unknown, not zero;
    /// callers keep whatever prior value they were displaying.
    pub async fn batch_view_counts(
        &self,
        movie_ids: &[String],
    ) -> Result<HashMap<String, u64>, ShioriError> {
        self.views
            .get_batch_view_counts(movie_ids)
            .await
            .map_err(|e| ShioriError::Unavailable(e.to_string()))
    }

    pub async fn trending_stats(&self) -> Result<Vec<TrendingEntry>, ShioriError> {
        self.trending
            .get_trending_stats()
            .await
            .map_err(|e| ShioriError::Unavailable(e.to_string()))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{MockTrending, MockViews};
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn failing_views_does_not_block_trending() {
        let views = Arc::new(MockViews::default());
        let trending = Arc::new(MockTrending::default());
        views.fail.store(true, Ordering::SeqCst);

        let forwarder = ViewForwarder::new(views.clone(), trending.clone());
        forwarder.forward("m1").await;

        assert_eq!(views.calls.load(Ordering::SeqCst), 0);
        assert_eq!(trending.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_trending_does_not_block_views() {
        let views = Arc::new(MockViews::default());
        let trending = Arc::new(MockTrending::default());
        trending.fail.store(true, Ordering::SeqCst);

        let forwarder = ViewForwarder::new(views.clone(), trending.clone());
        forwarder.forward("m1").await;

        assert_eq!(views.calls.load(Ordering::SeqCst), 1);
        assert_eq!(trending.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batch_counts_tolerate_partial_results() {
        let views = Arc::new(MockViews::default());
        views.counts.lock().unwrap().insert("m1".into(), 42);
        let forwarder = ViewForwarder::new(views, Arc::new(MockTrending::default()));

        let ids = vec!["m1".to_string(), "m-unknown".to_string()];
        let counts = forwarder.batch_view_counts(&ids).await.unwrap();
        assert_eq!(counts.get("m1"), Some(&42));
        // Absent means unknown, not zero.
        assert!(!counts.contains_key("m-unknown"));
    }
}
