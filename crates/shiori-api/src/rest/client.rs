use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use serde_json::json;

use shiori_core::models::WatchingListEntry;

use super::error::RestError;
use super::types::{
    WireBatchCounts, WireCount, WireResumePosition, WireUnreadCount, WireWatchingList,
};
use crate::traits::{
    CredentialSource, NotificationFeed, NotificationPage, NotificationQuery, ProgressUpdate,
    ResumePosition, TrendingEntry, TrendingMetrics, ViewMetrics, WatchStartRequest, WatchStats,
    WatchStore,
};

/// REST transport against the streaming backend.
///
/// One client serves all four collaborator roles; the runtime consumes it
/// through the individual traits. The bearer token is re-read from the
/// credential source per request, so a login elsewhere takes effect without
/// rebuilding the client.
pub struct RestClient {
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
    http: Client,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            http: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credentials.bearer_token() {
            Some(token) => req.header("Authorization", format!("Bearer {token}")),
            None => req,
        }
    }

    /// Check the HTTP response for errors and return the body text on failure.
    async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, RestError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            tracing::warn!(status, "backend API error");
            Err(RestError::Api { status, message })
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, RestError> {
        let resp = self.with_auth(self.http.get(self.url(path))).send().await?;
        let resp = Self::check_response(resp).await?;
        resp.json().await.map_err(|e| RestError::Parse(e.to_string()))
    }

    async fn post_empty(&self, path: &str) -> Result<(), RestError> {
        let resp = self.with_auth(self.http.post(self.url(path))).send().await?;
        Self::check_response(resp).await?;
        Ok(())
    }
}

impl WatchStore for RestClient {
    type Error = RestError;

    async fn start_watching(&self, req: &WatchStartRequest) -> Result<(), RestError> {
        let resp = self
            .with_auth(self.http.post(self.url("/api/watch/start")))
            .json(req)
            .send()
            .await?;
        Self::check_response(resp).await?;
        Ok(())
    }

    async fn update_progress(&self, update: &ProgressUpdate) -> Result<(), RestError> {
        let resp = self
            .with_auth(self.http.put(self.url("/api/watch/progress")))
            .json(update)
            .send()
            .await?;
        Self::check_response(resp).await?;
        Ok(())
    }

    async fn get_watching_list(&self, user_id: &str) -> Result<Vec<WatchingListEntry>, RestError> {
        let list: WireWatchingList = self.get_json(&format!("/api/watch/list/{user_id}")).await?;
        Ok(list.items.into_iter().map(|e| e.into_entry()).collect())
    }

    async fn get_resume_position(
        &self,
        user_id: &str,
        movie_id: &str,
    ) -> Result<ResumePosition, RestError> {
        let wire: WireResumePosition = self
            .get_json(&format!("/api/watch/resume/{user_id}/{movie_id}"))
            .await?;
        Ok(wire.into_resume())
    }

    async fn mark_completed(&self, user_id: &str, movie_id: &str) -> Result<(), RestError> {
        self.post_empty(&format!("/api/watch/complete/{user_id}/{movie_id}"))
            .await
    }

    async fn remove_from_watching(&self, user_id: &str, movie_id: &str) -> Result<(), RestError> {
        let resp = self
            .with_auth(
                self.http
                    .delete(self.url(&format!("/api/watch/{user_id}/{movie_id}"))),
            )
            .send()
            .await?;
        Self::check_response(resp).await?;
        Ok(())
    }

    async fn get_stats(&self, user_id: &str) -> Result<WatchStats, RestError> {
        self.get_json(&format!("/api/watch/stats/{user_id}")).await
    }
}

impl ViewMetrics for RestClient {
    type Error = RestError;

    async fn track_view(&self, movie_id: &str) -> Result<(), RestError> {
        self.post_empty(&format!("/api/views/{movie_id}/track")).await
    }

    async fn get_view_count(&self, movie_id: &str) -> Result<u64, RestError> {
        let wire: WireCount = self.get_json(&format!("/api/views/{movie_id}")).await?;
        Ok(wire.count)
    }

    async fn get_batch_view_counts(
        &self,
        movie_ids: &[String],
    ) -> Result<HashMap<String, u64>, RestError> {
        let resp = self
            .with_auth(self.http.post(self.url("/api/views/batch")))
            .json(&json!({ "movie_ids": movie_ids }))
            .send()
            .await?;
        let resp = Self::check_response(resp).await?;
        let wire: WireBatchCounts = resp
            .json()
            .await
            .map_err(|e| RestError::Parse(e.to_string()))?;
        Ok(wire.counts)
    }
}

impl TrendingMetrics for RestClient {
    type Error = RestError;

    async fn track_trending_view(&self, movie_id: &str) -> Result<(), RestError> {
        self.post_empty(&format!("/api/trending/{movie_id}/track"))
            .await
    }

    async fn get_trending_stats(&self) -> Result<Vec<TrendingEntry>, RestError> {
        self.get_json("/api/trending/stats").await
    }
}

impl NotificationFeed for RestClient {
    type Error = RestError;

    async fn get_unread_count(&self, user_id: &str) -> Result<u32, RestError> {
        let wire: WireUnreadCount = self
            .get_json(&format!("/api/notifications/unread-count?user_id={user_id}"))
            .await?;
        Ok(wire.count)
    }

    async fn list_notifications(
        &self,
        user_id: &str,
        query: &NotificationQuery,
    ) -> Result<NotificationPage, RestError> {
        let resp = self
            .with_auth(self.http.get(self.url("/api/notifications")))
            .query(&[
                ("user_id", user_id),
                ("page", &query.page.to_string()),
                ("size", &query.size.to_string()),
                ("unread", &query.unread_only.to_string()),
            ])
            .send()
            .await?;
        let resp = Self::check_response(resp).await?;
        resp.json().await.map_err(|e| RestError::Parse(e.to_string()))
    }

    async fn mark_read(&self, notification_id: &str) -> Result<(), RestError> {
        self.post_empty(&format!("/api/notifications/{notification_id}/read"))
            .await
    }

    async fn mark_all_read(&self, user_id: &str) -> Result<(), RestError> {
        self.post_empty(&format!("/api/notifications/read-all?user_id={user_id}"))
            .await
    }

    async fn delete_notification(&self, notification_id: &str) -> Result<(), RestError> {
        let resp = self
            .with_auth(
                self.http
                    .delete(self.url(&format!("/api/notifications/{notification_id}"))),
            )
            .send()
            .await?;
        Self::check_response(resp).await?;
        Ok(())
    }
}
