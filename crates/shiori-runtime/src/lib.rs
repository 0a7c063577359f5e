//! The watch-state synchronization and live-notification engine.
//!
//! [`Runtime`] is the explicitly-owned service object the UI layer holds:
//! construct it once, `init()` after login, `dispose()` on shutdown. The
//! individual components (session manager, progress sync, dispatcher) are
//! reachable through accessors and are all safe to share across tasks.

pub mod dispatcher;
pub mod logging;
pub mod metrics;
pub mod poller;
pub mod progress;
pub mod session;

use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use shiori_api::channel::{ChannelClient, ChannelEvent};
use shiori_api::rest::RestClient;
use shiori_api::traits::CredentialSource;
use shiori_core::config::AppConfig;
use shiori_core::debug_log::{shared_event_log, SharedEventLog, SyncEvent};
use shiori_core::error::ShioriError;
use shiori_core::storage::{IdentityStore, StoredIdentity};

pub use dispatcher::{AlertSink, ListenerGuard, NoopAlerts, NotificationDispatcher};
pub use metrics::ViewForwarder;
pub use poller::NotificationPoller;
pub use progress::{ProgressSync, TrackReason, ViewThrottle, VIEW_MILESTONES};
pub use session::WatchSessionManager;

/// Shared bearer-token cell. The channel client and REST transport re-read
/// it on every use, so login/logout take effect immediately.
#[derive(Clone, Default)]
pub struct TokenCell {
    inner: Arc<RwLock<Option<String>>>,
}

impl TokenCell {
    pub fn new(initial: Option<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn set(&self, token: Option<String>) {
        *self.inner.write().unwrap() = token;
    }
}

impl CredentialSource for TokenCell {
    fn bearer_token(&self) -> Option<String> {
        self.inner.read().unwrap().clone()
    }
}

/// Owning facade over the sync core.
pub struct Runtime {
    config: AppConfig,
    identity: Mutex<IdentityStore>,
    token: TokenCell,
    rest: Arc<RestClient>,
    sessions: Arc<WatchSessionManager<RestClient>>,
    progress: Arc<ProgressSync<RestClient, RestClient, RestClient>>,
    forwarder: Arc<ViewForwarder<RestClient, RestClient>>,
    dispatcher: NotificationDispatcher,
    channel: ChannelClient,
    channel_rx: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    event_log: SharedEventLog,
}

impl Runtime {
    /// Build from the on-disk config and identity database.
    pub fn new(alerts: Box<dyn AlertSink>) -> Result<Self, ShioriError> {
        let config = AppConfig::load()?;
        let db_path = AppConfig::ensure_db_path()?;
        let identity = IdentityStore::open(&db_path)?;
        Self::with_parts(config, identity, alerts)
    }

    /// Build from explicit parts (tests use an in-memory identity store).
    pub fn with_parts(
        config: AppConfig,
        identity: IdentityStore,
        alerts: Box<dyn AlertSink>,
    ) -> Result<Self, ShioriError> {
        let token = TokenCell::new(identity.load_token()?);
        let event_log = shared_event_log();

        let rest = Arc::new(RestClient::new(
            &config.api.base_url,
            Arc::new(token.clone()),
        ));
        let forwarder = Arc::new(ViewForwarder::new(rest.clone(), rest.clone()));
        let sessions = Arc::new(WatchSessionManager::new(rest.clone(), event_log.clone()));
        let progress = Arc::new(ProgressSync::new(
            rest.clone(),
            forwarder.clone(),
            config.sync.clone(),
            event_log.clone(),
        ));
        let dispatcher = NotificationDispatcher::new(alerts, event_log.clone());
        let (channel, channel_rx) =
            ChannelClient::new(config.channel.clone(), Arc::new(token.clone()));

        Ok(Self {
            config,
            identity: Mutex::new(identity),
            token,
            rest,
            sessions,
            progress,
            forwarder,
            dispatcher,
            channel,
            channel_rx: Mutex::new(Some(channel_rx)),
            tasks: Mutex::new(Vec::new()),
            event_log,
        })
    }

    /// Bring the engine up for one user: connect the event channel, wire it
    /// into the dispatcher, start the polling fallback, and warm the
    /// watching-list cache.
    ///
    /// A failed channel connect is not fatal — the polling fallback alone
    /// carries notifications in that case.
    pub async fn init(&self, user_id: &str) -> Result<(), ShioriError> {
        match self.connect_channel(user_id).await {
            Ok(()) => info!("event channel up"),
            Err(err) => warn!(error = %err, "starting in polling-only mode"),
        }

        if let Some(mut rx) = self.channel_rx.lock().unwrap().take() {
            let dispatcher = self.dispatcher.clone();
            let log = self.event_log.clone();
            self.tasks.lock().unwrap().push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match event {
                        ChannelEvent::Notification(raw) => dispatcher.handle_inbound(raw),
                        ChannelEvent::UnreadCount(count) => {
                            dispatcher.handle_unread_count_change(count)
                        }
                        ChannelEvent::Connected { attempt } => {
                            if let Ok(mut log) = log.lock() {
                                log.push(SyncEvent::ChannelConnected { attempt });
                            }
                        }
                        ChannelEvent::Lost { message } => {
                            if let Ok(mut log) = log.lock() {
                                log.push(SyncEvent::ChannelLost { message });
                            }
                        }
                        ChannelEvent::GaveUp { attempts } => {
                            if let Ok(mut log) = log.lock() {
                                log.push(SyncEvent::ChannelGaveUp { attempts });
                            }
                        }
                    }
                }
            }));
        }

        let poller = NotificationPoller::new(
            self.rest.clone(),
            self.dispatcher.clone(),
            user_id,
            self.config.polling.clone(),
            self.event_log.clone(),
        );
        self.tasks.lock().unwrap().push(tokio::spawn(async move {
            poller.run().await;
        }));

        // Warm the cache; failure just leaves it empty with the flag raised.
        let _ = self.sessions.refresh_watching_list(user_id).await;
        Ok(())
    }

    /// Bring up the event channel, mapping transport failure into the
    /// domain taxonomy and recording it for the diagnostics panel. Safe to
    /// call again later to retry after a give-up; polling keeps running
    /// either way.
    pub async fn connect_channel(&self, user_id: &str) -> Result<(), ShioriError> {
        self.channel.connect(user_id).await.map_err(|err| {
            let err = ShioriError::Channel(err.to_string());
            if let Ok(mut log) = self.event_log.lock() {
                log.push(SyncEvent::Error {
                    source: "channel".to_string(),
                    message: err.to_string(),
                });
            }
            err
        })
    }

    /// Tear everything down. Idempotent.
    pub async fn dispose(&self) {
        self.progress.stop_tracking();
        self.channel.disconnect().await;
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    pub fn login(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        token: &str,
    ) -> Result<(), ShioriError> {
        let identity = self.identity.lock().unwrap();
        identity.save_identity(&StoredIdentity {
            user_id: user_id.to_string(),
            display_name: display_name.map(str::to_string),
        })?;
        identity.save_token(token)?;
        self.token.set(Some(token.to_string()));
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), ShioriError> {
        self.sessions.clear_session().await;
        self.token.set(None);
        self.identity.lock().unwrap().clear()
    }

    /// Identity persisted from the previous run, if any.
    pub fn restore_identity(&self) -> Result<Option<StoredIdentity>, ShioriError> {
        self.identity.lock().unwrap().load_identity()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<WatchSessionManager<RestClient>> {
        &self.sessions
    }

    pub fn progress(&self) -> &Arc<ProgressSync<RestClient, RestClient, RestClient>> {
        &self.progress
    }

    pub fn forwarder(&self) -> &Arc<ViewForwarder<RestClient, RestClient>> {
        &self.forwarder
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn channel_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn event_log(&self) -> &SharedEventLog {
        &self.event_log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiori_core::config::{ApiConfig, ChannelConfig, PollingConfig, SyncConfig};
    use std::time::Duration;

    async fn wait_for_event(log: &SharedEventLog, mut matcher: impl FnMut(&SyncEvent) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let found = log
                    .lock()
                    .unwrap()
                    .snapshot()
                    .iter()
                    .any(|(_, e)| matcher(e));
                if found {
                    return;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("event never recorded");
    }

    fn offline_config() -> AppConfig {
        AppConfig {
            api: ApiConfig {
                // Port 1 refuses connections; every remote call fails fast.
                base_url: "http://127.0.0.1:1".into(),
            },
            channel: ChannelConfig {
                url: "ws://127.0.0.1:1".into(),
                max_reconnect_attempts: 1,
                reconnect_delay_secs: 0,
            },
            sync: SyncConfig {
                progress_interval_secs: 10,
                view_throttle_secs: 30,
            },
            polling: PollingConfig {
                interval_secs: 30,
                page_size: 20,
            },
        }
    }

    fn runtime() -> Runtime {
        Runtime::with_parts(
            offline_config(),
            IdentityStore::open_memory().unwrap(),
            Box::new(NoopAlerts),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn init_survives_a_fully_offline_backend() {
        let rt = runtime();
        rt.init("u1").await.unwrap();
        assert!(!rt.channel_connected());
        // List warm-up failed, which the flag reports.
        assert!(rt.sessions().api_unavailable());
        // The spent retry budget shows up in the diagnostics ring.
        wait_for_event(rt.event_log(), |e| {
            matches!(e, SyncEvent::ChannelGaveUp { attempts: 1 })
        })
        .await;
        rt.dispose().await;
        rt.dispose().await; // idempotent
    }

    #[tokio::test]
    async fn channel_failure_maps_into_the_domain_taxonomy() {
        let rt = runtime();
        let err = rt.connect_channel("u1").await.unwrap_err();
        assert!(matches!(err, ShioriError::Channel(_)));

        let recorded = rt
            .event_log()
            .lock()
            .unwrap()
            .snapshot()
            .iter()
            .any(|(_, e)| matches!(e, SyncEvent::Error { source, .. } if source == "channel"));
        assert!(recorded);
    }

    #[tokio::test]
    async fn login_persists_identity_and_token() {
        let rt = runtime();
        rt.login("u1", Some("Ana"), "tok-1").unwrap();

        let restored = rt.restore_identity().unwrap().unwrap();
        assert_eq!(restored.user_id, "u1");
        assert_eq!(restored.display_name.as_deref(), Some("Ana"));
        assert_eq!(rt.token.bearer_token().as_deref(), Some("tok-1"));

        rt.logout().await.unwrap();
        assert!(rt.restore_identity().unwrap().is_none());
        assert_eq!(rt.token.bearer_token(), None);
    }
}
