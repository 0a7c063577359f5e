use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use shiori_core::config::ChannelConfig;
use shiori_core::models::RawNotification;

use super::protocol::{topics_for_user, ClientFrame, ServerFrame};
use crate::traits::CredentialSource;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("websocket transport: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("no credentials available")]
    MissingCredentials,

    #[error("frame encode: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("channel handshake gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

/// An event worth forwarding to the runtime: inbound payloads plus
/// connection-state transitions. Control frames never appear here.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Notification(RawNotification),
    UnreadCount(u32),
    Connected { attempt: u32 },
    Lost { message: String },
    GaveUp { attempts: u32 },
}

/// Client side of the persistent notification channel.
///
/// One websocket connection per client. On every successful (re)connect the
/// full topic set is re-subscribed; the server is never assumed to remember
/// subscriptions across connections. Connect attempts are bounded: once the
/// retry budget is spent the client stays disconnected and the polling
/// fallback is the sole event source.
#[derive(Clone)]
pub struct ChannelClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ChannelConfig,
    credentials: Arc<dyn CredentialSource>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    /// Bumped by `disconnect()`; tasks holding a stale generation stop
    /// instead of reconnecting.
    generation: AtomicU64,
    connected: AtomicBool,
    writer: Mutex<Option<WsWriter>>,
}

impl ChannelClient {
    pub fn new(
        config: ChannelConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Self {
            inner: Arc::new(Inner {
                config,
                credentials,
                events: tx,
                generation: AtomicU64::new(0),
                connected: AtomicBool::new(false),
                writer: Mutex::new(None),
            }),
        };
        (client, rx)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Establish the channel and start the read loop.
    ///
    /// Retries failed handshakes after a fixed delay, up to the configured
    /// attempt budget, then returns the error and leaves the client
    /// disconnected.
    pub async fn connect(&self, user_id: &str) -> Result<(), ChannelError> {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let reader = self.connect_with_retries(user_id, generation).await?;

        let client = self.clone();
        let user = user_id.to_string();
        tokio::spawn(async move {
            client.run_loop(reader, user, generation).await;
        });
        Ok(())
    }

    /// Tear down the connection and its subscriptions. Idempotent.
    pub async fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);
        let mut guard = self.inner.writer.lock().await;
        if let Some(mut writer) = guard.take() {
            let _ = writer.send(Message::Close(None)).await;
            debug!("event channel closed");
        }
    }

    /// Bounded handshake loop. Returns the read half on success.
    async fn connect_with_retries(
        &self,
        user_id: &str,
        generation: u64,
    ) -> Result<WsReader, ChannelError> {
        let max_attempts = self.inner.config.max_reconnect_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_connect(user_id).await {
                Ok(reader) => {
                    self.inner.connected.store(true, Ordering::SeqCst);
                    info!(attempt, "event channel connected");
                    let _ = self.inner.events.send(ChannelEvent::Connected { attempt });
                    return Ok(reader);
                }
                Err(err) if attempt >= max_attempts => {
                    warn!(attempt, error = %err, "channel connect failed; budget spent");
                    let _ = self.inner.events.send(ChannelEvent::GaveUp {
                        attempts: max_attempts,
                    });
                    return Err(ChannelError::RetriesExhausted {
                        attempts: max_attempts,
                    });
                }
                Err(err) => {
                    warn!(attempt, error = %err, "channel connect failed; retrying");
                    tokio::time::sleep(self.inner.config.reconnect_delay()).await;
                    if self.stale(generation) {
                        return Err(ChannelError::RetriesExhausted { attempts: attempt });
                    }
                }
            }
        }
    }

    /// Single connect attempt: handshake, then re-subscribe the full topic
    /// set. The bearer token is re-read from the credential source on every
    /// attempt.
    async fn try_connect(&self, user_id: &str) -> Result<WsReader, ChannelError> {
        let token = self
            .inner
            .credentials
            .bearer_token()
            .ok_or(ChannelError::MissingCredentials)?;

        let (ws, _) = connect_async(self.inner.config.url.as_str()).await?;
        let (mut writer, reader) = ws.split();

        let connect = ClientFrame::Connect {
            user_id: user_id.to_string(),
            token,
        };
        writer
            .send(Message::Text(serde_json::to_string(&connect)?))
            .await?;

        for topic in topics_for_user(user_id) {
            let frame = ClientFrame::Subscribe { topic };
            writer
                .send(Message::Text(serde_json::to_string(&frame)?))
                .await?;
        }

        *self.inner.writer.lock().await = Some(writer);
        Ok(reader)
    }

    /// Owns the connection for its whole life: drain frames, and on loss
    /// re-enter the bounded reconnect loop until the budget is spent or the
    /// client is deliberately disconnected.
    async fn run_loop(&self, mut reader: WsReader, user_id: String, generation: u64) {
        loop {
            let reason = self.drain(&mut reader, generation).await;
            if self.stale(generation) {
                return;
            }

            self.inner.connected.store(false, Ordering::SeqCst);
            let message = reason.unwrap_or_else(|| "connection closed".to_string());
            warn!(%message, "event channel lost; attempting reconnect");
            let _ = self.inner.events.send(ChannelEvent::Lost { message });
            match self.connect_with_retries(&user_id, generation).await {
                Ok(next) => reader = next,
                Err(err) => {
                    warn!(error = %err, "channel down; polling fallback is the sole event source");
                    return;
                }
            }
        }
    }

    /// Read frames until the connection ends. Returns the failure message,
    /// or `None` for a clean close.
    async fn drain(&self, reader: &mut WsReader, generation: u64) -> Option<String> {
        while let Some(msg) = reader.next().await {
            if self.stale(generation) {
                return None;
            }
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(frame) => self.handle_frame(frame),
                    Err(err) => debug!(error = %err, "ignoring unparseable frame"),
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "channel read error");
                    return Some(err.to_string());
                }
            }
        }
        None
    }

    fn handle_frame(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Notification { notification } => {
                let _ = self.inner.events.send(ChannelEvent::Notification(notification));
            }
            ServerFrame::UnreadCount { count } => {
                let _ = self.inner.events.send(ChannelEvent::UnreadCount(count));
            }
            // Control frames stop here; the dispatcher never sees them.
            ServerFrame::SubscriptionConfirmed { topic } => {
                debug!(?topic, "subscription confirmed");
            }
            ServerFrame::Connected | ServerFrame::Ping => {}
        }
    }

    fn stale(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) != generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    struct FixedToken(&'static str);

    impl CredentialSource for FixedToken {
        fn bearer_token(&self) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    fn test_config(port: u16) -> ChannelConfig {
        ChannelConfig {
            url: format!("ws://127.0.0.1:{port}"),
            max_reconnect_attempts: 2,
            reconnect_delay_secs: 0,
        }
    }

    #[tokio::test]
    async fn connects_resubscribes_and_forwards_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let mut subscribed = Vec::new();
            for _ in 0..5 {
                let msg = ws.next().await.unwrap().unwrap();
                let Message::Text(text) = msg else {
                    panic!("expected text frame, got {msg:?}");
                };
                match serde_json::from_str::<ClientFrame>(&text).unwrap() {
                    ClientFrame::Connect { user_id, token } => {
                        assert_eq!(user_id, "u1");
                        assert_eq!(token, "tok");
                    }
                    ClientFrame::Subscribe { topic } => subscribed.push(topic),
                    other => panic!("unexpected frame: {other:?}"),
                }
            }
            assert_eq!(subscribed, topics_for_user("u1"));

            // Control frame first: the client must drop it, not forward it.
            ws.send(Message::Text(
                r#"{"type":"subscription_confirmed","topic":"broadcast"}"#.into(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text(
                r#"{"type":"notification","notification":{"id":"n-1","title":"t","message":"m"}}"#
                    .into(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text(r#"{"type":"unread_count","count":7}"#.into()))
                .await
                .unwrap();
        });

        let (client, mut rx) = ChannelClient::new(test_config(port), Arc::new(FixedToken("tok")));
        client.connect("u1").await.unwrap();
        assert!(client.is_connected());

        match rx.recv().await.unwrap() {
            ChannelEvent::Connected { attempt } => assert_eq!(attempt, 1),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ChannelEvent::Notification(raw) => assert_eq!(raw.id.as_deref(), Some("n-1")),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ChannelEvent::UnreadCount(count) => assert_eq!(count, 7),
            other => panic!("unexpected event: {other:?}"),
        }

        // Server goes away: the client reports the loss, burns its reconnect
        // budget against the dead port, then reports the give-up.
        server.await.unwrap();
        match rx.recv().await.unwrap() {
            ChannelEvent::Lost { .. } => {}
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ChannelEvent::GaveUp { attempts } => assert_eq!(attempts, 2),
            other => panic!("unexpected event: {other:?}"),
        }

        client.disconnect().await;
        client.disconnect().await; // idempotent
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        // Bind then drop, so the port refuses connections.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (client, mut rx) = ChannelClient::new(test_config(port), Arc::new(FixedToken("tok")));
        let err = client.connect("u1").await.unwrap_err();
        assert!(matches!(err, ChannelError::RetriesExhausted { attempts: 2 }));
        assert!(!client.is_connected());

        match rx.recv().await.unwrap() {
            ChannelEvent::GaveUp { attempts } => assert_eq!(attempts, 2),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
