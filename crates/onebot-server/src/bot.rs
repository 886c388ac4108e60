use std::net::SocketAddr;
use std::sync::Arc;

use onebot_core::{Event, OneBotError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::ServerConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, PeerInfo};
use crate::correlator::CallCommand;
use crate::dispatcher::{EventKey, Listener, ListenerResult};

/// Handle to a reverse WebSocket OneBot endpoint.
///
/// Cheap to clone; all clones share the same listener, connection slot and
/// listener registry.
#[derive(Clone)]
pub struct Bot {
    inner: Arc<ConnectionManager>,
}

impl Bot {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(ConnectionManager::new(config)),
        }
    }

    /// Start listening. Same as [`Bot::start`].
    pub async fn init(&self) -> Result<SocketAddr> {
        self.start().await
    }

    /// Stop listening, close the peer and drop every registered listener.
    pub async fn dispose(&self) {
        self.stop().await;
        self.inner.listeners().clear();
    }

    pub async fn start(&self) -> Result<SocketAddr> {
        self.inner.start().await
    }

    pub async fn stop(&self) {
        self.inner.stop().await;
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr().await
    }

    pub fn register(&self, key: impl Into<EventKey>, listener: Listener) {
        self.inner.listeners().register(key, listener);
    }

    /// Register a closure and return its handle for later [`Bot::unregister`].
    pub fn on<F>(&self, key: impl Into<EventKey>, f: F) -> Listener
    where
        F: Fn(&Event) -> ListenerResult + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(f);
        self.register(key, Arc::clone(&listener));
        listener
    }

    pub fn unregister(&self, listener: &Listener) -> bool {
        self.inner.listeners().unregister(listener)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn peer(&self) -> Option<PeerInfo> {
        self.inner.peer()
    }

    /// Connection signals: `Connected` and `Disconnected`.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.subscribe()
    }

    /// Invoke `action` on the peer and wait for its `data`.
    ///
    /// Fails with `NoConnection` (nothing is sent) when no peer is connected,
    /// `Disconnected` when the peer leaves first, `Timeout` after the
    /// configured call timeout, and `CallFailed` on any non-`ok` status.
    /// The timeout covers waiting for room in a full call queue too.
    pub async fn call(&self, action: &str, params: Value) -> Result<Value> {
        let Some(commands) = self.inner.command_sender() else {
            debug!(action, "call without connection");
            return Err(OneBotError::NoConnection);
        };

        let (command, rx) = CallCommand::new(action, params);
        let disconnected = || OneBotError::Disconnected {
            action: action.to_owned(),
        };
        let exchange = async {
            if commands.send(command).await.is_err() {
                return Err(disconnected());
            }
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(disconnected()),
            }
        };

        let timeout = self.inner.config().call_timeout();
        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(OneBotError::Timeout {
                action: action.to_owned(),
                timeout_ms: self.inner.config().call_timeout_ms,
            }),
        }
    }

    /// [`Bot::call`], decoding `data` into `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, action: &str, params: Value) -> Result<T> {
        let data = self.call(action, params).await?;
        Ok(serde_json::from_value(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn call_without_connection_fails_immediately() {
        let bot = Bot::new(ServerConfig::default());
        let err = bot.call("get_login_info", json!({})).await.unwrap_err();
        assert!(matches!(err, OneBotError::NoConnection));
    }

    #[tokio::test]
    async fn call_as_without_connection_fails_immediately() {
        let bot = Bot::new(ServerConfig::default());
        let err = bot
            .call_as::<Value>("get_status", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), "no_connection");
    }

    #[test]
    fn on_returns_handle_for_unregister() {
        let bot = Bot::new(ServerConfig::default());
        let handle = bot.on("message.private", |_event: &Event| Ok(()));
        let clone = bot.clone();
        assert!(clone.unregister(&handle));
        assert!(!bot.unregister(&handle));
    }

    #[tokio::test]
    async fn dispose_clears_listeners() {
        let bot = Bot::new(ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        });
        bot.init().await.unwrap();
        let handle = bot.on(EventKey::Any, |_event: &Event| Ok(()));

        bot.dispose().await;
        assert!(!bot.unregister(&handle));
        assert!(bot.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn full_call_queue_times_out() {
        let bot = Bot::new(ServerConfig {
            call_timeout_ms: 100,
            queue_capacity: 1,
            ..Default::default()
        });
        // A session that never drains its queue.
        let (commands, _queue) = mpsc::channel(1);
        let (stuck, _reply) = CallCommand::new("get_status", Value::Null);
        commands.try_send(stuck).unwrap();

        bot.inner.open();
        let peer = PeerInfo::from_headers("127.0.0.1:40000".parse().unwrap(), &Default::default());
        let _ = bot.inner.claim(&peer, commands, CancellationToken::new());

        match bot.call("get_login_info", json!({})).await {
            Err(OneBotError::Timeout { action, timeout_ms }) => {
                assert_eq!(action, "get_login_info");
                assert_eq!(timeout_ms, 100);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
