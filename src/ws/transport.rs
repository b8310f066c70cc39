#![expect(
    clippy::module_name_repetitions,
    reason = "WebSocketsTransport is named after the SignalR transport it implements"
)]

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::config::Config;
use super::connection::{ConnectionManager, ConnectionState, Connector};
use super::endpoint::ws_url;
use crate::Result;
use crate::error::Error;
use crate::hub::{Action, Connection};
use crate::negotiate;
use crate::session::Session;
use crate::transport::{ReceiveTask, Transport};

/// SignalR identifier of this transport.
pub const NAME: &str = "webSockets";

/// SignalR transport over a single persistent WebSocket.
///
/// # Example
///
/// ```rust, no_run
/// use std::sync::Arc;
///
/// use async_trait::async_trait;
/// use signalr_ws_transport::hub::{Action, Connection, HubUrl};
/// use signalr_ws_transport::session::{BearerToken, Session};
/// use signalr_ws_transport::transport::{Transport as _, TransportExt as _};
/// use signalr_ws_transport::ws::WebSocketsTransport;
/// use signalr_ws_transport::ws::config::Config;
/// use url::Url;
///
/// struct Hub(HubUrl);
///
/// #[async_trait]
/// impl Connection for Hub {
///     async fn handle_notification(&self, payload: String) {
///         println!("{payload}");
///     }
///
///     fn get_url(&self, action: Action) -> signalr_ws_transport::Result<Url> {
///         self.0.url(action, "webSockets")
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let session = Arc::new(Session::default().with_auth(BearerToken::new("token".to_owned())));
///     let hub = HubUrl::new(
///         Url::parse("https://example.com/signalr")?,
///         "connection-token".to_owned(),
///         r#"[{"name":"chat"}]"#.to_owned(),
///     );
///
///     let transport = WebSocketsTransport::new(session, Arc::new(Hub(hub)), Config::default());
///     let receiving = transport.start().await?;
///
///     transport.send(&serde_json::json!({ "H": "chat", "M": "send", "A": ["hi"], "I": 0 })).await?;
///
///     receiving.await??;
///     Ok(())
/// }
/// ```
pub struct WebSocketsTransport<C: Connection> {
    manager: ConnectionManager<C>,
}

impl<C: Connection> Clone for WebSocketsTransport<C> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
        }
    }
}

impl<C: Connection> WebSocketsTransport<C> {
    #[must_use]
    pub fn new(session: Arc<Session>, connection: Arc<C>, config: Config) -> Self {
        Self {
            manager: ConnectionManager::new(session, connection, config),
        }
    }

    /// Create a transport that opens its channels through `connector`.
    #[must_use]
    pub fn with_connector<K: Connector>(
        session: Arc<Session>,
        connection: Arc<C>,
        config: Config,
        connector: K,
    ) -> Self {
        Self {
            manager: ConnectionManager::with_connector(session, connection, config, connector),
        }
    }

    #[must_use]
    pub fn connection_manager(&self) -> &ConnectionManager<C> {
        &self.manager
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.manager.state_receiver()
    }

    /// Token that stops the receive loop when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.manager.cancellation_token()
    }
}

#[async_trait]
impl<C: Connection> Transport for WebSocketsTransport<C> {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn start(&self) -> Result<ReceiveTask> {
        if !self.manager.claim_receiver() {
            return Err(Error::validation("transport has already been started"));
        }

        let url = ws_url(self.manager.connection().get_url(Action::Connect)?.as_str())?;

        #[cfg(feature = "tracing")]
        tracing::debug!(%url, "Starting WebSockets transport");

        let stream = self.manager.connect(&url).await?;
        let manager = self.manager.clone();

        Ok(tokio::spawn(manager.receive_loop(url, stream)))
    }

    async fn send_text(&self, payload: String) -> Result<()> {
        self.manager.send_text(payload).await
    }

    async fn close(&self) -> Result<()> {
        self.manager.close().await
    }

    fn accept(&self, negotiation: &Value) -> Result<bool> {
        negotiate::accept(negotiation)
    }
}
