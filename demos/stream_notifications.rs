//! Streams hub notifications from a SignalR server over WebSockets.
//!
//! Negotiates with the server, checks that it allows the WebSockets transport, then logs every
//! notification for a minute before closing the transport.
//!
//! Run with tracing enabled:
//! ```sh
//! SIGNALR_URL=https://example.com/signalr SIGNALR_HUB=chat \
//!     RUST_LOG=debug cargo run --example stream_notifications --features tracing
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use signalr_ws_transport::hub::{Action, Connection, HubUrl};
use signalr_ws_transport::negotiate::NegotiateResponse;
use signalr_ws_transport::session::Session;
use signalr_ws_transport::transport::Transport as _;
use signalr_ws_transport::ws::WebSocketsTransport;
use signalr_ws_transport::ws::config::Config;
use tokio::time::timeout;
use tracing::{info, warn};
use url::Url;

struct LoggingHub {
    urls: HubUrl,
}

#[async_trait]
impl Connection for LoggingHub {
    async fn handle_notification(&self, payload: String) {
        info!(%payload, "notification");
    }

    fn get_url(&self, action: Action) -> signalr_ws_transport::Result<Url> {
        self.urls.url(action, "webSockets")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let base = Url::parse(&std::env::var("SIGNALR_URL")?)?;
    let hub = std::env::var("SIGNALR_HUB").unwrap_or_else(|_| "chat".to_owned());
    let connection_data = serde_json::json!([{ "name": hub }]).to_string();

    let mut negotiate = Url::parse(&format!("{}/negotiate", base.as_str().trim_end_matches('/')))?;
    negotiate
        .query_pairs_mut()
        .append_pair("clientProtocol", "1.5")
        .append_pair("connectionData", &connection_data);

    let raw: serde_json::Value = reqwest::get(negotiate).await?.json().await?;
    let response = NegotiateResponse::from_value(raw.clone())?;
    info!(connection_id = %response.connection_id, protocol = %response.protocol_version, "negotiated");

    let urls = HubUrl::new(base, response.connection_token, connection_data)
        .with_protocol_version(response.protocol_version);
    let transport = WebSocketsTransport::new(
        Arc::new(Session::default()),
        Arc::new(LoggingHub { urls }),
        Config::default(),
    );

    if !transport.accept(&raw)? {
        warn!("server does not allow WebSockets");
        return Ok(());
    }

    let receiving = transport.start().await?;
    match timeout(Duration::from_secs(60), receiving).await {
        Ok(result) => result??,
        Err(_) => transport.close().await?,
    }

    Ok(())
}
