//! The owning hub connection, as seen from the transport.

use std::fmt;

use async_trait::async_trait;
use url::Url;

use crate::Result;

/// Endpoint actions a transport asks the hub connection to resolve.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// Opening the persistent channel
    Connect,
    /// Post-connect handshake confirming the server is ready to stream
    Start,
}

impl Action {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Start => "start",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hub connection that owns a transport.
///
/// Implementations receive every inbound notification, in arrival order, one at a time:
/// the transport awaits each call before reading the next frame.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    async fn handle_notification(&self, payload: String);

    /// Fully-qualified HTTP(S) URL for `action`.
    fn get_url(&self, action: Action) -> Result<Url>;
}

/// Builds SignalR endpoint URLs of the form
/// `{base}/{action}?transport=…&connectionToken=…&connectionData=…&clientProtocol=…`.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubUrl {
    pub base: Url,
    pub connection_token: String,
    /// JSON list of hubs, e.g. `[{"name":"chat"}]`
    pub connection_data: String,
    pub protocol_version: String,
}

impl HubUrl {
    #[must_use]
    pub fn new(base: Url, connection_token: String, connection_data: String) -> Self {
        Self {
            base,
            connection_token,
            connection_data,
            protocol_version: "1.5".to_owned(),
        }
    }

    #[must_use]
    pub fn with_protocol_version(mut self, protocol_version: String) -> Self {
        self.protocol_version = protocol_version;
        self
    }

    pub fn url(&self, action: Action, transport: &str) -> Result<Url> {
        let base = self.base.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/{action}"))?;

        url.query_pairs_mut()
            .append_pair("transport", transport)
            .append_pair("connectionToken", &self.connection_token)
            .append_pair("connectionData", &self.connection_data)
            .append_pair("clientProtocol", &self.protocol_version);

        Ok(url)
    }
}
