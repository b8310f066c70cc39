#![expect(
    clippy::module_name_repetitions,
    reason = "NegotiateResponse mirrors the name of the server endpoint it models"
)]

//! Server negotiation payload and the capability check run against it.

use serde::Deserialize;
use serde_json::Value;

use crate::Result;
use crate::error::Error;

/// Key under which the server advertises WebSocket support.
pub const TRY_WEB_SOCKETS: &str = "TryWebSockets";

/// Typed view over the JSON returned by a SignalR `negotiate` call.
#[non_exhaustive]
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct NegotiateResponse {
    /// Relative URL of the SignalR endpoint, e.g. `/signalr`
    #[serde(default)]
    pub url: Option<String>,
    pub connection_token: String,
    pub connection_id: String,
    #[serde(default)]
    pub keep_alive_timeout: Option<f64>,
    #[serde(default)]
    pub disconnect_timeout: Option<f64>,
    #[serde(default)]
    pub connection_timeout: Option<f64>,
    pub try_web_sockets: bool,
    pub protocol_version: String,
    #[serde(default)]
    pub transport_connect_timeout: Option<f64>,
}

impl NegotiateResponse {
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Whether the negotiation payload allows the WebSockets transport.
///
/// A payload without a boolean [`TRY_WEB_SOCKETS`] entry is rejected with
/// [`crate::error::MissingCapability`] rather than read as `false`.
pub fn accept(negotiation: &Value) -> Result<bool> {
    negotiation
        .get(TRY_WEB_SOCKETS)
        .and_then(Value::as_bool)
        .ok_or_else(|| Error::missing_capability(TRY_WEB_SOCKETS))
}
