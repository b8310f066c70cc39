//! WebSockets transport.
//!
//! # Architecture
//!
//! - [`endpoint::ws_url`]: maps the hub's HTTP(S) `connect` URL onto `ws`/`wss`
//! - [`ConnectionManager`]: connects with bounded retries, runs the receive loop, sends frames
//! - [`WebSocketsTransport`]: the [`crate::transport::Transport`] implementation built on top
//! - [`Connector`]: seam for opening channels, [`TungsteniteConnector`] by default

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod transport;

pub use connection::{Channel, ConnectionManager, ConnectionState, Connector, TungsteniteConnector};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use transport::WebSocketsTransport;
