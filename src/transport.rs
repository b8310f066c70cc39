//! Transport contract shared by every channel technology a hub connection can run on.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::Result;

/// Handle to a running receive loop.
///
/// Resolves to `Ok(())` after the transport is closed or cancelled, or to the fatal error that
/// ended it (see [`crate::error::Error::is_fatal`]).
pub type ReceiveTask = JoinHandle<Result<()>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Identifier the server uses for this transport, e.g. `webSockets`.
    fn name(&self) -> &'static str;

    /// Connect and spawn the receive loop. May only be called once per transport.
    async fn start(&self) -> Result<ReceiveTask>;

    /// Send an already serialized payload.
    async fn send_text(&self, payload: String) -> Result<()>;

    /// Close the active channel without draining pending sends and stop the receive loop.
    async fn close(&self) -> Result<()>;

    /// Whether the server's negotiation payload allows this transport.
    fn accept(&self, negotiation: &Value) -> Result<bool>;
}

/// Convenience methods available on every [`Transport`].
#[async_trait]
pub trait TransportExt: Transport {
    /// Serialize `message` as JSON and send it.
    async fn send<R>(&self, message: &R) -> Result<()>
    where
        R: Serialize + Sync + ?Sized,
    {
        let payload = serde_json::to_string(message)?;
        self.send_text(payload).await
    }
}

impl<T: Transport + ?Sized> TransportExt for T {}
