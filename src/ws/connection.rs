#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::backoff::{Backoff as _, Constant};
use futures::{Sink, SinkExt as _, Stream, StreamExt as _};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::Config;
use super::error::WsError;
use crate::Result;
use crate::hub::{Action, Connection};
use crate::session::Session;

/// A single frame read from the channel.
pub type Frame = std::result::Result<Message, tungstenite::Error>;

/// Writer half of a channel.
pub type WsSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;

/// Reader half of a channel.
pub type WsStream = Pin<Box<dyn Stream<Item = Frame> + Send>>;

/// A live duplex channel, split into its writer and reader halves.
///
/// The writer half is shared by every sender behind a lock, the reader half is owned by
/// the receive loop. Reconnecting replaces both halves together.
#[non_exhaustive]
pub struct Channel {
    pub sink: WsSink,
    pub stream: WsStream,
}

impl Channel {
    pub fn new<W, R>(sink: W, stream: R) -> Self
    where
        W: Sink<Message, Error = tungstenite::Error> + Send + 'static,
        R: Stream<Item = Frame> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Split a duplex stream, e.g. a [`tokio_tungstenite::WebSocketStream`].
    pub fn split<T>(duplex: T) -> Self
    where
        T: Sink<Message, Error = tungstenite::Error> + Stream<Item = Frame> + Send + 'static,
    {
        let (sink, stream) = duplex.split();
        Self::new(sink, stream)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

/// Opens channels for a prepared upgrade request.
///
/// Every error returned here counts as a failed connection attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, request: Request) -> std::result::Result<Channel, tungstenite::Error>;
}

/// [`Connector`] backed by [`tokio_tungstenite::connect_async`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, request: Request) -> std::result::Result<Channel, tungstenite::Error> {
        let (ws_stream, _response) = connect_async(request).await?;
        Ok(Channel::split(ws_stream))
    }
}

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel open yet, or the last one broke
    Disconnected,
    /// Attempting to connect
    Connecting {
        /// Failed attempts so far
        attempt: u32,
    },
    /// Channel open and the `start` handshake done
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// The connect budget ran out. Terminal.
    Exhausted,
    /// Shut down by the owner. Terminal.
    Closed,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Exhausted | Self::Closed)
    }
}

/// Owns the channel of a transport: connecting with bounded retries, reading inbound frames
/// and writing outbound ones.
///
/// - [`ConnectionManager::connect`] retries failed attempts after [`Config::retry_delay`],
///   giving up with [`WsError::ConnectionExhausted`] once
///   [`Config::max_connect_attempts`] consecutive attempts have failed
/// - the receive loop hands every text frame to [`Connection::handle_notification`] in order,
///   and reconnects after [`Config::reconnect_delay`] when the channel breaks
/// - [`ConnectionManager::send`] writes whole frames under a lock, so concurrent senders never
///   interleave
pub struct ConnectionManager<C: Connection> {
    inner: Arc<ManagerInner<C>>,
}

impl<C: Connection> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ManagerInner<C: Connection> {
    config: Config,
    session: Arc<Session>,
    connection: Arc<C>,
    connector: Arc<dyn Connector>,
    /// Writer half of the current channel; `None` while disconnected
    writer: Mutex<Option<WsSink>>,
    /// Cancelled when the current channel is discarded, releasing writes stuck on it
    channel_cancel: StdMutex<CancellationToken>,
    /// Consecutive failed connection attempts, reset by a successful connect
    attempts: AtomicU32,
    /// Set once a receive loop has been started
    receiving: AtomicBool,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl<C: Connection> ConnectionManager<C> {
    #[must_use]
    pub fn new(session: Arc<Session>, connection: Arc<C>, config: Config) -> Self {
        Self::with_connector(session, connection, config, TungsteniteConnector)
    }

    #[must_use]
    pub fn with_connector<K: Connector>(
        session: Arc<Session>,
        connection: Arc<C>,
        config: Config,
        connector: K,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        Self {
            inner: Arc::new(ManagerInner {
                config,
                session,
                connection,
                connector: Arc::new(connector),
                writer: Mutex::new(None),
                channel_cancel: StdMutex::new(cancel.child_token()),
                attempts: AtomicU32::new(0),
                receiving: AtomicBool::new(false),
                state_tx,
                cancel,
            }),
        }
    }

    /// Open a channel to `url`, installing its writer half and returning its reader half.
    ///
    /// Failed attempts are retried after [`Config::retry_delay`]. Once the consecutive failure
    /// count reaches [`Config::max_connect_attempts`] this returns
    /// [`WsError::ConnectionExhausted`] and every later call fails the same way without
    /// touching the network. Errors building the request (bad headers, a failing auth hook)
    /// are returned immediately and do not count as attempts.
    pub async fn connect(&self, url: &Url) -> Result<WsStream> {
        let connected = self.try_connect(url).await;
        if connected.is_err() {
            self.publish(ConnectionState::Disconnected);
        }
        connected
    }

    async fn try_connect(&self, url: &Url) -> Result<WsStream> {
        let inner = &self.inner;
        let max_attempts = inner.config.max_connect_attempts;
        let mut retry = inner.config.retry_backoff();

        loop {
            if inner.cancel.is_cancelled() {
                return Err(WsError::ConnectionClosed.into());
            }

            let attempt = inner.attempts.load(Ordering::Acquire);
            if attempt >= max_attempts {
                self.publish(ConnectionState::Exhausted);

                #[cfg(feature = "tracing")]
                tracing::error!(attempts = attempt, %url, "WebSocket connect attempts exhausted");

                return Err(WsError::ConnectionExhausted { attempts: attempt }.into());
            }

            self.publish(ConnectionState::Connecting { attempt });

            let request = self.request(url)?;
            let start = inner.connection.get_url(Action::Start)?;

            match self.open(request, &start).await {
                Ok(Channel { sink, stream }) => {
                    let mut writer = inner.writer.lock().await;
                    if inner.cancel.is_cancelled() {
                        return Err(WsError::ConnectionClosed.into());
                    }

                    // Senders still holding the previous token belong to no live channel
                    std::mem::replace(
                        &mut *inner
                            .channel_cancel
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner),
                        inner.cancel.child_token(),
                    )
                    .cancel();
                    *writer = Some(sink);
                    inner.attempts.store(0, Ordering::Release);
                    self.publish(ConnectionState::Connected {
                        since: Instant::now(),
                    });

                    #[cfg(feature = "tracing")]
                    tracing::debug!(%url, "WebSocket connected");

                    return Ok(stream);
                }
                Err(e) => {
                    let failed = inner
                        .attempts
                        .fetch_add(1, Ordering::AcqRel)
                        .saturating_add(1);

                    #[cfg(feature = "tracing")]
                    tracing::warn!(attempt = failed, max_attempts, "Unable to connect: {e:?}");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;

                    if failed < max_attempts
                        && let Some(delay) = retry.next_backoff()
                    {
                        self.pause(delay).await?;
                    }
                }
            }
        }
    }

    /// Upgrade request for `url` carrying the session's current headers and cookies.
    fn request(&self, url: &Url) -> Result<Request> {
        let params = self.inner.session.project()?;
        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        // Never clobber the upgrade headers tungstenite generated
        let generated: Vec<HeaderName> = headers.keys().cloned().collect();

        for (name, value) in &params.headers {
            if !generated.contains(name) {
                headers.append(name, value.clone());
            }
        }

        if !params.cookie.is_empty() {
            headers.insert(COOKIE, HeaderValue::from_str(&params.cookie)?);
        }

        Ok(request)
    }

    /// One connection attempt: the upgrade followed by the `start` handshake.
    async fn open(&self, request: Request, start: &Url) -> Result<Channel> {
        let connecting = self.inner.connector.connect(request);
        let channel = match self.inner.config.connect_timeout {
            Some(limit) => timeout(limit, connecting)
                .await
                .map_err(|_elapsed| WsError::Timeout(limit))??,
            None => connecting.await?,
        };

        self.inner.session.get(start).await?;

        Ok(channel)
    }

    /// Sleep for `delay` unless the manager is cancelled first.
    async fn pause(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            biased;

            () = self.inner.cancel.cancelled() => Err(WsError::ConnectionClosed.into()),
            () = sleep(delay) => Ok(()),
        }
    }

    /// Mark the receive loop as started. Returns `false` if one was already started.
    pub(crate) fn claim_receiver(&self) -> bool {
        !self.inner.receiving.swap(true, Ordering::AcqRel)
    }

    /// Read `stream` until the channel breaks, then reconnect to `url` and carry on.
    ///
    /// Returns `Ok(())` once cancelled and the fatal error if reconnecting exhausts the
    /// connect budget.
    pub(crate) async fn receive_loop(self, url: Url, mut stream: WsStream) -> Result<()> {
        let mut reconnect = self.inner.config.reconnect_backoff();

        loop {
            let failure = tokio::select! {
                biased;

                () = self.inner.cancel.cancelled() => return Ok(()),
                failure = self.forward(&mut stream) => failure,
            };

            if self.inner.cancel.is_cancelled() {
                return Ok(());
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(%url, "WebSocket channel failed, reconnecting: {failure}");
            #[cfg(not(feature = "tracing"))]
            let _ = &failure;

            self.discard_writer().await;

            match self.reconnect(&url, &mut reconnect).await {
                Ok(next) => stream = next,
                Err(_) if self.inner.cancel.is_cancelled() => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    async fn reconnect(&self, url: &Url, backoff: &mut Constant) -> Result<WsStream> {
        if let Some(delay) = backoff.next_backoff() {
            self.pause(delay).await?;
        }

        self.connect(url).await
    }

    /// Hand inbound text frames to the notification handler, one at a time, until the
    /// channel fails. Returns the reason it failed.
    async fn forward(&self, stream: &mut WsStream) -> WsError {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(%text, "Received WebSocket text message");

                    self.inner
                        .connection
                        .handle_notification(text.as_str().to_owned())
                        .await;
                }
                Ok(Message::Close(_)) => return WsError::ConnectionClosed,
                Ok(_) => {
                    // Binary, ping and pong frames carry no notifications.
                }
                Err(e) => return WsError::Connection(e),
            }
        }

        WsError::ConnectionClosed
    }

    /// Drop the writer half of a broken channel so no sender writes into it.
    async fn discard_writer(&self) {
        self.channel_token().cancel();
        drop(self.inner.writer.lock().await.take());
        self.inner
            .state_tx
            .send_if_modified(|state| match state {
                ConnectionState::Connected { .. } => {
                    *state = ConnectionState::Disconnected;
                    true
                }
                _ => false,
            });
    }

    /// Serialize `message` as JSON and send it as a single text frame.
    pub async fn send<R: Serialize + ?Sized>(&self, message: &R) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        self.send_text(payload).await
    }

    /// Send a pre-serialized payload as a single text frame.
    ///
    /// Fails with [`WsError::ConnectionClosed`] when no channel is open and with
    /// [`WsError::Connection`] wrapping the channel's own error when the write fails. Failed
    /// sends are not retried.
    ///
    /// A write still pending when the channel is discarded or the manager is closed is
    /// abandoned with [`WsError::ConnectionClosed`].
    pub async fn send_text(&self, payload: String) -> Result<()> {
        let channel = self.channel_token();

        tokio::select! {
            biased;

            () = channel.cancelled() => return Err(WsError::ConnectionClosed.into()),
            written = self.write(payload) => written?,
        }

        // Give the receive loop and other senders a turn before returning to the caller
        tokio::task::yield_now().await;

        Ok(())
    }

    async fn write(&self, payload: String) -> Result<()> {
        let mut writer = self.inner.writer.lock().await;
        let sink = writer.as_mut().ok_or(WsError::ConnectionClosed)?;
        sink.send(Message::Text(payload.into()))
            .await
            .map_err(WsError::Connection)?;
        Ok(())
    }

    fn channel_token(&self) -> CancellationToken {
        self.inner
            .channel_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publish `next` unless a terminal state was already reached.
    fn publish(&self, next: ConnectionState) {
        self.inner.state_tx.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    /// Stop the receive loop and close the current channel. Queued sends are not drained.
    pub async fn close(&self) -> Result<()> {
        self.inner.cancel.cancel();
        let writer = self.inner.writer.lock().await.take();

        self.publish(ConnectionState::Closed);

        if let Some(mut sink) = writer {
            match sink.close().await {
                Ok(())
                | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {}
                Err(e) => return Err(WsError::Connection(e).into()),
            }
        }

        Ok(())
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Consecutive failed connection attempts since the last successful connect.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::Acquire)
    }

    /// Token that stops the receive loop when cancelled, e.g. during process shutdown.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<C> {
        &self.inner.connection
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}
