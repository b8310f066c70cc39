#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every fixture in this module"
)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt as _, StreamExt as _, stream};
use httpmock::{Mock, MockServer};
use reqwest::StatusCode;
use signalr_ws_transport::hub::{Action, Connection};
use signalr_ws_transport::ws::config::Config;
use signalr_ws_transport::ws::connection::Frame;
use signalr_ws_transport::ws::{Channel, Connector};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as ServerRequest, Response,
};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

pub const START_PATH: &str = "/signalr/start";
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Millisecond delays so retry and reconnect paths run quickly.
#[must_use]
pub fn fast_config(max_connect_attempts: u32) -> Config {
    Config::builder()
        .retry_delay(Duration::from_millis(1))
        .reconnect_delay(Duration::from_millis(1))
        .max_connect_attempts(max_connect_attempts)
        .build()
}

/// Mock for the `start` handshake.
pub fn mock_start(server: &MockServer) -> Mock<'_> {
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path(START_PATH);
        then.status(StatusCode::OK)
            .json_body(serde_json::json!({ "Response": "started" }));
    })
}

/// Hub connection that forwards every notification to a channel.
pub struct TestHub {
    connect: Url,
    start: Url,
    notifications: mpsc::UnboundedSender<String>,
}

impl TestHub {
    pub fn new(connect: &str, start: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (notifications, rx) = mpsc::unbounded_channel();
        let hub = Self {
            connect: Url::parse(connect).unwrap(),
            start: Url::parse(start).unwrap(),
            notifications,
        };
        (Arc::new(hub), rx)
    }
}

#[async_trait]
impl Connection for TestHub {
    async fn handle_notification(&self, payload: String) {
        drop(self.notifications.send(payload));
    }

    fn get_url(&self, action: Action) -> signalr_ws_transport::Result<Url> {
        Ok(match action {
            Action::Start => self.start.clone(),
            _ => self.connect.clone(),
        })
    }
}

pub async fn recv_notification(rx: &mut mpsc::UnboundedReceiver<String>) -> Option<String> {
    timeout(RECV_TIMEOUT, rx.recv()).await.ok().flatten()
}

/// One scripted outcome of a connection attempt.
pub enum Attempt {
    Fail,
    /// Never completes
    Hang,
    Open(Channel),
}

struct Script {
    attempts: Mutex<VecDeque<Attempt>>,
    calls: AtomicU32,
    headers: Mutex<Vec<HeaderMap>>,
}

/// [`Connector`] replaying a fixed script. Attempts past the end of the script fail.
#[derive(Clone)]
pub struct ScriptedConnector {
    script: Arc<Script>,
}

impl ScriptedConnector {
    pub fn new<I: IntoIterator<Item = Attempt>>(attempts: I) -> Self {
        Self {
            script: Arc::new(Script {
                attempts: Mutex::new(attempts.into_iter().collect()),
                calls: AtomicU32::new(0),
                headers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn calls(&self) -> u32 {
        self.script.calls.load(Ordering::SeqCst)
    }

    /// Headers of every upgrade request seen so far.
    pub fn headers(&self) -> Vec<HeaderMap> {
        self.script.headers.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, request: Request) -> Result<Channel, tungstenite::Error> {
        self.script.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .headers
            .lock()
            .unwrap()
            .push(request.headers().clone());
        let next = self.script.attempts.lock().unwrap().pop_front();

        match next {
            Some(Attempt::Open(channel)) => Ok(channel),
            Some(Attempt::Hang) => std::future::pending().await,
            Some(Attempt::Fail) | None => Err(tungstenite::Error::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            ))),
        }
    }
}

/// Channel yielding `frames` then staying open. Writes go to the returned receiver.
pub fn channel(
    frames: Vec<Frame>,
) -> (Channel, futures_util::stream::BoxStream<'static, Message>) {
    let (tx, rx) = futures::channel::mpsc::unbounded::<Message>();
    let sink = tx.sink_map_err(|_send_error| tungstenite::Error::AlreadyClosed);
    let stream = stream::iter(frames).chain(stream::pending());

    (Channel::new(sink, stream), rx.boxed())
}

/// Channel whose writes always fail with [`tungstenite::Error::AlreadyClosed`].
pub fn broken_channel() -> Channel {
    let sink = futures::sink::unfold((), |(), _message: Message| async {
        Err::<(), _>(tungstenite::Error::AlreadyClosed)
    });

    Channel::new(sink, stream::pending())
}

/// Sink that never becomes ready, like a socket whose peer stopped reading.
struct StalledSink;

impl Sink<Message> for StalledSink {
    type Error = tungstenite::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Self::Error> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Channel whose writes never complete. Frames pushed into the returned sender are read by
/// the receive loop.
pub fn stalled_channel() -> (Channel, futures::channel::mpsc::UnboundedSender<Frame>) {
    let (tx, rx) = futures::channel::mpsc::unbounded::<Frame>();

    (Channel::new(StalledSink, rx), tx)
}

pub fn text(payload: &str) -> Frame {
    Ok(Message::Text(payload.into()))
}

/// Upgrade request as seen by the mock server.
#[derive(Debug)]
pub struct Handshake {
    pub uri: String,
    pub headers: HashMap<String, String>,
}

/// Mock WebSocket server.
pub struct MockWsServer {
    addr: SocketAddr,
    /// `Some` broadcasts a text frame to every client, `None` drops every client
    command_tx: broadcast::Sender<Option<String>>,
    /// Messages received from clients
    message_rx: mpsc::UnboundedReceiver<String>,
    /// Upgrade requests, one per accepted connection
    handshake_rx: mpsc::UnboundedReceiver<Handshake>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (command_tx, _) = broadcast::channel::<Option<String>>(100);
        let (message_tx, message_rx) = mpsc::unbounded_channel::<String>();
        let (handshake_tx, handshake_rx) = mpsc::unbounded_channel::<Handshake>();

        let commands = command_tx.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                // Subscribe before the upgrade so nothing sent after the handshake is missed
                let mut command_rx = commands.subscribe();
                let handshakes = handshake_tx.clone();
                let callback = move |request: &ServerRequest, response: Response| {
                    let headers = request
                        .headers()
                        .iter()
                        .map(|(name, value)| {
                            (
                                name.as_str().to_owned(),
                                value.to_str().unwrap_or_default().to_owned(),
                            )
                        })
                        .collect();
                    drop(handshakes.send(Handshake {
                        uri: request.uri().to_string(),
                        headers,
                    }));
                    Ok::<_, ErrorResponse>(response)
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let messages = message_tx.clone();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(messages.send(text.to_string()));
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            command = command_rx.recv() => {
                                match command {
                                    Ok(Some(text)) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(None) => {
                                        drop(write.send(Message::Close(None)).await);
                                        break;
                                    }
                                    Err(_) => break,
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            command_tx,
            message_rx,
            handshake_rx,
        }
    }

    /// HTTP URL of the connect endpoint; the transport maps it onto `ws://`.
    pub fn connect_url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }

    /// Send a text frame to all connected clients.
    pub fn send(&self, message: &str) {
        drop(self.command_tx.send(Some(message.to_owned())));
    }

    /// Close every connected client.
    pub fn disconnect_all(&self) {
        drop(self.command_tx.send(None));
    }

    pub async fn recv_message(&mut self) -> Option<String> {
        timeout(RECV_TIMEOUT, self.message_rx.recv())
            .await
            .ok()
            .flatten()
    }

    pub async fn recv_handshake(&mut self) -> Option<Handshake> {
        timeout(RECV_TIMEOUT, self.handshake_rx.recv())
            .await
            .ok()
            .flatten()
    }
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
