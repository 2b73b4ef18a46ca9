//! Transport connection: one full-duplex link at a time.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest, http::HeaderValue, protocol::CloseFrame, Error as WsError,
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};

use crate::error::{ConnectError, SendError};

type RealtimeWebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close codes that signal rejected credentials.
const AUTH_CLOSE_CODES: [u16; 5] = [1008, 4001, 4003, 4401, 4403];

/// Where to connect and with which bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
    api_key: String,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field("api_key", &"..")
            .finish()
    }
}

/// Frames handed to the link, in program order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// What the link reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(String),
    Closed(CloseCause),
}

/// Why a link closed without being asked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseCause {
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseCause {
    pub fn new(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// The remote rejected our credentials.
    pub fn is_auth_failure(&self) -> bool {
        self.code.is_some_and(|code| AUTH_CLOSE_CODES.contains(&code))
    }

    fn from_close_frame(frame: Option<CloseFrame<'_>>) -> Self {
        match frame {
            Some(frame) => Self::new(Some(u16::from(frame.code)), frame.reason.to_string()),
            None => Self::new(None, "closed by server"),
        }
    }
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}

/// An open link. Dropping `outbound` closes it; `inbound` is the single
/// receive handler for everything the remote sends.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Opens links to the realtime endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect and complete the auth handshake.
    async fn open(&self, endpoint: &Endpoint) -> Result<Link, ConnectError>;
}

/// Transport lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum TransportState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Tracks the state of the current link and owns its send half.
#[derive(Debug)]
pub struct TransportConnection {
    state: TransportState,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
}

impl Default for TransportConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConnection {
    pub fn new() -> Self {
        Self {
            state: TransportState::Idle,
            outbound: None,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TransportState::Open
    }

    pub fn begin_open(&mut self) {
        self.outbound = None;
        self.state = TransportState::Connecting;
    }

    pub fn opened(&mut self, outbound: mpsc::UnboundedSender<Outbound>) {
        self.outbound = Some(outbound);
        self.state = TransportState::Open;
    }

    /// Handshake failed or was abandoned.
    pub fn open_failed(&mut self) {
        self.outbound = None;
        self.state = TransportState::Closed;
    }

    /// Enqueue a text frame. Never buffers while not open.
    pub fn send(&self, text: String) -> Result<(), SendError> {
        match (&self.outbound, self.state) {
            (Some(outbound), TransportState::Open) => outbound
                .send(Outbound::Text(text))
                .map_err(|_| SendError::NotConnected),
            _ => Err(SendError::NotConnected),
        }
    }

    /// Graceful close. Returns whether a close was actually issued; closing
    /// anything but an open link is a no-op.
    pub fn close(&mut self) -> bool {
        match self.state {
            TransportState::Open => {
                self.state = TransportState::Closing;
                if let Some(outbound) = self.outbound.take() {
                    let _ = outbound.send(Outbound::Close);
                }
                self.state = TransportState::Closed;
                tracing::debug!("Realtime transport closed");
                true
            }
            TransportState::Connecting => {
                self.open_failed();
                false
            }
            TransportState::Idle | TransportState::Closing | TransportState::Closed => false,
        }
    }

    /// The remote side went away.
    pub fn lost(&mut self) {
        self.outbound = None;
        self.state = TransportState::Closed;
    }
}

/// Websocket connector with bearer auth and a ping heartbeat.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    heartbeat_interval: Duration,
}

impl WebSocketConnector {
    /// A zero interval disables the heartbeat.
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self { heartbeat_interval }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Link, ConnectError> {
        let socket = connect_realtime_socket(endpoint).await?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket_pump(
            socket,
            outbound_rx,
            inbound_tx,
            self.heartbeat_interval,
        ));
        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

async fn connect_realtime_socket(endpoint: &Endpoint) -> Result<RealtimeWebSocket, ConnectError> {
    let mut request = endpoint.url().into_client_request().map_err(|error| {
        ConnectError::InvalidEndpoint(format!("Invalid realtime websocket URL: {error}"))
    })?;
    let auth_value =
        HeaderValue::from_str(&format!("Bearer {}", endpoint.api_key())).map_err(|error| {
            ConnectError::InvalidEndpoint(format!("Invalid realtime auth header: {error}"))
        })?;
    request.headers_mut().insert("Authorization", auth_value);
    request
        .headers_mut()
        .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    connect_async(request)
        .await
        .map(|(socket, _)| socket)
        .map_err(map_connect_error)
}

fn map_connect_error(error: WsError) -> ConnectError {
    match error {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if matches!(status, 401 | 403) {
                ConnectError::Authentication(format!(
                    "Realtime websocket authentication failed with status {status}"
                ))
            } else {
                ConnectError::Handshake {
                    status,
                    message: format!("Realtime websocket handshake failed with status {status}"),
                }
            }
        }
        WsError::Io(error) => ConnectError::Network(error.to_string()),
        WsError::Url(error) => {
            ConnectError::InvalidEndpoint(format!("Invalid realtime websocket URL: {error}"))
        }
        other => ConnectError::Network(format!("Realtime websocket connect failed: {other}")),
    }
}

async fn run_socket_pump(
    mut socket: RealtimeWebSocket,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    heartbeat_interval: Duration,
) {
    let heartbeat_enabled = !heartbeat_interval.is_zero();
    let mut heartbeat = time::interval(if heartbeat_enabled {
        heartbeat_interval
    } else {
        Duration::from_secs(3600)
    });
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    let cause = loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Text(text)) => {
                    if let Err(error) = socket.send(Message::Text(text.into())).await {
                        break CloseCause::new(None, format!("Realtime websocket send failed: {error}"));
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = socket.close(None).await;
                    return;
                }
            },
            _ = heartbeat.tick(), if heartbeat_enabled => {
                if let Err(error) = socket.send(Message::Ping(Default::default())).await {
                    break CloseCause::new(None, format!("Realtime heartbeat failed: {error}"));
                }
            }
            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = inbound_tx.send(Inbound::Frame(text.to_string()));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        let _ = inbound_tx.send(Inbound::Frame(text));
                    }
                    Err(_) => tracing::debug!(len = bytes.len(), "Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(error) = socket.send(Message::Pong(payload)).await {
                        break CloseCause::new(None, format!("Realtime pong failed: {error}"));
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => break CloseCause::from_close_frame(frame),
                Some(Err(error)) => {
                    break CloseCause::new(None, format!("Realtime websocket receive failed: {error}"));
                }
                None => break CloseCause::new(None, "Realtime websocket stream ended"),
            }
        }
    };

    tracing::debug!(cause = %cause, "Realtime transport lost");
    let _ = inbound_tx.send(Inbound::Closed(cause));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_fails_unless_open() {
        let mut transport = TransportConnection::new();
        assert_eq!(
            transport.send("x".into()),
            Err(SendError::NotConnected)
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.begin_open();
        assert_eq!(transport.state(), TransportState::Connecting);
        assert_eq!(transport.send("x".into()), Err(SendError::NotConnected));

        transport.opened(tx);
        transport.send("first".into()).unwrap();
        transport.send("second".into()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Outbound::Text("first".into()));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Text("second".into()));
    }

    #[test]
    fn close_is_idempotent() {
        let mut transport = TransportConnection::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.begin_open();
        transport.opened(tx);

        assert!(transport.close());
        assert!(!transport.close());
        assert_eq!(transport.state(), TransportState::Closed);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn failed_handshake_goes_straight_to_closed() {
        let mut transport = TransportConnection::new();
        transport.begin_open();
        transport.open_failed();
        assert_eq!(transport.state(), TransportState::Closed);
    }

    #[test]
    fn auth_close_codes_are_recognized() {
        assert!(CloseCause::new(Some(4001), "bad key").is_auth_failure());
        assert!(CloseCause::new(Some(1008), "policy").is_auth_failure());
        assert!(!CloseCause::new(Some(1006), "abnormal").is_auth_failure());
        assert!(!CloseCause::new(None, "eof").is_auth_failure());
    }

    #[test]
    fn endpoint_debug_hides_key() {
        let endpoint = Endpoint::new("wss://x", "sk-secret");
        assert!(!format!("{endpoint:?}").contains("sk-secret"));
    }
}
