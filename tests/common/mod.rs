//! Shared test helpers: an in-memory connector and fake audio devices.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use meet_realtime::audio::{AudioError, AudioSettings, AudioSink, AudioSource};
use meet_realtime::config::RealtimeConfig;
use meet_realtime::error::ConnectError;
use meet_realtime::realtime::{
    CloseCause, ClientEvent, Connector, Endpoint, Inbound, Link, Outbound,
};

pub const WAIT: Duration = Duration::from_secs(30);

pub fn test_config() -> RealtimeConfig {
    RealtimeConfig {
        api_key: Some("test-key".into()),
        base_url: "wss://realtime.test/v1/realtime".into(),
        heartbeat_interval: Duration::ZERO,
        ..Default::default()
    }
}

/// Server half of one fake link.
pub struct FakeServer {
    outbound: mpsc::UnboundedReceiver<Outbound>,
    inbound: mpsc::UnboundedSender<Inbound>,
    pub url: String,
}

impl FakeServer {
    /// Next frame the client sent, parsed as JSON. Panics on a close.
    pub async fn next_frame(&mut self) -> Value {
        match timeout(WAIT, self.outbound.recv())
            .await
            .expect("client frame should arrive")
        {
            Some(Outbound::Text(text)) => {
                serde_json::from_str(&text).expect("client frame should be JSON")
            }
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    /// Next client frame type.
    pub async fn next_type(&mut self) -> String {
        let frame = self.next_frame().await;
        frame["type"]
            .as_str()
            .expect("client frame should carry a type")
            .to_string()
    }

    /// Everything the client has queued so far, without waiting.
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    pub fn send(&self, value: Value) {
        let _ = self.inbound.send(Inbound::Frame(value.to_string()));
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.inbound.send(Inbound::Frame(text.to_string()));
    }

    /// Acknowledge the session configuration.
    pub fn ack_session(&self) {
        self.send(json!({"type": "session.created", "session": {"id": "sess_test"}}));
    }

    /// Drop the link from the server side.
    pub fn drop_link(&self, code: Option<u16>, reason: &str) {
        let _ = self.inbound.send(Inbound::Closed(CloseCause::new(code, reason)));
    }
}

/// Connector that hands out in-memory links and records each attempt.
#[derive(Default)]
pub struct FakeConnector {
    opens: AtomicUsize,
    /// Scripted results; an empty script means "succeed".
    script: Mutex<VecDeque<Result<(), ConnectError>>>,
    /// When set, `open` never completes.
    hang: AtomicBool,
    servers: Mutex<Option<mpsc::UnboundedSender<FakeServer>>>,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeServer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            servers: Mutex::new(Some(tx)),
            ..Default::default()
        };
        (Arc::new(connector), rx)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, error: ConnectError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn fail_always(&self, error: ConnectError, times: usize) {
        for _ in 0..times {
            self.fail_next(error.clone());
        }
    }

    pub fn hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Link, ConnectError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        if let Some(Err(error)) = scripted {
            return Err(error);
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        if let Some(servers) = self.servers.lock().unwrap().as_ref() {
            let _ = servers.send(FakeServer {
                outbound: outbound_rx,
                inbound: inbound_tx,
                url: endpoint.url().to_string(),
            });
        }
        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

pub async fn next_server(servers: &mut mpsc::UnboundedReceiver<FakeServer>) -> FakeServer {
    timeout(WAIT, servers.recv())
        .await
        .expect("connector should be opened")
        .expect("connector should still be alive")
}

/// Wait for the first event matching `predicate`.
pub async fn wait_for_event<F>(
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
    mut predicate: F,
) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event stream should stay open");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event should arrive before timeout")
}

/// Every event currently buffered.
pub fn drain_events(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub fn audio_delta(samples: &[i16]) -> Value {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    json!({"type": "response.audio.delta", "delta": STANDARD.encode(bytes)})
}

/// Observable state of a fake device.
#[derive(Clone, Default)]
pub struct DeviceState {
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl DeviceState {
    pub fn is_released(&self) -> bool {
        self.opened.load(Ordering::SeqCst) == self.closed.load(Ordering::SeqCst)
    }
}

/// Capture device fed from a channel.
pub struct FakeSource {
    blocks: mpsc::UnboundedReceiver<Vec<f32>>,
    state: DeviceState,
}

impl FakeSource {
    pub fn new() -> (Self, mpsc::UnboundedSender<Vec<f32>>, DeviceState) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = DeviceState::default();
        (
            Self {
                blocks: rx,
                state: state.clone(),
            },
            tx,
            state,
        )
    }
}

#[async_trait]
impl AudioSource for FakeSource {
    fn open(&mut self, _settings: &AudioSettings) -> Result<(), AudioError> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn next_block(&mut self) -> Option<Vec<f32>> {
        self.blocks.recv().await
    }

    fn close(&mut self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Rendering sink that records each buffer and finishes only when the test
/// says so.
pub struct FakeSink {
    pub played: Arc<Mutex<Vec<Vec<f32>>>>,
    finishers: mpsc::UnboundedSender<oneshot::Sender<()>>,
    state: DeviceState,
}

impl FakeSink {
    pub fn new() -> (
        Self,
        Arc<Mutex<Vec<Vec<f32>>>>,
        mpsc::UnboundedReceiver<oneshot::Sender<()>>,
        DeviceState,
    ) {
        let played = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let state = DeviceState::default();
        (
            Self {
                played: Arc::clone(&played),
                finishers: tx,
                state: state.clone(),
            },
            played,
            rx,
            state,
        )
    }
}

impl AudioSink for FakeSink {
    fn open(&mut self, _sample_rate: u32) -> Result<(), AudioError> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn play(
        &mut self,
        samples: Vec<f32>,
        _sample_rate: u32,
    ) -> Result<oneshot::Receiver<()>, AudioError> {
        self.played.lock().unwrap().push(samples);
        let (done_tx, done_rx) = oneshot::channel();
        let _ = self.finishers.send(done_tx);
        Ok(done_rx)
    }

    fn close(&mut self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}
