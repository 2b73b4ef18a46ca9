//! Public client: the one object applications hold.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::codec::{self, ClientFrame, Decoded, Unrecognized};
use super::events::{
    ClientEvent, DisconnectReason, ErrorEvent, ErrorSource, EventBus, EventKind, MessageRole,
    RealtimeMessage, SubscriptionId,
};
use super::reconnect::{GiveUpReason, LossKind, ReconnectDecision, ReconnectState};
use super::session::{ConnectionState, SessionMachine, SessionPhase};
use super::transport::{
    CloseCause, Connector, Inbound, Link, Outbound, TransportConnection, TransportState,
    WebSocketConnector,
};
use crate::audio::capture::CaptureTarget;
use crate::audio::device::{AudioSink, AudioSource};
use crate::audio::pcm;
use crate::audio::pipeline::AudioPipeline;
use crate::config::RealtimeConfig;
use crate::error::{ConnectError, ErrorCategory, RealtimeError, Result, SendError};
use crate::util::timeout::with_timeout;

/// Realtime speech client. One session per instance; dropping the client
/// tears the session down and releases any audio devices.
pub struct RealtimeClient {
    shared: Arc<Shared>,
}

struct Shared {
    config: RealtimeConfig,
    connector: Arc<dyn Connector>,
    bus: EventBus,
    core: Mutex<Core>,
    phase_tx: watch::Sender<SessionPhase>,
}

struct Core {
    machine: SessionMachine,
    transport: TransportConnection,
    reconnect: ReconnectState,
    /// Bumped on every connect and disconnect so stale tasks stand down.
    epoch: u64,
    shutdown: Option<watch::Sender<bool>>,
    supervisor: Option<JoinHandle<()>>,
    audio: Option<AudioPipeline>,
    playback_subscription: Option<SubscriptionId>,
    transcript: Vec<RealtimeMessage>,
}

type AudioDevices = (Box<dyn AudioSource>, Box<dyn AudioSink>);

impl RealtimeClient {
    /// Client that connects over websocket.
    pub fn new(config: RealtimeConfig) -> Self {
        let connector = Arc::new(WebSocketConnector::new(config.heartbeat_interval));
        Self::with_connector(config, connector)
    }

    /// Client with a custom transport connector.
    pub fn with_connector(config: RealtimeConfig, connector: Arc<dyn Connector>) -> Self {
        let (phase_tx, _) = watch::channel(SessionPhase::Disconnected);
        let core = Core {
            machine: SessionMachine::new(config.instructions.clone()),
            transport: TransportConnection::new(),
            reconnect: ReconnectState::default(),
            epoch: 0,
            shutdown: None,
            supervisor: None,
            audio: None,
            playback_subscription: None,
            transcript: Vec::new(),
        };
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                bus: EventBus::new(),
                core: Mutex::new(core),
                phase_tx,
            }),
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.shared.config
    }

    /// Open the transport and send the session configuration (text only).
    ///
    /// Returns once the handshake completes. Calling this while already
    /// connecting or connected is a logged no-op.
    pub async fn connect(&self) -> Result<()> {
        self.shared.connect(None).await
    }

    /// Like [`connect`](Self::connect), also acquiring capture and playback
    /// devices for the lifetime of the session.
    pub async fn connect_with_audio(
        &self,
        source: Box<dyn AudioSource>,
        sink: Box<dyn AudioSink>,
    ) -> Result<()> {
        self.shared.connect(Some((source, sink))).await
    }

    /// Disable reconnection, close the transport, release audio devices,
    /// and reset the session. Cancels a connect that is still handshaking.
    pub async fn disconnect(&self) {
        self.shared.disconnect().await;
    }

    /// Encode normalized samples as PCM16 and append them to the input buffer.
    pub fn send_audio(&self, samples: &[f32]) -> std::result::Result<(), SendError> {
        self.shared.send_audio(samples)
    }

    /// Commit buffered input audio and request a response.
    pub fn commit_audio(&self) -> std::result::Result<(), SendError> {
        self.shared
            .send_frames(&[ClientFrame::InputAudioCommit, ClientFrame::ResponseCreate])
    }

    /// Send a user text message and request a response.
    pub fn send_text(&self, text: &str) -> std::result::Result<(), SendError> {
        self.shared
            .send_frames(&[ClientFrame::user_text(text), ClientFrame::ResponseCreate])?;
        self.shared
            .lock()
            .transcript
            .push(RealtimeMessage::new(MessageRole::User, text));
        Ok(())
    }

    /// Replace the agent instructions; re-sends the session configuration
    /// when the transport is open.
    pub fn update_instructions(&self, instructions: &str) -> std::result::Result<(), SendError> {
        let mut core = self.shared.lock();
        if !core.machine.set_instructions(instructions) {
            return Ok(());
        }
        let frame = ClientFrame::session_update(&self.shared.config, core.machine.instructions());
        send_frame(&core.transport, &frame).map_err(|error| {
            tracing::warn!(error = %error, "Instructions stored but not sent");
            error
        })
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.shared.bus.on(kind, handler)
    }

    pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.shared.bus.off(kind, id)
    }

    /// Receive every event through a channel.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        self.shared.bus.subscribe()
    }

    /// Wait until the server has acknowledged the session configuration.
    pub async fn wait_until_active(&self, timeout: Duration) -> Result<()> {
        let mut phase_rx = self.shared.phase_tx.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            phase_rx.wait_for(|phase| {
                matches!(phase, SessionPhase::Active | SessionPhase::Disconnected)
            }),
        )
        .await;
        match waited {
            Ok(Ok(phase)) if *phase == SessionPhase::Active => Ok(()),
            Ok(_) => Err(RealtimeError::InvalidState(
                "Session disconnected before becoming active".into(),
            )),
            Err(_) => Err(RealtimeError::Timeout(timeout.as_millis() as u64)),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.lock().machine.phase()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().machine.connection_state()
    }

    pub fn transport_state(&self) -> TransportState {
        self.shared.lock().transport.state()
    }

    pub fn is_agent_speaking(&self) -> bool {
        self.shared.lock().machine.agent_speaking()
    }

    pub fn is_user_speaking(&self) -> bool {
        self.shared.lock().machine.user_speaking()
    }

    pub fn session_id(&self) -> Option<String> {
        self.shared.lock().machine.session_id().map(ToString::to_string)
    }

    pub fn instructions(&self) -> String {
        self.shared.lock().machine.instructions().to_string()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock().reconnect.attempts_so_far
    }

    /// Transcript of the current (or most recent) session.
    pub fn transcript(&self) -> Vec<RealtimeMessage> {
        self.shared.lock().transcript.clone()
    }

    /// Gate captured audio. Returns false when no audio is attached.
    pub fn set_mic_enabled(&self, enabled: bool) -> bool {
        match &self.shared.lock().audio {
            Some(audio) => {
                audio.set_mic_enabled(enabled);
                true
            }
            None => false,
        }
    }

    pub fn has_audio(&self) -> bool {
        self.shared.lock().audio.is_some()
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        let mut core = self.shared.lock();
        core.reconnect.disable();
        core.epoch += 1;
        if let Some(shutdown) = core.shutdown.take() {
            let _ = shutdown.send(true);
        }
        core.transport.close();
        if let Some(task) = core.supervisor.take() {
            task.abort();
        }
        // Dropping the pipeline aborts its tasks, which releases the devices.
        core.audio.take();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, core: &Core) {
        let phase = core.machine.phase();
        self.phase_tx.send_if_modified(|current| {
            if *current == phase {
                return false;
            }
            *current = phase;
            true
        });
    }

    fn emit(&self, event: ClientEvent) {
        self.bus.emit(&event);
    }

    async fn connect(self: &Arc<Self>, audio: Option<AudioDevices>) -> Result<()> {
        let endpoint = match self.config.endpoint() {
            Ok(endpoint) => endpoint,
            Err(error) => {
                self.emit(ClientEvent::Error(ErrorEvent::new(
                    ErrorSource::Connect,
                    error.to_string(),
                )));
                return Err(error);
            }
        };

        let (epoch, mut shutdown_rx) = {
            let mut core = self.lock();
            if !core.machine.begin_connect() {
                tracing::warn!(phase = %core.machine.phase(), "Realtime session already connected");
                return Ok(());
            }
            core.epoch += 1;
            core.reconnect = ReconnectState::default();
            core.transcript.clear();
            core.transport.begin_open();
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            core.shutdown = Some(shutdown_tx);
            self.publish(&core);
            (core.epoch, shutdown_rx)
        };

        let pipeline = match audio {
            Some((source, sink)) => {
                let target: Arc<dyn CaptureTarget> = Arc::clone(self) as Arc<dyn CaptureTarget>;
                match AudioPipeline::start(source, sink, &self.config.audio, target) {
                    Ok(pipeline) => Some(pipeline),
                    Err(error) => {
                        self.abandon_connect(epoch);
                        let error = RealtimeError::from(error);
                        self.emit(ClientEvent::Error(ErrorEvent::new(
                            ErrorSource::Connect,
                            error.to_string(),
                        )));
                        return Err(error);
                    }
                }
            }
            None => None,
        };

        tracing::debug!(url = %endpoint.url(), "Opening realtime transport");
        let opened = tokio::select! {
            result = with_timeout(self.config.connect_timeout, self.connector.open(&endpoint)) => result,
            _ = shutdown_rx.changed() => Err(ConnectError::Cancelled),
        };

        let Link { outbound, inbound } = match opened {
            Ok(link) => link,
            Err(ConnectError::Cancelled) => {
                if let Some(pipeline) = pipeline {
                    pipeline.shutdown().await;
                }
                return Err(ConnectError::Cancelled.into());
            }
            Err(error) => {
                tracing::warn!(error = %error, "Realtime connect failed");
                let loss = if error.is_retryable() {
                    LossKind::Transient
                } else {
                    LossKind::AuthRejected
                };
                let (retry, pipeline) = {
                    let mut core = self.lock();
                    if core.epoch != epoch {
                        (None, pipeline)
                    } else {
                        core.transport.open_failed();
                        match self.config.reconnect.next_action(&mut core.reconnect, loss) {
                            decision @ ReconnectDecision::Retry { .. } => {
                                self.attach_audio(&mut core, pipeline);
                                self.publish(&core);
                                (Some(decision), None)
                            }
                            _ => {
                                core.machine.reset();
                                core.shutdown = None;
                                self.publish(&core);
                                (None, pipeline)
                            }
                        }
                    }
                };
                if let Some(pipeline) = pipeline {
                    pipeline.shutdown().await;
                }
                self.emit(ClientEvent::Error(ErrorEvent::new(
                    ErrorSource::Connect,
                    error.to_string(),
                )));

                if let Some(decision) = retry {
                    let shared = Arc::clone(self);
                    let task = tokio::spawn(async move {
                        let inbound = shared.retry(epoch, decision, &mut shutdown_rx).await;
                        if let Some(inbound) = inbound {
                            run_supervisor(shared, epoch, inbound, shutdown_rx).await;
                        }
                    });
                    let mut core = self.lock();
                    if core.epoch == epoch && core.shutdown.is_some() {
                        core.supervisor = Some(task);
                    }
                }
                return Err(error.into());
            }
        };

        let stale = {
            let mut core = self.lock();
            if core.epoch != epoch {
                Some((outbound, pipeline))
            } else {
                self.install(&mut core, outbound, pipeline);
                None
            }
        };
        if let Some((outbound, pipeline)) = stale {
            let _ = outbound.send(Outbound::Close);
            if let Some(pipeline) = pipeline {
                pipeline.shutdown().await;
            }
            return Err(ConnectError::Cancelled.into());
        }

        tracing::info!(model = %self.config.model, "Realtime session connected");
        self.emit(ClientEvent::Connected { reconnected: false });

        let mut core = self.lock();
        if core.epoch == epoch {
            core.supervisor = Some(tokio::spawn(run_supervisor(
                Arc::clone(self),
                epoch,
                inbound,
                shutdown_rx,
            )));
        }
        Ok(())
    }

    /// Take over a freshly opened link: send the configuration and wire
    /// received audio to playback.
    fn install(
        &self,
        core: &mut Core,
        outbound: mpsc::UnboundedSender<Outbound>,
        pipeline: Option<AudioPipeline>,
    ) {
        core.transport.opened(outbound);
        core.machine.transport_opened();
        let frame = ClientFrame::session_update(&self.config, core.machine.instructions());
        if let Err(error) = send_frame(&core.transport, &frame) {
            tracing::warn!(error = %error, "Session configuration not sent");
        }
        self.attach_audio(core, pipeline);
        self.publish(core);
    }

    /// Keep the device pipeline for the session and route received audio
    /// to playback.
    fn attach_audio(&self, core: &mut Core, pipeline: Option<AudioPipeline>) {
        let Some(pipeline) = pipeline else {
            return;
        };
        let playback = pipeline.playback_handle();
        core.playback_subscription = Some(self.bus.on(EventKind::AudioBuffer, move |event| {
            if let ClientEvent::AudioBuffer(chunk) = event {
                let _ = playback.send(chunk.clone());
            }
        }));
        core.audio = Some(pipeline);
    }

    /// Undo a connect that never reached the open transport.
    fn abandon_connect(&self, epoch: u64) {
        let mut core = self.lock();
        if core.epoch != epoch {
            return;
        }
        core.transport.open_failed();
        core.machine.reset();
        core.shutdown = None;
        self.publish(&core);
    }

    async fn disconnect(&self) {
        let (audio, supervisor) = {
            let mut core = self.lock();
            if core.machine.phase() == SessionPhase::Disconnected && core.shutdown.is_none() {
                tracing::debug!("Realtime session already disconnected");
                return;
            }
            core.reconnect.disable();
            core.epoch += 1;
            if let Some(shutdown) = core.shutdown.take() {
                let _ = shutdown.send(true);
            }
            core.machine.begin_close();
            self.publish(&core);
            core.transport.close();
            let audio = self.take_audio(&mut core);
            core.machine.reset();
            self.publish(&core);
            (audio, core.supervisor.take())
        };

        if let Some(audio) = audio {
            audio.shutdown().await;
        }
        if let Some(task) = supervisor {
            let _ = task.await;
        }
        tracing::info!("Realtime session disconnected");
        self.emit(ClientEvent::Disconnected {
            reason: DisconnectReason::Requested,
            will_reconnect: false,
        });
    }

    fn take_audio(&self, core: &mut Core) -> Option<AudioPipeline> {
        if let Some(id) = core.playback_subscription.take() {
            self.bus.off(EventKind::AudioBuffer, id);
        }
        core.audio.take()
    }

    fn send_audio(&self, samples: &[f32]) -> std::result::Result<(), SendError> {
        if samples.is_empty() {
            return Ok(());
        }
        let samples = pcm::encode_samples(samples);
        self.send_frames(&[ClientFrame::append_audio(&samples)])
    }

    fn send_frames(&self, frames: &[ClientFrame]) -> std::result::Result<(), SendError> {
        let core = self.lock();
        if let Err(error) = core.machine.ensure_active() {
            let frame = frames.first().map_or("none", ClientFrame::type_name);
            tracing::warn!(error = %error, frame, "Dropping realtime send");
            return Err(error);
        }
        for frame in frames {
            send_frame(&core.transport, frame)?;
        }
        Ok(())
    }

    fn handle_frame(&self, epoch: u64, text: &str) {
        let events = {
            let mut core = self.lock();
            if core.epoch != epoch {
                return;
            }
            let events = match codec::decode(text) {
                Decoded::Event(event) => core.machine.handle(event),
                Decoded::Unrecognized(Unrecognized::UnknownType(event_type)) => {
                    tracing::debug!(event_type = %event_type, "Ignoring unhandled realtime frame");
                    Vec::new()
                }
                Decoded::Unrecognized(Unrecognized::Malformed(error)) => {
                    tracing::warn!(error = %error, "Dropping malformed realtime frame");
                    vec![ClientEvent::Error(ErrorEvent::new(
                        ErrorSource::Decode,
                        error.to_string(),
                    ))]
                }
            };
            for event in &events {
                if let ClientEvent::Message(message) = event {
                    core.transcript.push(message.clone());
                }
            }
            self.publish(&core);
            events
        };
        for event in &events {
            self.bus.emit(event);
        }
    }

    /// Handle an unexpected close. Returns the new inbound stream after a
    /// successful reconnect, or `None` when the session is over.
    async fn recover(
        &self,
        epoch: u64,
        cause: CloseCause,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Option<mpsc::UnboundedReceiver<Inbound>> {
        let loss = if cause.is_auth_failure() {
            LossKind::AuthRejected
        } else {
            LossKind::Transient
        };
        let decision = {
            let mut core = self.lock();
            if core.epoch != epoch {
                return None;
            }
            core.transport.lost();
            core.machine.transport_lost();
            let decision = self.config.reconnect.next_action(&mut core.reconnect, loss);
            self.publish(&core);
            decision
        };

        tracing::warn!(cause = %cause, "Realtime transport closed unexpectedly");
        self.emit(ClientEvent::Disconnected {
            reason: DisconnectReason::TransportLost {
                code: cause.code,
                reason: cause.reason.clone(),
            },
            will_reconnect: matches!(decision, ReconnectDecision::Retry { .. }),
        });

        self.retry(epoch, decision, shutdown_rx).await
    }

    /// Reconnect attempts, following the policy until a link opens or it
    /// stops.
    async fn retry(
        &self,
        epoch: u64,
        mut decision: ReconnectDecision,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Option<mpsc::UnboundedReceiver<Inbound>> {
        loop {
            let (attempt, delay) = match decision {
                ReconnectDecision::Suppressed => return None,
                ReconnectDecision::GiveUp(reason) => {
                    self.give_up(epoch, reason).await;
                    return None;
                }
                ReconnectDecision::Retry { attempt, delay } => (attempt, delay),
            };

            tracing::info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Scheduling realtime reconnect"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => return None,
            }

            {
                let mut core = self.lock();
                if core.epoch != epoch || !core.reconnect.enabled {
                    return None;
                }
                core.transport.begin_open();
            }

            let opened = match self.config.endpoint() {
                Ok(endpoint) => tokio::select! {
                    result = with_timeout(self.config.connect_timeout, self.connector.open(&endpoint)) => result,
                    _ = shutdown_rx.changed() => return None,
                },
                Err(error) => Err(ConnectError::InvalidEndpoint(error.to_string())),
            };

            match opened {
                Ok(Link { outbound, inbound }) => {
                    {
                        let mut core = self.lock();
                        if core.epoch != epoch || !core.reconnect.enabled {
                            let _ = outbound.send(Outbound::Close);
                            return None;
                        }
                        core.transport.opened(outbound);
                        core.machine.transport_opened();
                        core.reconnect.reset();
                        let frame =
                            ClientFrame::session_update(&self.config, core.machine.instructions());
                        if let Err(error) = send_frame(&core.transport, &frame) {
                            tracing::warn!(error = %error, "Session configuration not resent");
                        }
                        self.publish(&core);
                    }
                    tracing::info!(attempt, "Realtime session reconnected");
                    self.emit(ClientEvent::Connected { reconnected: true });
                    return Some(inbound);
                }
                Err(error) => {
                    tracing::warn!(attempt, error = %error, "Realtime reconnect failed");
                    self.emit(ClientEvent::Error(ErrorEvent::new(
                        ErrorSource::Reconnect,
                        format!("Reconnect attempt {attempt} failed: {error}"),
                    )));
                    let loss = match error.category() {
                        ErrorCategory::Authentication | ErrorCategory::Configuration => {
                            LossKind::AuthRejected
                        }
                        _ => LossKind::Transient,
                    };
                    decision = {
                        let mut core = self.lock();
                        if core.epoch != epoch {
                            return None;
                        }
                        core.transport.open_failed();
                        self.config.reconnect.next_action(&mut core.reconnect, loss)
                    };
                }
            }
        }
    }

    /// Terminal failure: release everything and tell subscribers once.
    async fn give_up(&self, epoch: u64, reason: GiveUpReason) {
        let (audio, attempts) = {
            let mut core = self.lock();
            if core.epoch != epoch {
                return;
            }
            core.reconnect.disable();
            core.transport.lost();
            core.machine.reset();
            core.shutdown = None;
            // Detach; this runs on the supervisor task itself.
            core.supervisor = None;
            let audio = self.take_audio(&mut core);
            self.publish(&core);
            (audio, core.reconnect.attempts_so_far)
        };
        if let Some(audio) = audio {
            audio.shutdown().await;
        }

        let message = match reason {
            GiveUpReason::Exhausted { attempts } => {
                RealtimeError::ReconnectExhausted { attempts }.to_string()
            }
            GiveUpReason::NotRetryable => {
                "Realtime credentials rejected; not reconnecting".to_string()
            }
        };
        tracing::error!(attempts, reason = %message, "Realtime session gave up");
        self.emit(ClientEvent::Error(ErrorEvent::new(
            ErrorSource::Reconnect,
            message.clone(),
        )));
        self.emit(ClientEvent::Disconnected {
            reason: DisconnectReason::GaveUp {
                attempts,
                reason: message,
            },
            will_reconnect: false,
        });
    }
}

impl CaptureTarget for Shared {
    fn is_accepting(&self) -> bool {
        self.lock().machine.phase() == SessionPhase::Active
    }

    fn send_block(&self, samples: &[f32]) -> std::result::Result<(), SendError> {
        self.send_audio(samples)
    }
}

fn send_frame(
    transport: &TransportConnection,
    frame: &ClientFrame,
) -> std::result::Result<(), SendError> {
    let text = codec::encode(frame).map_err(|error| SendError::Encode(error.to_string()))?;
    transport.send(text)
}

/// Inbound dispatch loop for one session. Frames are handled one at a time,
/// in arrival order.
async fn run_supervisor(
    shared: Arc<Shared>,
    epoch: u64,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let cause = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => return,
            message = inbound.recv() => match message {
                Some(Inbound::Frame(text)) => {
                    shared.handle_frame(epoch, &text);
                    continue;
                }
                Some(Inbound::Closed(cause)) => cause,
                None => CloseCause::new(None, "Realtime transport dropped"),
            },
        };

        match shared.recover(epoch, cause, &mut shutdown_rx).await {
            Some(next) => inbound = next,
            None => return,
        }
    }
}
