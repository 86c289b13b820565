// Telemetry link manager - Independent, self-healing socket channels
use crate::application::frame_codec::{self, ControlKind, SensorFrame};
use crate::application::socket::{SocketConnector, SocketSession};
use crate::domain::telemetry::{
    ChannelKind, ChannelStatus, LoggerStatus, RealtimePoint, TelemetryPoint, WebSocketMessage,
};
use crate::infrastructure::config::{prepare_query, LinkSettings};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Sleep;

const BROADCAST_CAPACITY: usize = 1024;
const IDENTITY_PARAM: &str = "loggerId";

pub const MESSAGE_SENSOR_DATA: &str = "sensor_data";
pub const MESSAGE_RAW: &str = "raw";
pub const MESSAGE_REALTIME_POINT: &str = "realtime_point";
pub const MESSAGE_HISTORY_POINT: &str = "history_point";
pub const MESSAGE_LOGGER_STATUS: &str = "logger_status";

#[derive(Debug, Error, PartialEq)]
pub enum LinkError {
    /// Control frames are never queued for a closed channel.
    #[error("{0} channel is not connected")]
    NotConnected(ChannelKind),

    #[error("{0} channel worker has stopped")]
    WorkerStopped(ChannelKind),
}

/// Linear backoff: attempt `n` waits `n * base_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl From<&LinkSettings> for ReconnectPolicy {
    fn from(settings: &LinkSettings) -> Self {
        Self {
            base_delay: settings.base_delay(),
            max_attempts: settings.max_attempts,
        }
    }
}

/// Everything a channel remembers between connections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelState {
    pub status: ChannelStatus,
    pub attempt: u32,
    pub last_url: Option<String>,
    pub identity: Option<String>,
    /// Set by an explicit disconnect; suppresses reconnection until the next connect.
    pub operator_closed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connect { url: String, identity: Option<String> },
    Opened,
    Closed,
    Disconnect,
    RetryElapsed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelAction {
    Nothing,
    Open { url: String },
    Subscribe { identity: String },
    ScheduleRetry { delay: Duration, attempt: u32 },
    Close,
    GiveUp { attempts: u32 },
}

impl ChannelState {
    /// Advance the channel state machine and return what the worker must do.
    pub fn apply(&mut self, event: ChannelEvent, policy: &ReconnectPolicy) -> ChannelAction {
        match event {
            ChannelEvent::Connect { url, identity } => {
                if self.status != ChannelStatus::Disconnected {
                    return ChannelAction::Nothing;
                }
                self.operator_closed = false;
                self.attempt = 0;
                self.identity = identity;
                self.last_url = Some(url.clone());
                self.status = ChannelStatus::Connecting;
                ChannelAction::Open { url }
            }
            ChannelEvent::Opened => {
                if self.status != ChannelStatus::Connecting {
                    return ChannelAction::Nothing;
                }
                self.status = ChannelStatus::Connected;
                self.attempt = 0;

                let embedded = self.last_url.as_deref().is_some_and(url_embeds_identity);
                match &self.identity {
                    Some(identity) if !embedded => ChannelAction::Subscribe {
                        identity: identity.clone(),
                    },
                    _ => ChannelAction::Nothing,
                }
            }
            ChannelEvent::Closed => {
                if self.status == ChannelStatus::Disconnected {
                    return ChannelAction::Nothing;
                }
                self.status = ChannelStatus::Disconnected;
                if self.operator_closed || self.last_url.is_none() {
                    return ChannelAction::Nothing;
                }
                if self.attempt >= policy.max_attempts {
                    return ChannelAction::GiveUp {
                        attempts: self.attempt,
                    };
                }
                self.attempt += 1;
                ChannelAction::ScheduleRetry {
                    delay: policy.delay_for(self.attempt),
                    attempt: self.attempt,
                }
            }
            ChannelEvent::Disconnect => {
                self.operator_closed = true;
                self.identity = None;
                self.status = ChannelStatus::Disconnected;
                ChannelAction::Close
            }
            ChannelEvent::RetryElapsed => {
                if self.operator_closed || self.status != ChannelStatus::Disconnected {
                    return ChannelAction::Nothing;
                }
                match &self.last_url {
                    Some(url) => {
                        self.status = ChannelStatus::Connecting;
                        ChannelAction::Open { url: url.clone() }
                    }
                    None => ChannelAction::Nothing,
                }
            }
        }
    }
}

/// True when the URL already carries a non-empty `loggerId` query parameter.
pub fn url_embeds_identity(url: &str) -> bool {
    url.split_once('?').is_some_and(|(_, query)| {
        query.split('&').any(|pair| {
            pair.strip_prefix(IDENTITY_PARAM)
                .and_then(|rest| rest.strip_prefix('='))
                .is_some_and(|value| !value.is_empty())
        })
    })
}

enum Command {
    Connect { url: String, identity: Option<String> },
    Disconnect,
    Subscribe { identity: String },
    ChangeIdentity { identity: String },
    Shutdown,
}

/// Fan-out points shared by every channel worker.
struct LinkOutputs {
    messages: broadcast::Sender<WebSocketMessage>,
    realtime: broadcast::Sender<RealtimePoint>,
    history: broadcast::Sender<RealtimePoint>,
    fleet: watch::Sender<Vec<LoggerStatus>>,
    sensor_log: watch::Sender<Vec<TelemetryPoint>>,
}

impl LinkOutputs {
    fn new() -> Self {
        let (messages, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (realtime, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (history, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (fleet, _) = watch::channel(Vec::new());
        let (sensor_log, _) = watch::channel(Vec::new());
        Self {
            messages,
            realtime,
            history,
            fleet,
            sensor_log,
        }
    }

    fn publish(&self, kind: ChannelKind, frame: &str) {
        match kind {
            ChannelKind::Sensor => match frame_codec::classify_sensor_frame(frame) {
                SensorFrame::SensorRecord(point) => {
                    let data = serde_json::to_value(&point).unwrap_or_default();
                    self.sensor_log.send_modify(|log| log.push(point));
                    self.emit(MESSAGE_SENSOR_DATA, data);
                }
                SensorFrame::RawFrame(raw) => {
                    self.emit(MESSAGE_RAW, frame_codec::raw_payload(&raw))
                }
                SensorFrame::Unrecognized => tracing::trace!("Ignored blank sensor frame"),
            },
            ChannelKind::Realtime | ChannelKind::History => {
                let received_at = chrono::Utc::now().timestamp_millis();
                let Some(point) = frame_codec::decode_point_frame(frame, received_at) else {
                    tracing::debug!(channel = %kind, "Dropped undecodable point frame");
                    return;
                };

                let (feed, message_type) = if kind == ChannelKind::Realtime {
                    (&self.realtime, MESSAGE_REALTIME_POINT)
                } else {
                    (&self.history, MESSAGE_HISTORY_POINT)
                };
                let data = serde_json::to_value(&point).unwrap_or_default();
                let _ = feed.send(point);
                self.emit(message_type, data);
            }
            ChannelKind::Status => match frame_codec::decode_status_frame(frame) {
                Some(statuses) => {
                    let data = serde_json::to_value(&statuses).unwrap_or_default();
                    self.fleet.send_replace(statuses);
                    self.emit(MESSAGE_LOGGER_STATUS, data);
                }
                None => tracing::debug!("Ignored non-status frame on status channel"),
            },
        }
    }

    fn emit(&self, kind: &str, data: Value) {
        // No subscribers is fine
        let _ = self.messages.send(WebSocketMessage::new(kind, data));
    }
}

type PendingOpen = Pin<Box<dyn Future<Output = anyhow::Result<SocketSession>> + Send>>;

/// Owns one channel: its state, socket, retry timer and decoder.
struct ChannelWorker {
    kind: ChannelKind,
    state: ChannelState,
    policy: ReconnectPolicy,
    connector: Arc<dyn SocketConnector>,
    operator_closed: Arc<AtomicBool>,
    status: watch::Sender<ChannelStatus>,
    outputs: Arc<LinkOutputs>,
    session: Option<SocketSession>,
    pending_open: Option<PendingOpen>,
    retry: Option<Pin<Box<Sleep>>>,
}

impl ChannelWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                opened = wait_open(&mut self.pending_open), if self.pending_open.is_some() => {
                    self.pending_open = None;
                    match opened {
                        Ok(session) => {
                            tracing::info!(channel = %self.kind, "Telemetry channel connected");
                            self.session = Some(session);
                            self.dispatch(ChannelEvent::Opened);
                        }
                        Err(e) => {
                            tracing::warn!(
                                channel = %self.kind,
                                error = %e,
                                "Telemetry channel failed to open"
                            );
                            self.dispatch(ChannelEvent::Closed);
                        }
                    }
                }
                frame = next_frame(&mut self.session), if self.session.is_some() => match frame {
                    Some(frame) => self.outputs.publish(self.kind, &frame),
                    None => {
                        tracing::info!(channel = %self.kind, "Telemetry channel closed");
                        self.session = None;
                        self.dispatch(ChannelEvent::Closed);
                    }
                },
                _ = wait_retry(&mut self.retry), if self.retry.is_some() => {
                    self.retry = None;
                    self.dispatch(ChannelEvent::RetryElapsed);
                }
            }
        }

        self.session = None;
        self.status.send_replace(ChannelStatus::Disconnected);
        tracing::debug!(channel = %self.kind, "Channel worker stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { url, identity } => {
                self.operator_closed.store(false, Ordering::SeqCst);
                self.dispatch(ChannelEvent::Connect { url, identity });
            }
            Command::Disconnect => self.dispatch(ChannelEvent::Disconnect),
            Command::Subscribe { identity } => {
                self.send_control(ControlKind::Subscribe, &identity);
                self.state.identity = Some(identity);
            }
            Command::ChangeIdentity { identity } => {
                if let Some(previous) = self.state.identity.take() {
                    self.send_control(ControlKind::Unsubscribe, &previous);
                }
                self.send_control(ControlKind::Subscribe, &identity);
                self.state.identity = Some(identity);
            }
            Command::Shutdown => {}
        }
    }

    fn dispatch(&mut self, event: ChannelEvent) {
        if self.operator_closed.load(Ordering::SeqCst) {
            self.state.operator_closed = true;
        }

        let action = self.state.apply(event, &self.policy);
        self.execute(action);

        let status = self.state.status;
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    fn execute(&mut self, action: ChannelAction) {
        match action {
            ChannelAction::Nothing => {}
            ChannelAction::Open { url } => {
                tracing::info!(
                    channel = %self.kind,
                    url = %url,
                    attempt = self.state.attempt,
                    "Opening telemetry channel"
                );
                self.retry = None;
                let connector = self.connector.clone();
                self.pending_open = Some(Box::pin(async move { connector.connect(&url).await }));
            }
            ChannelAction::Subscribe { identity } => {
                self.send_control(ControlKind::Subscribe, &identity);
            }
            ChannelAction::ScheduleRetry { delay, attempt } => {
                tracing::warn!(
                    channel = %self.kind,
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling telemetry channel reconnect"
                );
                self.retry = Some(Box::pin(tokio::time::sleep(delay)));
            }
            ChannelAction::Close => {
                tracing::info!(channel = %self.kind, "Telemetry channel disconnected by operator");
                self.session = None;
                self.pending_open = None;
                self.retry = None;
            }
            ChannelAction::GiveUp { attempts } => {
                tracing::error!(
                    channel = %self.kind,
                    attempts,
                    "Reconnect attempts exhausted, channel stays disconnected until the next connect"
                );
            }
        }
    }

    fn send_control(&self, kind: ControlKind, identity: &str) {
        let Some(session) = &self.session else {
            tracing::warn!(
                channel = %self.kind,
                ?kind,
                "Dropped control frame, channel is not open"
            );
            return;
        };

        match frame_codec::encode_control(kind, identity) {
            Ok(frame) => {
                if session.outgoing.send(frame).is_err() {
                    tracing::warn!(
                        channel = %self.kind,
                        ?kind,
                        "Control frame not sent, socket writer is gone"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode control frame"),
        }
    }
}

async fn wait_open(pending: &mut Option<PendingOpen>) -> anyhow::Result<SocketSession> {
    match pending {
        Some(open) => open.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_frame(session: &mut Option<SocketSession>) -> Option<String> {
    match session {
        Some(session) => session.incoming.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

struct ChannelHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ChannelStatus>,
    operator_closed: Arc<AtomicBool>,
}

/// Owns the sensor, realtime, history and status channels.
///
/// Each channel runs on its own task; consumers only observe the published
/// watch/broadcast outputs.
pub struct TelemetryLinkManager {
    settings: LinkSettings,
    channels: HashMap<ChannelKind, ChannelHandle>,
    outputs: Arc<LinkOutputs>,
}

impl TelemetryLinkManager {
    /// Spawn one worker per channel. Must be called from within a tokio runtime.
    pub fn new(settings: LinkSettings, connector: Arc<dyn SocketConnector>) -> Self {
        let policy = ReconnectPolicy::from(&settings);
        let outputs = Arc::new(LinkOutputs::new());

        let channels = ChannelKind::ALL
            .iter()
            .map(|&kind| {
                let (commands, command_rx) = mpsc::unbounded_channel();
                let (status_tx, status) = watch::channel(ChannelStatus::Disconnected);
                let operator_closed = Arc::new(AtomicBool::new(false));

                let worker = ChannelWorker {
                    kind,
                    state: ChannelState::default(),
                    policy,
                    connector: connector.clone(),
                    operator_closed: operator_closed.clone(),
                    status: status_tx,
                    outputs: outputs.clone(),
                    session: None,
                    pending_open: None,
                    retry: None,
                };
                tokio::spawn(worker.run(command_rx));

                (
                    kind,
                    ChannelHandle {
                        commands,
                        status,
                        operator_closed,
                    },
                )
            })
            .collect();

        Self {
            settings,
            channels,
            outputs,
        }
    }

    /// URL for a channel, with the identity URL-encoded into `${loggerId}`.
    pub fn channel_url(&self, kind: ChannelKind, identity: Option<&str>) -> String {
        let mut vars = HashMap::new();
        vars.insert(
            IDENTITY_PARAM.to_string(),
            identity
                .map(|id| urlencoding::encode(id).into_owned())
                .unwrap_or_default(),
        );
        prepare_query(self.settings.url_template(kind), &vars)
    }

    /// Open a channel. No-op while it is already connecting or connected.
    pub fn connect(&self, kind: ChannelKind, identity: Option<&str>) -> Result<(), LinkError> {
        let url = self.channel_url(kind, identity);
        self.send(
            kind,
            Command::Connect {
                url,
                identity: identity.map(str::to_string),
            },
        )
    }

    /// Close a channel and suppress reconnection until the next `connect`.
    pub fn disconnect(&self, kind: ChannelKind) -> Result<(), LinkError> {
        self.handle(kind).operator_closed.store(true, Ordering::SeqCst);
        self.send(kind, Command::Disconnect)
    }

    pub fn connect_all(&self, identity: Option<&str>) -> Result<(), LinkError> {
        for kind in ChannelKind::ALL {
            self.connect(kind, identity)?;
        }
        Ok(())
    }

    pub fn disconnect_all(&self) -> Result<(), LinkError> {
        for kind in ChannelKind::ALL {
            self.disconnect(kind)?;
        }
        Ok(())
    }

    /// Subscribe the primary channel to a logger.
    pub fn send_logger_id(&self, identity: &str) -> Result<(), LinkError> {
        self.require_connected(ChannelKind::Sensor)?;
        self.send(
            ChannelKind::Sensor,
            Command::Subscribe {
                identity: identity.to_string(),
            },
        )
    }

    /// Unsubscribe the primary channel from its current logger and subscribe to another.
    pub fn change_logger_id(&self, identity: &str) -> Result<(), LinkError> {
        self.require_connected(ChannelKind::Sensor)?;
        self.send(
            ChannelKind::Sensor,
            Command::ChangeIdentity {
                identity: identity.to_string(),
            },
        )
    }

    pub fn status(&self, kind: ChannelKind) -> ChannelStatus {
        *self.handle(kind).status.borrow()
    }

    pub fn subscribe_status(&self, kind: ChannelKind) -> watch::Receiver<ChannelStatus> {
        self.handle(kind).status.clone()
    }

    /// Every decoded message from every channel.
    pub fn messages(&self) -> broadcast::Receiver<WebSocketMessage> {
        self.outputs.messages.subscribe()
    }

    pub fn realtime_points(&self) -> broadcast::Receiver<RealtimePoint> {
        self.outputs.realtime.subscribe()
    }

    pub fn history_points(&self) -> broadcast::Receiver<RealtimePoint> {
        self.outputs.history.subscribe()
    }

    pub fn fleet_status(&self) -> watch::Receiver<Vec<LoggerStatus>> {
        self.outputs.fleet.subscribe()
    }

    /// Running log of sensor records received on the primary channel.
    pub fn sensor_log(&self) -> watch::Receiver<Vec<TelemetryPoint>> {
        self.outputs.sensor_log.subscribe()
    }

    pub fn clear_sensor_log(&self) {
        self.outputs.sensor_log.send_replace(Vec::new());
    }

    /// Close every channel and stop the workers.
    pub fn shutdown(&self) {
        for handle in self.channels.values() {
            handle.operator_closed.store(true, Ordering::SeqCst);
            let _ = handle.commands.send(Command::Shutdown);
        }
    }

    fn require_connected(&self, kind: ChannelKind) -> Result<(), LinkError> {
        if self.status(kind) != ChannelStatus::Connected {
            tracing::warn!(channel = %kind, "Control frame rejected, channel is not connected");
            return Err(LinkError::NotConnected(kind));
        }
        Ok(())
    }

    fn send(&self, kind: ChannelKind, command: Command) -> Result<(), LinkError> {
        self.handle(kind)
            .commands
            .send(command)
            .map_err(|_| LinkError::WorkerStopped(kind))
    }

    fn handle(&self, kind: ChannelKind) -> &ChannelHandle {
        &self.channels[&kind]
    }
}
