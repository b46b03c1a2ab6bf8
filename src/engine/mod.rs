//! SynapseLink protocol engine
//!
//! The engine owns the device, the transport session and the event counter,
//! and runs entirely on the caller's tick: [`ProtocolEngine::poll`] services
//! the broker for a bounded time, decodes each inbound frame, acknowledges
//! it and dispatches it through the [`CommandTable`].
//!
//! ```text
//! Uninitialized --initialize--> Initialized --connect--> Connected
//!       ^                            ^                       |
//!       |                            +---- session lost -----+
//!       +-- network error forces re-initialization ----------+
//! any state --reboot (command or interrupt)--> Halted
//! ```

pub mod counter;
pub mod policy;

pub use counter::EventCounter;
pub use policy::{ReconnectDecision, ReconnectPolicy};

use crate::commands::{CommandContext, CommandError, CommandTable};
use crate::config::LinkConfig;
use crate::device::Device;
use crate::protocol::{
    decode, device_topic, encode, CommandCode, DecodeError, EchoPolicy, Frame, ValidationError,
};
use crate::transport::{
    ClientFactory, ConnectError, Connected, NetworkLink, ServiceError, SessionOptions,
    TransportError, TransportSession,
};
use crate::{lifecycle_span, link_span};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn, Instrument};

/// Engine settings that do not change over its lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Device id, used as both client id and topic
    pub device_id: String,
    pub max_version: u32,
    pub poll_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl EngineSettings {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            max_version: 1,
            poll_timeout: Duration::from_millis(1000),
            handshake_timeout: Duration::from_millis(5000),
        }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self {
            device_id: config.device.id.clone(),
            max_version: config.device.max_version,
            poll_timeout: config.engine.poll_timeout(),
            handshake_timeout: config.engine.handshake_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initialized,
    Connected,
    /// Entered after a reboot; the engine is inert from here on
    Halted,
}

/// Detailed result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Not connected; nothing was attempted
    Disconnected,
    /// Broker serviced; `frames` inbound payloads were handled
    Serviced { frames: usize },
    /// Protocol-level failure; the connection is left as is
    ProtocolError,
    /// Network failure; the session was rebuilt and must be reconnected
    NetworkReset,
    /// Operator interrupt; the device was rebooted
    Interrupted,
    Halted,
}

impl PollOutcome {
    pub fn is_serviced(&self) -> bool {
        matches!(self, PollOutcome::Serviced { .. })
    }
}

/// What dispatch did with one decoded frame
#[derive(Debug)]
pub enum DispatchOutcome {
    /// HELLO, GOODBYE or ACKNOWLEDGE from a peer; logged only
    Observed,
    /// Acknowledged; no handler is registered for the code
    Unhandled,
    /// Acknowledged and executed; `replies` frames were handed to the transport
    Executed { replies: usize },
    /// Acknowledged; the handler was skipped or failed
    Failed(CommandError),
    Halted,
}

pub struct ProtocolEngine<F: ClientFactory, D: Device> {
    settings: EngineSettings,
    topic: String,
    factory: F,
    device: D,
    link: Arc<dyn NetworkLink>,
    table: CommandTable,
    context: CommandContext,
    ids: EventCounter,
    session: Option<TransportSession<F::Client>>,
    halted: bool,
    interrupt: Arc<AtomicBool>,
}

impl<F: ClientFactory, D: Device> ProtocolEngine<F, D> {
    pub fn new(
        settings: EngineSettings,
        factory: F,
        device: D,
        link: Arc<dyn NetworkLink>,
    ) -> Result<Self, ValidationError> {
        let topic = device_topic(&settings.device_id)?;
        let context = CommandContext {
            max_version: settings.max_version,
        };

        Ok(Self {
            settings,
            topic,
            factory,
            device,
            link,
            table: CommandTable::standard(),
            context,
            ids: EventCounter::new(),
            session: None,
            halted: false,
            interrupt: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn state(&self) -> EngineState {
        if self.halted {
            return EngineState::Halted;
        }
        match &self.session {
            None => EngineState::Uninitialized,
            Some(session) if session.connected() => EngineState::Connected,
            Some(_) => EngineState::Initialized,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn network_connected(&self) -> bool {
        self.link.is_up()
    }

    pub fn broker_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.broker_connected())
    }

    /// Both the network link and the broker session are up
    pub fn connected(&self) -> bool {
        self.network_connected() && self.broker_connected()
    }

    /// Id of the most recently consumed event
    pub fn last_event_id(&self) -> u64 {
        self.ids.current()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Flag the next poll treats as an operator interrupt
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Build the transport session
    ///
    /// A no-op when a session exists, unless `force`; a forced rebuild retires
    /// the old session first. Event ids keep counting across rebuilds.
    pub async fn initialize(&mut self, force: bool) -> Result<(), ConnectError> {
        if self.halted {
            return Err(ConnectError::Halted);
        }
        if self.session.is_some() && !force {
            return Ok(());
        }

        let span = lifecycle_span!(phase = "initialize", topic = %self.topic, force);
        async {
            if let Some(mut previous) = self.session.take() {
                previous.disconnect(&mut self.ids).await;
            }

            let last_will = encode::<&str>(CommandCode::GOODBYE, &[], self.ids.next())?;
            let options = SessionOptions {
                client_id: self.settings.device_id.clone(),
                topic: self.topic.clone(),
                last_will: Some(last_will),
            };
            let client = self
                .factory
                .create(&options)
                .map_err(ConnectError::Session)?;

            self.session = Some(
                TransportSession::new(
                    client,
                    self.topic.clone(),
                    Arc::clone(&self.link),
                    self.settings.handshake_timeout,
                )
                .with_flush_timeout(self.settings.poll_timeout),
            );
            info!(topic = %self.topic, "Transport session initialized");
            Ok::<(), ConnectError>(())
        }
        .instrument(span)
        .await
    }

    /// Initialize if needed, then establish the broker session
    pub async fn connect(&mut self, force: bool) -> Result<Connected, ConnectError> {
        if self.halted {
            return Err(ConnectError::Halted);
        }
        self.initialize(force).await?;

        let span = lifecycle_span!(phase = "connect", topic = %self.topic);
        let ids = &mut self.ids;
        match self.session.as_mut() {
            Some(session) => session.connect(force, ids).instrument(span).await,
            None => Err(ConnectError::NoNetwork),
        }
    }

    /// Run one bounded tick; `true` only when the broker was serviced cleanly
    pub async fn poll(&mut self) -> bool {
        self.tick().await.is_serviced()
    }

    /// Run one bounded tick and report what happened
    ///
    /// Acknowledgments and replies queued while dispatching are flushed to
    /// the broker before the tick returns.
    pub async fn tick(&mut self) -> PollOutcome {
        if self.halted {
            return PollOutcome::Halted;
        }
        if self.interrupt.swap(false, Ordering::SeqCst) {
            return self.halt_on_interrupt();
        }

        let timeout = self.settings.poll_timeout;
        let result = match self.session.as_mut() {
            Some(session) if session.connected() => session.service(timeout, &mut self.ids).await,
            _ => return PollOutcome::Disconnected,
        };

        match result {
            Ok(frames) => {
                let count = frames.len();
                for raw in frames {
                    if self.halted {
                        break;
                    }
                    self.handle_raw(&raw).await;
                }
                if count > 0 && !self.halted {
                    self.flush_session().await;
                }
                PollOutcome::Serviced { frames: count }
            }
            Err(ServiceError::Protocol(reason)) => {
                warn!(topic = %self.topic, "Protocol error while servicing broker: {}", reason);
                PollOutcome::ProtocolError
            }
            Err(ServiceError::Network(reason)) => {
                warn!(topic = %self.topic, "Network error, rebuilding session: {}", reason);
                if let Err(e) = self.initialize(true).await {
                    error!(topic = %self.topic, "Session rebuild failed: {}", e);
                }
                PollOutcome::NetworkReset
            }
        }
    }

    async fn flush_session(&mut self) {
        if let Some(session) = self.session.as_mut().filter(|s| s.broker_connected()) {
            if let Err(e) = session.flush().await {
                warn!(topic = %self.topic, "Outbound frames not flushed: {}", e);
            }
        }
    }

    async fn handle_raw(&mut self, raw: &str) {
        match decode(raw, EchoPolicy::Suppress) {
            Ok(frame) => {
                self.dispatch(frame).await;
            }
            Err(DecodeError::SelfEcho) => trace!(payload = raw, "Ignoring self-echo"),
            Err(DecodeError::Malformed(reason)) => {
                debug!(payload = raw, "Dropping malformed frame: {}", reason)
            }
        }
    }

    /// Acknowledge and execute one decoded frame
    ///
    /// Failures are logged and reported in the outcome; they never escape.
    pub async fn dispatch(&mut self, frame: Frame) -> DispatchOutcome {
        let span = link_span!(event_id = frame.event_id, command = %frame.command);
        self.dispatch_frame(frame).instrument(span).await
    }

    async fn dispatch_frame(&mut self, frame: Frame) -> DispatchOutcome {
        if self.halted {
            return DispatchOutcome::Halted;
        }
        if frame.command.is_observational() {
            debug!("Peer announced {}", frame.command);
            return DispatchOutcome::Observed;
        }

        // the dispatched command occupies one id before its acknowledgment
        self.ids.advance();
        self.before_command(&frame).await;

        let outcome = if self.table.get(frame.command).is_none() {
            debug!("No handler registered");
            DispatchOutcome::Unhandled
        } else {
            let result = self
                .table
                .execute(&frame, &mut self.device, &self.context);
            match result {
                Ok(output) => {
                    let replies = output.replies.len();
                    for reply in output.replies {
                        if let Err(e) = self.publish_command(reply.command, &reply.parameters).await
                        {
                            warn!(command = %reply.command, "Reply not published: {}", e);
                        }
                    }
                    if output.reboot {
                        self.reboot_device("reboot command");
                    }
                    DispatchOutcome::Executed { replies }
                }
                Err(e) => {
                    warn!(error = %e, "Command failed");
                    DispatchOutcome::Failed(e)
                }
            }
        };

        self.after_command(&frame);
        outcome
    }

    /// Acknowledge every dispatchable frame before it runs
    async fn before_command(&mut self, frame: &Frame) {
        let mut parameters = Vec::with_capacity(frame.parameters.len() + 2);
        parameters.push(frame.command.value().to_string());
        parameters.extend(frame.parameters.iter().cloned());
        parameters.push(frame.event_id.to_string());

        if let Err(e) = self
            .publish_command(CommandCode::ACKNOWLEDGE, &parameters)
            .await
        {
            warn!("Acknowledgment not published: {}", e);
        }
    }

    fn after_command(&self, frame: &Frame) {
        trace!(event_id = frame.event_id, "Command handled");
    }

    /// Publish a self-originated frame with the next event id
    pub async fn publish_command<S: AsRef<str> + Sync>(
        &mut self,
        command: CommandCode,
        parameters: &[S],
    ) -> Result<u64, TransportError> {
        if self.halted {
            return Err(TransportError::NotConnected);
        }
        match self.session.as_mut() {
            Some(session) => session.publish_frame(command, parameters, &mut self.ids).await,
            None => Err(TransportError::NotConnected),
        }
    }

    pub async fn send_heartbeat(&mut self) -> Result<u64, TransportError> {
        self.publish_command::<&str>(CommandCode::HEARTBEAT, &[]).await
    }

    /// Graceful disconnect; a no-op when not connected
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.disconnect(&mut self.ids).await;
        }
    }

    /// Scoped teardown: disconnect, then release the client
    pub async fn shutdown(mut self) {
        let span = lifecycle_span!(phase = "shutdown", topic = %self.topic);
        async {
            self.disconnect().await;
            self.session = None;
            info!(topic = %self.topic, "Engine shut down");
        }
        .instrument(span)
        .await
    }

    fn halt_on_interrupt(&mut self) -> PollOutcome {
        self.reboot_device("operator interrupt");
        PollOutcome::Interrupted
    }

    fn reboot_device(&mut self, reason: &str) {
        warn!(topic = %self.topic, "Rebooting device: {}", reason);
        self.device.reboot();
        self.halted = true;
    }
}
