//! Host API adapter
//!
//! The [`Adapter`] owns the serial I/O handler, the command registry and the
//! single in-flight [`CommandSequence`]. Requests go out through
//! [`Adapter::send_command`]; frames from the module arrive on the
//! [`InboundHandle`] the transport reader pushes bytes into, are acknowledged,
//! decoded, routed to the in-flight sequence and queued for subscribers.

mod config;
mod subscription;

pub use config::{AdapterConfig, DEFAULT_DISPATCH_CAPACITY, DEFAULT_OPEN_TIMEOUT_MS};
pub use subscription::{SubscriptionHandle, Subscriptions};

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::api::{ApiRequest, Command, CommandFlow, DecodeCommand, SoftReset};
use crate::protocol::io::lock;
use crate::protocol::{
    ByteSink, DataFrame, Frame, FrameKind, FrameType, ProtocolError, SerialIoHandler,
    SerialTransport, StatisticsSnapshot, Transport,
};
use crate::registry::CommandRegistry;
use crate::sequence::{CommandSequence, SequenceState};

/// Upper bound on waiting for the dispatcher to drain when stopping
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of one request exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceOutcome {
    /// `Complete` or `Failed`
    pub state: SequenceState,
    /// Number of transmissions
    pub attempts: u32,
    /// Decoded response, for flows that have one
    pub response: Option<Command>,
    /// Decoded callback, for flows that have one
    pub callback: Option<Command>,
}

impl SequenceOutcome {
    /// Whether the exchange completed
    pub fn is_complete(&self) -> bool {
        self.state == SequenceState::Complete
    }

    /// The response, if it decoded as `T`
    pub fn response_as<T: DecodeCommand>(&self) -> Option<&T> {
        self.response.as_ref().and_then(T::from_command)
    }

    /// The callback, if it decoded as `T`
    pub fn callback_as<T: DecodeCommand>(&self) -> Option<&T> {
        self.callback.as_ref().and_then(T::from_command)
    }
}

enum WaitResult {
    Finished,
    Rejected,
}

struct AdapterInner {
    config: AdapterConfig,
    registry: CommandRegistry,
    io: Arc<SerialIoHandler>,
    subscriptions: Arc<Subscriptions>,
    in_flight: Mutex<Option<CommandSequence>>,
    /// Serializes request exchanges
    exchange: tokio::sync::Mutex<()>,
    rejected: Notify,
    /// NAK/CAN frames that answered a request waiting for its ACK
    rejections: AtomicU64,
    running: AtomicBool,
    dispatch_tx: Mutex<Option<mpsc::Sender<Command>>>,
    /// Last session id handed out, 0 before the first
    session_id: AtomicU8,
}

/// Z-Wave Host API adapter
pub struct Adapter {
    inner: Arc<AdapterInner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Adapter {
    /// Create an adapter over `transport` with the standard command registry
    pub fn new(transport: Box<dyn Transport>, config: AdapterConfig) -> Result<Self, ProtocolError> {
        Self::with_registry(transport, config, CommandRegistry::standard()?)
    }

    /// Create an adapter for the serial port named in `config`
    pub fn serial(config: AdapterConfig) -> Result<Self, ProtocolError> {
        let transport = SerialTransport::new(config.port_name.clone(), config.baud_rate);
        Self::new(Box::new(transport), config)
    }

    /// Create an adapter with a custom command registry
    ///
    /// Fails if `config` does not validate.
    pub fn with_registry(
        transport: Box<dyn Transport>,
        config: AdapterConfig,
        registry: CommandRegistry,
    ) -> Result<Self, ProtocolError> {
        config.validate()?;
        let io = SerialIoHandler::new(transport).with_lock_timeout(config.timeout());
        let inner = AdapterInner {
            config,
            registry,
            io: Arc::new(io),
            subscriptions: Arc::new(Subscriptions::new()),
            in_flight: Mutex::new(None),
            exchange: tokio::sync::Mutex::new(()),
            rejected: Notify::new(),
            rejections: AtomicU64::new(0),
            running: AtomicBool::new(false),
            dispatch_tx: Mutex::new(None),
            session_id: AtomicU8::new(0),
        };
        Ok(Self {
            inner: Arc::new(inner),
            dispatcher: Mutex::new(None),
        })
    }

    /// Settings the adapter was created with
    pub fn config(&self) -> &AdapterConfig {
        &self.inner.config
    }

    /// Commands the adapter can send and decode
    pub fn registry(&self) -> &CommandRegistry {
        &self.inner.registry
    }

    /// Open the port and start dispatching inbound commands
    ///
    /// Returns `Ok(false)` if the transport could not be opened.
    pub async fn start(&self) -> Result<bool, ProtocolError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(ProtocolError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::channel(self.inner.config.dispatch_capacity);
        *lock(&self.inner.dispatch_tx) = Some(tx);
        let handle = tokio::spawn(dispatch_loop(rx, self.inner.subscriptions.clone()));
        *lock(&self.dispatcher) = Some(handle);

        let sink: Arc<dyn ByteSink> = Arc::new(self.receiver());
        let opened = self
            .inner
            .io
            .open_port(self.inner.config.open_timeout(), sink);

        match opened {
            Ok(true) => {
                tracing::info!("Z-Wave adapter started");
                Ok(true)
            }
            other => {
                self.shutdown_dispatcher().await;
                self.inner.running.store(false, Ordering::SeqCst);
                other
            }
        }
    }

    /// Stop dispatching and close the port
    ///
    /// Returns `Ok(false)` if the adapter was not running.
    pub async fn stop(&self) -> Result<bool, ProtocolError> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }

        let closed = self.inner.io.close_port();
        self.shutdown_dispatcher().await;

        if let Some(sequence) = lock(&self.inner.in_flight).as_mut() {
            tracing::warn!(
                "Adapter stopped with command {:#04X} in flight",
                sequence.command_id()
            );
            sequence.mark_as_failed();
        }

        tracing::info!("Z-Wave adapter stopped");
        closed
    }

    /// Whether the adapter has been started and not stopped
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    async fn shutdown_dispatcher(&self) {
        lock(&self.inner.dispatch_tx).take();
        let handle = lock(&self.dispatcher).take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
                tracing::warn!("Dispatcher did not drain in time - aborting");
                abort.abort();
            }
        }
    }

    /// Send a request and drive its sequence to `Complete` or `Failed`
    ///
    /// A request too large for one frame is rejected before anything is
    /// written. A failed sequence is followed by a Soft Reset if
    /// [`AdapterConfig::soft_reset_on_failure`] is set.
    pub async fn send_command<R>(&self, request: &R) -> Result<SequenceOutcome, ProtocolError>
    where
        R: ApiRequest + ?Sized,
    {
        let frame = request.to_frame()?;
        let command_id = frame.command_id;
        let outcome = self.inner.execute(frame).await?;

        if outcome.state == SequenceState::Failed
            && command_id != SoftReset::COMMAND_ID
            && self.inner.config.soft_reset_on_failure
        {
            tracing::warn!("Command {:#04X} failed - sending soft reset", command_id);
            let reset = match SoftReset.to_frame() {
                Ok(frame) => self.inner.execute(frame).await.map(drop),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = reset {
                tracing::error!("Soft reset failed - {}", e);
            }
        }
        Ok(outcome)
    }

    /// Call `handler` for every inbound `T`
    pub fn subscribe<T, F>(&self, handler: F) -> SubscriptionHandle
    where
        T: DecodeCommand,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.subscriptions.subscribe(handler)
    }

    /// Call `handler` for every inbound `T` accepted by `predicate`
    pub fn subscribe_filtered<T, F, P>(&self, handler: F, predicate: P) -> SubscriptionHandle
    where
        T: DecodeCommand,
        F: Fn(&T) + Send + Sync + 'static,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.inner.subscriptions.subscribe_filtered(handler, predicate)
    }

    /// Remove a subscription; `false` if it was already gone
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.inner.subscriptions.unsubscribe(handle)
    }

    /// Next session id, cycling through 1..=255
    pub fn next_session_id(&self) -> u8 {
        let advance = |id: u8| if id == u8::MAX { 1 } else { id + 1 };
        match self
            .inner
            .session_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| Some(advance(id)))
        {
            Ok(previous) | Err(previous) => advance(previous),
        }
    }

    /// Handle the transport reader pushes received bytes into
    pub fn receiver(&self) -> InboundHandle {
        InboundHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Frames received so far
    pub fn rx_statistics(&self) -> StatisticsSnapshot {
        self.inner.io.rx_statistics().snapshot()
    }

    /// Frames sent so far
    pub fn tx_statistics(&self) -> StatisticsSnapshot {
        self.inner.io.tx_statistics().snapshot()
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            lock(&self.inner.dispatch_tx).take();
            if let Err(e) = self.inner.io.close_port() {
                tracing::warn!("Failed to close port on drop - {}", e);
            }
        }
    }
}

/// Receive side of an [`Adapter`]
///
/// Holds a weak reference, so a transport keeping the handle does not keep
/// the adapter alive.
#[derive(Clone)]
pub struct InboundHandle {
    inner: Weak<AdapterInner>,
}

impl ByteSink for InboundHandle {
    fn on_bytes(&self, bytes: &[u8]) {
        let Some(inner) = self.inner.upgrade() else {
            tracing::debug!("Adapter dropped - ignoring {} bytes", bytes.len());
            return;
        };
        inner
            .io
            .handle_bytes(bytes, |frame| inner.handle_frame(frame));
    }
}

async fn dispatch_loop(mut rx: mpsc::Receiver<Command>, subscriptions: Arc<Subscriptions>) {
    while let Some(command) = rx.recv().await {
        let matched = subscriptions.dispatch(&command);
        tracing::debug!("Dispatched {:?} to {} subscriber(s)", command.kind(), matched);
    }
    tracing::debug!("Dispatcher finished");
}

impl AdapterInner {
    /// Run one request exchange without recovery
    async fn execute(&self, request: DataFrame) -> Result<SequenceOutcome, ProtocolError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ProtocolError::NotRunning);
        }
        let command_id = request.command_id;
        let metadata = self
            .registry
            .metadata(command_id)
            .ok_or(ProtocolError::UnregisteredCommand(command_id))?;

        let _exchange = self.exchange.lock().await;

        let mut sequence =
            CommandSequence::new(request, metadata.flow).with_max_retries(self.config.max_retries);
        let mut completion = sequence.completion();
        *lock(&self.in_flight) = Some(sequence);

        loop {
            let frame = {
                let mut in_flight = lock(&self.in_flight);
                let Some(sequence) = in_flight.as_mut() else {
                    break;
                };
                if sequence.is_complete() || !sequence.can_transmit() {
                    break;
                }
                if let Err(e) = sequence.start() {
                    tracing::warn!("{}", e);
                    break;
                }
                tracing::debug!(
                    "Sending command {:#04X}, attempt {} of {}",
                    command_id,
                    sequence.attempt(),
                    sequence.max_retries()
                );
                Frame::Data(sequence.request().clone())
            };

            // Rejections counted before this transmission belong to earlier ones
            let rejections = self.rejections.load(Ordering::SeqCst);
            let io = self.io.clone();
            match tokio::task::spawn_blocking(move || io.send_frame(&frame)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!("Transmission of command {:#04X} failed - {}", command_id, e);
                }
                Err(e) => tracing::error!("Transmit task for {:#04X} failed - {}", command_id, e),
            }

            let deadline = Instant::now() + self.config.timeout();
            let waited = loop {
                let result = tokio::time::timeout_at(deadline, async {
                    tokio::select! {
                        _ = &mut completion => WaitResult::Finished,
                        _ = self.rejected.notified() => WaitResult::Rejected,
                    }
                })
                .await;
                // A rejection that raced with the ACK, or that answered an
                // earlier transmission, is stale
                let stale = matches!(result, Ok(WaitResult::Rejected))
                    && (self.rejections.load(Ordering::SeqCst) == rejections
                        || lock(&self.in_flight)
                            .as_ref()
                            .map_or(true, |s| s.state() != SequenceState::WaitingForAck));
                if !stale {
                    break result;
                }
            };

            let mut in_flight = lock(&self.in_flight);
            let Some(sequence) = in_flight.as_mut() else {
                break;
            };
            let state = sequence.state();
            match waited {
                Ok(WaitResult::Finished) => break,
                Ok(WaitResult::Rejected) => {
                    tracing::warn!("Command {:#04X} rejected by module - retransmitting", command_id);
                    sequence.retry();
                }
                Err(_) if state.is_terminal() => break,
                Err(_) if state == SequenceState::WaitingForAck => {
                    if !self.config.retry_on_ack_timeout {
                        tracing::warn!("Timed out waiting for ACK of {:#04X}", command_id);
                        break;
                    }
                    tracing::warn!(
                        "Timed out waiting for ACK of {:#04X} on attempt {} - retrying",
                        command_id,
                        sequence.attempt()
                    );
                    sequence.retry();
                }
                Err(_) => {
                    if !self.config.retry_on_response_timeout {
                        tracing::warn!("Command {:#04X} timed out in state {:?}", command_id, state);
                        break;
                    }
                    tracing::warn!(
                        "Command {:#04X} timed out in state {:?} on attempt {} - retrying",
                        command_id,
                        state,
                        sequence.attempt()
                    );
                    sequence.retry();
                }
            }
        }

        let Some(mut sequence) = lock(&self.in_flight).take() else {
            return Err(ProtocolError::NotRunning);
        };
        if !sequence.is_complete() {
            sequence.mark_as_failed();
        }

        let outcome = SequenceOutcome {
            state: sequence.state(),
            attempts: sequence.attempt().min(sequence.max_retries()),
            response: sequence.response().cloned(),
            callback: sequence.callback().cloned(),
        };
        tracing::info!(
            "Command {:#04X} finished as {:?} after {} attempt(s)",
            command_id,
            outcome.state,
            outcome.attempts
        );
        Ok(outcome)
    }

    fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::Ack => self.handle_ack(),
            Frame::Nak => self.handle_rejection(FrameType::Nak),
            Frame::Can => self.handle_rejection(FrameType::Can),
            Frame::Data(data) => self.handle_data_frame(data),
        }
    }

    fn handle_ack(&self) {
        let mut in_flight = lock(&self.in_flight);
        match in_flight.as_mut() {
            Some(sequence) if sequence.state() == SequenceState::WaitingForAck => {
                if let Err(e) = sequence.acknowledge_request() {
                    tracing::warn!("{} - failing command {:#04X}", e, sequence.command_id());
                    sequence.mark_as_failed();
                }
            }
            _ => tracing::warn!("Received unexpected ACK"),
        }
    }

    fn handle_rejection(&self, frame_type: FrameType) {
        tracing::warn!("Received {:?} from module", frame_type);
        if !self.config.retransmit_on_nak {
            return;
        }
        let waiting_for_ack = lock(&self.in_flight)
            .as_ref()
            .is_some_and(|s| s.state() == SequenceState::WaitingForAck);
        if waiting_for_ack {
            self.rejections.fetch_add(1, Ordering::SeqCst);
            self.rejected.notify_one();
        }
    }

    fn handle_data_frame(&self, frame: DataFrame) {
        if let Err(e) = frame.verify() {
            tracing::warn!("Discarding data frame - {}", e);
            self.send_control(Frame::Nak);
            return;
        }
        self.send_control(Frame::Ack);

        let DataFrame {
            kind,
            command_id,
            mut payload,
            ..
        } = frame;

        let Some(metadata) = self.registry.metadata(command_id) else {
            tracing::warn!("{} - discarding", ProtocolError::UnknownCommandId(command_id));
            return;
        };
        let Some(codec) = self.registry.appropriate_decode_codec(metadata, kind) else {
            tracing::warn!(
                "No codec for {:?} frame of command {:#04X} - discarding",
                kind,
                command_id
            );
            return;
        };
        let command = match codec.decode(&mut payload) {
            Some(Ok(command)) => command,
            Some(Err(e)) => {
                tracing::warn!("Failed to decode {} - {}", codec.name, e);
                return;
            }
            None => {
                tracing::warn!("Codec {} cannot decode inbound frames", codec.name);
                return;
            }
        };
        tracing::debug!("Received {:?}", command);

        self.enqueue(command.clone());
        self.route(kind, command_id, metadata.flow, command);
    }

    /// Hand a decoded command to the in-flight sequence it belongs to
    fn route(&self, kind: FrameKind, command_id: u8, flow: CommandFlow, command: Command) {
        let mut in_flight = lock(&self.in_flight);
        let Some(sequence) = in_flight.as_mut() else {
            return;
        };
        if sequence.command_id() != command_id || sequence.is_complete() {
            return;
        }

        let result = match kind {
            FrameKind::Response => sequence.update_response(command),
            FrameKind::Request if flow.has_callback() => sequence.update_callback(command),
            FrameKind::Request => return,
        };
        if let Err(e) = result {
            tracing::warn!("{} - failing command {:#04X}", e, command_id);
            sequence.mark_as_failed();
        }
    }

    fn enqueue(&self, command: Command) {
        let dispatch_tx = lock(&self.dispatch_tx);
        let Some(tx) = dispatch_tx.as_ref() else {
            tracing::debug!("Dispatcher not running - dropping {:?}", command.kind());
            return;
        };
        match tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                self.io.rx_statistics().record_dropped();
                tracing::warn!("Dispatch queue full - dropping {:?}", command.kind());
            }
            Err(TrySendError::Closed(command)) => {
                tracing::debug!("Dispatcher closed - dropping {:?}", command.kind());
            }
        }
    }

    fn send_control(&self, frame: Frame) {
        if let Err(e) = self.io.send_frame(&frame) {
            tracing::error!("Failed to send {:?} - {}", frame.frame_type(), e);
        }
    }
}
