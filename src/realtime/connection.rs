//! Self-healing realtime connection.
//!
//! A [`RealtimeConnection`] is a handle to a background task that owns the
//! [`ConnectionMachine`], the open socket and the reconnect timer. Handle
//! methods only enqueue commands; the task applies them in order and
//! publishes status and messages through watch and broadcast channels.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::backoff::ReconnectPolicy;
use super::message::Message;
use super::notify::{Notifier, TracingNotifier, CONNECTED_MESSAGE};
use super::state::{Action, ConnectionMachine, ConnectionState, Event};
use super::transport::{Connector, FrameSink, FrameStream, Socket, WsConnector};
use crate::error::{GuardError, Result};

/// Per-instance message callback.
pub type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Default capacity of the subscriber broadcast channel.
pub const DEFAULT_MESSAGE_CAPACITY: usize = 256;

/// Outbound frames buffered per socket before sends are dropped.
const OUTBOUND_CAPACITY: usize = 64;

/// How long a retired socket gets to flush and close before it is aborted.
const SOCKET_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

enum Command {
    Connect,
    Disconnect,
    Reconnect,
    Send(String),
    Shutdown,
}

enum SocketEvent {
    Opened { generation: u64, socket: Socket },
    Failed { generation: u64, reason: String },
    Frame { generation: u64, text: String },
    Closed { generation: u64 },
    RetryElapsed { timer: u64 },
}

/// Builder for [`RealtimeConnection`].
pub struct RealtimeConnectionBuilder {
    url: String,
    policy: ReconnectPolicy,
    auto_connect: bool,
    notifier: Arc<dyn Notifier>,
    connector: Arc<dyn Connector>,
    on_message: Option<MessageCallback>,
    message_capacity: usize,
}

impl RealtimeConnectionBuilder {
    fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: ReconnectPolicy::default(),
            auto_connect: true,
            notifier: Arc::new(TracingNotifier),
            connector: Arc::new(WsConnector),
            on_message: None,
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
        }
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Connect as soon as the connection is spawned (default `true`).
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn on_message<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(callback));
        self
    }

    pub fn message_capacity(mut self, capacity: usize) -> Self {
        self.message_capacity = capacity.max(1);
        self
    }

    /// Validate the URL and start the connection task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> Result<RealtimeConnection> {
        validate_url(&self.url)?;

        let initial = if self.auto_connect {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(initial);
        let (last_message_tx, last_message_rx) = watch::channel(None);
        let (messages_tx, _) = broadcast::channel(self.message_capacity);
        let on_message = Arc::new(RwLock::new(self.on_message));
        let attempts = Arc::new(AtomicU32::new(0));

        if self.auto_connect {
            // The receiver is alive until the task below exits
            let _ = command_tx.send(Command::Connect);
        }

        let driver = Driver {
            url: self.url.clone(),
            machine: ConnectionMachine::new(self.policy, self.auto_connect),
            connector: self.connector,
            notifier: self.notifier,
            on_message: Arc::clone(&on_message),
            status_tx,
            last_message_tx,
            messages_tx: messages_tx.clone(),
            attempts: Arc::clone(&attempts),
            events_tx: event_tx,
            outbound: None,
            connecting: None,
            reader: None,
            writer: None,
            retry: RetryTimer::default(),
        };

        info!(url = %self.url, auto_connect = self.auto_connect, "Realtime connection created");
        let task = tokio::spawn(driver.run(command_rx, event_rx));

        Ok(RealtimeConnection {
            url: self.url,
            commands: command_tx,
            status: status_rx,
            last_message: last_message_rx,
            messages: messages_tx,
            on_message,
            attempts,
            task: Some(task),
        })
    }
}

fn validate_url(url: &str) -> Result<()> {
    let uri: http::Uri = url
        .parse()
        .map_err(|e| GuardError::InvalidArgument(format!("invalid realtime URL {:?}: {}", url, e)))?;

    match uri.scheme_str() {
        Some("ws") | Some("wss") if uri.host().is_some() => Ok(()),
        _ => Err(GuardError::InvalidArgument(format!(
            "realtime URL must be ws:// or wss:// with a host, got {:?}",
            url
        ))),
    }
}

/// Handle to a managed realtime connection.
///
/// Dropping the handle disconnects and stops the background task.
pub struct RealtimeConnection {
    url: String,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionState>,
    last_message: watch::Receiver<Option<Message>>,
    messages: broadcast::Sender<Message>,
    on_message: Arc<RwLock<Option<MessageCallback>>>,
    attempts: Arc<AtomicU32>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeConnection {
    /// Start building a connection to `url`.
    pub fn builder(url: impl Into<String>) -> RealtimeConnectionBuilder {
        RealtimeConnectionBuilder::new(url)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open the connection. Does nothing while connecting or connected.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close the connection and stop reconnecting.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Re-arm auto-reconnect, close any socket and connect again.
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Serialize `payload` and send it if the connection is open.
    ///
    /// Messages are never queued: when the connection is not open the
    /// payload is dropped with a warning.
    pub fn send_message<T: Serialize + ?Sized>(&self, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(text) => self.command(Command::Send(text)),
            Err(err) => warn!(error = %err, "Failed to serialize outbound realtime message; dropping it"),
        }
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    /// Stream of status changes, starting with the current status.
    pub fn status_stream(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.status.clone())
    }

    /// Wait until the status equals `state`.
    pub async fn wait_for(&self, state: ConnectionState) -> Result<()> {
        let mut status = self.status.clone();
        status
            .wait_for(|current| *current == state)
            .await
            .map(|_| ())
            .map_err(|_| GuardError::Transport("realtime connection task stopped".into()))
    }

    /// The most recently received message.
    pub fn last_message(&self) -> Option<Message> {
        self.last_message.borrow().clone()
    }

    /// Receive every message from now on, in arrival order.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.messages.subscribe()
    }

    /// Replace the per-instance message callback.
    pub fn set_on_message(&self, callback: Option<MessageCallback>) {
        *self.on_message.write() = callback;
    }

    /// Reconnect attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Disconnect and wait for the background task to finish.
    pub async fn shutdown(mut self) {
        self.command(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                error!(error = %err, "Realtime connection task failed");
            }
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Realtime connection task already stopped");
        }
    }
}

impl Drop for RealtimeConnection {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Background task state.
struct Driver {
    url: String,
    machine: ConnectionMachine,
    connector: Arc<dyn Connector>,
    notifier: Arc<dyn Notifier>,
    on_message: Arc<RwLock<Option<MessageCallback>>>,
    status_tx: watch::Sender<ConnectionState>,
    last_message_tx: watch::Sender<Option<Message>>,
    messages_tx: broadcast::Sender<Message>,
    attempts: Arc<AtomicU32>,
    events_tx: mpsc::UnboundedSender<SocketEvent>,
    outbound: Option<mpsc::Sender<String>>,
    connecting: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    retry: RetryTimer,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<SocketEvent>,
    ) {
        loop {
            // Commands win over socket and timer events, so a disconnect
            // issued before a timer fired is always seen first.
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Connect) => self.handle(Event::Connect),
                    Some(Command::Disconnect) => self.handle(Event::Disconnect),
                    Some(Command::Reconnect) => self.handle(Event::Reconnect),
                    Some(Command::Send(text)) => self.send(text),
                    Some(Command::Shutdown) | None => {
                        self.handle(Event::Disconnect);
                        break;
                    }
                },
                Some(event) = events.recv() => self.on_socket_event(event),
            }
        }

        info!(url = %self.url, "Realtime connection stopped");
    }

    fn handle(&mut self, event: Event) {
        let actions = self.machine.apply(event);
        for action in actions {
            self.execute(action);
        }
        self.publish_status();
    }

    fn on_socket_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Opened { generation, socket } => {
                if !self.machine.is_current(generation) {
                    debug!(generation = generation, "Discarding socket from a superseded attempt");
                    close_detached(socket.sink);
                    return;
                }

                self.connecting = None;
                let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
                self.outbound = Some(outbound_tx);
                self.writer = Some(tokio::spawn(write_frames(socket.sink, outbound_rx)));
                self.reader = Some(tokio::spawn(read_frames(
                    generation,
                    socket.stream,
                    self.events_tx.clone(),
                )));
                info!(url = %self.url, generation = generation, "Realtime connection open");
                self.handle(Event::Opened { generation });
            }
            SocketEvent::Failed { generation, reason } => {
                if self.machine.is_current(generation) {
                    error!(url = %self.url, generation = generation, error = %reason, "Realtime transport error");
                    self.handle(Event::Failed { generation });
                }
            }
            SocketEvent::Frame { generation, text } => {
                if self.machine.is_current(generation) {
                    self.deliver(&text);
                }
            }
            SocketEvent::Closed { generation } => {
                if self.machine.is_current(generation) {
                    info!(url = %self.url, generation = generation, "Realtime connection closed");
                    self.reader = None;
                    self.retire_writer();
                    self.handle(Event::Closed { generation });
                }
            }
            SocketEvent::RetryElapsed { timer } => {
                if self.retry.fired(timer) {
                    self.handle(Event::RetryElapsed);
                } else {
                    debug!(timer = timer, "Ignoring superseded reconnect timer");
                }
            }
        }
    }

    fn execute(&mut self, action: Action) {
        match action {
            Action::OpenSocket { generation } => self.open_socket(generation),
            Action::CloseSocket => self.close_socket(),
            Action::ScheduleRetry { delay, attempt } => {
                info!(url = %self.url, delay_ms = delay.as_millis() as u64, attempt = attempt, "Scheduling reconnect");
                self.retry.schedule(delay, &self.events_tx);
            }
            Action::CancelRetry => {
                if self.retry.cancel() {
                    debug!("Cancelling pending reconnect");
                }
            }
            Action::NotifySuccess => self.notifier.success(CONNECTED_MESSAGE),
            Action::NotifyError { message, details } => self.notifier.error(&message, details.as_deref()),
        }
    }

    fn open_socket(&mut self, generation: u64) {
        let connection_id = Uuid::new_v4();
        let span = info_span!("realtime_connect", %connection_id, generation = generation);
        let connector = Arc::clone(&self.connector);
        let events = self.events_tx.clone();
        let url = self.url.clone();

        let task = async move {
            info!(url = %url, "Connecting to realtime endpoint");
            match connector.connect(&url).await {
                Ok(socket) => {
                    let _ = events.send(SocketEvent::Opened { generation, socket });
                }
                Err(err) => {
                    // A failed handshake reports an error and then a close
                    let _ = events.send(SocketEvent::Failed {
                        generation,
                        reason: err.to_string(),
                    });
                    let _ = events.send(SocketEvent::Closed { generation });
                }
            }
        };

        if let Some(previous) = self.connecting.replace(tokio::spawn(task.instrument(span))) {
            previous.abort();
        }
    }

    fn close_socket(&mut self) {
        if let Some(connecting) = self.connecting.take() {
            connecting.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.retire_writer();
    }

    /// Let the writer flush and close its socket, aborting it if the peer
    /// does not accept the close in time.
    fn retire_writer(&mut self) {
        self.outbound = None;
        if let Some(writer) = self.writer.take() {
            let abort = writer.abort_handle();
            tokio::spawn(async move {
                if tokio::time::timeout(SOCKET_CLOSE_TIMEOUT, writer).await.is_err() {
                    debug!("Realtime writer did not finish in time; aborting it");
                    abort.abort();
                }
            });
        }
    }

    /// Hand a frame to the socket writer without waiting on the peer.
    fn send(&mut self, text: String) {
        if self.machine.state() != ConnectionState::Connected {
            warn!(state = %self.machine.state(), "Realtime connection not open; dropping outbound message");
            return;
        }

        let Some(outbound) = self.outbound.as_ref() else {
            return;
        };
        match outbound.try_send(text) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(capacity = OUTBOUND_CAPACITY, "Realtime send buffer full; dropping outbound message");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Realtime writer already stopped; dropping outbound message");
            }
        }
    }

    fn deliver(&self, text: &str) {
        let message = match Message::parse(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "Failed to parse realtime message; dropping frame");
                return;
            }
        };

        debug!(kind = %message.kind, "Realtime message received");
        self.last_message_tx.send_replace(Some(message.clone()));

        let callback = self.on_message.read().clone();
        if let Some(callback) = callback {
            callback(&message);
        }

        // No subscribers is fine
        let _ = self.messages_tx.send(message);
    }

    fn publish_status(&self) {
        let next = self.machine.state();
        self.attempts.store(self.machine.attempts(), Ordering::SeqCst);
        self.status_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!(from = %*current, to = %next, "Realtime connection state changed");
            *current = next;
            true
        });
    }
}

/// Forward frames from one socket to the driver until it closes.
async fn read_frames(
    generation: u64,
    mut stream: FrameStream,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(text) => {
                if events.send(SocketEvent::Frame { generation, text }).is_err() {
                    return;
                }
            }
            Err(err) => {
                let _ = events.send(SocketEvent::Failed {
                    generation,
                    reason: err.to_string(),
                });
                break;
            }
        }
    }
    let _ = events.send(SocketEvent::Closed { generation });
}

/// Write queued frames to one socket, then close it once the queue is dropped.
async fn write_frames(mut sink: FrameSink, mut outbound: mpsc::Receiver<String>) {
    while let Some(text) = outbound.recv().await {
        if let Err(err) = sink.send(text).await {
            warn!(error = %err, "Failed to send realtime message");
            break;
        }
    }
    if let Err(err) = sink.close().await {
        debug!(error = %err, "Error while closing realtime socket");
    }
}

/// Close a sink without blocking the driver on the peer.
fn close_detached(mut sink: FrameSink) {
    tokio::spawn(async move {
        match tokio::time::timeout(SOCKET_CLOSE_TIMEOUT, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(error = %err, "Error while closing realtime socket"),
            Err(_) => debug!("Timed out closing realtime socket"),
        }
    });
}

/// The single pending reconnect timer.
///
/// Every scheduled timer gets a new sequence number. A timer that was
/// cancelled or replaced may still deliver its event, so only the event
/// carrying the current number is honored.
#[derive(Default)]
struct RetryTimer {
    sequence: u64,
    pending: Option<JoinHandle<()>>,
}

impl RetryTimer {
    fn schedule(&mut self, delay: Duration, events: &mpsc::UnboundedSender<SocketEvent>) {
        self.cancel();
        self.sequence += 1;

        let timer = self.sequence;
        let events = events.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SocketEvent::RetryElapsed { timer });
        }));
    }

    /// Returns whether a timer was pending.
    fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.abort();
                true
            }
            None => false,
        }
    }

    /// Claim the event from timer `timer`; false for stale timers.
    fn fired(&mut self, timer: u64) -> bool {
        if self.pending.is_some() && timer == self.sequence {
            self.pending = None;
            true
        } else {
            false
        }
    }
}
