//! Connection state machine.
//!
//! [`ConnectionMachine`] holds every piece of connection bookkeeping and
//! turns events into [`Action`]s for a driver to carry out. It never touches
//! a socket or a timer itself, so every transition can be exercised
//! synchronously.
//!
//! Each socket the machine asks for gets a new generation number. Socket
//! events carry the generation they belong to, and events for anything but
//! the current generation are ignored, so a socket that was replaced by
//! `reconnect()` or abandoned by `disconnect()` can never move the state.

use std::fmt;
use std::time::Duration;

use super::backoff::ReconnectPolicy;
use super::notify::{ERROR_DETAILS, ERROR_MESSAGE};

/// Shown when an attempt-capped policy gives up.
pub const MAX_ATTEMPTS_MESSAGE: &str = "Max reconnection attempts reached";

/// Connection status as shown to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionState {
    /// Text for a small connectivity indicator.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "Live",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Error => "Error",
        }
    }

    /// Whether a manual retry should be offered.
    pub fn can_retry(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Inputs to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Caller asked to connect
    Connect,
    /// Caller asked to disconnect, or the owner went away
    Disconnect,
    /// Caller asked for a forced close-then-connect
    Reconnect,
    /// Socket `generation` finished its handshake
    Opened { generation: u64 },
    /// Socket `generation` reported a transport error
    Failed { generation: u64 },
    /// Socket `generation` closed
    Closed { generation: u64 },
    /// The pending reconnect timer fired
    RetryElapsed,
}

/// Side effects requested by the machine, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Open a new socket tagged with `generation`
    OpenSocket { generation: u64 },
    /// Close the current socket, if any
    CloseSocket,
    /// Fire [`Event::RetryElapsed`] after `delay`
    ScheduleRetry { delay: Duration, attempt: u32 },
    /// Drop the pending reconnect timer
    CancelRetry,
    /// Tell the user the connection is up
    NotifySuccess,
    /// Tell the user something went wrong
    NotifyError {
        message: String,
        details: Option<String>,
    },
}

/// Connection bookkeeping with a single [`apply`](Self::apply) entry point.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    policy: ReconnectPolicy,
    should_reconnect: bool,
    generation: u64,
    socket_active: bool,
    retry_pending: bool,
    attempts: u32,
}

impl ConnectionMachine {
    /// A machine in `disconnected` with auto-reconnect armed or not.
    pub fn new(policy: ReconnectPolicy, should_reconnect: bool) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            should_reconnect,
            generation: 0,
            socket_active: false,
            retry_pending: false,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn should_reconnect(&self) -> bool {
        self.should_reconnect
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    /// Generation of the most recently requested socket.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether events tagged `generation` still matter.
    pub fn is_current(&self, generation: u64) -> bool {
        self.socket_active && generation == self.generation
    }

    /// Feed one event through the machine.
    pub fn apply(&mut self, event: Event) -> Vec<Action> {
        let mut actions = Vec::new();

        match event {
            Event::Connect => {
                self.should_reconnect = true;
                if !self.is_busy() {
                    self.start_attempt(&mut actions);
                }
            }
            Event::Disconnect => {
                self.should_reconnect = false;
                self.attempts = 0;
                self.cancel_retry(&mut actions);
                self.close_socket(&mut actions);
                self.state = ConnectionState::Disconnected;
            }
            Event::Reconnect => {
                self.should_reconnect = true;
                self.attempts = 0;
                self.cancel_retry(&mut actions);
                self.close_socket(&mut actions);
                self.start_attempt(&mut actions);
            }
            Event::Opened { generation } => {
                if self.is_current(generation) && self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Connected;
                    self.attempts = 0;
                    actions.push(Action::NotifySuccess);
                }
            }
            Event::Failed { generation } => {
                if self.is_current(generation) {
                    self.state = ConnectionState::Error;
                    actions.push(Action::NotifyError {
                        message: ERROR_MESSAGE.to_string(),
                        details: Some(ERROR_DETAILS.to_string()),
                    });
                }
            }
            Event::Closed { generation } => {
                if self.is_current(generation) {
                    self.socket_active = false;
                    self.state = ConnectionState::Disconnected;
                    if self.should_reconnect && !self.retry_pending {
                        self.schedule_retry(&mut actions);
                    }
                }
            }
            Event::RetryElapsed => {
                self.retry_pending = false;
                if self.should_reconnect && !self.is_busy() {
                    self.start_attempt(&mut actions);
                }
            }
        }

        actions
    }

    fn is_busy(&self) -> bool {
        matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected)
    }

    fn start_attempt(&mut self, actions: &mut Vec<Action>) {
        self.cancel_retry(actions);
        // A socket that errored but has not reported its close yet
        self.close_socket(actions);

        self.generation += 1;
        self.socket_active = true;
        self.state = ConnectionState::Connecting;
        actions.push(Action::OpenSocket {
            generation: self.generation,
        });
    }

    fn close_socket(&mut self, actions: &mut Vec<Action>) {
        if self.socket_active {
            self.socket_active = false;
            self.generation += 1;
            actions.push(Action::CloseSocket);
        }
    }

    fn cancel_retry(&mut self, actions: &mut Vec<Action>) {
        if self.retry_pending {
            self.retry_pending = false;
            actions.push(Action::CancelRetry);
        }
    }

    fn schedule_retry(&mut self, actions: &mut Vec<Action>) {
        let attempt = self.attempts.saturating_add(1);
        match self.policy.delay_for(attempt) {
            Some(delay) => {
                self.attempts = attempt;
                self.retry_pending = true;
                actions.push(Action::ScheduleRetry { delay, attempt });
            }
            None => {
                self.should_reconnect = false;
                self.state = ConnectionState::Error;
                actions.push(Action::NotifyError {
                    message: MAX_ATTEMPTS_MESSAGE.to_string(),
                    details: None,
                });
            }
        }
    }
}
