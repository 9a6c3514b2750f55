//! Realtime connection management: a WebSocket client that reports its
//! status, fans messages out to subscribers and reconnects after drops.

mod backoff;
mod connection;
mod message;
mod notify;
mod state;
mod transport;

pub use backoff::{ReconnectPolicy, DEFAULT_RECONNECT_INTERVAL};
pub use connection::{
    MessageCallback, RealtimeConnection, RealtimeConnectionBuilder, DEFAULT_MESSAGE_CAPACITY,
};
pub use message::Message;
pub use notify::{Notifier, TracingNotifier, CONNECTED_MESSAGE, ERROR_DETAILS, ERROR_MESSAGE};
pub use state::{Action, ConnectionMachine, ConnectionState, Event, MAX_ATTEMPTS_MESSAGE};
pub use transport::{Connector, FrameSink, FrameStream, Socket, WsConnector};
