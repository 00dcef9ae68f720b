//! Subscription transport interface.
//!
//! JungleBus delivers publications over a multiplexed pub/sub connection
//! (Centrifuge over WebSocket). This crate does not implement that protocol;
//! it drives any client that can be expressed through [`Transport`] and
//! [`ChannelSubscription`].
//!
//! Implementations must not hold internal locks while invoking listeners:
//! a listener may call back into the same handle (unsubscribe, publish).

use std::sync::Arc;

use serde::Serialize;

use crate::client::TokenProvider;
use crate::error::JungleBusError;

/// Transport-level state of a channel subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Not subscribed, or subscription failed.
    Unsubscribed,
    /// Subscribe request in flight, or retrying after a dropped connection.
    Subscribing,
    /// Receiving publications.
    Subscribed,
}

/// A message published on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    /// Channel the data arrived on.
    pub channel: String,
    /// Raw payload, in the connection's [`Protocol`](crate::Protocol).
    pub data: Vec<u8>,
}

/// A channel moved between states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// Channel name.
    pub channel: String,
    /// State before the transition.
    pub old_state: ChannelState,
    /// State after the transition.
    pub new_state: ChannelState,
}

/// A failure reported by the transport for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// Channel name.
    pub channel: String,
    /// Short error type (e.g. `subscribe`, `publish`).
    pub error_type: String,
    /// Transport error code.
    pub code: u32,
    /// Description.
    pub message: String,
}

/// Events emitted by a [`ChannelSubscription`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Data arrived.
    Publication(Publication),
    /// The subscription became active.
    Subscribed {
        /// Channel name.
        channel: String,
    },
    /// The subscription changed state.
    State(StateChange),
    /// The transport reported an error.
    Error(TransportError),
}

/// Events emitted by the [`Transport`] connection itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Connecting or reconnecting.
    Connecting {
        /// Why the connection is (re)connecting.
        reason: String,
    },
    /// Connected.
    Connected {
        /// Client ID assigned by the server.
        client_id: String,
    },
    /// Disconnected and not retrying.
    Disconnected {
        /// Disconnect code.
        code: u32,
        /// Disconnect reason.
        reason: String,
    },
    /// Connection-level error.
    Error {
        /// Description.
        message: String,
    },
}

/// Listener for channel events.
pub type ChannelListener = Box<dyn Fn(ChannelEvent) + Send + Sync>;

/// Listener for connection events.
pub type ConnectionListener = Box<dyn Fn(ConnectionEvent) + Send + Sync>;

/// Flow-control commands published on the data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum FlowCommand {
    /// Ask the producer to stop emitting.
    Pause,
    /// Ask the producer to resume emitting.
    Start,
}

impl FlowCommand {
    /// JSON payload of the command, e.g. `{"cmd":"pause"}`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, JungleBusError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// One named channel subscription on a transport.
pub trait ChannelSubscription: Send + Sync {
    /// Channel name.
    fn channel(&self) -> &str;

    /// Current transport-level state.
    fn state(&self) -> ChannelState;

    /// Register a listener for this channel's events.
    fn on(&self, listener: ChannelListener);

    /// Start subscribing.
    fn subscribe(&self) -> Result<(), JungleBusError>;

    /// Stop subscribing. Idempotent.
    fn unsubscribe(&self);

    /// Drop every registered listener.
    fn remove_all_listeners(&self);

    /// Publish data to the channel.
    fn publish(&self, data: Vec<u8>) -> Result<(), JungleBusError>;
}

/// A multiplexed pub/sub connection.
pub trait Transport: Send + Sync {
    /// Open the connection to `endpoint`, using `tokens` for (re)authentication.
    fn connect(&self, endpoint: &str, tokens: Arc<dyn TokenProvider>) -> Result<(), JungleBusError>;

    /// Close the connection.
    fn disconnect(&self);

    /// Register a listener for connection lifecycle events.
    fn on_connection_event(&self, listener: ConnectionListener);

    /// Create a subscription to `channel`. It is not active until
    /// [`ChannelSubscription::subscribe`] is called.
    fn new_subscription(
        &self,
        channel: &str,
    ) -> Result<Arc<dyn ChannelSubscription>, JungleBusError>;

    /// Forget a subscription so its channel name can be reused.
    fn remove_subscription(&self, subscription: &Arc<dyn ChannelSubscription>);
}
