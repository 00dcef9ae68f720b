//! Consumer callbacks for subscriptions and connection lifecycle hooks.
//!
//! Every callback is optional. Which streams a subscription attaches is
//! decided from the registered callbacks once, at construction, and captured
//! in [`ActiveStreams`].
//!
//! ```rust
//! use bsv_junglebus::SubscriptionHandlers;
//!
//! let handlers = SubscriptionHandlers::new()
//!     .on_publish(|tx| async move { println!("tx {}", tx.id) })
//!     .on_status(|status| async move { println!("status {:?}", status.status_code) })
//!     .on_error(|err| eprintln!("{err}"));
//! assert!(handlers.active_streams().data);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::codec::{ControlMessage, TransactionRecord};
use crate::error::SubscriptionError;
use crate::transport::ConnectionEvent;

/// Async callback receiving a transaction.
pub type TransactionCallback =
    Arc<dyn Fn(TransactionRecord) -> BoxFuture<'static, ()> + Send + Sync>;

/// Async callback receiving a control status.
pub type StatusCallback = Arc<dyn Fn(ControlMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback receiving subscription errors.
pub type ErrorCallback = Arc<dyn Fn(SubscriptionError) + Send + Sync>;

/// Callback receiving connection lifecycle events.
pub type ConnectionCallback = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// Which of the three streams a subscription attaches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveStreams {
    /// Block-height data channel.
    pub data: bool,
    /// Control channel. Always attached together with `data`.
    pub control: bool,
    /// Mempool channel.
    pub mempool: bool,
}

/// Callbacks for one subscription.
#[derive(Clone, Default)]
pub struct SubscriptionHandlers {
    pub(crate) on_publish: Option<TransactionCallback>,
    pub(crate) on_status: Option<StatusCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
    pub(crate) on_mempool: Option<TransactionCallback>,
}

impl fmt::Debug for SubscriptionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandlers")
            .field("on_publish", &self.on_publish.is_some())
            .field("on_status", &self.on_status.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_mempool", &self.on_mempool.is_some())
            .finish()
    }
}

impl SubscriptionHandlers {
    /// Create an empty handler set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the callback for mined transactions.
    ///
    /// Registering it attaches the data and control channels.
    pub fn on_publish<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TransactionRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_publish = Some(Arc::new(move |tx: TransactionRecord| -> BoxFuture<'static, ()> {
            Box::pin(f(tx))
        }));
        self
    }

    /// Register the callback for control statuses (including the synthesized
    /// paused status). Without it, status messages are dropped.
    pub fn on_status<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ControlMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_status = Some(Arc::new(move |msg: ControlMessage| -> BoxFuture<'static, ()> {
            Box::pin(f(msg))
        }));
        self
    }

    /// Register the error callback.
    pub fn on_error(mut self, f: impl Fn(SubscriptionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Register the callback for mempool transactions.
    ///
    /// Registering it attaches the mempool channel.
    pub fn on_mempool<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TransactionRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_mempool = Some(Arc::new(move |tx: TransactionRecord| -> BoxFuture<'static, ()> {
            Box::pin(f(tx))
        }));
        self
    }

    /// Streams implied by the registered callbacks.
    pub fn active_streams(&self) -> ActiveStreams {
        let publish = self.on_publish.is_some();
        ActiveStreams {
            data: publish,
            control: publish,
            mempool: self.on_mempool.is_some(),
        }
    }
}

/// Connection lifecycle hooks for the [`JungleBus`](crate::JungleBus) facade.
#[derive(Clone, Default)]
pub struct ConnectionHandlers {
    pub(crate) on_connecting: Option<ConnectionCallback>,
    pub(crate) on_connected: Option<ConnectionCallback>,
    pub(crate) on_disconnected: Option<ConnectionCallback>,
    pub(crate) on_error: Option<ConnectionCallback>,
}

impl fmt::Debug for ConnectionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandlers")
            .field("on_connecting", &self.on_connecting.is_some())
            .field("on_connected", &self.on_connected.is_some())
            .field("on_disconnected", &self.on_disconnected.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl ConnectionHandlers {
    /// Create an empty handler set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called while connecting or reconnecting.
    pub fn on_connecting(mut self, f: impl Fn(ConnectionEvent) + Send + Sync + 'static) -> Self {
        self.on_connecting = Some(Arc::new(f));
        self
    }

    /// Called once connected.
    pub fn on_connected(mut self, f: impl Fn(ConnectionEvent) + Send + Sync + 'static) -> Self {
        self.on_connected = Some(Arc::new(f));
        self
    }

    /// Called when the connection closes for good.
    pub fn on_disconnected(mut self, f: impl Fn(ConnectionEvent) + Send + Sync + 'static) -> Self {
        self.on_disconnected = Some(Arc::new(f));
        self
    }

    /// Called on connection-level errors.
    pub fn on_error(mut self, f: impl Fn(ConnectionEvent) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Route an event to its handler, if registered.
    pub fn dispatch(&self, event: ConnectionEvent) {
        let handler = match &event {
            ConnectionEvent::Connecting { .. } => &self.on_connecting,
            ConnectionEvent::Connected { .. } => &self.on_connected,
            ConnectionEvent::Disconnected { .. } => &self.on_disconnected,
            ConnectionEvent::Error { .. } => &self.on_error,
        };
        if let Some(handler) = handler {
            handler(event);
        }
    }
}
