#![deny(missing_docs)]

//! # bsv-junglebus
//!
//! JungleBus client for following BSV transactions that match a
//! GorillaPool JungleBus subscription, plus the JungleBus REST API.
//!
//! A subscription attaches up to three channels on a pub/sub transport:
//!
//! - `query:{id}:{block}` for mined transactions, resuming from a block cursor
//! - `query:{id}:control` for block sync status (`BLOCK_DONE` advances the cursor)
//! - `query:{id}:mempool` for unconfirmed transactions
//!
//! Publications are decoded from protobuf or JSON, queued per stream, and
//! delivered to async callbacks in order. When the mined-transaction queue
//! outgrows `max_queue_size`, a pause command is published and a start
//! command follows once the consumer has caught up to half that depth.
//!
//! The WebSocket protocol itself is supplied by the caller through the
//! [`Transport`] trait.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bsv_junglebus::{JungleBus, JungleBusConfig, SubscriptionHandlers, Transport};
//!
//! # async fn example(transport: Arc<dyn Transport>) -> Result<(), bsv_junglebus::JungleBusError> {
//! let junglebus = JungleBus::new(
//!     JungleBusConfig {
//!         token: Some("my-token".to_string()),
//!         ..Default::default()
//!     },
//!     transport,
//! );
//!
//! let tx = junglebus.client().get_transaction("abcdef1234567890").await?;
//! println!("Transaction: {:?}", tx);
//!
//! let _subscription = junglebus
//!     .subscribe(
//!         "my-subscription-id",
//!         800_000,
//!         SubscriptionHandlers::new()
//!             .on_publish(|tx| async move { println!("mined {}", tx.id) })
//!             .on_status(|status| async move { println!("status {:?}", status.status_code) })
//!             .on_mempool(|tx| async move { println!("mempool {}", tx.id) }),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod backpressure;
pub mod channel;
pub mod client;
pub mod codec;
pub mod error;
pub mod handlers;
pub mod junglebus;
pub mod queue;
pub mod subscription;
pub mod transport;
pub mod types;


pub use channel::ChannelKind;
pub use client::{JungleBusClient, TokenProvider, TransactionFetcher};
pub use codec::{ControlMessage, StatusCode, TransactionRecord};
pub use error::{ErrorKind, JungleBusError, SubscriptionError};
pub use handlers::{ActiveStreams, ConnectionHandlers, SubscriptionHandlers};
pub use junglebus::JungleBus;
pub use subscription::{JungleBusSubscription, SubscriptionOptions};
pub use transport::{
    ChannelEvent, ChannelListener, ChannelState, ChannelSubscription, ConnectionEvent,
    ConnectionListener, FlowCommand, Publication, StateChange, Transport, TransportError,
};
pub use types::{AddressInfo, BlockHeader, JungleBusConfig, Protocol, Transaction};
