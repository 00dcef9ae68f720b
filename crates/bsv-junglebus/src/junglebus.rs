//! High-level entry point tying the REST client to a subscription transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::client::{JungleBusClient, TokenProvider, TransactionFetcher};
use crate::error::JungleBusError;
use crate::handlers::{ConnectionHandlers, SubscriptionHandlers};
use crate::subscription::{JungleBusSubscription, SubscriptionOptions};
use crate::transport::Transport;
use crate::types::JungleBusConfig;

/// JungleBus client with subscriptions.
///
/// ```no_run
/// use std::sync::Arc;
/// use bsv_junglebus::{JungleBus, JungleBusConfig, SubscriptionHandlers, Transport};
///
/// # async fn example(transport: Arc<dyn Transport>) -> Result<(), bsv_junglebus::JungleBusError> {
/// let junglebus = JungleBus::new(JungleBusConfig::default(), transport);
/// let subscription = junglebus
///     .subscribe(
///         "my-subscription-id",
///         800_000,
///         SubscriptionHandlers::new()
///             .on_publish(|tx| async move { println!("{} @ {}", tx.id, tx.block_height) })
///             .on_error(|err| eprintln!("{err}")),
///     )
///     .await?;
/// println!("at block {}", subscription.current_block());
/// # Ok(())
/// # }
/// ```
pub struct JungleBus {
    client: JungleBusClient,
    transport: Arc<dyn Transport>,
    connection_handlers: ConnectionHandlers,
    connected: AtomicBool,
    listening: AtomicBool,
}

impl JungleBus {
    /// Create a facade over `transport` with the given configuration.
    pub fn new(config: JungleBusConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            client: JungleBusClient::new(config),
            transport,
            connection_handlers: ConnectionHandlers::default(),
            connected: AtomicBool::new(false),
            listening: AtomicBool::new(false),
        }
    }

    /// Install connection lifecycle hooks. Must be set before the first connect.
    pub fn with_connection_handlers(mut self, handlers: ConnectionHandlers) -> Self {
        self.connection_handlers = handlers;
        self
    }

    /// The REST client.
    pub fn client(&self) -> &JungleBusClient {
        &self.client
    }

    /// Whether [`connect`](Self::connect) has been called since the last
    /// disconnect.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Open the transport connection. A no-op when already connected.
    pub fn connect(&self) -> Result<(), JungleBusError> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if !self.listening.swap(true, Ordering::SeqCst) {
            let handlers = self.connection_handlers.clone();
            self.transport
                .on_connection_event(Box::new(move |event| handlers.dispatch(event)));
        }

        let endpoint = self.client.config().websocket_url();
        info!(%endpoint, "connecting to JungleBus");
        let tokens: Arc<dyn TokenProvider> = Arc::new(self.client.clone());
        if let Err(e) = self.transport.connect(&endpoint, tokens) {
            self.connected.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// Close the transport connection.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.transport.disconnect();
        }
    }

    /// Subscribe to `subscription_id` starting at `from_block`.
    ///
    /// Without a configured token, an anonymous token for the subscription is
    /// requested first; if that fails the connection is attempted anyway and
    /// auth failures surface through the transport. Unless
    /// [`lite_mode`](JungleBusConfig::lite_mode) is set, transactions published
    /// without a body are fetched before delivery.
    pub async fn subscribe(
        &self,
        subscription_id: &str,
        from_block: u64,
        handlers: SubscriptionHandlers,
    ) -> Result<JungleBusSubscription, JungleBusError> {
        if self.client.token().is_none() {
            if let Err(e) = self.client.get_token_from_subscription(subscription_id).await {
                warn!(subscription_id, error = %e, "could not obtain subscription token");
            }
        }

        self.connect()?;

        let config = self.client.config();
        let fetcher: Option<Arc<dyn TransactionFetcher>> = if config.lite_mode {
            None
        } else {
            Some(Arc::new(self.client.clone()))
        };
        let options = SubscriptionOptions {
            protocol: config.protocol,
            max_queue_size: config.max_queue_size,
            pause_recheck_interval: config.pause_recheck_interval,
            fetcher,
        };

        JungleBusSubscription::new(
            Arc::clone(&self.transport),
            subscription_id,
            from_block,
            handlers,
            options,
        )
    }
}

impl std::fmt::Debug for JungleBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JungleBus")
            .field("client", &self.client)
            .field("connection_handlers", &self.connection_handlers)
            .field("connected", &self.is_connected())
            .finish()
    }
}
