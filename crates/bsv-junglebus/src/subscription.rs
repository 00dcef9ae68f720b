//! Channel subscription manager.
//!
//! A [`JungleBusSubscription`] owns up to three channel handles for one
//! subscription ID:
//!
//! - `query:{id}:{block}`: mined transactions from the current block cursor
//! - `query:{id}:control`: block sync status; `BLOCK_DONE` advances the cursor
//! - `query:{id}:mempool`: unconfirmed transactions
//!
//! Publications are decoded, queued per stream, and delivered to the consumer
//! callbacks from background tasks, so a slow consumer never stalls the
//! transport. When the data channel drops back to `subscribing` after a
//! reconnect, its name is checked against the live cursor and the handle is
//! replaced if it would resume from a stale block.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::backpressure::{BackpressureController, CommandSink};
use crate::channel::{self, ChannelKind};
use crate::client::TransactionFetcher;
use crate::codec::{self, ControlMessage, StatusCode, TransactionRecord};
use crate::error::{ErrorKind, JungleBusError, SubscriptionError};
use crate::handlers::{ActiveStreams, SubscriptionHandlers, TransactionCallback};
use crate::queue::DeliveryQueue;
use crate::transport::{
    ChannelEvent, ChannelState, ChannelSubscription, FlowCommand, Publication, StateChange,
    Transport, TransportError,
};
use crate::types::{Protocol, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_PAUSE_RECHECK_INTERVAL};

/// Per-subscription settings.
#[derive(Clone)]
pub struct SubscriptionOptions {
    /// Encoding of publications on the transport.
    pub protocol: Protocol,
    /// Data queue depth above which the stream is paused.
    pub max_queue_size: usize,
    /// How often a paused stream re-checks its queue depth.
    pub pause_recheck_interval: Duration,
    /// When set, transactions published without a body are hydrated through
    /// this fetcher before delivery. `None` delivers them as published.
    pub fetcher: Option<Arc<dyn TransactionFetcher>>,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            pause_recheck_interval: DEFAULT_PAUSE_RECHECK_INTERVAL,
            fetcher: None,
        }
    }
}

impl fmt::Debug for SubscriptionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionOptions")
            .field("protocol", &self.protocol)
            .field("max_queue_size", &self.max_queue_size)
            .field("pause_recheck_interval", &self.pause_recheck_interval)
            .field("fetcher", &self.fetcher.is_some())
            .finish()
    }
}

type Slot = Option<(Arc<dyn ChannelSubscription>, u64)>;

/// Live channel handles. Each attach gets a new generation so events from a
/// replaced handle can be told apart from the current one.
#[derive(Default)]
struct Handles {
    data: Slot,
    control: Slot,
    mempool: Slot,
    generation: u64,
}

impl Handles {
    fn slot(&mut self, kind: ChannelKind) -> &mut Slot {
        match kind {
            ChannelKind::Data => &mut self.data,
            ChannelKind::Control => &mut self.control,
            ChannelKind::Mempool => &mut self.mempool,
        }
    }
}

struct SubscriptionState {
    transport: Arc<dyn Transport>,
    subscription_id: String,
    protocol: Protocol,
    current_block: AtomicU64,
    handlers: SubscriptionHandlers,
    streams: ActiveStreams,
    handles: Mutex<Handles>,
    data_subscribed: AtomicBool,
    control_subscribed: AtomicBool,
    mempool_subscribed: AtomicBool,
    last_error: Mutex<Option<SubscriptionError>>,
    data_queue: DeliveryQueue<TransactionRecord>,
    status_queue: DeliveryQueue<ControlMessage>,
    mempool_queue: DeliveryQueue<TransactionRecord>,
    backpressure: BackpressureController,
}

/// One consumer's subscription to a JungleBus query.
///
/// Created attached; [`unsubscribe`](Self::unsubscribe) detaches every
/// channel and [`subscribe`](Self::subscribe) re-attaches them. Dropping the
/// subscription detaches it and stops its delivery tasks.
pub struct JungleBusSubscription {
    state: Arc<SubscriptionState>,
}

impl JungleBusSubscription {
    /// Create a subscription and attach the channels implied by `handlers`.
    ///
    /// Fails with [`JungleBusError::Runtime`] outside a tokio runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        subscription_id: impl Into<String>,
        from_block: u64,
        handlers: SubscriptionHandlers,
        options: SubscriptionOptions,
    ) -> Result<Self, JungleBusError> {
        let runtime = Handle::try_current()?;
        let subscription_id = subscription_id.into();
        let streams = handlers.active_streams();

        let state = Arc::new_cyclic(|weak: &Weak<SubscriptionState>| {
            let data_queue = {
                let weak = weak.clone();
                let callback = handlers.on_publish.clone();
                let fetcher = options.fetcher.clone();
                DeliveryQueue::spawn("data", &runtime, move |tx: TransactionRecord| {
                    let kind = ChannelKind::Data;
                    deliver_transaction(weak.clone(), kind, tx, callback.clone(), fetcher.clone())
                })
            };
            let mempool_queue = {
                let weak = weak.clone();
                let callback = handlers.on_mempool.clone();
                let fetcher = options.fetcher.clone();
                DeliveryQueue::spawn("mempool", &runtime, move |tx: TransactionRecord| {
                    let kind = ChannelKind::Mempool;
                    deliver_transaction(weak.clone(), kind, tx, callback.clone(), fetcher.clone())
                })
            };
            let status_queue = {
                let callback = handlers.on_status.clone();
                DeliveryQueue::spawn("status", &runtime, move |msg: ControlMessage| {
                    let callback = callback.clone();
                    async move {
                        if let Some(callback) = callback {
                            callback(msg).await;
                        }
                    }
                })
            };

            let sink: Weak<dyn CommandSink> = weak.clone();
            let backpressure = BackpressureController::new(
                options.max_queue_size,
                options.pause_recheck_interval,
                data_queue.depth(),
                sink,
                runtime.clone(),
            );

            SubscriptionState {
                transport,
                subscription_id,
                protocol: options.protocol,
                current_block: AtomicU64::new(from_block),
                handlers,
                streams,
                handles: Mutex::new(Handles::default()),
                data_subscribed: AtomicBool::new(false),
                control_subscribed: AtomicBool::new(false),
                mempool_subscribed: AtomicBool::new(false),
                last_error: Mutex::new(None),
                data_queue,
                status_queue,
                mempool_queue,
                backpressure,
            }
        });

        let subscription = Self { state };
        subscription.subscribe()?;
        Ok(subscription)
    }

    /// Attach the channels implied by the registered callbacks.
    ///
    /// Any attached channels are detached first, so calling this on a live
    /// subscription re-subscribes from the current block. Records already
    /// received are still delivered.
    pub fn subscribe(&self) -> Result<(), JungleBusError> {
        let state = &self.state;
        if state.detach_all() > 0 {
            info!(subscription_id = %state.subscription_id, "resubscribing");
        }

        if state.streams.mempool {
            state.attach(ChannelKind::Mempool)?;
        }
        if state.streams.control {
            state.attach(ChannelKind::Control)?;
        }
        if state.streams.data {
            state.attach(ChannelKind::Data)?;
        }
        Ok(())
    }

    /// Detach every channel and drop undelivered entries. Idempotent.
    pub fn unsubscribe(&self) {
        let state = &self.state;
        let detached = state.detach_all();
        state.data_queue.clear();
        state.status_queue.clear();
        state.mempool_queue.clear();
        if detached > 0 {
            info!(subscription_id = %state.subscription_id, "unsubscribed");
        }
    }

    /// Subscription ID.
    pub fn subscription_id(&self) -> &str {
        &self.state.subscription_id
    }

    /// The last block that was completely published.
    pub fn current_block(&self) -> u64 {
        self.state.current_block.load(Ordering::SeqCst)
    }

    /// Whether the data stream is paused for backpressure.
    pub fn is_paused(&self) -> bool {
        self.state.backpressure.is_paused()
    }

    /// The most recent error reported on any channel.
    pub fn last_error(&self) -> Option<SubscriptionError> {
        self.state
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the data channel is subscribed.
    pub fn data_subscribed(&self) -> bool {
        self.state.data_subscribed.load(Ordering::SeqCst)
    }

    /// Whether the control channel is subscribed.
    pub fn control_subscribed(&self) -> bool {
        self.state.control_subscribed.load(Ordering::SeqCst)
    }

    /// Whether the mempool channel is subscribed.
    pub fn mempool_subscribed(&self) -> bool {
        self.state.mempool_subscribed.load(Ordering::SeqCst)
    }

    /// Streams this subscription attaches.
    pub fn active_streams(&self) -> ActiveStreams {
        self.state.streams
    }

    /// Name of the attached channel of `kind`, if any.
    pub fn channel(&self, kind: ChannelKind) -> Option<String> {
        self.state
            .handle(kind)
            .map(|handle| handle.channel().to_string())
    }

    /// Undelivered data entries, including one in flight.
    pub fn queue_depth(&self) -> usize {
        self.state.data_queue.len()
    }
}

impl fmt::Debug for JungleBusSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JungleBusSubscription")
            .field("subscription_id", &self.state.subscription_id)
            .field("current_block", &self.current_block())
            .field("streams", &self.state.streams)
            .field("paused", &self.is_paused())
            .finish()
    }
}

impl Drop for JungleBusSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
        self.state.data_queue.close();
        self.state.status_queue.close();
        self.state.mempool_queue.close();
    }
}

impl SubscriptionState {
    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Handles> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, kind: ChannelKind) -> Option<Arc<dyn ChannelSubscription>> {
        self.lock_handles()
            .slot(kind)
            .as_ref()
            .map(|(handle, _)| Arc::clone(handle))
    }

    fn is_current(&self, kind: ChannelKind, generation: u64) -> bool {
        matches!(self.lock_handles().slot(kind), Some((_, g)) if *g == generation)
    }

    fn subscribed_flag(&self, kind: ChannelKind) -> &AtomicBool {
        match kind {
            ChannelKind::Data => &self.data_subscribed,
            ChannelKind::Control => &self.control_subscribed,
            ChannelKind::Mempool => &self.mempool_subscribed,
        }
    }

    fn channel_name(&self, kind: ChannelKind) -> String {
        match kind {
            ChannelKind::Data => {
                let block = self.current_block.load(Ordering::SeqCst);
                channel::data_channel(&self.subscription_id, block)
            }
            ChannelKind::Control => channel::control_channel(&self.subscription_id),
            ChannelKind::Mempool => channel::mempool_channel(&self.subscription_id),
        }
    }

    fn attach(self: &Arc<Self>, kind: ChannelKind) -> Result<(), JungleBusError> {
        let name = self.channel_name(kind);
        let handle = self.transport.new_subscription(&name)?;

        let generation = {
            let mut handles = self.lock_handles();
            handles.generation += 1;
            let generation = handles.generation;
            *handles.slot(kind) = Some((Arc::clone(&handle), generation));
            generation
        };

        let weak = Arc::downgrade(self);
        handle.on(Box::new(move |event: ChannelEvent| {
            if let Some(state) = weak.upgrade() {
                state.on_event(kind, generation, event);
            }
        }));

        if kind == ChannelKind::Data {
            self.backpressure.reset();
        }

        debug!(channel = %name, %kind, "subscribing");
        handle.subscribe()
    }

    /// Detach every stream and cancel the recheck timer. Queued records are
    /// kept. Returns how many handles were attached.
    fn detach_all(&self) -> usize {
        let detached = [ChannelKind::Data, ChannelKind::Mempool, ChannelKind::Control]
            .into_iter()
            .filter(|kind| self.detach(*kind))
            .count();
        self.backpressure.reset();
        detached
    }

    /// Returns `true` if a handle was attached.
    fn detach(&self, kind: ChannelKind) -> bool {
        let Some((handle, _)) = self.lock_handles().slot(kind).take() else {
            return false;
        };

        handle.unsubscribe();
        handle.remove_all_listeners();
        self.transport.remove_subscription(&handle);
        self.subscribed_flag(kind).store(false, Ordering::SeqCst);
        if kind == ChannelKind::Data {
            self.backpressure.reset();
        }
        debug!(channel = %handle.channel(), %kind, "unsubscribed");
        true
    }

    fn on_event(self: &Arc<Self>, kind: ChannelKind, generation: u64, event: ChannelEvent) {
        if !self.is_current(kind, generation) {
            debug!(%kind, "ignoring event from a replaced channel handle");
            return;
        }

        match event {
            ChannelEvent::Publication(publication) => match kind {
                ChannelKind::Data => self.on_data_publication(publication),
                ChannelKind::Control => self.on_control_publication(publication),
                ChannelKind::Mempool => self.on_mempool_publication(publication),
            },
            ChannelEvent::Subscribed { channel } => {
                debug!(%channel, "subscribed");
                self.subscribed_flag(kind).store(true, Ordering::SeqCst);
            }
            ChannelEvent::State(change) => self.on_state_change(kind, change),
            ChannelEvent::Error(error) => self.on_transport_error(error),
        }
    }

    fn on_data_publication(&self, publication: Publication) {
        let tx = match codec::decode_transaction(self.protocol, &publication.data) {
            Ok(tx) => tx,
            Err(e) => {
                let channel = &publication.channel;
                self.report(SubscriptionError::from_error(channel, ErrorKind::Decode, &e));
                return;
            }
        };
        if self.handlers.on_publish.is_none() {
            return;
        }

        let depth = self.data_queue.push(tx);
        if self.backpressure.on_push(depth) && self.handlers.on_status.is_some() {
            self.status_queue.push(ControlMessage::paused());
        }
    }

    fn on_control_publication(&self, publication: Publication) {
        let msg = match codec::decode_control(self.protocol, &publication.data) {
            Ok(msg) => msg,
            Err(e) => {
                let channel = &publication.channel;
                self.report(SubscriptionError::from_error(channel, ErrorKind::Decode, &e));
                return;
            }
        };

        match msg.status_code {
            StatusCode::Error => {
                let message = if msg.message.is_empty() {
                    msg.status.clone()
                } else {
                    msg.message
                };
                self.report(SubscriptionError {
                    channel: publication.channel,
                    kind: ErrorKind::Server,
                    error_type: msg.status,
                    code: StatusCode::Error.as_code(),
                    message,
                });
                return;
            }
            StatusCode::BlockDone => {
                self.current_block.store(u64::from(msg.block), Ordering::SeqCst);
                debug!(
                    subscription_id = %self.subscription_id,
                    block = msg.block,
                    transactions = msg.transactions,
                    "block done"
                );
            }
            _ => {}
        }

        if self.handlers.on_status.is_some() {
            self.status_queue.push(msg);
        }
    }

    fn on_mempool_publication(&self, publication: Publication) {
        let tx = match codec::decode_transaction(self.protocol, &publication.data) {
            Ok(tx) => tx,
            Err(e) => {
                let channel = &publication.channel;
                self.report(SubscriptionError::from_error(channel, ErrorKind::Decode, &e));
                return;
            }
        };
        if self.handlers.on_mempool.is_some() {
            self.mempool_queue.push(tx);
        }
    }

    fn on_state_change(self: &Arc<Self>, kind: ChannelKind, change: StateChange) {
        self.subscribed_flag(kind)
            .store(change.new_state == ChannelState::Subscribed, Ordering::SeqCst);

        let reconnecting = change.old_state == ChannelState::Subscribed
            && change.new_state == ChannelState::Subscribing;
        if kind != ChannelKind::Data || !reconnecting {
            return;
        }

        let Some(cursor) = channel::parse_block_cursor(&change.channel) else {
            return;
        };
        let current = self.current_block.load(Ordering::SeqCst);
        if cursor == current {
            return;
        }

        info!(
            channel = %change.channel,
            from = cursor,
            to = current,
            "data channel reconnecting from a stale block, resubscribing"
        );
        self.detach(ChannelKind::Data);
        if let Err(e) = self.attach(ChannelKind::Data) {
            let channel = self.channel_name(ChannelKind::Data);
            self.report(SubscriptionError::from_error(&channel, ErrorKind::Transport, &e));
        }
    }

    fn on_transport_error(&self, error: TransportError) {
        self.report(SubscriptionError {
            channel: error.channel,
            kind: ErrorKind::Transport,
            error_type: error.error_type,
            code: error.code,
            message: error.message,
        });
    }

    fn report(&self, error: SubscriptionError) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.clone());
        match &self.handlers.on_error {
            Some(on_error) => on_error(error),
            None => warn!(
                subscription_id = %self.subscription_id,
                channel = %error.channel,
                kind = %error.kind,
                "{}",
                error.message
            ),
        }
    }
}

impl CommandSink for SubscriptionState {
    fn send_command(&self, command: FlowCommand) -> Result<(), JungleBusError> {
        let handle = self.handle(ChannelKind::Data).ok_or_else(|| {
            JungleBusError::NotSubscribed(self.channel_name(ChannelKind::Data))
        })?;
        handle.publish(command.to_bytes()?)
    }
}

/// Drain step for the data and mempool queues: hydrate the body if it was
/// not inlined and a fetcher is configured, then hand the record over.
async fn deliver_transaction(
    state: Weak<SubscriptionState>,
    kind: ChannelKind,
    mut tx: TransactionRecord,
    callback: Option<TransactionCallback>,
    fetcher: Option<Arc<dyn TransactionFetcher>>,
) {
    let Some(callback) = callback else {
        return;
    };

    if tx.transaction.is_empty() {
        if let Some(fetcher) = fetcher {
            match fetcher.fetch_transaction(&tx.id).await {
                Ok(bytes) => tx.transaction = codec::encode_hex(&bytes),
                Err(e) => {
                    if let Some(state) = state.upgrade() {
                        let channel = state.channel_name(kind);
                        state.report(SubscriptionError::from_error(&channel, ErrorKind::Fetch, &e));
                    }
                    return;
                }
            }
        }
    }

    callback(tx).await;
}
