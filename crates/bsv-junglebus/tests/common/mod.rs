//! In-memory transport used by the subscription and facade tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bsv_junglebus::{
    ChannelEvent, ChannelListener, ChannelState, ChannelSubscription, ConnectionEvent,
    ConnectionListener, JungleBusError, Publication, StateChange, TokenProvider, Transport,
    TransportError,
};

type SharedChannelListener = Arc<dyn Fn(ChannelEvent) + Send + Sync>;
type SharedConnectionListener = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// A channel handle that records calls and lets tests inject events.
///
/// Listeners are invoked outside the internal locks so they can call back
/// into the handle.
pub struct MockChannel {
    name: String,
    state: Mutex<ChannelState>,
    listeners: Mutex<Vec<SharedChannelListener>>,
    subscribe_calls: Mutex<usize>,
    unsubscribe_calls: Mutex<usize>,
    published: Mutex<Vec<Vec<u8>>>,
}

impl MockChannel {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(ChannelState::Unsubscribed),
            listeners: Mutex::new(Vec::new()),
            subscribe_calls: Mutex::new(0),
            unsubscribe_calls: Mutex::new(0),
            published: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe_calls(&self) -> usize {
        *self.subscribe_calls.lock().unwrap()
    }

    pub fn unsubscribe_calls(&self) -> usize {
        *self.unsubscribe_calls.lock().unwrap()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Payloads published on this channel, as UTF-8.
    pub fn published(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|data| String::from_utf8_lossy(data).into_owned())
            .collect()
    }

    pub fn emit(&self, event: ChannelEvent) {
        let listeners: Vec<SharedChannelListener> = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener(event.clone());
        }
    }

    pub fn publish_json(&self, json: serde_json::Value) {
        self.publish_raw(json.to_string().into_bytes());
    }

    pub fn publish_raw(&self, data: Vec<u8>) {
        self.emit(ChannelEvent::Publication(Publication {
            channel: self.name.clone(),
            data,
        }));
    }

    /// Simulate a dropped connection: subscribed -> subscribing.
    pub fn reconnecting(&self) {
        self.transition(ChannelState::Subscribing);
    }

    pub fn transition(&self, new_state: ChannelState) {
        let old_state = std::mem::replace(&mut *self.state.lock().unwrap(), new_state);
        self.emit(ChannelEvent::State(StateChange {
            channel: self.name.clone(),
            old_state,
            new_state,
        }));
    }

    pub fn fail(&self, error_type: &str, code: u32, message: &str) {
        self.emit(ChannelEvent::Error(TransportError {
            channel: self.name.clone(),
            error_type: error_type.to_string(),
            code,
            message: message.to_string(),
        }));
    }
}

impl ChannelSubscription for MockChannel {
    fn channel(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    fn on(&self, listener: ChannelListener) {
        self.listeners.lock().unwrap().push(Arc::from(listener));
    }

    fn subscribe(&self) -> Result<(), JungleBusError> {
        *self.subscribe_calls.lock().unwrap() += 1;
        self.transition(ChannelState::Subscribing);
        self.transition(ChannelState::Subscribed);
        self.emit(ChannelEvent::Subscribed {
            channel: self.name.clone(),
        });
        Ok(())
    }

    fn unsubscribe(&self) {
        *self.unsubscribe_calls.lock().unwrap() += 1;
        *self.state.lock().unwrap() = ChannelState::Unsubscribed;
    }

    fn remove_all_listeners(&self) {
        self.listeners.lock().unwrap().clear();
    }

    fn publish(&self, data: Vec<u8>) -> Result<(), JungleBusError> {
        self.published.lock().unwrap().push(data);
        Ok(())
    }
}

/// Records every channel it hands out.
#[derive(Default)]
pub struct MockTransport {
    channels: Mutex<Vec<Arc<MockChannel>>>,
    removed: Mutex<Vec<String>>,
    endpoints: Mutex<Vec<String>>,
    tokens: Mutex<Vec<Option<String>>>,
    disconnects: Mutex<usize>,
    connection_listeners: Mutex<Vec<SharedConnectionListener>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Names of every channel created, in order.
    pub fn created(&self) -> Vec<String> {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Most recently created handle for `name`.
    pub fn channel(&self, name: &str) -> Arc<MockChannel> {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.name() == name)
            .cloned()
            .unwrap_or_else(|| panic!("no channel named {name}"))
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().unwrap().clone()
    }

    pub fn tokens(&self) -> Vec<Option<String>> {
        self.tokens.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        *self.disconnects.lock().unwrap()
    }

    pub fn emit_connection(&self, event: ConnectionEvent) {
        let listeners: Vec<SharedConnectionListener> =
            self.connection_listeners.lock().unwrap().clone();
        for listener in listeners {
            listener(event.clone());
        }
    }
}

impl Transport for MockTransport {
    fn connect(
        &self,
        endpoint: &str,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<(), JungleBusError> {
        self.endpoints.lock().unwrap().push(endpoint.to_string());
        self.tokens.lock().unwrap().push(tokens.token());
        Ok(())
    }

    fn disconnect(&self) {
        *self.disconnects.lock().unwrap() += 1;
    }

    fn on_connection_event(&self, listener: ConnectionListener) {
        self.connection_listeners
            .lock()
            .unwrap()
            .push(Arc::from(listener));
    }

    fn new_subscription(
        &self,
        channel: &str,
    ) -> Result<Arc<dyn ChannelSubscription>, JungleBusError> {
        let handle = MockChannel::new(channel);
        self.channels.lock().unwrap().push(Arc::clone(&handle));
        Ok(handle)
    }

    fn remove_subscription(&self, subscription: &Arc<dyn ChannelSubscription>) {
        self.removed
            .lock()
            .unwrap()
            .push(subscription.channel().to_string());
    }
}
