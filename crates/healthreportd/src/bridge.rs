//! Named-event bridge between the service and its callers.
//!
//! Listeners are registered per event name and receive inbound signals on the
//! dispatching thread. Outbound signals go to in-process listeners and fan out
//! to every transport subscribed via [`LocalBridge::outbound`].

use healthreport_common::BridgeMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Outbound signals buffered per transport receiver when none is configured
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

pub trait EventListener: Send + Sync {
    fn handle_message(&self, event: &str, payload: Option<&str>);
}

pub trait EventBridge: Send + Sync {
    /// Register `listener` for `event` until the subscription is cancelled
    fn subscribe(&self, event: &str, listener: Arc<dyn EventListener>) -> Subscription;

    /// Emit a signal to whoever is on the other side
    fn send_event(&self, event: &str, payload: String);
}

/// Registration handle; cancelling or dropping it unregisters the listener
pub struct Subscription {
    event: String,
    id: u64,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(event: impl Into<String>, id: u64, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            event: event.into(),
            id,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    /// Unregister; later calls do nothing
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
            debug!("Unsubscribed listener {} from {}", self.id, self.event);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

type ListenerMap = HashMap<String, Vec<(u64, Arc<dyn EventListener>)>>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    listeners: RwLock<ListenerMap>,
}

impl Registry {
    fn remove(&self, event: &str, id: u64) {
        if let Ok(mut listeners) = self.listeners.write() {
            if let Some(list) = listeners.get_mut(event) {
                list.retain(|(listener_id, _)| *listener_id != id);
                if list.is_empty() {
                    listeners.remove(event);
                }
            }
        }
    }

    fn listeners_for(&self, event: &str) -> Vec<Arc<dyn EventListener>> {
        self.listeners
            .read()
            .ok()
            .and_then(|listeners| {
                listeners
                    .get(event)
                    .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            })
            .unwrap_or_default()
    }
}

/// In-process bridge
pub struct LocalBridge {
    registry: Arc<Registry>,
    outbound: broadcast::Sender<BridgeMessage>,
}

impl Default for LocalBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBridge {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_OUTBOUND_CAPACITY)
    }

    /// Bridge whose outbound receivers each buffer up to `capacity` unread
    /// signals. A receiver further behind loses the oldest ones.
    pub fn with_capacity(capacity: usize) -> Self {
        let (outbound, _) = broadcast::channel(capacity.max(1));
        Self {
            registry: Arc::new(Registry::default()),
            outbound,
        }
    }

    /// Deliver an inbound signal to its listeners on the calling thread.
    /// Returns how many listeners received it.
    pub fn dispatch(&self, event: &str, payload: Option<&str>) -> usize {
        // Listeners are called outside the registry lock so they may
        // subscribe or unsubscribe while handling.
        let listeners = self.registry.listeners_for(event);
        if listeners.is_empty() {
            debug!("No listener for {}", event);
        }
        for listener in &listeners {
            listener.handle_message(event, payload);
        }
        listeners.len()
    }

    /// Receiver of every outbound signal sent from now on
    pub fn outbound(&self) -> broadcast::Receiver<BridgeMessage> {
        self.outbound.subscribe()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.registry
            .listeners
            .read()
            .map(|l| l.get(event).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl EventBridge for LocalBridge {
    fn subscribe(&self, event: &str, listener: Arc<dyn EventListener>) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::SeqCst);
        match self.registry.listeners.write() {
            Ok(mut listeners) => listeners
                .entry(event.to_string())
                .or_default()
                .push((id, listener)),
            Err(_) => warn!("Listener registry poisoned; {} not registered", event),
        }
        debug!("Subscribed listener {} to {}", id, event);

        let registry: Weak<Registry> = Arc::downgrade(&self.registry);
        let name = event.to_string();
        Subscription::new(event, id, move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(&name, id);
            }
        })
    }

    fn send_event(&self, event: &str, payload: String) {
        self.dispatch(event, Some(&payload));
        if self
            .outbound
            .send(BridgeMessage::new(event, Some(payload)))
            .is_err()
        {
            debug!("No transport connected for {}", event);
        }
    }
}
