//! Bounded provider membership with add/remove and snapshot-then-events
//! subscription.
//!
//! Events fan out through a `tokio::sync::broadcast` channel per subscriber
//! rather than a callback invoked synchronously by the mutator. Registry
//! mutation is serialized behind a single `tokio::sync::Mutex` so that the
//! snapshot captured by `subscribe` and the subscriber's broadcast
//! registration happen atomically with respect to concurrent `register`/
//! `unregister` calls.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{trace, warn};

use crate::error::RegistrationError;
use crate::provider::{Provider, ProviderId};

/// Membership change delivered to subscribers, in registry-mutation order.
#[derive(Clone)]
pub enum Event {
    Added(ProviderId, Arc<dyn Provider>),
    /// Carries the removed provider value so subscribers can detach their
    /// own per-provider state without a second registry lookup.
    Removed(ProviderId, Arc<dyn Provider>),
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Added(id, _) => f.debug_tuple("Added").field(id).finish(),
            Event::Removed(id, _) => f.debug_tuple("Removed").field(id).finish(),
        }
    }
}

/// Construction-time registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Size bound on the membership map.
    pub max_providers: usize,
    /// Per-subscriber broadcast buffer. A subscriber that falls this many
    /// events behind observes a gap (logged, skipped) rather than blocking
    /// the mutator or other subscribers.
    pub event_buffer: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_providers: 64,
            event_buffer: 256,
        }
    }
}

struct Inner {
    providers: HashMap<ProviderId, Arc<dyn Provider>>,
    events: broadcast::Sender<Event>,
}

/// Authoritative, bounded set of registered providers.
pub struct ProviderRegistry {
    max_providers: usize,
    inner: Mutex<Inner>,
}

impl ProviderRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let (events, _rx) = broadcast::channel(config.event_buffer.max(1));
        Self {
            max_providers: config.max_providers,
            inner: Mutex::new(Inner {
                providers: HashMap::new(),
                events,
            }),
        }
    }

    /// Registers `provider` under `id`. Atomically inserts and emits
    /// [`Event::Added`] to all current subscribers before returning.
    pub async fn register(
        &self,
        id: ProviderId,
        provider: Arc<dyn Provider>,
    ) -> Result<(), RegistrationError> {
        let mut inner = self.inner.lock().await;
        if inner.providers.contains_key(&id) {
            return Err(RegistrationError::AlreadyRegistered(id));
        }
        if inner.providers.len() >= self.max_providers {
            return Err(RegistrationError::OutOfLimit(self.max_providers));
        }
        inner.providers.insert(id.clone(), provider.clone());
        if inner.events.send(Event::Added(id.clone(), provider)).is_err() {
            trace!(provider_id = %id, "no subscribers for Added event");
        }
        Ok(())
    }

    /// Removes `id` if present, emitting [`Event::Removed`] with the removed
    /// provider value. Returns whether it existed.
    pub async fn unregister(&self, id: &ProviderId) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.providers.remove(id) {
            Some(provider) => {
                if inner
                    .events
                    .send(Event::Removed(id.clone(), provider))
                    .is_err()
                {
                    trace!(provider_id = %id, "no subscribers for Removed event");
                }
                true
            }
            None => false,
        }
    }

    /// Atomically captures the current mapping as an initial snapshot and
    /// registers for all subsequent events. Events concurrent with this call
    /// are either folded into the snapshot or delivered on the returned
    /// subscription, never both, never neither.
    pub async fn subscribe(&self) -> Subscription {
        let inner = self.inner.lock().await;
        let initial = inner.providers.clone();
        let receiver = inner.events.subscribe();
        Subscription { initial, receiver }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.providers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// A subscriber's view onto the registry: an initial snapshot plus the
/// ongoing event stream. Cancellation is simply dropping this value — the
/// broadcast channel does not need an explicit unsubscribe call.
pub struct Subscription {
    pub initial: HashMap<ProviderId, Arc<dyn Provider>>,
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event, transparently skipping past a lag gap (and
    /// logging it) rather than returning an error to the caller — a slow
    /// consumer should not be handed a registry-level failure for events it
    /// merely fell behind on.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "registry subscriber lagged, skipping ahead");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
