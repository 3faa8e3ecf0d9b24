//! Dispatch Core: owns the eligible set, composes the registry, heartbeat
//! controller and per-provider call limiters, and exposes `get()`.
//!
//! The provider mirror and eligible-set strategy live behind a single
//! `tokio::sync::Mutex`, a `CancellationToken` owns every background task,
//! and a dedicated consumer task drains the registry's event stream instead
//! of a callback invoked inline from the mutator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::BalancerError;
use crate::heartbeat::{self, HeartbeatConfig, HeartbeatStatus};
use crate::limiter::{CallLimiter, LimitOutcome};
use crate::provider::{Provider, ProviderId};
use crate::registry::{Event, ProviderRegistry};
use crate::strategy::SelectionStrategy;

/// Builds a fresh [`SelectionStrategy`] for a [`Balancer`] instance.
pub type StrategyFactory = Arc<dyn Fn() -> Box<dyn SelectionStrategy> + Send + Sync>;

/// Builds a fresh [`CallLimiter`] for one provider.
pub type LimiterFactory = Arc<dyn Fn() -> Arc<CallLimiter> + Send + Sync>;

/// Construction-time configuration for a [`Balancer`].
#[derive(Clone)]
pub struct BalancerConfig {
    pub strategy_factory: StrategyFactory,
    pub heartbeat: HeartbeatConfig,
    pub limiter_factory: LimiterFactory,
}

struct ProviderSlot {
    heartbeat_handle: JoinHandle<()>,
    heartbeat_cancel: CancellationToken,
    limiter: Arc<CallLimiter>,
}

struct DispatchState {
    mirror: HashMap<ProviderId, Arc<dyn Provider>>,
    strategy: Box<dyn SelectionStrategy>,
    slots: HashMap<ProviderId, ProviderSlot>,
}

/// The in-process load balancer: selects an eligible provider per `get()`
/// call and routes work to it through that provider's call limiter.
pub struct Balancer {
    registry: Arc<ProviderRegistry>,
    config: BalancerConfig,
    state: Mutex<DispatchState>,
    cancel: CancellationToken,
    started: AtomicBool,
    consumer: Mutex<Option<JoinHandle<()>>>,
    /// Handles for the background tasks spawned by `get()`'s capacity-reject
    /// path (exclude, await `releaseSignal`, re-include). Raced against
    /// `cancel` and drained/joined by `stop()`, the same as heartbeat tasks.
    capacity_waiters: Mutex<Vec<JoinHandle<()>>>,
}

impl Balancer {
    pub fn new(registry: Arc<ProviderRegistry>, config: BalancerConfig) -> Arc<Self> {
        let strategy = (config.strategy_factory)();
        Arc::new(Self {
            registry,
            config,
            state: Mutex::new(DispatchState {
                mirror: HashMap::new(),
                strategy,
                slots: HashMap::new(),
            }),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            consumer: Mutex::new(None),
            capacity_waiters: Mutex::new(Vec::new()),
        })
    }

    /// Subscribes to the registry, admits the initial snapshot, and spawns
    /// the task that drains subsequent registry events. Idempotent: a
    /// second call is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("balancer already started, ignoring duplicate start()");
            return;
        }

        let mut subscription = self.registry.subscribe().await;
        for (id, provider) in subscription.initial.drain() {
            self.admit(id, provider).await;
        }

        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    event = subscription.recv() => {
                        match event {
                            Some(Event::Added(id, provider)) => this.admit(id, provider).await,
                            Some(Event::Removed(id, _provider)) => this.evict(&id).await,
                            None => {
                                debug!("registry event stream closed");
                                break;
                            }
                        }
                    }
                }
            }
        });
        *self.consumer.lock().await = Some(handle);
    }

    /// Cancels the subscription, every heartbeat task, and every pending
    /// capacity-release waiter spawned by `get()`'s reject path. Admitted
    /// `serve()` futures already in flight are not touched — their owning
    /// caller controls that lifetime.
    pub async fn stop(self: &Arc<Self>) {
        self.cancel.cancel();
        if let Some(handle) = self.consumer.lock().await.take() {
            let _ = handle.await;
        }
        let mut state = self.state.lock().await;
        for (_, slot) in state.slots.drain() {
            slot.heartbeat_cancel.cancel();
            let _ = slot.heartbeat_handle.await;
        }
        drop(state);
        for handle in self.capacity_waiters.lock().await.drain(..) {
            let _ = handle.await;
        }
        info!("balancer stopped");
    }

    /// Selects the next eligible provider and dispatches one unit of work to
    /// it: pick under the lock, release the lock, call the provider, release
    /// its limiter permit.
    pub async fn get(self: &Arc<Self>) -> Result<String, BalancerError> {
        let (provider, limiter, id) = {
            let mut state = self.state.lock().await;
            if !state.strategy.has_next() {
                return Err(BalancerError::NoProvidersAvailable);
            }
            let id = state
                .strategy
                .next()
                .expect("has_next() returned true but next() yielded nothing");
            let provider = state.mirror.get(&id).cloned().unwrap_or_else(|| {
                unreachable!(
                    "provider {id} selected by strategy but missing from mirror: invariant violated"
                )
            });
            let limiter = state
                .slots
                .get(&id)
                .map(|slot| slot.limiter.clone())
                .unwrap_or_else(|| {
                    unreachable!("provider {id} selected but has no limiter: invariant violated")
                });
            (provider, limiter, id)
        };

        match limiter.try_acquire() {
            LimitOutcome::Admitted(permit) => {
                let result = provider.serve().await;
                drop(permit);
                result.map_err(|e| BalancerError::ProviderFailure(e.0))
            }
            LimitOutcome::Rejected(signal) => {
                let this = self.clone();
                let cancel = self.cancel.clone();
                let handle = tokio::spawn(async move {
                    this.exclude_for_capacity(&id).await;
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = signal.released() => {}
                    }
                    this.reinclude_after_capacity(&id).await;
                });
                let mut waiters = self.capacity_waiters.lock().await;
                waiters.retain(|h| !h.is_finished());
                waiters.push(handle);
                Err(BalancerError::CapacityLimit)
            }
        }
    }

    async fn admit(self: &Arc<Self>, id: ProviderId, provider: Arc<dyn Provider>) {
        let mut state = self.state.lock().await;
        if state.mirror.contains_key(&id) {
            // Re-admission of an id already present (e.g. duplicate Added
            // replay); nothing to do beyond keeping the existing slot.
            return;
        }
        state.mirror.insert(id.clone(), provider.clone());
        state.strategy.include(id.clone());

        let heartbeat_cancel = self.cancel.child_token();
        let this = self.clone();
        let watched_id = id.clone();
        let handle = heartbeat::spawn_watch(
            provider,
            self.config.heartbeat.clone(),
            move |status| {
                let this = this.clone();
                let id = watched_id.clone();
                async move { this.on_heartbeat_transition(id, status).await }
            },
            heartbeat_cancel.clone(),
        );

        let limiter = (self.config.limiter_factory)();
        state.slots.insert(
            id.clone(),
            ProviderSlot {
                heartbeat_handle: handle,
                heartbeat_cancel,
                limiter,
            },
        );
        debug!(provider_id = %id, "admitted provider");
    }

    async fn evict(self: &Arc<Self>, id: &ProviderId) {
        let slot = {
            let mut state = self.state.lock().await;
            state.strategy.exclude(id);
            state.mirror.remove(id);
            state.slots.remove(id)
        };
        if let Some(slot) = slot {
            slot.heartbeat_cancel.cancel();
            let _ = slot.heartbeat_handle.await;
            debug!(provider_id = %id, "evicted provider");
        }
    }

    async fn on_heartbeat_transition(self: &Arc<Self>, id: ProviderId, status: HeartbeatStatus) {
        let mut state = self.state.lock().await;
        if !state.mirror.contains_key(&id) {
            // Provider was removed while the transition was in flight.
            return;
        }
        match status {
            HeartbeatStatus::Alive => {
                state.strategy.include(id.clone());
                debug!(provider_id = %id, "heartbeat alive: re-included");
            }
            HeartbeatStatus::Dead => {
                state.strategy.exclude(&id);
                debug!(provider_id = %id, "heartbeat dead: excluded");
            }
        }
    }

    async fn exclude_for_capacity(self: &Arc<Self>, id: &ProviderId) {
        let mut state = self.state.lock().await;
        state.strategy.exclude(id);
        debug!(provider_id = %id, "excluded: over capacity");
    }

    async fn reinclude_after_capacity(self: &Arc<Self>, id: &ProviderId) {
        let mut state = self.state.lock().await;
        if state.mirror.contains_key(id) {
            state.strategy.include(id.clone());
            debug!(provider_id = %id, "re-included: capacity returned");
        }
    }
}
