//! In-process load balancer.
//!
//! Dispatches each request to one of a dynamically changing set of backend
//! [`Provider`]s. Three subsystems compose to do this safely under
//! concurrent mutation from the request path, a periodic health prober, and
//! per-provider concurrency limits:
//!
//! - [`registry`] — bounded provider membership with add/remove and
//!   snapshot-then-events subscription.
//! - [`heartbeat`] + [`limiter`] — the two independent feedback loops that
//!   exclude and re-admit providers from the eligible set.
//! - [`balancer`] — the Dispatch Core that owns the eligible set and
//!   exposes [`balancer::Balancer::get`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use dispatch_balancer::balancer::{Balancer, BalancerConfig};
//! use dispatch_balancer::heartbeat::{AliveAfterRounds, HeartbeatConfig};
//! use dispatch_balancer::limiter::CallLimiter;
//! use dispatch_balancer::registry::{ProviderRegistry, RegistryConfig};
//! use dispatch_balancer::strategy::RoundRobin;
//!
//! # async fn run() {
//! let registry = Arc::new(ProviderRegistry::new(RegistryConfig::default()));
//! let balancer = Balancer::new(
//!     registry,
//!     BalancerConfig {
//!         strategy_factory: Arc::new(|| Box::new(RoundRobin::new())),
//!         heartbeat: HeartbeatConfig {
//!             interval: Duration::from_secs(5),
//!             debounce_factory: AliveAfterRounds::factory(2),
//!         },
//!         limiter_factory: Arc::new(|| CallLimiter::new(16)),
//!     },
//! );
//! balancer.start().await;
//! let _ = balancer.get().await;
//! balancer.stop().await;
//! # }
//! ```

pub mod balancer;
pub mod error;
pub mod heartbeat;
pub mod limiter;
pub mod provider;
pub mod registry;
pub mod strategy;

pub use balancer::{Balancer, BalancerConfig, LimiterFactory, StrategyFactory};
pub use error::{BalancerError, RegistrationError};
pub use heartbeat::{AliveAfterRounds, DebouncePolicy, DebouncePolicyFactory, HeartbeatConfig, HeartbeatStatus};
pub use limiter::{CallLimiter, LimitOutcome, Permit, ReleaseSignal};
pub use provider::{Provider, ProviderError, ProviderId};
pub use registry::{Event, ProviderRegistry, RegistryConfig, Subscription};
pub use strategy::{RoundRobin, SelectionStrategy, UniformRandom};
