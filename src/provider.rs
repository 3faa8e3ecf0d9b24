//! The external collaborator this crate dispatches work to.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Opaque, unique-within-a-registry identifier for a provider.
///
/// Immutable for the provider's lifetime; equality and hashing are by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(Arc<str>);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::from(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<T: Into<String>> From<T> for ProviderId {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// A provider-side failure surfaced from `Provider::serve`.
#[derive(Debug, Error, Clone)]
#[error("provider failure: {0}")]
pub struct ProviderError(pub String);

impl ProviderError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Opaque backend resource dispatched to on the request path.
///
/// Both operations are suspendable: `serve` may delay or fail, `check` is a
/// single-shot liveness probe. Implementations must be `Send + Sync` since a
/// single provider may be probed, served, and evicted concurrently.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Handle one unit of work, returning the provider's own identifier on
    /// success (as specified) or a provider-side failure.
    async fn serve(&self) -> Result<String, ProviderError>;

    /// Single-shot liveness probe consumed by the heartbeat controller.
    async fn check(&self) -> bool;
}
