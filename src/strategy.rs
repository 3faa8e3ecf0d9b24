//! Selection strategies over the dispatch core's eligible set.
//!
//! A small synchronous state machine mutated under a single caller-held
//! lock, never suspending itself. The Dispatch Core is the only caller and
//! holds its own mutex around every `next`/`include`/`exclude`, so the
//! strategy itself does not need to be `Sync` internally beyond plain
//! `Send`.

use crate::provider::ProviderId;
use rand::rngs::StdRng;
use rand::Rng;

/// Stateful, mutable-set iterator over the eligible providers.
///
/// Not thread-safe: the Dispatch Core serializes all access behind its own
/// mutex. Implementations must tolerate `include`/`exclude` interleaved with
/// `next` calls from the same caller.
pub trait SelectionStrategy: Send {
    /// True iff the eligible set is non-empty.
    fn has_next(&self) -> bool;

    /// Returns the next provider to dispatch to. Precondition: `has_next()`.
    fn next(&mut self) -> Option<ProviderId>;

    /// Idempotent add. Returns whether the set actually changed.
    fn include(&mut self, id: ProviderId) -> bool;

    /// Idempotent remove. Returns whether the set actually changed.
    fn exclude(&mut self, id: &ProviderId) -> bool;

    /// Current size of the eligible set, for diagnostics/tests.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stable insertion-order round robin. The cursor resets to 0 on any
/// inclusion or exclusion — fairness here is only approximate, not a strict
/// guarantee, so resetting on membership change is acceptable.
#[derive(Debug, Default)]
pub struct RoundRobin {
    members: Vec<ProviderId>,
    cursor: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for RoundRobin {
    fn has_next(&self) -> bool {
        !self.members.is_empty()
    }

    fn next(&mut self) -> Option<ProviderId> {
        if self.members.is_empty() {
            return None;
        }
        let idx = self.cursor % self.members.len();
        self.cursor = self.cursor.wrapping_add(1);
        Some(self.members[idx].clone())
    }

    fn include(&mut self, id: ProviderId) -> bool {
        if self.members.contains(&id) {
            return false;
        }
        self.members.push(id);
        self.cursor = 0;
        true
    }

    fn exclude(&mut self, id: &ProviderId) -> bool {
        if let Some(pos) = self.members.iter().position(|m| m == id) {
            self.members.remove(pos);
            self.cursor = 0;
            true
        } else {
            false
        }
    }

    fn len(&self) -> usize {
        self.members.len()
    }
}

/// Uniform draw from the current eligible set using a caller-supplied,
/// seeded PRNG (deterministic in tests).
pub struct UniformRandom {
    members: Vec<ProviderId>,
    rng: StdRng,
}

impl UniformRandom {
    pub fn new(rng: StdRng) -> Self {
        Self {
            members: Vec::new(),
            rng,
        }
    }
}

impl SelectionStrategy for UniformRandom {
    fn has_next(&self) -> bool {
        !self.members.is_empty()
    }

    fn next(&mut self) -> Option<ProviderId> {
        if self.members.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..self.members.len());
        Some(self.members[idx].clone())
    }

    fn include(&mut self, id: ProviderId) -> bool {
        if self.members.contains(&id) {
            return false;
        }
        self.members.push(id);
        true
    }

    fn exclude(&mut self, id: &ProviderId) -> bool {
        if let Some(pos) = self.members.iter().position(|m| m == id) {
            self.members.remove(pos);
            true
        } else {
            false
        }
    }

    fn len(&self) -> usize {
        self.members.len()
    }
}
