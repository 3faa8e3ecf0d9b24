//! Per-provider call limiter: an admission gate over concurrent in-flight
//! calls, with a release signal that wakes rejected callers once capacity
//! returns.
//!
//! Generations are tracked with a `tokio::sync::watch` counter rather than a
//! single `Notify`/oneshot pair: a `watch` receiver always observes the
//! latest value even if it starts waiting after the sender already advanced
//! past the value it cares about, so a release that happens before a waiter
//! starts polling is never missed.

use parking_lot::Mutex;
use tokio::sync::watch;

/// Admission result of [`CallLimiter::try_acquire`].
pub enum LimitOutcome {
    /// Admitted: holds the [`Permit`] for the duration of the call. Dropping
    /// the permit (on success, failure, or cancellation) releases capacity.
    Admitted(Permit),
    /// Rejected: the limiter is saturated. `ReleaseSignal::released` resolves
    /// once any currently in-flight call completes.
    Rejected(ReleaseSignal),
}

/// Per-provider admission gate. Admits up to `max_calls` concurrent calls.
pub struct CallLimiter {
    max_calls: usize,
    in_flight: Mutex<usize>,
    released: watch::Sender<u64>,
}

impl CallLimiter {
    pub fn new(max_calls: usize) -> std::sync::Arc<Self> {
        assert!(max_calls >= 1, "call limiter requires max_calls >= 1");
        let (released, _) = watch::channel(0);
        std::sync::Arc::new(Self {
            max_calls,
            in_flight: Mutex::new(0),
            released,
        })
    }

    /// Attempts to admit a call. Never suspends.
    pub fn try_acquire(self: &std::sync::Arc<Self>) -> LimitOutcome {
        let mut guard = self.in_flight.lock();
        if *guard < self.max_calls {
            *guard += 1;
            drop(guard);
            LimitOutcome::Admitted(Permit {
                limiter: self.clone(),
            })
        } else {
            let since = *self.released.borrow();
            drop(guard);
            LimitOutcome::Rejected(ReleaseSignal {
                rx: self.released.subscribe(),
                since,
            })
        }
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.lock()
    }

    pub fn saturated(&self) -> bool {
        self.in_flight() >= self.max_calls
    }

    fn release(&self) {
        let mut guard = self.in_flight.lock();
        *guard = guard.saturating_sub(1);
        drop(guard);
        // Unconditionally bump the generation: every completion resolves
        // the current wave's waiters, whether or not they are waiting yet.
        self.released.send_modify(|v| *v = v.wrapping_add(1));
    }
}

/// RAII admission permit. Releasing capacity happens exactly once, on drop,
/// regardless of whether the admitted call succeeded, failed, or was
/// cancelled — this keeps the completion-releases-signal contract intact
/// even if the holder's future is dropped mid-call.
pub struct Permit {
    limiter: std::sync::Arc<CallLimiter>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

/// A future-like waiter for the next capacity release, handed back on
/// rejection so the caller can re-admit the provider once it resolves.
pub struct ReleaseSignal {
    rx: watch::Receiver<u64>,
    since: u64,
}

impl ReleaseSignal {
    /// Resolves once any admitted call completes after this signal was
    /// issued (possibly immediately, if one already has by the time this is
    /// awaited).
    pub async fn released(mut self) {
        loop {
            if *self.rx.borrow_and_update() > self.since {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Limiter dropped; nothing left to wait for.
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_max_calls_then_rejects() {
        let limiter = CallLimiter::new(2);
        let p1 = match limiter.try_acquire() {
            LimitOutcome::Admitted(p) => p,
            _ => panic!("expected admission"),
        };
        let p2 = match limiter.try_acquire() {
            LimitOutcome::Admitted(p) => p,
            _ => panic!("expected admission"),
        };
        assert!(limiter.saturated());
        match limiter.try_acquire() {
            LimitOutcome::Rejected(_) => {}
            _ => panic!("expected rejection once saturated"),
        }
        drop(p1);
        drop(p2);
    }

    #[test]
    fn in_flight_never_exceeds_max_calls() {
        let limiter = CallLimiter::new(3);
        let mut permits = Vec::new();
        for _ in 0..5 {
            match limiter.try_acquire() {
                LimitOutcome::Admitted(p) => permits.push(p),
                LimitOutcome::Rejected(_) => {}
            }
            assert!(limiter.in_flight() <= 3);
        }
        assert_eq!(permits.len(), 3);
    }

    #[tokio::test]
    async fn release_signal_resolves_after_completion() {
        let limiter = CallLimiter::new(1);
        let permit = match limiter.try_acquire() {
            LimitOutcome::Admitted(p) => p,
            _ => panic!("expected admission"),
        };
        let signal = match limiter.try_acquire() {
            LimitOutcome::Rejected(s) => s,
            _ => panic!("expected rejection"),
        };

        let waited = tokio::spawn(signal.released());
        // Give the waiter a chance to start polling before release.
        tokio::task::yield_now().await;
        drop(permit);
        waited.await.expect("release signal task should complete");
    }

    #[tokio::test]
    async fn release_signal_issued_before_wait_is_not_missed() {
        // Reproduces the §9 hazard: a rejection's signal must still resolve
        // even if the release happens before `released()` starts polling.
        let limiter = CallLimiter::new(1);
        let permit = match limiter.try_acquire() {
            LimitOutcome::Admitted(p) => p,
            _ => panic!("expected admission"),
        };
        let signal = match limiter.try_acquire() {
            LimitOutcome::Rejected(s) => s,
            _ => panic!("expected rejection"),
        };

        drop(permit); // release happens first
        signal.released().await; // must still resolve, not hang
    }

    #[tokio::test]
    async fn admission_succeeds_again_after_prior_call_completes() {
        let limiter = CallLimiter::new(1);
        let p1 = match limiter.try_acquire() {
            LimitOutcome::Admitted(p) => p,
            _ => panic!("expected admission"),
        };
        match limiter.try_acquire() {
            LimitOutcome::Rejected(signal) => {
                drop(p1);
                signal.released().await;
            }
            _ => panic!("expected rejection"),
        }
        match limiter.try_acquire() {
            LimitOutcome::Admitted(_) => {}
            LimitOutcome::Rejected(_) => panic!("capacity should have returned"),
        }
    }
}
