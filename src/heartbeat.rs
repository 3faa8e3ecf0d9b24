//! Heartbeat controller: turns a raw boolean probe stream into debounced
//! Alive/Dead transitions via a periodic loop — `tokio::select!` against a
//! cancellation token, `MissedTickBehavior::Skip` interval.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::provider::Provider;

/// Settled liveness status delivered to the Dispatch Core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    Alive,
    Dead,
}

/// A small state machine converting a boolean probe stream into a settled
/// [`HeartbeatStatus`]. Constructed fresh per `watch` call; private to its
/// own task (never shared between providers or tasks).
pub trait DebouncePolicy: Send {
    fn observe(&mut self, probe: bool) -> HeartbeatStatus;
}

/// Builds a fresh [`DebouncePolicy`] instance per heartbeat task.
pub type DebouncePolicyFactory = Arc<dyn Fn() -> Box<dyn DebouncePolicy> + Send + Sync>;

/// The canonical debounce policy: a provider is considered recovered only
/// after `k` consecutive `true` probes while `Dead`.
pub struct AliveAfterRounds {
    k: u32,
    current: HeartbeatStatus,
    alive_rounds: u32,
}

impl AliveAfterRounds {
    pub fn new(k: u32) -> Self {
        assert!(k >= 1, "aliveAfterRounds requires k >= 1");
        Self {
            k,
            current: HeartbeatStatus::Alive,
            alive_rounds: 0,
        }
    }

    pub fn factory(k: u32) -> DebouncePolicyFactory {
        Arc::new(move || Box::new(AliveAfterRounds::new(k)))
    }
}

impl DebouncePolicy for AliveAfterRounds {
    fn observe(&mut self, probe: bool) -> HeartbeatStatus {
        match (self.current, probe) {
            (HeartbeatStatus::Alive, true) => {}
            (HeartbeatStatus::Alive, false) => {
                self.alive_rounds = 0;
                self.current = HeartbeatStatus::Dead;
            }
            (HeartbeatStatus::Dead, true) => {
                self.alive_rounds += 1;
                if self.alive_rounds >= self.k {
                    self.current = HeartbeatStatus::Alive;
                }
            }
            (HeartbeatStatus::Dead, false) => {
                self.alive_rounds = 0;
            }
        }
        self.current
    }
}

/// Configuration shared by every provider's heartbeat task.
#[derive(Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub debounce_factory: DebouncePolicyFactory,
}

/// Spawns the per-provider heartbeat loop: probe, debounce, notify on
/// transition, sleep — forever, until `cancel` fires.
///
/// `on_transition` runs for every status change (never for the initial
/// settling) and may itself be async; callers that need to touch shared
/// dispatch-core state typically acquire their own mutex inside it.
pub fn spawn_watch<F, Fut>(
    provider: Arc<dyn Provider>,
    config: HeartbeatConfig,
    on_transition: F,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(HeartbeatStatus) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut policy = (config.debounce_factory)();
        let mut last_reported = HeartbeatStatus::Alive;
        let mut ticker = interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let probe = tokio::select! {
                _ = cancel.cancelled() => break,
                probe = provider.check() => probe,
            };

            let status = policy.observe(probe);
            if status != last_reported {
                debug!(?last_reported, ?status, "heartbeat transition");
                last_reported = status;
                on_transition(status).await;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn debounce_k2() -> AliveAfterRounds {
        AliveAfterRounds::new(2)
    }

    #[rstest]
    fn alive_to_dead_on_first_false_fixture(mut debounce_k2: AliveAfterRounds) {
        assert_eq!(debounce_k2.observe(true), HeartbeatStatus::Alive);
        assert_eq!(debounce_k2.observe(false), HeartbeatStatus::Dead);
    }

    #[test]
    fn alive_to_dead_on_first_false() {
        let mut p = AliveAfterRounds::new(2);
        assert_eq!(p.observe(true), HeartbeatStatus::Alive);
        assert_eq!(p.observe(false), HeartbeatStatus::Dead);
    }

    #[test]
    fn dead_to_alive_only_after_k_consecutive_trues() {
        let mut p = AliveAfterRounds::new(2);
        p.observe(false); // -> Dead
        assert_eq!(p.observe(true), HeartbeatStatus::Dead);
        assert_eq!(p.observe(true), HeartbeatStatus::Alive);
    }

    #[test]
    fn false_during_recovery_window_resets_counter() {
        let mut p = AliveAfterRounds::new(2);
        p.observe(false); // -> Dead
        p.observe(true); // alive_rounds = 1, still Dead
        p.observe(false); // reset
        assert_eq!(p.observe(true), HeartbeatStatus::Dead);
        assert_eq!(p.observe(true), HeartbeatStatus::Alive);
    }

    #[test]
    fn debounce_recovery_over_a_mixed_probe_stream() {
        // probe stream [T,F,F,T,F,T,T] -> transitions [Dead@idx1, Alive@idx6]
        let mut p = AliveAfterRounds::new(2);
        let probes = [true, false, false, true, false, true, true];
        let mut transitions = Vec::new();
        let mut last = HeartbeatStatus::Alive;
        for (idx, probe) in probes.iter().enumerate() {
            let status = p.observe(*probe);
            if status != last {
                transitions.push((idx, status));
                last = status;
            }
        }
        assert_eq!(
            transitions,
            vec![(1, HeartbeatStatus::Dead), (6, HeartbeatStatus::Alive)]
        );
    }

    #[test]
    fn steady_state_true_produces_no_transitions() {
        let mut p = AliveAfterRounds::new(3);
        let mut last = HeartbeatStatus::Alive;
        let mut transitions = 0;
        for _ in 0..50 {
            let status = p.observe(true);
            if status != last {
                transitions += 1;
                last = status;
            }
        }
        assert_eq!(transitions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_loop() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct AlwaysAlive;
        #[async_trait::async_trait]
        impl Provider for AlwaysAlive {
            async fn serve(&self) -> Result<String, crate::provider::ProviderError> {
                Ok("x".into())
            }
            async fn check(&self) -> bool {
                true
            }
        }

        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let handle = spawn_watch(
            Arc::new(AlwaysAlive),
            HeartbeatConfig {
                interval: Duration::from_millis(10),
                debounce_factory: AliveAfterRounds::factory(1),
            },
            move |_status| {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            },
            cancel.clone(),
        );

        tokio::time::advance(Duration::from_millis(5)).await;
        cancel.cancel();
        handle.await.expect("heartbeat task should join cleanly");
        // AlwaysAlive never transitions, so on_transition is never invoked.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
