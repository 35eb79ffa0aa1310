//! Rate gate — the one call budget shared by every outbound model call.
//!
//! Every attempt against any provider, primary or consultant, reserves a slot
//! here immediately before network I/O. The counter only moves forward;
//! [`RateGate::reset`] is the single, explicit way back to zero.

use std::sync::Mutex;

use serde::Serialize;
use tracing::{debug, info, warn};

/// Result of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The call may proceed; carries its 1-based sequence number.
    Allowed(u64),
    /// The budget is exhausted; do not touch the network.
    Denied,
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed(_))
    }
}

/// `{count, cap}` with `count <= cap` at all times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimiterState {
    pub count: u64,
    pub cap: u64,
}

impl RateLimiterState {
    pub fn remaining(&self) -> u64 {
        self.cap - self.count
    }
}

/// Mutex-guarded global call counter.
#[derive(Debug)]
pub struct RateGate {
    state: Mutex<RateLimiterState>,
}

impl RateGate {
    pub fn new(cap: u64) -> Self {
        Self {
            state: Mutex::new(RateLimiterState { count: 0, cap }),
        }
    }

    /// Reserve one call. Check and increment happen under a single lock.
    pub fn check_and_reserve(&self) -> Admission {
        let mut state = self.lock();
        if state.count >= state.cap {
            warn!(cap = state.cap, "Rate gate: call budget exhausted");
            return Admission::Denied;
        }
        state.count += 1;
        debug!(sequence = state.count, cap = state.cap, "Rate gate: call admitted");
        Admission::Allowed(state.count)
    }

    /// Privileged: zero the counter. Never called on a timer.
    pub fn reset(&self) {
        let mut state = self.lock();
        info!(previous = state.count, cap = state.cap, "Rate gate reset");
        state.count = 0;
    }

    pub fn state(&self) -> RateLimiterState {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RateLimiterState> {
        // The guarded section never panics, so a poisoned lock still holds a
        // consistent counter.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn admits_up_to_cap_then_denies() {
        let gate = RateGate::new(2);
        assert_eq!(gate.check_and_reserve(), Admission::Allowed(1));
        assert_eq!(gate.check_and_reserve(), Admission::Allowed(2));
        assert_eq!(gate.check_and_reserve(), Admission::Denied);
        assert_eq!(gate.state(), RateLimiterState { count: 2, cap: 2 });
    }

    #[test]
    fn denial_does_not_move_counter() {
        let gate = RateGate::new(1);
        gate.check_and_reserve();
        for _ in 0..5 {
            assert_eq!(gate.check_and_reserve(), Admission::Denied);
        }
        assert_eq!(gate.state().count, 1);
        assert_eq!(gate.state().remaining(), 0);
    }

    #[test]
    fn reset_reopens_the_gate() {
        let gate = RateGate::new(1);
        gate.check_and_reserve();
        assert_eq!(gate.check_and_reserve(), Admission::Denied);

        gate.reset();
        assert_eq!(gate.state().count, 0);
        assert_eq!(gate.check_and_reserve(), Admission::Allowed(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reservations_never_over_admit() {
        for _ in 0..200 {
            let gate = Arc::new(RateGate::new(2));
            let handles: Vec<_> = (0..3)
                .map(|_| {
                    let gate = gate.clone();
                    tokio::spawn(async move { gate.check_and_reserve() })
                })
                .collect();

            let mut allowed = 0;
            let mut denied = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Admission::Allowed(_) => allowed += 1,
                    Admission::Denied => denied += 1,
                }
            }
            assert_eq!(allowed, 2);
            assert_eq!(denied, 1);
            assert_eq!(gate.state().count, 2);
        }
    }

    #[test]
    fn sequence_numbers_are_unique_across_threads() {
        let gate = Arc::new(RateGate::new(64));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || {
                    (0..10)
                        .filter_map(|_| match gate.check_and_reserve() {
                            Admission::Allowed(seq) => Some(seq),
                            Admission::Denied => None,
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seqs: Vec<u64> = threads
            .into_iter()
            .flat_map(|t| t.join().unwrap())
            .collect();
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=64).collect::<Vec<_>>());
    }
}
