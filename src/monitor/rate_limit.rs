use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::models::AppConfig;

/// Hard cap on concurrently outstanding usage fetches.
pub const MAX_CONCURRENT_FETCHES: usize = 3;

/// Outcome of a cooldown probe. Purely a read; probing never updates the
/// refresh clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownCheck {
    pub allowed: bool,
    /// Ceiling of the remaining wait in seconds; 0 when allowed.
    pub wait_seconds: u64,
}

impl CooldownCheck {
    fn allowed() -> Self {
        Self {
            allowed: true,
            wait_seconds: 0,
        }
    }

    fn blocked(remaining: Duration) -> Self {
        Self {
            allowed: false,
            wait_seconds: remaining.as_secs_f64().ceil() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CooldownSettings {
    per_account: Duration,
    refresh_all: Duration,
}

/// Gates refresh attempts by time-based cooldown (per account and globally)
/// and admits outbound fetches through a fair FIFO slot pool.
///
/// Two near-simultaneous triggers can both pass a cooldown probe before
/// either records its timestamp; throttling is best-effort and the worst
/// case is one duplicate early fetch (merges are last-write-wins).
pub struct RateLimiter {
    per_account_last_refresh: DashMap<String, Instant>,
    last_refresh_all: RwLock<Option<Instant>>,
    cooldowns: RwLock<CooldownSettings>,
    slots: Arc<Semaphore>,
}

/// RAII admission slot. Dropping the permit releases the slot and resumes
/// the head waiter, so release is guaranteed on every exit path.
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(per_account_cooldown: Duration, refresh_all_cooldown: Duration) -> Self {
        Self {
            per_account_last_refresh: DashMap::new(),
            last_refresh_all: RwLock::new(None),
            cooldowns: RwLock::new(CooldownSettings {
                per_account: per_account_cooldown,
                refresh_all: refresh_all_cooldown,
            }),
            slots: Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES)),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Duration::from_secs(config.refresh_cooldown_seconds),
            Duration::from_secs(config.refresh_all_cooldown_seconds),
        )
    }

    /// Applies new cooldown durations without touching recorded timestamps.
    pub fn set_cooldowns(&self, per_account: Duration, refresh_all: Duration) {
        let mut settings = self.cooldowns.write().unwrap_or_else(|p| p.into_inner());
        settings.per_account = per_account;
        settings.refresh_all = refresh_all;
    }

    fn settings(&self) -> CooldownSettings {
        *self.cooldowns.read().unwrap_or_else(|p| p.into_inner())
    }

    fn check(last: Option<Instant>, cooldown: Duration) -> CooldownCheck {
        match last {
            None => CooldownCheck::allowed(),
            Some(at) => {
                let elapsed = at.elapsed();
                if elapsed >= cooldown {
                    CooldownCheck::allowed()
                } else {
                    CooldownCheck::blocked(cooldown - elapsed)
                }
            }
        }
    }

    pub fn can_refresh(&self, account_id: &str) -> CooldownCheck {
        let last = self
            .per_account_last_refresh
            .get(account_id)
            .map(|entry| *entry.value());
        Self::check(last, self.settings().per_account)
    }

    pub fn can_refresh_all(&self) -> CooldownCheck {
        let last = *self
            .last_refresh_all
            .read()
            .unwrap_or_else(|p| p.into_inner());
        Self::check(last, self.settings().refresh_all)
    }

    /// Called only after an attempt is actually dispatched, never on a
    /// merely-permitted probe.
    pub fn record_refresh(&self, account_id: &str) {
        self.per_account_last_refresh
            .insert(account_id.to_string(), Instant::now());
    }

    pub fn record_refresh_all(&self) {
        *self
            .last_refresh_all
            .write()
            .unwrap_or_else(|p| p.into_inner()) = Some(Instant::now());
    }

    /// Clears one account's clock so a fresh authentication bypasses the
    /// cooldown immediately.
    pub fn reset_cooldown(&self, account_id: &str) {
        self.per_account_last_refresh.remove(account_id);
    }

    pub fn reset_all_cooldowns(&self) {
        self.per_account_last_refresh.clear();
        *self
            .last_refresh_all
            .write()
            .unwrap_or_else(|p| p.into_inner()) = None;
    }

    /// Admits an outbound fetch, suspending in strict FIFO order while
    /// `MAX_CONCURRENT_FETCHES` slots are busy.
    pub async fn acquire_slot(&self) -> SlotPermit {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .expect("admission semaphore is never closed");
        SlotPermit { _permit: permit }
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Duration::from_secs(60), Duration::from_secs(120))
    }

    #[test]
    fn fresh_account_is_allowed_immediately() {
        let limiter = limiter();
        let check = limiter.can_refresh("acc-1");
        assert!(check.allowed);
        assert_eq!(check.wait_seconds, 0);
    }

    #[test]
    fn record_refresh_starts_the_cooldown() {
        let limiter = limiter();
        limiter.record_refresh("acc-1");

        let check = limiter.can_refresh("acc-1");
        assert!(!check.allowed);
        // Ceiling of the remaining wait, so a just-recorded refresh reports
        // the full cooldown (allow one second of test scheduling slack).
        assert!(check.wait_seconds == 60 || check.wait_seconds == 59);

        // Other accounts are unaffected.
        assert!(limiter.can_refresh("acc-2").allowed);
    }

    #[test]
    fn refresh_all_cooldown_is_tracked_separately() {
        let limiter = limiter();
        assert!(limiter.can_refresh_all().allowed);

        limiter.record_refresh_all();
        let check = limiter.can_refresh_all();
        assert!(!check.allowed);
        assert!(check.wait_seconds == 120 || check.wait_seconds == 119);

        // The global clock does not throttle individual accounts.
        assert!(limiter.can_refresh("acc-1").allowed);
    }

    #[test]
    fn reset_cooldown_clears_one_account() {
        let limiter = limiter();
        limiter.record_refresh("acc-1");
        limiter.record_refresh("acc-2");

        limiter.reset_cooldown("acc-1");
        assert!(limiter.can_refresh("acc-1").allowed);
        assert!(!limiter.can_refresh("acc-2").allowed);
    }

    #[test]
    fn reset_all_cooldowns_clears_every_clock() {
        let limiter = limiter();
        limiter.record_refresh("acc-1");
        limiter.record_refresh("acc-2");
        limiter.record_refresh_all();

        limiter.reset_all_cooldowns();

        for id in ["acc-1", "acc-2", "acc-3"] {
            let check = limiter.can_refresh(id);
            assert!(check.allowed);
            assert_eq!(check.wait_seconds, 0);
        }
        let check = limiter.can_refresh_all();
        assert!(check.allowed);
        assert_eq!(check.wait_seconds, 0);
    }

    #[test]
    fn set_cooldowns_keeps_recorded_timestamps() {
        let limiter = limiter();
        limiter.record_refresh("acc-1");

        limiter.set_cooldowns(Duration::from_secs(0), Duration::from_secs(0));
        assert!(limiter.can_refresh("acc-1").allowed);

        limiter.set_cooldowns(Duration::from_secs(60), Duration::from_secs(120));
        assert!(!limiter.can_refresh("acc-1").allowed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn at_most_three_slots_are_ever_active() {
        let limiter = Arc::new(limiter());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = limiter.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _slot = limiter.acquire_slot().await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("slot task");
        }

        assert!(peak.load(Ordering::SeqCst) <= MAX_CONCURRENT_FETCHES);
        assert_eq!(active.load(Ordering::SeqCst), 0);
        assert_eq!(limiter.available_slots(), MAX_CONCURRENT_FETCHES);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn waiters_resume_in_fifo_order() {
        let limiter = Arc::new(limiter());

        let mut held = Vec::new();
        for _ in 0..MAX_CONCURRENT_FETCHES {
            held.push(limiter.acquire_slot().await);
        }
        assert_eq!(limiter.available_slots(), 0);

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _slot = limiter.acquire_slot().await;
                order.lock().expect("order lock").push(i);
            }));
            // Let the waiter reach the semaphore before spawning the next,
            // pinning the queue order.
            tokio::task::yield_now().await;
        }

        drop(held);
        for handle in handles {
            handle.await.expect("waiter task");
        }

        assert_eq!(*order.lock().expect("order lock"), vec![0, 1, 2]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn the_fourth_request_waits_for_a_release() {
        let limiter = Arc::new(limiter());

        let first = limiter.acquire_slot().await;
        let _second = limiter.acquire_slot().await;
        let _third = limiter.acquire_slot().await;

        let admitted = Arc::new(AtomicUsize::new(0));
        let waiter = {
            let limiter = limiter.clone();
            let admitted = admitted.clone();
            tokio::spawn(async move {
                let _slot = limiter.acquire_slot().await;
                admitted.store(1, Ordering::SeqCst);
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(admitted.load(Ordering::SeqCst), 0);

        drop(first);
        waiter.await.expect("waiter task");
        assert_eq!(admitted.load(Ordering::SeqCst), 1);
    }
}
