//! Session-wide request ceiling shared by every bucket.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Token-bucket admission control across all buckets.
///
/// Tokens are taken on dispatch and never returned on completion; a periodic
/// timer refills them to `capacity` every `interval`. A global rejection from
/// the server pauses admission entirely until its retry-after elapses.
#[derive(Debug)]
pub struct GlobalCeiling {
    capacity: u32,
    interval: Duration,
    tokens: AtomicU32,
    paused_until: Mutex<Option<Instant>>,
    replenished: Notify,
}

impl GlobalCeiling {
    pub fn new(capacity: u32, interval: Duration) -> Self {
        Self {
            capacity,
            interval,
            tokens: AtomicU32::new(capacity),
            paused_until: Mutex::new(None),
            replenished: Notify::new(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Tokens left until the next refill.
    pub fn available(&self) -> u32 {
        self.tokens.load(Ordering::SeqCst)
    }

    /// Take a token if one is available and admission is not paused.
    pub fn try_acquire(&self, now: Instant) -> bool {
        if self.paused_until(now).is_some() {
            return false;
        }
        self.take()
    }

    /// Wait until a token can be taken.
    pub async fn acquire(&self) {
        loop {
            if let Some(until) = self.paused_until(Instant::now()) {
                trace!(wait = ?until.saturating_duration_since(Instant::now()), "Global ceiling paused");
                tokio::time::sleep_until(until).await;
                continue;
            }

            let notified = self.replenished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.take() {
                return;
            }
            notified.await;
        }
    }

    /// Refill to capacity and wake every waiter.
    pub fn replenish(&self) {
        self.tokens.store(self.capacity, Ordering::SeqCst);
        self.replenished.notify_waiters();
    }

    /// Hand back a token that was acquired but never used for a call.
    pub fn release(&self) {
        let returned = self
            .tokens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                (t < self.capacity).then_some(t + 1)
            })
            .is_ok();
        if returned {
            self.replenished.notify_waiters();
        }
    }

    /// Block admission until `until`; an earlier pause never shortens a later one.
    pub fn pause_until(&self, until: Instant) {
        let mut paused = self.paused_until.lock();
        let current = *paused;
        *paused = Some(current.map_or(until, |current| current.max(until)));
        debug!("Global ceiling paused by server rejection");
    }

    pub fn paused_until(&self, now: Instant) -> Option<Instant> {
        let paused = *self.paused_until.lock();
        paused.filter(|until| *until > now)
    }

    fn take(&self) -> bool {
        self.tokens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| t.checked_sub(1))
            .is_ok()
    }

    /// Spawn the refill timer. It stops when `shutdown` changes or its sender drops.
    pub(crate) fn spawn_replenisher(
        self: &Arc<Self>,
        runtime: &Handle,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let ceiling = Arc::clone(self);
        runtime.spawn(async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + ceiling.interval, ceiling.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => ceiling.replenish(),
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Global ceiling replenisher stopped");
        })
    }
}
