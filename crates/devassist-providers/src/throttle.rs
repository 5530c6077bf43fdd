//! Per-model courtesy spacing between consecutive vendor calls.

use core::time::Duration;
use std::collections::HashMap;
use std::sync::Mutex;

use devassist_core::sync::IgnoreLock as _;
use tokio::time::{Instant, sleep_until};
use tracing::trace;

/// Keeps calls to the same model at least `interval` apart.
///
/// Each caller reserves the next free slot under the lock and sleeps outside
/// it, so concurrent callers queue up without holding the lock.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl Throttle {
    /// Creates a throttle; a zero interval disables it.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Waits until `model` may be called again.
    pub async fn wait(&self, model: &str) {
        if self.interval.is_zero() {
            return;
        }
        let now = Instant::now();
        let slot = {
            let mut slots = self.next_slot.lock_ignore_poison();
            let slot = slots.get(model).copied().map_or(now, |next| next.max(now));
            slots.insert(model.to_owned(), slot + self.interval);
            slot
        };
        if slot > now {
            trace!("Throttling {model} for {:?}", slot - now);
            sleep_until(slot).await;
        }
    }
}
