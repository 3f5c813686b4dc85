// src/notify/pacing.rs
use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Fixed gap between consecutive sends to the same destination.
/// - First send to a destination goes out immediately.
/// - Destinations never wait on each other.
/// - Slots carry over between cycles.
#[derive(Debug, Default)]
pub struct Pacer {
    delay: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve the next slot for `destination` and sleep until it opens.
    pub async fn wait_turn(&self, destination: &str) {
        let wait_for = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots.get(destination).copied().filter(|t| *t > now).unwrap_or(now);
            slots.insert(destination.to_string(), slot + self.delay);
            slot.checked_duration_since(now)
        };
        if let Some(d) = wait_for.filter(|d| !d.is_zero()) {
            tokio::time::sleep(d).await;
        }
    }
}
