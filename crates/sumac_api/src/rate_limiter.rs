//! Request pacing for one remote service.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Hands out request slots at least `cooldown` apart and honours pauses the server asks for
/// (`Retry-After` on a 429). Clones share one schedule, so a client and all of its impersonating
/// views are paced together.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    cooldown: Duration,
    next_slot: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            next_slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Waits for the next free slot and claims it.
    pub async fn acquire(&self) {
        let mut next = self.next_slot.lock().await;
        if let Some(at) = *next {
            if at > Instant::now() {
                sleep_until(at).await;
            }
        }
        *next = Some(Instant::now() + self.cooldown);
    }

    /// Holds every request until at least `pause` from now.
    pub async fn pause_for(&self, pause: Duration) {
        let resume = Instant::now() + pause;
        let mut next = self.next_slot.lock().await;
        *next = Some(next.map_or(resume, |at| at.max(resume)));
        tracing::warn!("Server asked to slow down; pausing requests for {:?}", pause);
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
