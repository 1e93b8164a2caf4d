use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Per-endpoint exponential backoff state entered after a 429 response.
///
/// A live record means the endpoint is cooling down. Consecutive hits before
/// the current window expires double the backoff up to `max_backoff`; a hit
/// after expiry starts over at `initial_backoff`. Records remove themselves
/// once their window has elapsed, so unrelated endpoints keep operating
/// normally while a hot one cools down.
#[derive(Clone)]
pub struct RateLimitTracker {
    records: Arc<RwLock<HashMap<String, RateLimitRecord>>>,
    initial_backoff: Duration,
    max_backoff: Duration,
}

#[derive(Clone)]
struct RateLimitRecord {
    entered_at: Instant,
    backoff: Duration,
    /// Guards the scheduled removal against racing a newer record.
    generation: u64,
}

impl RateLimitRecord {
    fn is_live(&self) -> bool {
        self.entered_at.elapsed() < self.backoff
    }
}

impl RateLimitTracker {
    pub fn new(initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            initial_backoff,
            max_backoff,
        }
    }

    /// Record a rate-limit response for `endpoint` and return the new backoff
    /// window. Escalates from the previous record only if that record has not
    /// yet expired.
    pub fn track_rate_limit(&self, endpoint: &str) -> Duration {
        let (backoff, generation) = {
            let mut records = match self.records.write() {
                Ok(records) => records,
                Err(_) => return self.initial_backoff,
            };

            let backoff = match records.get(endpoint) {
                Some(previous) if previous.is_live() => {
                    (previous.backoff * 2).min(self.max_backoff)
                }
                _ => self.initial_backoff,
            };
            let generation = records
                .get(endpoint)
                .map(|r| r.generation + 1)
                .unwrap_or(0);

            records.insert(
                endpoint.to_string(),
                RateLimitRecord {
                    entered_at: Instant::now(),
                    backoff,
                    generation,
                },
            );
            (backoff, generation)
        };

        warn!(endpoint, backoff_ms = backoff.as_millis() as u64, "rate limited, backing off");
        self.schedule_removal(endpoint.to_string(), backoff, generation);
        backoff
    }

    /// True iff a live backoff record exists for `endpoint`.
    pub fn is_rate_limited(&self, endpoint: &str) -> bool {
        self.records
            .read()
            .map(|records| records.get(endpoint).is_some_and(|r| r.is_live()))
            .unwrap_or(false)
    }

    /// Time left in the endpoint's backoff window, zero if none.
    pub fn backoff_remaining(&self, endpoint: &str) -> Duration {
        self.records
            .read()
            .ok()
            .and_then(|records| {
                records
                    .get(endpoint)
                    .map(|r| r.backoff.saturating_sub(r.entered_at.elapsed()))
            })
            .unwrap_or(Duration::ZERO)
    }

    /// Remove the record after its window, unless a newer hit replaced it.
    fn schedule_removal(&self, endpoint: String, backoff: Duration, generation: u64) {
        let tracker = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            if let Ok(mut records) = tracker.records.write() {
                if records.get(&endpoint).is_some_and(|r| r.generation == generation) {
                    records.remove(&endpoint);
                    debug!(endpoint = %endpoint, "backoff expired");
                }
            }
        });
    }
}
