use crate::config::ThrottleConfig;
use crate::error::{ApiError, Result};
use crate::rate_limit::RateLimitTracker;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

type Payload = Arc<dyn Any + Send + Sync>;
type Outcome = std::result::Result<Payload, ApiError>;

/// Per-call knobs for [`ThrottleService::throttle_request`].
#[derive(Debug, Clone)]
pub struct ThrottleOptions {
    /// Delay before the request is issued; `None` uses the configured default.
    pub debounce: Option<Duration>,
    /// When set, concurrent calls for the same key share one execution.
    pub use_queue: bool,
}

impl Default for ThrottleOptions {
    fn default() -> Self {
        Self {
            debounce: None,
            use_queue: true,
        }
    }
}

/// Wraps arbitrary async fetch operations with in-flight deduplication,
/// debounce, rate-limit-aware waiting, and a request timeout.
///
/// Keys share the cache-key namespace, `"<resource-path>/<qualifier>"`. The
/// rate-limit endpoint is the key with any query string stripped, so variants
/// of one resource cool down together while unrelated resources proceed.
#[derive(Clone)]
pub struct ThrottleService {
    config: Arc<ThrottleConfig>,
    limits: RateLimitTracker,
    in_flight: Arc<Mutex<HashMap<String, watch::Receiver<Option<Outcome>>>>>,
}

impl ThrottleService {
    pub fn new(config: ThrottleConfig) -> Self {
        let limits = RateLimitTracker::new(config.initial_backoff, config.max_backoff);
        Self {
            config: Arc::new(config),
            limits,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The tracker consulted (and updated) by throttled requests.
    pub fn rate_limits(&self) -> &RateLimitTracker {
        &self.limits
    }

    /// Execute `request` for `key`, subject to throttling.
    ///
    /// If the key's endpoint is rate-limited, waits out the current backoff
    /// window once before proceeding; a backoff entered while this call is
    /// already past that point is not re-awaited. With `use_queue`, a request
    /// already in flight for the key is joined instead of duplicated and all
    /// callers observe the same result. The underlying request runs on a
    /// spawned task after the debounce delay, bounded by the configured
    /// timeout; a 429 rejection records a backoff for the endpoint before
    /// propagating. Errors are never retried here.
    pub async fn throttle_request<T, F, Fut>(
        &self,
        key: &str,
        request: F,
        options: ThrottleOptions,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let endpoint = endpoint_of(key).to_string();

        let backoff = self.limits.backoff_remaining(&endpoint);
        if !backoff.is_zero() {
            debug!(key, wait_ms = backoff.as_millis() as u64, "waiting out backoff");
            tokio::time::sleep(backoff).await;
        }

        let (tx, rx) = watch::channel(None);
        if options.use_queue {
            let existing = {
                let mut in_flight = self
                    .in_flight
                    .lock()
                    .map_err(|_| ApiError::Internal("in-flight lock poisoned".to_string()))?;

                if let Some(existing) = in_flight.get(key) {
                    Some(existing.clone())
                } else {
                    in_flight.insert(key.to_string(), rx.clone());
                    None
                }
            };
            if let Some(mut existing) = existing {
                debug!(key, "joining in-flight request");
                return Self::await_outcome::<T>(&mut existing).await;
            }
        }

        let debounce = options.debounce.unwrap_or(self.config.debounce);
        let timeout = self.config.request_timeout;
        let limits = self.limits.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let use_queue = options.use_queue;
        let owned_key = key.to_string();

        // Run the request on its own task so a caller that goes away cannot
        // strand the other callers waiting on the same key.
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;

            let outcome: Outcome = match tokio::time::timeout(timeout, request()).await {
                Ok(Ok(value)) => Ok(Arc::new(value) as Payload),
                Ok(Err(err)) => {
                    if err.is_rate_limit() {
                        limits.track_rate_limit(&endpoint);
                    }
                    Err(err)
                }
                Err(_) => Err(ApiError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                }),
            };

            // Clear the slot before publishing so a caller arriving after
            // settlement starts a fresh request.
            if use_queue {
                if let Ok(mut in_flight) = in_flight.lock() {
                    in_flight.remove(&owned_key);
                }
            }
            let _ = tx.send(Some(outcome));
        });

        let mut rx = rx;
        Self::await_outcome::<T>(&mut rx).await
    }

    async fn await_outcome<T>(rx: &mut watch::Receiver<Option<Outcome>>) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let guard = rx
            .wait_for(|outcome| outcome.is_some())
            .await
            .map_err(|_| ApiError::Internal("in-flight request was abandoned".to_string()))?;
        let outcome = (*guard).clone();
        drop(guard);

        match outcome {
            Some(Ok(payload)) => payload
                .downcast::<T>()
                .map(|value| (*value).clone())
                .map_err(|_| {
                    ApiError::Internal("in-flight result has unexpected type".to_string())
                }),
            Some(Err(err)) => Err(err),
            None => unreachable!("wait_for guarantees a settled outcome"),
        }
    }

    /// Number of keys with a request currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }
}

/// Rate-limit grouping key: the request key with any query string stripped.
pub(crate) fn endpoint_of(key: &str) -> &str {
    key.split('?').next().unwrap_or(key)
}
