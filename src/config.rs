use serde::Deserialize;
use std::time::Duration;

/// Tuning knobs for the throttle, cache, and orchestration layers.
///
/// All durations accept humantime strings when deserialized from
/// configuration ("300ms", "5m").
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Delay inserted before each throttled request is issued
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,

    /// Backoff applied on the first rate-limit hit for an endpoint
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Ceiling for exponential backoff growth
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Hard deadline for a single underlying request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Per-category delay step when fanning out experience fetches
    #[serde(with = "humantime_serde")]
    pub stagger_delay: Duration,

    /// Upper bound for the random debounce jitter added per staggered fetch
    #[serde(with = "humantime_serde")]
    pub max_jitter: Duration,

    /// Cache validity for catalog responses
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// Number of raw categories shown when the server marks none active
    pub fallback_category_count: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            stagger_delay: Duration::from_millis(300),
            max_jitter: Duration::from_millis(150),
            default_ttl: Duration::from_secs(300),
            fallback_category_count: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ThrottleConfig::default();
        assert_eq!(config.debounce, Duration::from_millis(300));
        assert!(config.initial_backoff < config.max_backoff);
        assert_eq!(config.fallback_category_count, 4);
    }

    #[test]
    fn deserializes_humantime_durations() {
        let config: ThrottleConfig = serde_json::from_str(
            r#"{"debounce": "50ms", "default_ttl": "10m", "fallback_category_count": 2}"#,
        )
        .unwrap();
        assert_eq!(config.debounce, Duration::from_millis(50));
        assert_eq!(config.default_ttl, Duration::from_secs(600));
        assert_eq!(config.fallback_category_count, 2);
        // Unspecified fields keep their defaults
        assert_eq!(config.max_backoff, Duration::from_secs(30));
    }
}
