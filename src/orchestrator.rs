use crate::cache::CacheStore;
use crate::client::CatalogClient;
use crate::config::ThrottleConfig;
use crate::error::Result;
use crate::models::{Category, Experience};
use crate::throttle::{ThrottleOptions, ThrottleService};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Cache key for the category list.
pub const CATEGORIES_KEY: &str = "experiences/categories";

/// Top-level featured collections shown on the landing page.
pub const COLLECTIONS: &[&str] = &["special", "popular"];

fn category_key(category_id: u64) -> String {
    format!("experiences/category/{}", category_id)
}

fn collection_key(name: &str) -> String {
    format!("experiences/collection/{}", name)
}

/// Loading state of one featured collection.
#[derive(Debug, Clone, Default)]
pub struct CollectionState {
    pub experiences: Vec<Experience>,
    pub loading: bool,
    pub error: Option<String>,
}

/// Loading state of one category's experience list.
///
/// Each category resolves or fails on its own; a failed category never
/// blocks its siblings.
#[derive(Debug, Clone)]
pub struct CategoryFetchState {
    pub category_id: u64,
    pub experiences: Vec<Experience>,
    pub loading: bool,
    pub error: Option<String>,
}

/// Everything the UI layer renders from, cloned out on demand.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    /// Raw category list as returned by the server.
    pub categories: Vec<Category>,
    /// Categories actually shown: the active ones, or a fallback slice of
    /// the raw list when the back office has activated none.
    pub display_categories: Vec<Category>,
    pub categories_loading: bool,
    pub categories_error: Option<String>,
    pub collections: HashMap<String, CollectionState>,
    pub by_category: HashMap<u64, CategoryFetchState>,
}

/// Drives catalog loading through the cache and throttle services.
///
/// One load fetches the featured collections and the category list, then
/// fans out one experience fetch per displayed category, staggered in time
/// so N categories do not hit the backend at once. State is updated
/// independently as each fetch settles and every update bumps a version
/// watch channel the UI can subscribe to.
#[derive(Clone)]
pub struct FetchOrchestrator {
    cache: CacheStore,
    throttle: ThrottleService,
    client: Arc<dyn CatalogClient>,
    config: Arc<ThrottleConfig>,
    state: Arc<RwLock<CatalogSnapshot>>,
    version: Arc<watch::Sender<u64>>,
}

impl FetchOrchestrator {
    pub fn new(
        cache: CacheStore,
        throttle: ThrottleService,
        client: Arc<dyn CatalogClient>,
        config: ThrottleConfig,
    ) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            cache,
            throttle,
            client,
            config: Arc::new(config),
            state: Arc::new(RwLock::new(CatalogSnapshot::default())),
            version: Arc::new(version),
        }
    }

    /// Current state, cloned.
    pub fn snapshot(&self) -> CatalogSnapshot {
        self.state
            .read()
            .map(|state| state.clone())
            .unwrap_or_default()
    }

    /// Version channel bumped on every state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Start (or restart) the full load cycle.
    ///
    /// Returns once the category list has settled; collection and
    /// per-category fetches continue in the background and report through
    /// [`snapshot`](Self::snapshot).
    pub async fn load(&self) {
        if let Ok(mut state) = self.state.write() {
            state.categories_loading = true;
            state.categories_error = None;
        }
        self.bump();

        for &name in COLLECTIONS {
            self.spawn_collection_fetch(name);
        }

        match self.fetch_categories().await {
            Ok(categories) => {
                let display =
                    display_categories(&categories, self.config.fallback_category_count);
                if let Ok(mut state) = self.state.write() {
                    state.categories = categories;
                    state.display_categories = display.clone();
                    state.categories_loading = false;
                    for category in &display {
                        state.by_category.insert(
                            category.id,
                            CategoryFetchState {
                                category_id: category.id,
                                experiences: Vec::new(),
                                loading: true,
                                error: None,
                            },
                        );
                    }
                }
                self.bump();

                let count = display.len();
                debug!(count, "fanning out category fetches");
                for (index, category) in display.iter().enumerate() {
                    self.spawn_category_fetch(index, category.id);
                }
            }
            Err(err) => {
                warn!(error = %err, "category list failed to load");
                if let Ok(mut state) = self.state.write() {
                    state.categories_loading = false;
                    state.categories_error = Some(err.to_string());
                }
                self.bump();
            }
        }
    }

    /// Explicit refresh: invalidate the catalog cache keys, then rerun the
    /// load cycle so fresh data is fetched even before TTL expiry.
    pub async fn refresh(&self) {
        let _ = self.cache.invalidate(CATEGORIES_KEY);
        let _ = self.cache.invalidate_prefix("experiences/collection/");
        let _ = self.cache.invalidate_prefix("experiences/category/");
        self.load().await;
    }

    async fn fetch_categories(&self) -> Result<Vec<Category>> {
        let client = Arc::clone(&self.client);
        let throttle = self.throttle.clone();
        self.cache
            .get_or_fetch(CATEGORIES_KEY, self.config.default_ttl, || async move {
                throttle
                    .throttle_request(
                        CATEGORIES_KEY,
                        move || async move { client.fetch_categories().await },
                        ThrottleOptions::default(),
                    )
                    .await
            })
            .await
    }

    fn spawn_collection_fetch(&self, name: &'static str) {
        if let Ok(mut state) = self.state.write() {
            state.collections.insert(
                name.to_string(),
                CollectionState {
                    loading: true,
                    ..CollectionState::default()
                },
            );
        }
        self.bump();

        let this = self.clone();
        tokio::spawn(async move {
            let key = collection_key(name);
            let client = Arc::clone(&this.client);
            let throttle = this.throttle.clone();
            let request_key = key.clone();
            let result = this
                .cache
                .get_or_fetch(&key, this.config.default_ttl, || async move {
                    throttle
                        .throttle_request(
                            &request_key,
                            move || async move { client.fetch_collection(name).await },
                            ThrottleOptions::default(),
                        )
                        .await
                })
                .await;

            if let Ok(mut state) = this.state.write() {
                if let Some(entry) = state.collections.get_mut(name) {
                    entry.loading = false;
                    match result {
                        Ok(experiences) => {
                            entry.experiences = experiences;
                            entry.error = None;
                        }
                        Err(err) => {
                            warn!(collection = name, error = %err, "collection failed to load");
                            entry.experiences = Vec::new();
                            entry.error = Some(err.to_string());
                        }
                    }
                }
            }
            this.bump();
        });
    }

    fn spawn_category_fetch(&self, index: usize, category_id: u64) {
        let stagger = self.config.stagger_delay * index as u32;
        let jitter = random_jitter(self.config.max_jitter);
        let this = self.clone();

        tokio::spawn(async move {
            if !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }

            let key = category_key(category_id);
            let options = ThrottleOptions {
                debounce: Some(this.config.debounce + jitter),
                use_queue: true,
            };
            let client = Arc::clone(&this.client);
            let throttle = this.throttle.clone();
            let request_key = key.clone();
            let result = this
                .cache
                .get_or_fetch(&key, this.config.default_ttl, || async move {
                    throttle
                        .throttle_request(
                            &request_key,
                            move || async move { client.fetch_experiences(category_id).await },
                            options,
                        )
                        .await
                })
                .await;

            this.finish_category(category_id, result);
        });
    }

    fn finish_category(&self, category_id: u64, result: Result<Vec<Experience>>) {
        if let Ok(mut state) = self.state.write() {
            if let Some(entry) = state.by_category.get_mut(&category_id) {
                entry.loading = false;
                match result {
                    Ok(experiences) => {
                        entry.experiences = experiences;
                        entry.error = None;
                    }
                    Err(err) => {
                        warn!(category_id, error = %err, "category experiences failed to load");
                        entry.experiences = Vec::new();
                        entry.error = Some(err.to_string());
                    }
                }
            }
        }
        self.bump();
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

/// Active categories, or the first `fallback_count` raw ones when the server
/// marks none active, so the landing page is never completely blank.
fn display_categories(categories: &[Category], fallback_count: usize) -> Vec<Category> {
    let active: Vec<Category> = categories.iter().filter(|c| c.active).cloned().collect();
    if !active.is_empty() {
        active
    } else {
        categories.iter().take(fallback_count).cloned().collect()
    }
}

fn random_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let ms = rand::thread_rng().gen_range(0..=max.as_millis() as u64);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(id: u64, active: bool) -> Category {
        Category {
            id,
            name: format!("Category {}", id),
            slug: format!("category-{}", id),
            active,
        }
    }

    #[test]
    fn active_categories_are_displayed() {
        let categories = vec![category(1, false), category(2, true), category(3, true)];
        let display = display_categories(&categories, 4);
        assert_eq!(display.iter().map(|c| c.id).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn empty_active_set_falls_back_to_first_n() {
        let categories: Vec<Category> = (1..=6).map(|id| category(id, false)).collect();
        let display = display_categories(&categories, 4);
        assert_eq!(display.len(), 4);
        assert_eq!(display[0].id, 1);
    }

    #[test]
    fn fallback_handles_short_lists() {
        let categories = vec![category(1, false)];
        assert_eq!(display_categories(&categories, 4).len(), 1);
        assert!(display_categories(&[], 4).is_empty());
    }

    #[test]
    fn jitter_stays_within_bounds() {
        assert_eq!(random_jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..32 {
            assert!(random_jitter(Duration::from_millis(150)) <= Duration::from_millis(150));
        }
    }

    #[test]
    fn cache_keys_are_stable() {
        assert_eq!(category_key(42), "experiences/category/42");
        assert_eq!(collection_key("popular"), "experiences/collection/popular");
    }
}
