use crate::error::Result;
use crate::models::{Category, Experience};
use async_trait::async_trait;

/// Transport-level access to the catalog API.
///
/// The HTTP layer implements this; the orchestrator only ever calls it
/// through the cache and throttle services, never directly per render.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// All categories, active or not.
    async fn fetch_categories(&self) -> Result<Vec<Category>>;

    /// Experiences belonging to one category.
    async fn fetch_experiences(&self, category_id: u64) -> Result<Vec<Experience>>;

    /// A named top-level collection such as "special" or "popular".
    async fn fetch_collection(&self, name: &str) -> Result<Vec<Experience>>;
}
