pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod rate_limit;
pub mod throttle;

pub use cache::CacheStore;
pub use client::CatalogClient;
pub use config::ThrottleConfig;
pub use error::{ApiError, Result};
pub use models::{Category, Experience};
pub use orchestrator::{CatalogSnapshot, CategoryFetchState, FetchOrchestrator};
pub use rate_limit::RateLimitTracker;
pub use throttle::{ThrottleOptions, ThrottleService};
