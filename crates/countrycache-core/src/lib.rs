//! Core library for countrycache.
//!
//! Cache-first access to the REST Countries catalogue: a persisted local
//! store, a cancellable HTTP client, and a repository that merges the two
//! and publishes values and request flags through watch channels.

pub mod api;
pub mod cache;
pub mod config;
pub mod models;
pub mod sync;
pub mod utils;

pub use api::{ApiClient, ApiError, CountryApi};
pub use cache::{CachedData, CountryStore};
pub use config::Config;
pub use models::{Country, CountrySummary, Currency, Language};
pub use sync::{CountryRepository, EntityKind, RequestState, RequestStatus};
