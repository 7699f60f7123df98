//! Local persisted store for offline country data.
//!
//! This module provides the `CountryStore`, a single keyed collection of
//! country records stored as JSON in the cache directory. List fetches
//! write name-only records; detail fetches write full records. Nothing
//! expires, so previously fetched data stays available offline.

pub mod store;

pub use store::{CachedData, CountryStore};
