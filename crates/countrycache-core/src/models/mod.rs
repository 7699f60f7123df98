//! Data models for country entities.
//!
//! - `Country`: full record with capital, currencies, flag, population, languages
//! - `CountrySummary`: the name-only projection used for the country list
//! - `Currency`, `Language`: sub-entities keyed only by name

pub mod country;

pub use country::{Country, CountrySummary, Currency, Language};
