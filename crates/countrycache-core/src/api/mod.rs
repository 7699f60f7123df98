//! REST API client module for the REST Countries service.
//!
//! This module provides the `CountryApi` transport trait and the `ApiClient`
//! that implements it over HTTP. Only two read-only endpoints are used:
//! the name-only list and the by-name detail lookup.

pub mod client;
pub mod error;

pub use client::{ApiClient, CountryApi, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
pub use error::ApiError;
