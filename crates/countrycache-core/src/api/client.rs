//! API client for the REST Countries service.
//!
//! `CountryApi` is the transport seam the remote source fetches through;
//! `ApiClient` implements it over HTTP.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::models::{Country, CountrySummary};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default base URL for the REST Countries v2 API
pub const DEFAULT_BASE_URL: &str = "https://restcountries.com/v2";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Read-only access to the remote country catalogue.
#[async_trait]
pub trait CountryApi: Send + Sync {
    /// `GET {base}/all?fields=name`
    async fn fetch_all(&self) -> Result<Vec<CountrySummary>, ApiError>;

    /// `GET {base}/name/{name}`, first match only
    async fn fetch_by_name(&self, name: &str) -> Result<Country, ApiError>;
}

/// HTTP client for REST Countries.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a client against a custom base URL (mirror, proxy, test server)
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid API base URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("API base URL cannot carry a path: {}", base_url);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn all_url(&self) -> Url {
        let mut url = self.endpoint(&["all"]);
        url.query_pairs_mut().append_pair("fields", "name");
        url
    }

    fn name_url(&self, name: &str) -> Url {
        self.endpoint(&["name", name])
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl CountryApi for ApiClient {
    async fn fetch_all(&self) -> Result<Vec<CountrySummary>, ApiError> {
        self.get(self.all_url()).await
    }

    async fn fetch_by_name(&self, name: &str) -> Result<Country, ApiError> {
        let matches: Vec<Country> = self.get(self.name_url(name)).await?;
        matches
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound(name.to_string()))
    }
}
