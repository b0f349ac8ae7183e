use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use url::Url;

use crate::http::{HttpError, HttpRequest, HttpTransport};

use super::errors::{FetchError, parse_retry_after};
use super::types::{ListingPage, ListingSource};

/// Default page size requested from the remote.
pub const DEFAULT_PER_PAGE: u32 = 25;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for [`AuctionApiClient`].
#[derive(Debug, Clone)]
pub struct AuctionApiConfig {
    /// API root; `cars` is appended to it.
    pub base_url: String,
    /// Sent as `x-api-key` when set.
    pub api_key: Option<String>,
    pub per_page: u32,
    pub source_site: String,
    pub timeout: Duration,
}

impl AuctionApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            per_page: DEFAULT_PER_PAGE,
            source_site: "auction".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_source_site(mut self, source_site: impl Into<String>) -> Self {
        self.source_site = source_site.into();
        self
    }

    #[must_use]
    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }
}

/// Client for the remote auction listing API.
#[derive(Clone)]
pub struct AuctionApiClient {
    transport: Arc<dyn HttpTransport>,
    cars_url: Url,
    api_key: Option<String>,
    per_page: u32,
    source_site: String,
    timeout: Duration,
}

impl AuctionApiClient {
    /// Build a client over an explicit transport.
    ///
    /// # Errors
    /// `FetchError::Config` for an unparseable base URL, an empty source site, or
    /// an API key that cannot be sent as a header value.
    pub fn new(
        config: AuctionApiConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, FetchError> {
        let mut base = Url::parse(config.base_url.trim())
            .map_err(|e| FetchError::config(format!("invalid base URL {:?}: {e}", config.base_url)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(FetchError::config(format!(
                "unsupported URL scheme {:?}",
                base.scheme()
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let cars_url = base
            .join("cars")
            .map_err(|e| FetchError::config(e.to_string()))?;

        let api_key = match config.api_key {
            Some(key) if key.trim().is_empty() => None,
            Some(key) => {
                if key.chars().any(|c| c.is_control() || c.is_whitespace()) {
                    return Err(FetchError::config("API key contains invalid characters"));
                }
                Some(key)
            }
            None => None,
        };

        if config.source_site.trim().is_empty() {
            return Err(FetchError::config("source site must not be empty"));
        }

        Ok(Self {
            transport,
            cars_url,
            api_key,
            per_page: config.per_page.clamp(1, 1_000),
            source_site: config.source_site,
            timeout: config.timeout,
        })
    }

    /// Build a client over reqwest.
    #[cfg(feature = "client")]
    pub fn from_config(config: AuctionApiConfig) -> Result<Self, FetchError> {
        let transport =
            crate::http::reqwest_transport::ReqwestTransport::with_timeout(config.timeout)
                .map_err(|e| FetchError::config(e.to_string()))?;
        Self::new(config, Arc::new(transport))
    }

    /// URL of a listing page.
    pub fn page_url(&self, page: u32) -> String {
        let mut url = self.cars_url.clone();
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &self.per_page.to_string());
        url.into()
    }

    #[inline]
    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    fn request(&self, page: u32) -> HttpRequest {
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        if let Some(key) = &self.api_key {
            headers.push(("x-api-key".to_string(), key.clone()));
        }
        HttpRequest {
            url: self.page_url(page),
            headers,
        }
    }
}

#[async_trait]
impl ListingSource for AuctionApiClient {
    fn source_site(&self) -> &str {
        &self.source_site
    }

    async fn fetch_page(&self, page: u32) -> Result<ListingPage, FetchError> {
        let response = self
            .transport
            .get(self.request(page))
            .await
            .map_err(|e| match e {
                HttpError::Timeout(_) => FetchError::Timeout {
                    after: self.timeout,
                },
                other => FetchError::network(other.to_string()),
            })?;

        if response.status == 404 {
            // Past the end on some deployments; counts as an empty page.
            tracing::debug!(page, "remote returned 404, treating as empty page");
            return Ok(ListingPage::empty(page));
        }

        if !response.is_success() {
            let retry_after = response
                .header("retry-after")
                .and_then(|v| parse_retry_after(v, Utc::now()));
            return Err(FetchError::from_status(response.status, retry_after));
        }

        ListingPage::from_body(page, &response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::error_category::ErrorCategory;
    use crate::http::{HttpResponse, MockTransport};
    use serde_json::json;

    fn client(transport: &MockTransport) -> AuctionApiClient {
        AuctionApiClient::new(
            AuctionApiConfig::new("https://api.example.com/v2")
                .with_api_key("secret")
                .with_per_page(50)
                .with_source_site("copart"),
            Arc::new(transport.clone()),
        )
        .expect("valid config")
    }

    #[test]
    fn test_page_url_keeps_base_path() {
        let transport = MockTransport::new();
        let client = client(&transport);
        assert_eq!(
            client.page_url(3),
            "https://api.example.com/v2/cars?page=3&per_page=50"
        );
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let transport: Arc<dyn HttpTransport> = Arc::new(MockTransport::new());
        let err = AuctionApiClient::new(AuctionApiConfig::new("not a url"), Arc::clone(&transport))
            .err()
            .expect("bad url");
        assert_eq!(err.category(), ErrorCategory::Fatal);

        let err = AuctionApiClient::new(
            AuctionApiConfig::new("https://api.example.com").with_api_key("has space"),
            transport,
        )
        .err()
        .expect("bad key");
        assert!(matches!(err, FetchError::Config { .. }));
    }

    #[tokio::test]
    async fn test_fetch_page_sends_api_key_and_parses_meta() {
        let transport = MockTransport::new();
        let client = client(&transport);
        transport.push_json(
            client.page_url(1),
            200,
            json!({"data": [{"id": "1"}, {"id": "2"}], "meta": {"total": 100, "last_page": 2}}),
        );

        let page = client.fetch_page(1).await.expect("page");
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.meta.total, Some(100));
        assert_eq!(page.meta.last_page, Some(2));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            crate::http::header_get(&requests[0].headers, "x-api-key"),
            Some("secret")
        );
    }

    #[tokio::test]
    async fn test_fetch_page_classifies_statuses() {
        let transport = MockTransport::new();
        let client = client(&transport);
        let url = client.page_url(7);

        transport.push_response(
            url.clone(),
            HttpResponse {
                status: 429,
                headers: vec![("Retry-After".to_string(), "9".to_string())],
                body: Vec::new(),
            },
        );
        transport.push_json(url.clone(), 401, json!({"message": "bad key"}));
        transport.push_json(url.clone(), 502, json!({}));
        transport.push_json(url.clone(), 404, json!({}));
        transport.push_transport_error(url, "connection reset");

        let err = client.fetch_page(7).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(9)));
        assert!(client.fetch_page(7).await.unwrap_err().is_fatal());
        assert!(client.fetch_page(7).await.unwrap_err().is_retryable());
        assert!(client.fetch_page(7).await.unwrap().is_empty());
        assert!(matches!(
            client.fetch_page(7).await.unwrap_err(),
            FetchError::Network { .. }
        ));
    }

    #[tokio::test]
    async fn test_fetch_page_decode_failure_is_partial_data() {
        let transport = MockTransport::new();
        let client = client(&transport);
        transport.push_response(
            client.page_url(1),
            HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: b"<html>maintenance</html>".to_vec(),
            },
        );

        let err = client.fetch_page(1).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::PartialData);
    }
}
