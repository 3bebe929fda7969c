pub mod config;
pub mod cookie;
pub mod models;
pub mod product;
pub mod search;
pub mod unblocker;

pub use config::{BrowserSettings, NaverConfig};
pub use cookie::{CookieError, CookieExtractor};
pub use models::{ProductDetails, ProductRef, ReviewPages, SearchHit};

use crate::http::{ProxyConfig, build_client_with_timeout, build_proxied_client};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use thiserror::Error;
use unblocker::ScrapeDo;

#[derive(Debug, Error)]
pub enum NaverError {
    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),
    #[error("http error: {0}")]
    Http(String),
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: &'static str, status: u16 },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
}

/// Supplies the marketplace session cookie used by the scraping calls.
#[async_trait]
pub trait CookieSource: Send + Sync {
    async fn session_cookie(&self) -> Result<String, CookieError>;
}

/// Marketplace operations the scrape pipeline depends on.
#[async_trait]
pub trait Marketplace: Send + Sync {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        cookie: &str,
    ) -> Result<Vec<SearchHit>, NaverError>;

    async fn product_details(&self, product: &ProductRef) -> Result<ProductDetails, NaverError>;

    async fn original_product_no(&self, product: &ProductRef) -> Result<String, NaverError>;

    async fn product_reviews(
        &self,
        product: &ProductRef,
        referer: Option<&str>,
        cookie: &str,
    ) -> Result<ReviewPages, NaverError>;

    async fn download_image(&self, url: &str) -> Result<Vec<u8>, NaverError>;
}

/// HTTP client for Naver Shopping and SmartStore.
///
/// Search, details and reviews go through the scrape.do unblocking API;
/// channel lookups and image downloads use the residential proxy.
#[derive(Clone)]
pub struct NaverClient {
    config: Arc<NaverConfig>,
    unblocker: ScrapeDo,
    http: Client,
    proxied: Client,
}

impl NaverClient {
    pub fn new(config: NaverConfig, proxy: Option<ProxyConfig>) -> Self {
        let unblocker = ScrapeDo::new(
            config.scrape_do_base.clone(),
            config.scrape_do_token.clone(),
        );
        Self {
            config: Arc::new(config),
            unblocker,
            http: build_client_with_timeout("SCRAPEDO_TIMEOUT_SECS", 90),
            proxied: build_proxied_client(proxy.as_ref()),
        }
    }

    pub fn from_env() -> Self {
        Self::new(NaverConfig::from_env(), ProxyConfig::from_env())
    }

    pub fn config(&self) -> &NaverConfig {
        &self.config
    }
}

#[async_trait]
impl Marketplace for NaverClient {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        cookie: &str,
    ) -> Result<Vec<SearchHit>, NaverError> {
        self.search_products(query, limit, cookie).await
    }

    async fn product_details(&self, product: &ProductRef) -> Result<ProductDetails, NaverError> {
        NaverClient::product_details(self, product).await
    }

    async fn original_product_no(&self, product: &ProductRef) -> Result<String, NaverError> {
        NaverClient::original_product_no(self, product).await
    }

    async fn product_reviews(
        &self,
        product: &ProductRef,
        referer: Option<&str>,
        cookie: &str,
    ) -> Result<ReviewPages, NaverError> {
        NaverClient::product_reviews(self, product, referer, cookie).await
    }

    async fn download_image(&self, url: &str) -> Result<Vec<u8>, NaverError> {
        NaverClient::download_image(self, url).await
    }
}

fn http_error(err: reqwest::Error) -> NaverError {
    NaverError::Http(err.to_string())
}
