use crate::images::{prepare_upload, product_id_from_url};
use crate::models::{NewResultItem, ScrapeReport, Search, StageReport};
use crate::naver::{CookieSource, Marketplace, ProductDetails, ProductRef, ReviewPages, SearchHit};
use crate::spaces::{ObjectStore, detail_image_key};
use crate::storage::{StorageError, Store};
use serde_json::{Value, json};
use std::{collections::HashSet, future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<PipelineConfig>,
    store: Store,
    cookies: Arc<dyn CookieSource>,
    marketplace: Arc<dyn Marketplace>,
    objects: Option<Arc<dyn ObjectStore>>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub num_results: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { num_results: 5 }
    }
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        store: Store,
        cookies: Arc<dyn CookieSource>,
        marketplace: Arc<dyn Marketplace>,
        objects: Option<Arc<dyn ObjectStore>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            cookies,
            marketplace,
            objects,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Scrapes the marketplace for a stored search and persists the top listing.
    pub async fn run_scrape(&self, search_id: i64) -> Result<ScrapeReport, PipelineError> {
        let mut stages = Vec::new();
        let search = self
            .store
            .get_search(search_id)
            .map_err(storage_error("load_search"))?;

        let cookie = self
            .capture_stage("extract_cookie", &mut stages, async {
                let cookie = self
                    .cookies
                    .session_cookie()
                    .await
                    .map_err(|err| PipelineError::upstream("extract_cookie", err.to_string()))?;
                let len = cookie.len();
                Ok(StageOutcome::new(cookie, json!({ "cookie_length": len })))
            })
            .await?;

        let result_id = self
            .capture_stage("create_result", &mut stages, async {
                let result = self
                    .store
                    .create_result(search.id)
                    .map_err(storage_error("create_result"))?;
                let output = json!({ "result_id": result.id });
                Ok(StageOutcome::new(result.id, output))
            })
            .await?;

        let hits = match self
            .capture_stage(
                "search_products",
                &mut stages,
                self.search_products(&search, &cookie),
            )
            .await
        {
            Ok(hits) => hits,
            Err(err) => {
                self.discard_result(result_id);
                return Err(err);
            }
        };
        // Only the top listing is scraped in depth.
        let Some(top) = hits.into_iter().next() else {
            self.discard_result(result_id);
            return Err(PipelineError::upstream("search_products", "no_products"));
        };

        let item_id = match self
            .capture_stage("save_item", &mut stages, async {
                let fields: NewResultItem = top.to_new_item();
                let item = self
                    .store
                    .create_result_item(result_id, &fields)
                    .map_err(storage_error("save_item"))?;
                let output = json!({
                    "result_item_id": item.id,
                    "seller": item.fields.seller,
                    "product": item.fields.product,
                });
                Ok(StageOutcome::new(item.id, output))
            })
            .await
        {
            Ok(id) => id,
            Err(err) => {
                self.discard_result(result_id);
                return Err(err);
            }
        };

        let product = self.product_ref(&top).await;
        let details = self
            .capture_stage("fetch_details", &mut stages, self.fetch_details(&product))
            .await?;

        let product_id = product_id_from_url(top.pc_url().unwrap_or_default());
        self.capture_stage(
            "store_images",
            &mut stages,
            self.store_images(item_id, &product_id, &details.image_urls),
        )
        .await?;

        let pages = self
            .capture_stage(
                "fetch_reviews",
                &mut stages,
                self.fetch_reviews(&product, details.referer.as_deref(), &cookie),
            )
            .await?;
        self.capture_stage("save_reviews", &mut stages, async {
            let reviews = pages.into_reviews();
            let mut saved = 0usize;
            for review in &reviews {
                if self
                    .store
                    .add_review(item_id, review)
                    .map_err(storage_error("save_reviews"))?
                {
                    saved += 1;
                }
            }
            Ok(StageOutcome::new(
                (),
                json!({ "received": reviews.len(), "saved": saved }),
            ))
        })
        .await?;

        info!(
            target = "scout.pipeline",
            search_id,
            result_id,
            result_item_id = item_id,
            "scrape_completed"
        );
        Ok(ScrapeReport {
            search_id,
            result_id,
            result_item_id: Some(item_id),
            stages,
        })
    }

    async fn search_products(
        &self,
        search: &Search,
        cookie: &str,
    ) -> Result<StageOutcome<Vec<SearchHit>>, PipelineError> {
        let hits = self
            .marketplace
            .search(&search.keyword, self.config.num_results, cookie)
            .await
            .map_err(|err| PipelineError::upstream("search_products", err.to_string()))?;
        if hits.is_empty() {
            return Err(PipelineError::upstream("search_products", "no_products"));
        }
        self.store
            .set_result_count(search.id, hits.len() as u32)
            .map_err(storage_error("search_products"))?;
        let output = json!({
            "keyword": search.keyword,
            "hits": hits.len(),
            "top_product": hits[0].product.product_name,
            "channel_uid": hits[0].channel_uid,
        });
        Ok(StageOutcome::new(hits, output))
    }

    async fn product_ref(&self, hit: &SearchHit) -> ProductRef {
        let mut product = hit.product_ref();
        if product.original_product_no.is_empty() {
            match self.marketplace.original_product_no(&product).await {
                Ok(number) => product.original_product_no = number,
                Err(err) => warn!(
                    target = "scout.pipeline",
                    product_id = %product.product_id,
                    error = %err,
                    "original_product_no_lookup_failed"
                ),
            }
        }
        product
    }

    async fn fetch_details(
        &self,
        product: &ProductRef,
    ) -> Result<StageOutcome<ProductDetails>, PipelineError> {
        match self.marketplace.product_details(product).await {
            Ok(details) => {
                let output = json!({
                    "image_count": details.image_urls.len(),
                    "referer": details.referer,
                });
                Ok(StageOutcome::new(details, output))
            }
            Err(err) => {
                warn!(
                    target = "scout.pipeline",
                    product_id = %product.product_id,
                    error = %err,
                    "product_details_failed"
                );
                Ok(StageOutcome::new(
                    ProductDetails::default(),
                    json!({ "image_count": 0, "error": err.to_string() }),
                ))
            }
        }
    }

    async fn store_images(
        &self,
        item_id: i64,
        product_id: &str,
        urls: &[String],
    ) -> Result<StageOutcome<usize>, PipelineError> {
        let Some(objects) = self.objects.as_ref() else {
            warn!(target = "scout.pipeline", item_id, "object_storage_not_configured");
            return Ok(StageOutcome::new(
                0,
                json!({ "stored": 0, "skipped": "object storage not configured" }),
            ));
        };

        let mut seen = HashSet::new();
        let unique: Vec<&String> = urls.iter().filter(|url| seen.insert(url.as_str())).collect();

        let mut counter = 1u32;
        let mut order = 0u32;
        let mut failures = 0usize;
        for url in &unique {
            let bytes = match self.marketplace.download_image(url).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(target = "scout.pipeline", url = %url, error = %err, "image_download_failed");
                    failures += 1;
                    continue;
                }
            };
            let file_number = counter;
            counter += 1;

            let prepared = match prepare_upload(product_id, file_number, url, bytes) {
                Ok(prepared) => prepared,
                Err(err) => {
                    warn!(target = "scout.pipeline", url = %url, error = %err, "image_convert_failed");
                    failures += 1;
                    continue;
                }
            };
            let key = detail_image_key(&prepared.file_name);
            let public_url = match objects
                .put_public(&key, &prepared.bytes, prepared.content_type)
                .await
            {
                Ok(public_url) => public_url,
                Err(err) => {
                    warn!(target = "scout.pipeline", key = %key, error = %err, "image_upload_failed");
                    failures += 1;
                    continue;
                }
            };

            match self.store.add_detail_image(item_id, &public_url, order) {
                Ok(Some(_)) => order += 1,
                Ok(None) => {}
                Err(err) => {
                    warn!(target = "scout.pipeline", url = %public_url, error = %err, "image_persist_failed");
                    failures += 1;
                }
            }
        }

        let stored = order as usize;
        Ok(StageOutcome::new(
            stored,
            json!({ "found": unique.len(), "stored": stored, "failed": failures }),
        ))
    }

    async fn fetch_reviews(
        &self,
        product: &ProductRef,
        referer: Option<&str>,
        cookie: &str,
    ) -> Result<StageOutcome<ReviewPages>, PipelineError> {
        match self
            .marketplace
            .product_reviews(product, referer, cookie)
            .await
        {
            Ok(pages) => {
                let output = json!({
                    "top": pages.top.contents.len(),
                    "worst": pages.worst.contents.len(),
                });
                Ok(StageOutcome::new(pages, output))
            }
            Err(err) => {
                warn!(
                    target = "scout.pipeline",
                    product_id = %product.product_id,
                    error = %err,
                    "product_reviews_failed"
                );
                Ok(StageOutcome::new(
                    ReviewPages::default(),
                    json!({ "top": 0, "worst": 0, "error": err.to_string() }),
                ))
            }
        }
    }

    fn discard_result(&self, result_id: i64) {
        if let Err(err) = self.store.delete_result(result_id) {
            warn!(target = "scout.pipeline", result_id, error = %err, "result_cleanup_failed");
        }
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    NotFound,
    /// A marketplace, browser or model call failed; worth retrying.
    Upstream,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::InvalidInput)
    }

    pub fn not_found(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::NotFound)
    }

    pub fn upstream(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::Upstream)
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::Internal)
    }

    fn new(stage: &'static str, message: impl Into<String>, kind: PipelineErrorKind) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == PipelineErrorKind::Upstream
    }
}

/// Maps storage failures onto the stage that hit them.
pub fn storage_error(stage: &'static str) -> impl Fn(StorageError) -> PipelineError {
    move |err| match err {
        StorageError::NotFound(what) => PipelineError::not_found(stage, format!("{what} not found")),
        other => PipelineError::internal(stage, other.to_string()),
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    pub fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use crate::naver::{
        CookieError, CookieSource, Marketplace, NaverError, ProductDetails, ProductRef,
        ReviewPages, SearchHit,
    };
    use crate::spaces::{ObjectStore, SpacesError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    pub struct FakeCookies {
        pub fail: bool,
    }

    #[async_trait]
    impl CookieSource for FakeCookies {
        async fn session_cookie(&self) -> Result<String, CookieError> {
            if self.fail {
                Err(CookieError::NotCaptured)
            } else {
                Ok("NNB=fake".into())
            }
        }
    }

    #[derive(Default)]
    pub struct FakeMarket {
        pub hits: Vec<SearchHit>,
        pub image_urls: Vec<String>,
        pub fail_details: bool,
        pub fail_reviews: bool,
    }

    pub fn hit(product_id: &str) -> SearchHit {
        SearchHit {
            product: serde_json::from_value(json!({
                "mallName": "Mall",
                "productName": format!("Widget {product_id}"),
                "salePrice": 20000,
                "discountedSalePrice": 15000,
                "productUrl": {"pcUrl": format!("https://smartstore.naver.com/mall/products/{product_id}")},
                "channelProductId": product_id,
                "originalMallProductId": "777",
                "naverPaySellerNo": "123"
            }))
            .expect("card product"),
            channel_uid: Some("uid".into()),
        }
    }

    #[async_trait]
    impl Marketplace for FakeMarket {
        async fn search(
            &self,
            _query: &str,
            limit: usize,
            _cookie: &str,
        ) -> Result<Vec<SearchHit>, NaverError> {
            Ok(self.hits.iter().take(limit).cloned().collect())
        }

        async fn product_details(&self, _product: &ProductRef) -> Result<ProductDetails, NaverError> {
            if self.fail_details {
                return Err(NaverError::Status {
                    endpoint: "product_contents",
                    status: 500,
                });
            }
            Ok(ProductDetails {
                image_urls: self.image_urls.clone(),
                referer: Some("https://smartstore.naver.com/mall".into()),
            })
        }

        async fn original_product_no(&self, _product: &ProductRef) -> Result<String, NaverError> {
            Ok("9001".into())
        }

        async fn product_reviews(
            &self,
            _product: &ProductRef,
            _referer: Option<&str>,
            _cookie: &str,
        ) -> Result<ReviewPages, NaverError> {
            if self.fail_reviews {
                return Err(NaverError::Http("reset".into()));
            }
            Ok(ReviewPages {
                top: serde_json::from_value(json!({"contents": [{"id": "t1", "reviewScore": 5}]}))
                    .expect("page"),
                worst: serde_json::from_value(json!({"contents": [{"id": "w1", "reviewScore": 1}]}))
                    .expect("page"),
            })
        }

        async fn download_image(&self, url: &str) -> Result<Vec<u8>, NaverError> {
            if url.contains("missing") {
                return Err(NaverError::Status {
                    endpoint: "image",
                    status: 404,
                });
            }
            Ok(vec![1, 2, 3])
        }
    }

    #[derive(Default)]
    pub struct FakeObjects {
        pub keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStore for FakeObjects {
        async fn put_public(
            &self,
            key: &str,
            _bytes: &[u8],
            _content_type: &str,
        ) -> Result<String, SpacesError> {
            if key.contains("_3.") {
                return Err(SpacesError::Status {
                    key: key.to_string(),
                    status: 503,
                });
            }
            self.keys.lock().expect("keys").push(key.to_string());
            Ok(format!("https://cdn.test/{key}"))
        }
    }
}
