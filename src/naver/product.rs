use super::config::REVIEW_HEADERS;
use super::models::{
    ProductDetails, ProductRef, ProductSummary, RenderedContents, ReviewPage, ReviewPages,
    ReviewQuery,
};
use super::unblocker::WrapOptions;
use super::{NaverClient, NaverError, http_error};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

const REVIEW_SCORE_DESC: &str = "REVIEW_SCORE_DESC";
const REVIEW_SCORE_ASC: &str = "REVIEW_SCORE_ASC";

static IMAGE_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:data-src|src)\s*=\s*["'](https?://[^\s"'>]+)"#).expect("valid image regex")
});

static STORE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https://smartstore\.naver\.com/[^\s"'<>]+"#).expect("valid referer regex")
});

/// Absolute image URLs from `src` / `data-src` attributes, in document order.
pub fn parse_detail_images(html: &str) -> Vec<String> {
    IMAGE_ATTR
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

pub fn find_referer(html: &str) -> Option<String> {
    STORE_LINK.find(html).map(|m| m.as_str().to_string())
}

impl NaverClient {
    pub async fn product_details(&self, product: &ProductRef) -> Result<ProductDetails, NaverError> {
        let channel_uid = product
            .channel_uid
            .as_deref()
            .filter(|uid| !uid.is_empty())
            .ok_or(NaverError::MissingField("channelUid"))?;
        let target = format!(
            "{}/i/v2/channels/{}/products/{}/contents/{}/PC",
            self.config.smartstore_url, channel_uid, product.product_id, self.config.contents_id
        );
        let url = self.unblocker.wrap(&target, WrapOptions::default())?;
        let response = self.http.get(url).send().await.map_err(http_error)?;
        if !response.status().is_success() {
            return Err(NaverError::Status {
                endpoint: "product_contents",
                status: response.status().as_u16(),
            });
        }
        let contents: RenderedContents = response
            .json()
            .await
            .map_err(|err| NaverError::InvalidResponse(err.to_string()))?;
        let html = contents
            .render_content
            .ok_or(NaverError::MissingField("renderContent"))?;

        let details = ProductDetails {
            image_urls: parse_detail_images(&html),
            referer: find_referer(&html),
        };
        debug!(
            target = "scout.naver",
            product_id = %product.product_id,
            images = details.image_urls.len(),
            "product_details_parsed"
        );
        Ok(details)
    }

    /// Fetches the best-rated and worst-rated first review pages.
    pub async fn product_reviews(
        &self,
        product: &ProductRef,
        referer: Option<&str>,
        cookie: &str,
    ) -> Result<ReviewPages, NaverError> {
        let top = self
            .review_page(product, REVIEW_SCORE_DESC, referer, cookie)
            .await?;
        let worst = self
            .review_page(product, REVIEW_SCORE_ASC, referer, cookie)
            .await?;
        Ok(ReviewPages { top, worst })
    }

    async fn review_page(
        &self,
        product: &ProductRef,
        sort: &'static str,
        referer: Option<&str>,
        cookie: &str,
    ) -> Result<ReviewPage, NaverError> {
        let target = format!(
            "{}/i/v1/contents/reviews/query-pages",
            self.config.smartstore_url
        );
        let url = self.unblocker.wrap(&target, WrapOptions::KOREA_WITH_HEADERS)?;
        let body = ReviewQuery {
            checkout_merchant_no: &product.checkout_merchant_no,
            origin_product_no: &product.original_product_no,
            page: 1,
            page_size: self.config.review_page_size,
            review_search_sort_type: sort,
        };

        let mut request = self.http.post(url).json(&body);
        for (name, value) in REVIEW_HEADERS {
            request = request.header(*name, *value);
        }
        if !cookie.is_empty() {
            request = request.header("cookie", cookie);
        }
        if let Some(referer) = referer {
            request = request.header("referer", referer);
        }

        let response = request.send().await.map_err(http_error)?;
        if !response.status().is_success() {
            return Err(NaverError::Status {
                endpoint: "reviews",
                status: response.status().as_u16(),
            });
        }
        response
            .json()
            .await
            .map_err(|err| NaverError::InvalidResponse(err.to_string()))
    }

    /// Resolves the origin product number when the search card lacks it.
    pub async fn original_product_no(&self, product: &ProductRef) -> Result<String, NaverError> {
        let channel_uid = product
            .channel_uid
            .as_deref()
            .filter(|uid| !uid.is_empty())
            .ok_or(NaverError::MissingField("channelUid"))?;
        let target = format!(
            "{}/i/v2/channels/{}/products/{}?withWindow=false",
            self.config.smartstore_url, channel_uid, product.product_id
        );
        let url = self.unblocker.wrap(&target, WrapOptions::default())?;
        let response = self.http.get(url).send().await.map_err(http_error)?;
        if !response.status().is_success() {
            return Err(NaverError::Status {
                endpoint: "product",
                status: response.status().as_u16(),
            });
        }
        let summary: ProductSummary = response
            .json()
            .await
            .map_err(|err| NaverError::InvalidResponse(err.to_string()))?;
        summary
            .product_no
            .filter(|no| !no.is_empty())
            .ok_or(NaverError::MissingField("productNo"))
    }

    pub async fn download_image(&self, url: &str) -> Result<Vec<u8>, NaverError> {
        let response = self.proxied.get(url).send().await.map_err(http_error)?;
        if !response.status().is_success() {
            return Err(NaverError::Status {
                endpoint: "image",
                status: response.status().as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(http_error)?;
        Ok(bytes.to_vec())
    }
}
