use super::config::{CHANNEL_LOOKUP_HEADERS, SEARCH_HEADERS, SEARCH_REFERER_BASE};
use super::models::{ChannelLookup, SearchEnvelope, SearchHit};
use super::unblocker::WrapOptions;
use super::{NaverClient, NaverError, http_error};
use tracing::{debug, warn};
use urlencoding::encode;

impl NaverClient {
    /// Runs a keyword search and resolves the channel uid of each hit.
    ///
    /// A hit without a PC product URL fails the whole search, since none of the
    /// per-product calls can be made for it.
    pub async fn search_products(
        &self,
        query: &str,
        num_results: usize,
        cookie: &str,
    ) -> Result<Vec<SearchHit>, NaverError> {
        let target = self.search_target(query);
        let url = self.unblocker.wrap(&target, WrapOptions::KOREA_WITH_HEADERS)?;

        let mut request = self.http.get(url);
        for (name, value) in SEARCH_HEADERS {
            request = request.header(*name, *value);
        }
        let response = request
            .header("cookie", cookie)
            .header("referer", format!("{SEARCH_REFERER_BASE}{}", encode(query)))
            .send()
            .await
            .map_err(http_error)?;

        let status = response.status();
        debug!(target = "scout.naver", status = status.as_u16(), query, "product_search_response");
        if !status.is_success() {
            return Err(NaverError::Status {
                endpoint: "search",
                status: status.as_u16(),
            });
        }

        let envelope: SearchEnvelope = response
            .json()
            .await
            .map_err(|err| NaverError::InvalidResponse(err.to_string()))?;

        let mut hits = Vec::new();
        for card in envelope.data.data.into_iter().take(num_results) {
            let mut hit = SearchHit {
                product: card.card.product,
                channel_uid: None,
            };
            let pc_url = hit
                .pc_url()
                .map(str::to_string)
                .ok_or(NaverError::MissingField("pcUrl"))?;
            hit.channel_uid = self.channel_uid(&pc_url, cookie).await;
            hits.push(hit);
        }
        Ok(hits)
    }

    /// Looks up the storefront uid for a product URL; failures yield `None`.
    pub async fn channel_uid(&self, pc_url: &str, cookie: &str) -> Option<String> {
        let product_id = pc_url.rsplit('/').next().unwrap_or_default();
        let mut request = self.proxied.get(&self.config.channel_lookup_url).query(&[
            ("excludeSoldOut", "true"),
            ("includeNewShoppingExposureYn", "true"),
            ("includeGroupProduct", "false"),
            ("ids", product_id),
        ]);
        for (name, value) in CHANNEL_LOOKUP_HEADERS {
            request = request.header(*name, *value);
        }
        if !cookie.is_empty() {
            request = request.header("cookie", cookie);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(target = "scout.naver", product_id, error = %err, "channel_lookup_failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(
                target = "scout.naver",
                product_id,
                status = response.status().as_u16(),
                "channel_lookup_rejected"
            );
            return None;
        }
        let lookup: ChannelLookup = response.json().await.ok()?;
        lookup.data.into_iter().next()?.channel_uid
    }

    fn search_target(&self, query: &str) -> String {
        let page_size = self.config.search_page_size.to_string();
        let params: [(&str, &str); 10] = [
            ("hiddenNonProductCard", "false"),
            ("hasMoreAd", "true"),
            ("cursor", "1"),
            ("pageSize", &page_size),
            ("query", query),
            ("searchMethod", "all.basic"),
            ("isFreshCategory", "false"),
            ("isOriginalQuerySearch", "false"),
            ("isCatalogDiversifyOff", "true"),
            ("listPage", "1"),
        ];
        let query_string = params
            .iter()
            .map(|(key, value)| format!("{key}={}", encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query_string}", self.config.search_url)
    }
}
