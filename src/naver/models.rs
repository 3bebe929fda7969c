use crate::models::{NewResultItem, NewReview, ReviewType};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

#[derive(Debug, Default, Deserialize)]
pub struct SearchEnvelope {
    #[serde(default)]
    pub data: SearchData,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchData {
    #[serde(default)]
    pub data: Vec<SearchCard>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchCard {
    #[serde(default)]
    pub card: CardBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardBody {
    #[serde(default)]
    pub product: CardProduct,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardProduct {
    #[serde(default, deserialize_with = "lenient_string")]
    pub mall_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub product_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub sale_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub discounted_sale_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub discounted_ratio: Option<f64>,
    #[serde(default)]
    pub product_delivery_info: Option<DeliveryInfo>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub total_review_count: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub average_review_score: Option<f64>,
    #[serde(default)]
    pub product_url: Option<ProductUrl>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub channel_product_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub original_mall_product_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub naver_pay_seller_no: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryInfo {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub base_fee: Option<f64>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductUrl {
    #[serde(default)]
    pub pc_url: Option<String>,
}

/// Identifiers needed for the per-product SmartStore calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProductRef {
    pub channel_uid: Option<String>,
    pub product_id: String,
    pub original_product_no: String,
    pub checkout_merchant_no: String,
}

/// One search result with its resolved channel uid.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub product: CardProduct,
    pub channel_uid: Option<String>,
}

impl SearchHit {
    pub fn pc_url(&self) -> Option<&str> {
        self.product
            .product_url
            .as_ref()
            .and_then(|url| url.pc_url.as_deref())
            .filter(|url| !url.is_empty())
    }

    pub fn to_new_item(&self) -> NewResultItem {
        let p = &self.product;
        NewResultItem {
            seller: p.mall_name.clone().unwrap_or_default(),
            product: p.product_name.clone().unwrap_or_default(),
            original_price: Some(p.sale_price.unwrap_or(0.0)),
            sale_price: Some(p.discounted_sale_price.unwrap_or(0.0)),
            discount: Some(p.discounted_ratio.unwrap_or(0.0)),
            shipping: Some(
                p.product_delivery_info
                    .as_ref()
                    .and_then(|info| info.base_fee)
                    .unwrap_or(0.0),
            ),
            review_count: p.total_review_count.unwrap_or(0.0).max(0.0) as u32,
            rating: Some(p.average_review_score.unwrap_or(0.0)),
            product_url: Some(self.pc_url().unwrap_or_default().to_string()),
        }
    }

    pub fn product_ref(&self) -> ProductRef {
        let p = &self.product;
        ProductRef {
            channel_uid: self.channel_uid.clone(),
            product_id: p.channel_product_id.clone().unwrap_or_default(),
            original_product_no: p.original_mall_product_id.clone().unwrap_or_default(),
            checkout_merchant_no: p.naver_pay_seller_no.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChannelLookup {
    #[serde(default)]
    pub data: Vec<ChannelProduct>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProduct {
    #[serde(default, deserialize_with = "lenient_string")]
    pub channel_uid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedContents {
    #[serde(default)]
    pub render_content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    #[serde(default, deserialize_with = "lenient_string")]
    pub product_no: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQuery<'a> {
    pub checkout_merchant_no: &'a str,
    pub origin_product_no: &'a str,
    pub page: u32,
    pub page_size: u32,
    pub review_search_sort_type: &'static str,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewPage {
    #[serde(default)]
    pub contents: Vec<RawReview>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReview {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub writer_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub review_content: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub review_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub create_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub help_count: Option<f64>,
}

impl RawReview {
    pub fn to_new_review(&self, review_type: ReviewType) -> NewReview {
        NewReview {
            review_id: self.id.clone().unwrap_or_default(),
            username: self.writer_id.clone().unwrap_or_default(),
            content: self.review_content.clone().unwrap_or_default(),
            rating: self.review_score.unwrap_or(0.0),
            review_type,
            date: self.create_date.clone().unwrap_or_default(),
            helpful_count: self.help_count.unwrap_or(0.0).max(0.0) as u32,
        }
    }
}

/// Best-rated and worst-rated review pages of a product.
#[derive(Debug, Clone, Default)]
pub struct ReviewPages {
    pub top: ReviewPage,
    pub worst: ReviewPage,
}

impl ReviewPages {
    pub fn into_reviews(self) -> Vec<NewReview> {
        self.top
            .contents
            .iter()
            .map(|r| r.to_new_review(ReviewType::Top))
            .chain(
                self.worst
                    .contents
                    .iter()
                    .map(|r| r.to_new_review(ReviewType::Worst)),
            )
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProductDetails {
    pub image_urls: Vec<String>,
    pub referer: Option<String>,
}

// Marketplace payloads mix numbers and numeric strings for the same field.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    })
}
