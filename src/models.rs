use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    Naver,
    Coupang,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Naver => "naver",
            Channel::Coupang => "coupang",
        }
    }

    pub fn from_str(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "naver" => Some(Channel::Naver),
            "coupang" => Some(Channel::Coupang),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DetailCategory {
    ProductOption,
    ProductDescription,
    Specifications,
    UsageGuide,
    Ingredients,
    SizeChart,
    Warranty,
    Other,
}

impl DetailCategory {
    pub const ALL: [DetailCategory; 8] = [
        DetailCategory::ProductOption,
        DetailCategory::ProductDescription,
        DetailCategory::Specifications,
        DetailCategory::UsageGuide,
        DetailCategory::Ingredients,
        DetailCategory::SizeChart,
        DetailCategory::Warranty,
        DetailCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetailCategory::ProductOption => "product_option",
            DetailCategory::ProductDescription => "product_description",
            DetailCategory::Specifications => "specifications",
            DetailCategory::UsageGuide => "usage_guide",
            DetailCategory::Ingredients => "ingredients",
            DetailCategory::SizeChart => "size_chart",
            DetailCategory::Warranty => "warranty",
            DetailCategory::Other => "other",
        }
    }

    pub fn from_str(input: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == input.trim())
    }

    pub fn label(&self) -> &'static str {
        match self {
            DetailCategory::ProductOption => "Product Option",
            DetailCategory::ProductDescription => "Product Description",
            DetailCategory::Specifications => "Specifications",
            DetailCategory::UsageGuide => "Usage Guide",
            DetailCategory::Ingredients => "Ingredients",
            DetailCategory::SizeChart => "Size Chart",
            DetailCategory::Warranty => "Warranty",
            DetailCategory::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewType {
    Top,
    Worst,
}

impl ReviewType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewType::Top => "top",
            ReviewType::Worst => "worst",
        }
    }

    pub fn from_str(input: &str) -> Option<Self> {
        match input {
            "top" => Some(ReviewType::Top),
            "worst" => Some(ReviewType::Worst),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::InProgress => "in_progress",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }

    pub fn from_str(input: &str) -> Option<Self> {
        match input {
            "pending" => Some(AnalysisStatus::Pending),
            "in_progress" => Some(AnalysisStatus::InProgress),
            "completed" => Some(AnalysisStatus::Completed),
            "failed" => Some(AnalysisStatus::Failed),
            _ => None,
        }
    }
}

/// A keyword search made by a user.
#[derive(Debug, Clone, Serialize)]
pub struct Search {
    pub id: i64,
    pub user_id: String,
    pub channel: Channel,
    pub keyword: String,
    pub result_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Container for one scrape run of a search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: i64,
    pub search_id: i64,
    pub analysis_status: AnalysisStatus,
    pub created_at: DateTime<Utc>,
}

/// Listing fields persisted for a scraped product.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewResultItem {
    pub seller: String,
    pub product: String,
    pub original_price: Option<f64>,
    pub sale_price: Option<f64>,
    pub discount: Option<f64>,
    pub shipping: Option<f64>,
    pub review_count: u32,
    pub rating: Option<f64>,
    pub product_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultItem {
    pub id: i64,
    pub result_id: i64,
    #[serde(flatten)]
    pub fields: NewResultItem,
    pub analysis_status: AnalysisStatus,
    pub starred: bool,
    pub discount_percentage: f64,
    pub created_at: DateTime<Utc>,
}

impl ResultItem {
    pub fn discount_percentage(fields: &NewResultItem) -> f64 {
        match (fields.original_price, fields.sale_price) {
            (Some(original), Some(sale)) if original != 0.0 && sale != 0.0 => {
                (((original - sale) / original * 100.0) * 100.0).round() / 100.0
            }
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailImage {
    pub id: i64,
    pub result_item_id: i64,
    pub url: String,
    pub section: Option<u32>,
    pub category: Option<DetailCategory>,
    pub description: String,
    pub order: u32,
    pub is_analyzed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewReview {
    pub review_id: String,
    pub username: String,
    pub content: String,
    pub rating: f64,
    pub review_type: ReviewType,
    pub date: String,
    pub helpful_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Review {
    pub id: i64,
    pub result_item_id: i64,
    #[serde(flatten)]
    pub fields: NewReview,
    pub created_at: DateTime<Utc>,
}

/// LLM output for one (section, category) image group of a result item.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub id: i64,
    pub result_item_id: i64,
    pub section: u32,
    pub category: DetailCategory,
    pub result_json: Value,
    pub prompt_used: String,
    pub model_used: String,
    pub processing_time: Option<f64>,
    pub confidence_score: Option<f64>,
    pub status: AnalysisStatus,
    pub created_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn summary(&self) -> &str {
        self.result_json
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn key_points(&self) -> Vec<Value> {
        self.result_json
            .get("key_points")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageGroup {
    pub section: Option<u32>,
    pub category: Option<DetailCategory>,
    pub images: Vec<DetailImage>,
    pub image_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultItemDetail {
    #[serde(flatten)]
    pub item: ResultItem,
    pub detail_images: Vec<DetailImage>,
    pub reviews: Vec<Review>,
    pub analysis_results: Vec<AnalysisResult>,
}

// -------- request / response payloads --------

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub keyword: String,
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SearchCreated {
    pub search_id: i64,
    pub job_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageUpdate {
    pub id: i64,
    pub section: u32,
    pub category: DetailCategory,
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkImageUpdate {
    pub images: Vec<ImageUpdate>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct SectionRequest {
    pub section: u32,
    pub category: DetailCategory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisRequest {
    pub sections: Vec<SectionRequest>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt_template: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScrapeReport {
    pub search_id: i64,
    pub result_id: i64,
    pub result_item_id: Option<i64>,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn discount_percentage_rounds_to_two_places() {
        let fields = NewResultItem {
            original_price: Some(30000.0),
            sale_price: Some(19900.0),
            ..Default::default()
        };
        assert_eq!(ResultItem::discount_percentage(&fields), 33.67);
    }

    #[test]
    fn discount_percentage_without_prices_is_zero() {
        let fields = NewResultItem {
            sale_price: Some(100.0),
            ..Default::default()
        };
        assert_eq!(ResultItem::discount_percentage(&fields), 0.0);
    }

    #[test]
    fn discount_percentage_ignores_zero_prices() {
        let no_sale = NewResultItem {
            original_price: Some(20000.0),
            sale_price: Some(0.0),
            ..Default::default()
        };
        assert_eq!(ResultItem::discount_percentage(&no_sale), 0.0);

        let zero_original = NewResultItem {
            original_price: Some(0.0),
            sale_price: Some(15000.0),
            ..Default::default()
        };
        assert_eq!(ResultItem::discount_percentage(&zero_original), 0.0);

        let no_discount = NewResultItem {
            original_price: Some(15000.0),
            sale_price: Some(15000.0),
            ..Default::default()
        };
        assert_eq!(ResultItem::discount_percentage(&no_discount), 0.0);
    }

    #[test]
    fn detail_category_parses_wire_names() {
        assert_eq!(
            DetailCategory::from_str("size_chart"),
            Some(DetailCategory::SizeChart)
        );
        assert_eq!(DetailCategory::from_str("unknown"), None);
        let parsed: DetailCategory = serde_json::from_value(json!("usage_guide")).unwrap();
        assert_eq!(parsed, DetailCategory::UsageGuide);
    }

    #[test]
    fn analysis_summary_and_key_points() {
        let analysis = AnalysisResult {
            id: 1,
            result_item_id: 1,
            section: 1,
            category: DetailCategory::Other,
            result_json: json!({"summary": "sturdy", "key_points": ["a", "b"]}),
            prompt_used: String::new(),
            model_used: String::new(),
            processing_time: None,
            confidence_score: None,
            status: AnalysisStatus::Completed,
            created_at: Utc::now(),
        };
        assert_eq!(analysis.summary(), "sturdy");
        assert_eq!(analysis.key_points().len(), 2);
    }
}
