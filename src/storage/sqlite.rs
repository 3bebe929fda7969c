use super::StorageError;
use crate::models::{
    AnalysisResult, AnalysisStatus, Channel, DetailCategory, DetailImage, ImageGroup,
    ImageUpdate, NewResultItem, NewReview, ResultItem, ResultItemDetail, Review, ReviewType,
    Search, SearchResult,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params, types::Type};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS searches (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        channel TEXT NOT NULL,
        keyword TEXT NOT NULL,
        result_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        search_id INTEGER NOT NULL REFERENCES searches(id) ON DELETE CASCADE,
        analysis_status TEXT NOT NULL DEFAULT 'pending',
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS result_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        result_id INTEGER NOT NULL REFERENCES results(id) ON DELETE CASCADE,
        seller TEXT NOT NULL,
        product TEXT NOT NULL,
        original_price REAL,
        sale_price REAL,
        discount REAL,
        shipping REAL,
        review_count INTEGER NOT NULL DEFAULT 0,
        rating REAL,
        product_url TEXT,
        analysis_status TEXT NOT NULL DEFAULT 'pending',
        starred INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS detail_images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        result_item_id INTEGER NOT NULL REFERENCES result_items(id) ON DELETE CASCADE,
        url TEXT NOT NULL,
        section INTEGER,
        category TEXT,
        description TEXT NOT NULL DEFAULT '',
        ord INTEGER NOT NULL DEFAULT 0,
        is_analyzed INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        UNIQUE (result_item_id, url)
    );

    CREATE TABLE IF NOT EXISTS reviews (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        result_item_id INTEGER NOT NULL REFERENCES result_items(id) ON DELETE CASCADE,
        review_id TEXT NOT NULL,
        username TEXT NOT NULL,
        content TEXT NOT NULL,
        rating REAL NOT NULL,
        review_type TEXT NOT NULL,
        date TEXT NOT NULL,
        helpful_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        UNIQUE (result_item_id, review_id, review_type)
    );

    CREATE TABLE IF NOT EXISTS analysis_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        result_item_id INTEGER NOT NULL REFERENCES result_items(id) ON DELETE CASCADE,
        section INTEGER NOT NULL,
        category TEXT NOT NULL,
        result_json TEXT NOT NULL DEFAULT '{}',
        prompt_used TEXT NOT NULL DEFAULT '',
        model_used TEXT NOT NULL DEFAULT '',
        processing_time REAL,
        confidence_score REAL,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at TEXT NOT NULL,
        UNIQUE (result_item_id, section, category)
    );

    CREATE TABLE IF NOT EXISTS prompts (
        category TEXT PRIMARY KEY,
        prompt TEXT NOT NULL
    );
";

const ITEM_COLUMNS: &str = "id, result_id, seller, product, original_price, sale_price, discount, \
     shipping, review_count, rating, product_url, analysis_status, starred, created_at";

const IMAGE_COLUMNS: &str =
    "id, result_item_id, url, section, category, description, ord, is_analyzed, created_at";

const REVIEW_COLUMNS: &str = "id, result_item_id, review_id, username, content, rating, \
     review_type, date, helpful_count, created_at";

const ANALYSIS_COLUMNS: &str = "id, result_item_id, section, category, result_json, prompt_used, \
     model_used, processing_time, confidence_score, status, created_at";

/// Values used when an analysis row has to be created.
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub model_used: String,
    pub prompt_used: String,
    pub result_json: Value,
}

/// SQLite-backed persistence for searches, scraped listings and analyses.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens the database at `path` and applies the schema.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        for category in DetailCategory::ALL {
            conn.execute(
                "INSERT OR IGNORE INTO prompts (category, prompt) VALUES (?1, ?2)",
                params![category.as_str(), default_prompt(category)],
            )?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    // -------- searches / results --------

    pub fn create_search(
        &self,
        user_id: &str,
        channel: Channel,
        keyword: &str,
    ) -> Result<Search, StorageError> {
        let conn = self.lock()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO searches (user_id, channel, keyword, result_count, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![user_id, channel.as_str(), keyword, now],
        )?;
        Ok(Search {
            id: conn.last_insert_rowid(),
            user_id: user_id.to_string(),
            channel,
            keyword: keyword.to_string(),
            result_count: 0,
            created_at: now,
        })
    }

    pub fn get_search(&self, id: i64) -> Result<Search, StorageError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, user_id, channel, keyword, result_count, created_at
             FROM searches WHERE id = ?1",
            params![id],
            |row| {
                Ok(Search {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    channel: parse_column(row, 2, Channel::from_str)?,
                    keyword: row.get(3)?,
                    result_count: row.get(4)?,
                    created_at: row.get(5)?,
                })
            },
        )
        .optional()?
        .ok_or(StorageError::NotFound("search"))
    }

    pub fn set_result_count(&self, search_id: i64, count: u32) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE searches SET result_count = ?1 WHERE id = ?2",
            params![count, search_id],
        )?;
        Ok(())
    }

    pub fn create_result(&self, search_id: i64) -> Result<SearchResult, StorageError> {
        let conn = self.lock()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO results (search_id, analysis_status, created_at) VALUES (?1, ?2, ?3)",
            params![search_id, AnalysisStatus::Pending.as_str(), now],
        )?;
        Ok(SearchResult {
            id: conn.last_insert_rowid(),
            search_id,
            analysis_status: AnalysisStatus::Pending,
            created_at: now,
        })
    }

    pub fn delete_result(&self, id: i64) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM results WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn count_results(&self, search_id: i64) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM results WHERE search_id = ?1",
            params![search_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // -------- result items --------

    pub fn create_result_item(
        &self,
        result_id: i64,
        fields: &NewResultItem,
    ) -> Result<ResultItem, StorageError> {
        let conn = self.lock()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO result_items (
                result_id, seller, product, original_price, sale_price, discount,
                shipping, review_count, rating, product_url, analysis_status, starred, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12)",
            params![
                result_id,
                &fields.seller,
                &fields.product,
                fields.original_price,
                fields.sale_price,
                fields.discount,
                fields.shipping,
                fields.review_count,
                fields.rating,
                &fields.product_url,
                AnalysisStatus::Pending.as_str(),
                now,
            ],
        )?;
        Ok(ResultItem {
            id: conn.last_insert_rowid(),
            result_id,
            fields: fields.clone(),
            analysis_status: AnalysisStatus::Pending,
            starred: false,
            discount_percentage: ResultItem::discount_percentage(fields),
            created_at: now,
        })
    }

    pub fn get_result_item(&self, id: i64) -> Result<ResultItem, StorageError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {ITEM_COLUMNS} FROM result_items WHERE id = ?1"),
            params![id],
            map_item,
        )
        .optional()?
        .ok_or(StorageError::NotFound("result item"))
    }

    pub fn list_items_for_search(&self, search_id: i64) -> Result<Vec<ResultItem>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT i.id, i.result_id, i.seller, i.product, i.original_price, i.sale_price,
                    i.discount, i.shipping, i.review_count, i.rating, i.product_url,
                    i.analysis_status, i.starred, i.created_at
             FROM result_items i JOIN results r ON r.id = i.result_id
             WHERE r.search_id = ?1
             ORDER BY i.created_at DESC, i.id DESC",
        )?;
        let rows = stmt.query_map(params![search_id], map_item)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn set_item_analysis_status(
        &self,
        item_id: i64,
        status: AnalysisStatus,
    ) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE result_items SET analysis_status = ?1 WHERE id = ?2",
            params![status.as_str(), item_id],
        )?;
        Ok(())
    }

    pub fn result_item_detail(&self, id: i64) -> Result<ResultItemDetail, StorageError> {
        let item = self.get_result_item(id)?;
        Ok(ResultItemDetail {
            detail_images: self.list_images(id)?,
            reviews: self.list_reviews(id)?,
            analysis_results: self.list_analyses(id)?,
            item,
        })
    }

    // -------- detail images --------

    /// Returns `None` when the item already has an image with this URL.
    pub fn add_detail_image(
        &self,
        item_id: i64,
        url: &str,
        order: u32,
    ) -> Result<Option<DetailImage>, StorageError> {
        let conn = self.lock()?;
        let now = Utc::now();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO detail_images (result_item_id, url, ord, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![item_id, url, order, now],
        )?;
        if inserted == 0 {
            return Ok(None);
        }
        Ok(Some(DetailImage {
            id: conn.last_insert_rowid(),
            result_item_id: item_id,
            url: url.to_string(),
            section: None,
            category: None,
            description: String::new(),
            order,
            is_analyzed: false,
            created_at: now,
        }))
    }

    pub fn list_images(&self, item_id: i64) -> Result<Vec<DetailImage>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {IMAGE_COLUMNS} FROM detail_images WHERE result_item_id = ?1
             ORDER BY section, ord, created_at"
        ))?;
        let rows = stmt.query_map(params![item_id], map_image)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn images_in_group(
        &self,
        item_id: i64,
        section: u32,
        category: DetailCategory,
    ) -> Result<Vec<DetailImage>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {IMAGE_COLUMNS} FROM detail_images
             WHERE result_item_id = ?1 AND section = ?2 AND category = ?3
             ORDER BY ord, created_at"
        ))?;
        let rows = stmt.query_map(params![item_id, section, category.as_str()], map_image)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Images grouped by (section, category), ordered by section, category, order.
    pub fn image_groups(&self, item_id: i64) -> Result<Vec<ImageGroup>, StorageError> {
        let images = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {IMAGE_COLUMNS} FROM detail_images WHERE result_item_id = ?1
                 ORDER BY section, category, ord"
            ))?;
            let rows = stmt.query_map(params![item_id], map_image)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut groups: Vec<ImageGroup> = Vec::new();
        for image in images {
            match groups.last_mut() {
                Some(group)
                    if group.section == image.section && group.category == image.category =>
                {
                    group.images.push(image);
                    group.image_count += 1;
                }
                _ => groups.push(ImageGroup {
                    section: image.section,
                    category: image.category,
                    images: vec![image],
                    image_count: 1,
                }),
            }
        }
        Ok(groups)
    }

    /// Applies updates to images of `item_id`; ids belonging elsewhere are skipped.
    pub fn bulk_update_images(
        &self,
        item_id: i64,
        updates: &[ImageUpdate],
    ) -> Result<usize, StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut updated = 0usize;
        for update in updates {
            let changed = tx.execute(
                "UPDATE detail_images
                 SET section = ?1,
                     category = ?2,
                     ord = COALESCE(?3, ord),
                     description = COALESCE(?4, description)
                 WHERE id = ?5 AND result_item_id = ?6",
                params![
                    update.section,
                    update.category.as_str(),
                    update.order,
                    update.description,
                    update.id,
                    item_id,
                ],
            )?;
            updated += changed;
        }
        tx.commit()?;
        Ok(updated)
    }

    // -------- reviews --------

    /// Returns `false` when the review was already stored for this item and type.
    pub fn add_review(&self, item_id: i64, review: &NewReview) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO reviews (
                result_item_id, review_id, username, content, rating,
                review_type, date, helpful_count, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                item_id,
                &review.review_id,
                &review.username,
                &review.content,
                review.rating,
                review.review_type.as_str(),
                &review.date,
                review.helpful_count,
                Utc::now(),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn list_reviews(&self, item_id: i64) -> Result<Vec<Review>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE result_item_id = ?1 ORDER BY date DESC"
        ))?;
        let rows = stmt.query_map(params![item_id], |row| {
            Ok(Review {
                id: row.get(0)?,
                result_item_id: row.get(1)?,
                fields: NewReview {
                    review_id: row.get(2)?,
                    username: row.get(3)?,
                    content: row.get(4)?,
                    rating: row.get(5)?,
                    review_type: parse_column(row, 6, ReviewType::from_str)?,
                    date: row.get(7)?,
                    helpful_count: row.get(8)?,
                },
                created_at: row.get(9)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    // -------- analyses --------

    /// Returns the analysis for (item, section, category), creating it from
    /// `defaults` when missing. The flag is `true` when a row was created.
    pub fn get_or_create_analysis(
        &self,
        item_id: i64,
        section: u32,
        category: DetailCategory,
        defaults: NewAnalysis,
    ) -> Result<(AnalysisResult, bool), StorageError> {
        let conn = self.lock()?;
        let existing = conn
            .query_row(
                &format!(
                    "SELECT {ANALYSIS_COLUMNS} FROM analysis_results
                     WHERE result_item_id = ?1 AND section = ?2 AND category = ?3"
                ),
                params![item_id, section, category.as_str()],
                map_analysis,
            )
            .optional()?;
        if let Some(analysis) = existing {
            return Ok((analysis, false));
        }

        let now = Utc::now();
        let json = serde_json::to_string(&defaults.result_json)?;
        conn.execute(
            "INSERT INTO analysis_results (
                result_item_id, section, category, result_json, prompt_used,
                model_used, status, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                item_id,
                section,
                category.as_str(),
                json,
                &defaults.prompt_used,
                &defaults.model_used,
                AnalysisStatus::Pending.as_str(),
                now,
            ],
        )?;
        Ok((
            AnalysisResult {
                id: conn.last_insert_rowid(),
                result_item_id: item_id,
                section,
                category,
                result_json: defaults.result_json,
                prompt_used: defaults.prompt_used,
                model_used: defaults.model_used,
                processing_time: None,
                confidence_score: None,
                status: AnalysisStatus::Pending,
                created_at: now,
            },
            true,
        ))
    }

    pub fn list_analyses(&self, item_id: i64) -> Result<Vec<AnalysisResult>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ANALYSIS_COLUMNS} FROM analysis_results WHERE result_item_id = ?1
             ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map(params![item_id], map_analysis)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn set_analysis_status(
        &self,
        analysis_id: i64,
        status: AnalysisStatus,
    ) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE analysis_results SET status = ?1 WHERE id = ?2",
            params![status.as_str(), analysis_id],
        )?;
        Ok(())
    }

    pub fn complete_analysis(
        &self,
        analysis_id: i64,
        result_json: &Value,
        processing_time: f64,
    ) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE analysis_results
             SET result_json = ?1, processing_time = ?2, status = ?3
             WHERE id = ?4",
            params![
                serde_json::to_string(result_json)?,
                processing_time,
                AnalysisStatus::Completed.as_str(),
                analysis_id,
            ],
        )?;
        Ok(())
    }

    pub fn mark_images_analyzed(
        &self,
        item_id: i64,
        section: u32,
        category: DetailCategory,
    ) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE detail_images SET is_analyzed = 1
             WHERE result_item_id = ?1 AND section = ?2 AND category = ?3",
            params![item_id, section, category.as_str()],
        )?;
        Ok(())
    }

    // -------- prompts --------

    pub fn prompt_for_category(
        &self,
        category: DetailCategory,
    ) -> Result<Option<String>, StorageError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT prompt FROM prompts WHERE category = ?1",
                params![category.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Puts an existing analysis back to pending with fresh inputs.
    pub fn reset_analysis(
        &self,
        analysis_id: i64,
        fresh: &NewAnalysis,
    ) -> Result<AnalysisResult, StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE analysis_results
             SET result_json = ?1, prompt_used = ?2, model_used = ?3,
                 processing_time = NULL, status = ?4
             WHERE id = ?5",
            params![
                serde_json::to_string(&fresh.result_json)?,
                &fresh.prompt_used,
                &fresh.model_used,
                AnalysisStatus::Pending.as_str(),
                analysis_id,
            ],
        )?;
        Ok(conn.query_row(
            &format!("SELECT {ANALYSIS_COLUMNS} FROM analysis_results WHERE id = ?1"),
            params![analysis_id],
            map_analysis,
        )?)
    }
}

fn default_prompt(category: DetailCategory) -> String {
    format!(
        "These images are the `{}` section of a product detail page. \
         Summarize what they communicate to a shopper and list the key selling points. \
         Respond in JSON with `summary` and `key_points`.",
        category.label()
    )
}

fn parse_column<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| rusqlite::Error::InvalidColumnType(idx, raw, Type::Text))
}

fn map_item(row: &Row<'_>) -> rusqlite::Result<ResultItem> {
    let fields = NewResultItem {
        seller: row.get(2)?,
        product: row.get(3)?,
        original_price: row.get(4)?,
        sale_price: row.get(5)?,
        discount: row.get(6)?,
        shipping: row.get(7)?,
        review_count: row.get(8)?,
        rating: row.get(9)?,
        product_url: row.get(10)?,
    };
    let discount_percentage = ResultItem::discount_percentage(&fields);
    Ok(ResultItem {
        id: row.get(0)?,
        result_id: row.get(1)?,
        fields,
        analysis_status: parse_column(row, 11, AnalysisStatus::from_str)?,
        starred: row.get(12)?,
        discount_percentage,
        created_at: row.get::<_, DateTime<Utc>>(13)?,
    })
}

fn map_image(row: &Row<'_>) -> rusqlite::Result<DetailImage> {
    let category: Option<String> = row.get(4)?;
    Ok(DetailImage {
        id: row.get(0)?,
        result_item_id: row.get(1)?,
        url: row.get(2)?,
        section: row.get(3)?,
        category: category.as_deref().and_then(DetailCategory::from_str),
        description: row.get(5)?,
        order: row.get(6)?,
        is_analyzed: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn map_analysis(row: &Row<'_>) -> rusqlite::Result<AnalysisResult> {
    let raw_json: String = row.get(4)?;
    Ok(AnalysisResult {
        id: row.get(0)?,
        result_item_id: row.get(1)?,
        section: row.get(2)?,
        category: parse_column(row, 3, DetailCategory::from_str)?,
        // Stored text that is not JSON is surfaced as a string value.
        result_json: serde_json::from_str(&raw_json).unwrap_or(Value::String(raw_json)),
        prompt_used: row.get(5)?,
        model_used: row.get(6)?,
        processing_time: row.get(7)?,
        confidence_score: row.get(8)?,
        status: parse_column(row, 9, AnalysisStatus::from_str)?,
        created_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> (Store, i64) {
        let store = Store::in_memory().expect("store");
        let search = store
            .create_search("user-1", Channel::Naver, "iphone")
            .expect("search");
        let result = store.create_result(search.id).expect("result");
        let item = store
            .create_result_item(
                result.id,
                &NewResultItem {
                    seller: "Apple Store".into(),
                    product: "iPhone 16".into(),
                    original_price: Some(1_250_000.0),
                    sale_price: Some(1_100_000.0),
                    review_count: 12,
                    rating: Some(4.8),
                    product_url: Some("https://smartstore.naver.com/apple/products/123".into()),
                    ..Default::default()
                },
            )
            .expect("item");
        (store, item.id)
    }

    #[test]
    fn search_roundtrip_and_result_count() {
        let store = Store::in_memory().unwrap();
        let search = store.create_search("u", Channel::Naver, "laptop").unwrap();
        store.set_result_count(search.id, 5).unwrap();
        let loaded = store.get_search(search.id).unwrap();
        assert_eq!(loaded.keyword, "laptop");
        assert_eq!(loaded.result_count, 5);
        assert_eq!(loaded.channel, Channel::Naver);
    }

    #[test]
    fn missing_search_is_not_found() {
        let store = Store::in_memory().unwrap();
        let err = store.get_search(99).unwrap_err();
        assert!(matches!(err, StorageError::NotFound("search")));
    }

    #[test]
    fn duplicate_detail_image_is_ignored() {
        let (store, item_id) = seeded();
        let url = "https://cdn.example/product_details/123_1.jpg";
        assert!(store.add_detail_image(item_id, url, 0).unwrap().is_some());
        assert!(store.add_detail_image(item_id, url, 1).unwrap().is_none());
        assert_eq!(store.list_images(item_id).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_review_per_type_is_ignored() {
        let (store, item_id) = seeded();
        let mut review = NewReview {
            review_id: "r-1".into(),
            username: "buyer".into(),
            content: "great".into(),
            rating: 5.0,
            review_type: ReviewType::Top,
            date: "2025-08-01T10:00:00.000+00:00".into(),
            helpful_count: 3,
        };
        assert!(store.add_review(item_id, &review).unwrap());
        assert!(!store.add_review(item_id, &review).unwrap());
        review.review_type = ReviewType::Worst;
        assert!(store.add_review(item_id, &review).unwrap());
        assert_eq!(store.list_reviews(item_id).unwrap().len(), 2);
    }

    #[test]
    fn bulk_update_and_grouping() {
        let (store, item_id) = seeded();
        let a = store.add_detail_image(item_id, "https://c/a.png", 0).unwrap().unwrap();
        let b = store.add_detail_image(item_id, "https://c/b.png", 1).unwrap().unwrap();
        let c = store.add_detail_image(item_id, "https://c/c.png", 2).unwrap().unwrap();

        let updates = vec![
            ImageUpdate {
                id: a.id,
                section: 1,
                category: DetailCategory::ProductDescription,
                order: Some(1),
                description: Some("hero".into()),
            },
            ImageUpdate {
                id: b.id,
                section: 1,
                category: DetailCategory::ProductDescription,
                order: Some(0),
                description: None,
            },
            ImageUpdate {
                id: c.id,
                section: 2,
                category: DetailCategory::SizeChart,
                order: None,
                description: None,
            },
            ImageUpdate {
                id: 9999,
                section: 3,
                category: DetailCategory::Other,
                order: None,
                description: None,
            },
        ];
        assert_eq!(store.bulk_update_images(item_id, &updates).unwrap(), 3);

        let groups = store.image_groups(item_id).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].section, Some(1));
        assert_eq!(groups[0].image_count, 2);
        assert_eq!(groups[0].images[0].url, "https://c/b.png");
        assert_eq!(groups[0].images[1].description, "hero");
        assert_eq!(groups[1].category, Some(DetailCategory::SizeChart));

        let in_group = store
            .images_in_group(item_id, 2, DetailCategory::SizeChart)
            .unwrap();
        assert_eq!(in_group.len(), 1);
    }

    #[test]
    fn analysis_get_or_create_is_unique_per_group() {
        let (store, item_id) = seeded();
        let defaults = NewAnalysis {
            model_used: "gpt-4".into(),
            prompt_used: "describe".into(),
            result_json: json!({"status": "pending", "image_urls": ["https://c/a.png"]}),
        };
        let (first, created) = store
            .get_or_create_analysis(item_id, 1, DetailCategory::Other, defaults.clone())
            .unwrap();
        assert!(created);
        let (second, created_again) = store
            .get_or_create_analysis(item_id, 1, DetailCategory::Other, defaults)
            .unwrap();
        assert!(!created_again);
        assert_eq!(first.id, second.id);
        assert_eq!(second.result_json["image_urls"][0], "https://c/a.png");

        store
            .complete_analysis(first.id, &json!({"analysis": "ok"}), 1.25)
            .unwrap();
        let analyses = store.list_analyses(item_id).unwrap();
        assert_eq!(analyses[0].status, AnalysisStatus::Completed);
        assert_eq!(analyses[0].processing_time, Some(1.25));
    }

    #[test]
    fn deleting_result_cascades_to_items() {
        let store = Store::in_memory().unwrap();
        let search = store.create_search("u", Channel::Naver, "mug").unwrap();
        let result = store.create_result(search.id).unwrap();
        let item = store
            .create_result_item(result.id, &NewResultItem::default())
            .unwrap();
        store.delete_result(result.id).unwrap();
        assert!(store.get_result_item(item.id).is_err());
        assert_eq!(store.count_results(search.id).unwrap(), 0);
    }

    #[test]
    fn prompts_are_seeded_per_category() {
        let store = Store::in_memory().unwrap();
        let seeded = store
            .prompt_for_category(DetailCategory::Ingredients)
            .unwrap()
            .unwrap();
        assert!(seeded.contains("Ingredients"));
    }

    #[test]
    fn reset_analysis_returns_row_to_pending() {
        let store = Store::in_memory().unwrap();
        let search = store.create_search("u", Channel::Naver, "mug").unwrap();
        let result = store.create_result(search.id).unwrap();
        let item = store
            .create_result_item(result.id, &NewResultItem::default())
            .unwrap();
        let (analysis, created) = store
            .get_or_create_analysis(
                item.id,
                1,
                DetailCategory::Warranty,
                NewAnalysis {
                    model_used: "gpt-4".into(),
                    prompt_used: "old".into(),
                    result_json: serde_json::json!({"image_urls": ["https://cdn/a.png"]}),
                },
            )
            .unwrap();
        assert!(created);
        store
            .complete_analysis(analysis.id, &serde_json::json!({"status": "completed"}), 1.5)
            .unwrap();

        let reset = store
            .reset_analysis(
                analysis.id,
                &NewAnalysis {
                    model_used: "gpt-4".into(),
                    prompt_used: "new".into(),
                    result_json: serde_json::json!({"image_urls": ["https://cdn/b.png"]}),
                },
            )
            .unwrap();
        assert_eq!(reset.id, analysis.id);
        assert_eq!(reset.status, AnalysisStatus::Pending);
        assert_eq!(reset.prompt_used, "new");
        assert_eq!(reset.result_json["image_urls"][0], "https://cdn/b.png");
        assert!(reset.processing_time.is_none());
    }
}
