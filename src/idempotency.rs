use crate::models::SearchCreated;
use redis::AsyncCommands;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

/// Replay cache for `POST /searches`, keyed per user.
#[derive(Clone)]
pub struct IdempotencyCache {
    redis: Option<redis::Client>,
    memory: Arc<Mutex<HashMap<String, SearchCreated>>>,
    ttl_secs: u64,
}

impl IdempotencyCache {
    pub fn new(redis: Option<redis::Client>, ttl_secs: u64) -> Self {
        Self {
            redis,
            memory: Arc::new(Mutex::new(HashMap::new())),
            ttl_secs,
        }
    }

    pub fn from_env() -> Self {
        let redis = std::env::var("REDIS_URL")
            .ok()
            .and_then(|u| redis::Client::open(u).ok());
        let ttl = std::env::var("IDEMPOTENCY_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3600);
        Self::new(redis, ttl)
    }

    pub async fn get(&self, user_id: &str, key: &str) -> Option<SearchCreated> {
        let scoped = scoped_key(user_id, key);
        match &self.redis {
            Some(client) => redis_get(client, &scoped).await,
            None => self.memory.lock().await.get(&scoped).cloned(),
        }
    }

    pub async fn put(&self, user_id: &str, key: &str, value: &SearchCreated) {
        let scoped = scoped_key(user_id, key);
        match &self.redis {
            Some(client) => redis_set(client, &scoped, value, self.ttl_secs).await,
            None => {
                self.memory.lock().await.insert(scoped, value.clone());
            }
        }
    }
}

fn scoped_key(user_id: &str, key: &str) -> String {
    format!("scout:idem:{user_id}:{key}")
}

pub async fn redis_get(client: &redis::Client, key: &str) -> Option<SearchCreated> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(_) => return None,
    };
    let s: Option<String> = conn.get(key).await.ok();
    s.and_then(|v| serde_json::from_str(&v).ok())
}

pub async fn redis_set(client: &redis::Client, key: &str, value: &SearchCreated, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(key, json, ttl_secs).await;
    }
}
