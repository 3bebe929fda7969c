use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const API_KEY_HEADER: &str = "X-Scout-Key";
const DEFAULT_KEYS: &str = "demo-user:demo-key";

/// API keys mapped to users, plus the per-user rate limiter.
#[derive(Clone)]
pub struct AuthState {
    users: Arc<HashMap<String, UserRecord>>,
    limiter: Arc<TokenBuckets>,
}

/// Caller identity attached to authenticated requests.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user_id: String,
    pub api_key_id: String,
}

#[derive(Clone)]
struct UserRecord {
    user_id: String,
    api_key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        let raw = env::var("API_KEYS").unwrap_or_else(|_| DEFAULT_KEYS.to_string());
        Self {
            users: Arc::new(parse_keys(&raw)),
            limiter: Arc::new(TokenBuckets::from_env()),
        }
    }

    pub fn new(keys: &str, rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            users: Arc::new(parse_keys(keys)),
            limiter: Arc::new(TokenBuckets::new(rate_per_sec, capacity)),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.users.get(presented).map(|record| AuthContext {
            user_id: record.user_id.clone(),
            api_key_id: record.api_key_id.clone(),
        })
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "missing_api_key",
            "Provide X-Scout-Key or Bearer token",
        ));
    };

    let Some(context) = state.authenticate(&presented) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid_api_key",
            "Key not recognized",
        ));
    };

    match state.limiter.consume(&context.user_id).await {
        Ok(permit) => {
            request.extensions_mut().insert(context);
            let mut response = next.run(request).await;
            permit.apply_headers(response.headers_mut(), false);
            Ok(response)
        }
        Err(exceeded) => {
            warn!(target = "scout.api", user_id = %context.user_id, "rate_limited");
            let mut response =
                error_response(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "Too many requests");
            exceeded.apply_headers(response.headers_mut(), true);
            Ok(response)
        }
    }
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (status, Json(payload)).into_response()
}

/// Parses `user:key` pairs separated by commas.
fn parse_keys(raw: &str) -> HashMap<String, UserRecord> {
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let user_id = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let key = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (user_id, key) {
            (Some(user), Some(secret)) => {
                entries.insert(
                    secret.to_string(),
                    UserRecord {
                        user_id: user.to_string(),
                        api_key_id: format!("key-{:02}", idx + 1),
                    },
                );
            }
            _ => warn!(target = "scout.api", "ignored malformed API_KEYS entry: {trimmed}"),
        }
    }

    if entries.is_empty() {
        warn!(target = "scout.api", "API_KEYS produced no keys; falling back to demo credentials");
        entries.insert(
            "demo-key".to_string(),
            UserRecord {
                user_id: "demo-user".to_string(),
                api_key_id: "key-01".to_string(),
            },
        );
    } else {
        info!(target = "scout.api", key_count = entries.len(), "loaded API keys");
    }
    entries
}

struct TokenBuckets {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, BucketState>>,
}

impl TokenBuckets {
    fn new(rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            rate_per_sec,
            capacity,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn from_env() -> Self {
        let rate_per_sec = env::var("RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value > 0.0)
            .unwrap_or(5.0);
        let capacity = env::var("RATE_LIMIT_CAPACITY")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value >= 1.0)
            .unwrap_or(10.0);
        Self::new(rate_per_sec, capacity)
    }

    async fn consume(&self, key: &str) -> Result<RateWindow, RateWindow> {
        let mut guard = self.buckets.lock().await;
        let now = Instant::now();
        let state = guard.entry(key.to_string()).or_insert_with(|| BucketState {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            state.last_refill = now;
        }

        let granted = state.tokens >= 1.0;
        if granted {
            state.tokens -= 1.0;
        }
        let window = RateWindow {
            capacity: self.capacity,
            tokens: state.tokens,
            rate: self.rate_per_sec,
        };
        if granted { Ok(window) } else { Err(window) }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Bucket snapshot rendered into `X-RateLimit-*` headers.
#[derive(Debug, Clone)]
struct RateWindow {
    capacity: f64,
    tokens: f64,
    rate: f64,
}

impl RateWindow {
    fn reset_secs(&self) -> u64 {
        ((self.capacity - self.tokens) / self.rate).ceil().max(0.0) as u64
    }

    fn apply_headers(&self, headers: &mut http::HeaderMap, limited: bool) {
        let remaining = self.tokens.max(0.0).floor() as u64;
        insert_number(headers, "X-RateLimit-Limit", self.capacity as u64);
        insert_number(headers, "X-RateLimit-Remaining", remaining);
        insert_number(headers, "X-RateLimit-Reset", self.reset_secs());
        if limited {
            let retry = ((1.0 - self.tokens) / self.rate).ceil().max(1.0) as u64;
            insert_number(headers, "retry-after", retry);
        }
    }
}

fn insert_number(headers: &mut http::HeaderMap, name: &'static str, value: u64) {
    headers.insert(
        name,
        HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
}
