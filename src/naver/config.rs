use std::{env, time::Duration};

pub const DEFAULT_SCRAPEDO_BASE: &str = "http://api.scrape.do/";
pub const DEFAULT_SEARCH_URL: &str =
    "https://search.shopping.naver.com/ns/v1/search/paged-composite-cards";
pub const DEFAULT_CHANNEL_LOOKUP_URL: &str =
    "https://search.shopping.naver.com/ns/v1/channel-products/by-ids";
pub const DEFAULT_SMARTSTORE_URL: &str = "https://smartstore.naver.com";
pub const DEFAULT_CONTENTS_ID: &str = "10824611867";
pub const DEFAULT_HOME_URL: &str = "https://naver.com/";
pub const SEARCH_REFERER_BASE: &str = "https://search.shopping.naver.com/ns/search?query=";
pub const SMARTSTORE_ORIGIN: &str = "https://smartstore.naver.com";

pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36 Edg/138.0.0.0";

/// Headers forwarded with the search API call.
pub const SEARCH_HEADERS: &[(&str, &str)] = &[
    ("accept", "application/json, text/plain, */*"),
    ("accept-language", "en-US,en;q=0.9"),
    ("content-type", "application/json"),
    ("priority", "u=1, i"),
    (
        "sec-ch-ua",
        "\"Not)A;Brand\";v=\"8\", \"Chromium\";v=\"138\", \"Microsoft Edge\";v=\"138\"",
    ),
    ("sec-ch-ua-arch", "\"x86\""),
    ("sec-ch-ua-bitness", "64"),
    ("sec-ch-ua-form-factors", "\"Desktop\""),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"Windows\""),
    ("sec-ch-ua-platform-version", "\"10.0.0\""),
    ("sec-ch-ua-wow64", "?0"),
    ("sec-fetch-dest", "empty"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-site", "same-origin"),
    ("user-agent", DESKTOP_USER_AGENT),
];

/// Headers for the channel lookup, which is a top-level navigation.
pub const CHANNEL_LOOKUP_HEADERS: &[(&str, &str)] = &[
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
    ),
    ("accept-language", "en-US,en;q=0.9"),
    ("cache-control", "max-age=0"),
    ("priority", "u=0, i"),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"Windows\""),
    ("sec-fetch-dest", "document"),
    ("sec-fetch-mode", "navigate"),
    ("sec-fetch-site", "none"),
    ("sec-fetch-user", "?1"),
    ("upgrade-insecure-requests", "1"),
    (
        "user-agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36",
    ),
];

pub const REVIEW_HEADERS: &[(&str, &str)] = &[
    ("accept", "application/json, text/plain, */*"),
    ("accept-language", "en-US,en;q=0.9"),
    ("content-type", "application/json"),
    ("origin", SMARTSTORE_ORIGIN),
    ("priority", "u=1, i"),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"Windows\""),
    ("sec-fetch-dest", "empty"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-site", "same-origin"),
    ("user-agent", DESKTOP_USER_AGENT),
    ("x-client-version", "20250723205012"),
];

#[derive(Debug, Clone)]
pub struct NaverConfig {
    pub scrape_do_base: String,
    pub scrape_do_token: Option<String>,
    pub search_url: String,
    pub channel_lookup_url: String,
    pub smartstore_url: String,
    pub contents_id: String,
    pub num_results: usize,
    pub search_page_size: u32,
    pub review_page_size: u32,
}

impl Default for NaverConfig {
    fn default() -> Self {
        Self {
            scrape_do_base: DEFAULT_SCRAPEDO_BASE.into(),
            scrape_do_token: None,
            search_url: DEFAULT_SEARCH_URL.into(),
            channel_lookup_url: DEFAULT_CHANNEL_LOOKUP_URL.into(),
            smartstore_url: DEFAULT_SMARTSTORE_URL.into(),
            contents_id: DEFAULT_CONTENTS_ID.into(),
            num_results: 5,
            search_page_size: 50,
            review_page_size: 20,
        }
    }
}

impl NaverConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            scrape_do_base: env_or("SCRAPEDO_BASE_URL", defaults.scrape_do_base),
            scrape_do_token: env::var("SCRAPEDO_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            search_url: env_or("NAVER_SEARCH_URL", defaults.search_url),
            channel_lookup_url: env_or("NAVER_CHANNEL_LOOKUP_URL", defaults.channel_lookup_url),
            smartstore_url: env_or("NAVER_SMARTSTORE_URL", defaults.smartstore_url)
                .trim_end_matches('/')
                .to_string(),
            contents_id: env_or("NAVER_CONTENTS_ID", defaults.contents_id),
            num_results: env_parse("SEARCH_NUM_RESULTS")
                .filter(|v: &usize| *v > 0)
                .unwrap_or(defaults.num_results),
            search_page_size: env_parse("SEARCH_PAGE_SIZE")
                .filter(|v: &u32| *v > 0)
                .unwrap_or(defaults.search_page_size),
            review_page_size: env_parse("REVIEW_PAGE_SIZE")
                .filter(|v: &u32| *v > 0)
                .unwrap_or(defaults.review_page_size),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub headless: bool,
    pub chrome_path: Option<String>,
    pub proxy_server: Option<String>,
    pub scrapeops_url: String,
    pub scrapeops_key: Option<String>,
    pub scroll_rounds: u32,
    pub scroll_pause: Duration,
    pub settle: Duration,
    pub navigation_timeout: Duration,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: false,
            chrome_path: None,
            proxy_server: None,
            scrapeops_url: "https://headers.scrapeops.io/v1/user-agents".into(),
            scrapeops_key: None,
            scroll_rounds: 5,
            scroll_pause: Duration::from_millis(2000),
            settle: Duration::from_secs(30),
            navigation_timeout: Duration::from_secs(60),
        }
    }
}

impl BrowserSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            headless: env::var("BROWSER_HEADLESS")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(defaults.headless),
            chrome_path: env::var("CHROME_PATH").ok().filter(|v| !v.is_empty()),
            proxy_server: env::var("PROXY_SERVER").ok().filter(|v| !v.is_empty()),
            scrapeops_url: env_or("SCRAPEOPS_URL", defaults.scrapeops_url),
            scrapeops_key: env::var("SCRAPEOPS_API_KEY").ok().filter(|v| !v.is_empty()),
            scroll_rounds: env_parse("COOKIE_SCROLL_ROUNDS").unwrap_or(defaults.scroll_rounds),
            scroll_pause: env_parse("COOKIE_SCROLL_PAUSE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.scroll_pause),
            settle: env_parse("COOKIE_SETTLE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.settle),
            navigation_timeout: env_parse("COOKIE_NAV_TIMEOUT_SECS")
                .filter(|v: &u64| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.navigation_timeout),
        }
    }
}

fn env_or(key: &str, fallback: String) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(fallback)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}
