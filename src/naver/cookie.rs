//! Session cookie capture through a real Chromium instance.
//!
//! The marketplace only accepts API calls that carry the cookie its own
//! front-end sends on lazy-load requests, so we browse the home page like a
//! visitor and record that header.

use super::CookieSource;
use super::config::{BrowserSettings, DEFAULT_HOME_URL, DESKTOP_USER_AGENT};
use crate::http::build_client;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetGeolocationOverrideParams, SetLocaleOverrideParams, SetTimezoneOverrideParams,
    SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventRequestWillBeSent, EventRequestWillBeSentExtraInfo, Headers,
    SetExtraHttpHeadersParams,
};
use chromiumoxide::Page;
use eyre::WrapErr;
use futures::StreamExt;
use rand::seq::IndexedRandom;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const ACCEPT_LANGUAGE: &str = "ko-KR,ko;q=0.9";
const LATITUDE: f64 = 35.23417;
const LONGITUDE: f64 = 128.88111;
const SCROLL_SCRIPT: &str = "window.scrollBy(0, 2000)";
const LISTENER_DRAIN: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("browser error: {0}")]
    Browser(String),
    #[error("navigation timed out after {0:?}")]
    Timeout(Duration),
    #[error("no lazy-load request carried a cookie header")]
    NotCaptured,
}

/// Case-insensitive lookup of a non-empty `cookie` header in a CDP header map.
pub fn cookie_header(headers: &Value) -> Option<String> {
    headers
        .as_object()?
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("cookie"))
        .and_then(|(_, value)| value.as_str())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Requests seen so far and the most recent cookie captured from them.
#[derive(Debug, Default)]
pub struct CookieCapture {
    lazy_requests: HashSet<String>,
    cookie: Option<String>,
}

impl CookieCapture {
    pub fn on_request(&mut self, request_id: &str, url: &str, headers: &Value) {
        if !url.contains("lazy") {
            return;
        }
        self.lazy_requests.insert(request_id.to_string());
        if let Some(cookie) = cookie_header(headers) {
            self.cookie = Some(cookie);
        }
    }

    // Cookies are often only visible on the extra-info event.
    pub fn on_extra_info(&mut self, request_id: &str, headers: &Value) {
        if !self.lazy_requests.contains(request_id) {
            return;
        }
        if let Some(cookie) = cookie_header(headers) {
            self.cookie = Some(cookie);
        }
    }

    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }
}

#[derive(Debug, Default, Deserialize)]
struct UserAgentList {
    #[serde(default)]
    result: Vec<String>,
}

/// Random desktop user agents from the ScrapeOps header API.
#[derive(Clone)]
pub struct UserAgentSource {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl UserAgentSource {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: build_client(),
            url: url.into(),
            api_key,
        }
    }

    /// Falls back to a fixed desktop agent when the API is unavailable.
    pub async fn fetch(&self) -> String {
        let Some(key) = self.api_key.as_deref() else {
            return DESKTOP_USER_AGENT.to_string();
        };
        let response = self
            .client
            .get(&self.url)
            .query(&[("api_key", key)])
            .send()
            .await;
        let list = match response {
            Ok(resp) if resp.status().is_success() => {
                resp.json::<UserAgentList>().await.unwrap_or_default()
            }
            Ok(resp) => {
                warn!(target = "scout.naver", status = resp.status().as_u16(), "user_agent_fetch_rejected");
                UserAgentList::default()
            }
            Err(err) => {
                warn!(target = "scout.naver", error = %err, "user_agent_fetch_failed");
                UserAgentList::default()
            }
        };
        list.result
            .choose(&mut rand::rng())
            .cloned()
            .unwrap_or_else(|| DESKTOP_USER_AGENT.to_string())
    }
}

pub struct CookieExtractor {
    settings: BrowserSettings,
    home_url: String,
    user_agents: UserAgentSource,
}

impl CookieExtractor {
    pub fn new(settings: BrowserSettings, home_url: impl Into<String>) -> Self {
        let user_agents =
            UserAgentSource::new(settings.scrapeops_url.clone(), settings.scrapeops_key.clone());
        Self {
            settings,
            home_url: home_url.into(),
            user_agents,
        }
    }

    pub fn from_env() -> Self {
        let home = std::env::var("NAVER_HOME_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HOME_URL.to_string());
        Self::new(BrowserSettings::from_env(), home)
    }

    /// Browses `url` and returns the cookie header of its lazy-load requests.
    pub async fn extract_cookies(&self, url: &str) -> Result<String, CookieError> {
        let user_agent = self.user_agents.fetch().await;
        let (mut browser, handler) = self
            .launch()
            .await
            .map_err(|err| CookieError::Browser(format!("{err:#}")))?;

        let outcome = self.capture(&browser, url, &user_agent).await;

        if let Err(err) = browser.close().await {
            debug!(target = "scout.naver", error = %err, "browser_close_failed");
        }
        handler.abort();

        let cookie = outcome?;
        info!(target = "scout.naver", url, cookie_len = cookie.len(), "cookie_captured");
        Ok(cookie)
    }

    async fn launch(&self) -> eyre::Result<(Browser, JoinHandle<()>)> {
        let mut builder = BrowserConfig::builder()
            .window_size(1280, 720)
            .request_timeout(self.settings.navigation_timeout);
        if !self.settings.headless {
            builder = builder.with_head();
        }
        if let Some(path) = self.settings.chrome_path.as_deref() {
            builder = builder.chrome_executable(path);
        }
        if let Some(proxy) = self.settings.proxy_server.as_deref() {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }
        let config = builder
            .build()
            .map_err(|err| eyre::eyre!("invalid browser config: {err}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .wrap_err("failed to launch browser")?;
        let task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(target = "scout.naver", error = %err, "browser_handler_error");
                }
            }
        });
        Ok((browser, task))
    }

    async fn capture(
        &self,
        browser: &Browser,
        url: &str,
        user_agent: &str,
    ) -> Result<String, CookieError> {
        let page = browser.new_page("about:blank").await.map_err(browser_error)?;
        emulate_korean_visitor(&page, user_agent)
            .await
            .map_err(|err| CookieError::Browser(format!("{err:#}")))?;

        let capture = Arc::new(Mutex::new(CookieCapture::default()));
        let listeners = listen_for_cookies(&page, capture.clone()).await?;

        let browsed = self.browse(&page, url).await;
        stop_listeners(listeners, LISTENER_DRAIN).await;
        browsed?;

        let guard = capture
            .lock()
            .map_err(|_| CookieError::Browser("capture lock poisoned".into()))?;
        guard.cookie().map(str::to_string).ok_or(CookieError::NotCaptured)
    }

    async fn browse(&self, page: &Page, url: &str) -> Result<(), CookieError> {
        let timeout = self.settings.navigation_timeout;
        tokio::time::timeout(timeout, page.goto(url))
            .await
            .map_err(|_| CookieError::Timeout(timeout))?
            .map_err(browser_error)?;

        self.scroll(page).await;
        tokio::time::timeout(timeout, page.reload())
            .await
            .map_err(|_| CookieError::Timeout(timeout))?
            .map_err(browser_error)?;
        tokio::time::sleep(self.settings.settle).await;
        self.scroll(page).await;
        Ok(())
    }

    async fn scroll(&self, page: &Page) {
        for _ in 0..self.settings.scroll_rounds {
            if let Err(err) = page.evaluate(SCROLL_SCRIPT).await {
                debug!(target = "scout.naver", error = %err, "scroll_failed");
            }
            tokio::time::sleep(self.settings.scroll_pause).await;
        }
    }
}

#[async_trait]
impl CookieSource for CookieExtractor {
    async fn session_cookie(&self) -> Result<String, CookieError> {
        self.extract_cookies(&self.home_url).await
    }
}

async fn emulate_korean_visitor(page: &Page, user_agent: &str) -> eyre::Result<()> {
    let user_agent = SetUserAgentOverrideParams::builder()
        .user_agent(user_agent)
        .accept_language(ACCEPT_LANGUAGE)
        .build()
        .map_err(|err| eyre::eyre!(err))?;
    page.execute(user_agent).await.wrap_err("user agent override")?;
    page.execute(SetTimezoneOverrideParams::new("Asia/Seoul"))
        .await
        .wrap_err("timezone override")?;
    page.execute(SetLocaleOverrideParams::builder().locale("ko-KR").build())
        .await
        .wrap_err("locale override")?;
    page.execute(
        SetGeolocationOverrideParams::builder()
            .latitude(LATITUDE)
            .longitude(LONGITUDE)
            .accuracy(100.0)
            .build(),
    )
    .await
    .wrap_err("geolocation override")?;
    page.execute(SetExtraHttpHeadersParams::new(Headers::new(
        json!({ "Accept-Language": ACCEPT_LANGUAGE }),
    )))
    .await
    .wrap_err("extra headers")?;
    page.execute(EnableParams::default())
        .await
        .wrap_err("network domain")?;
    Ok(())
}

async fn listen_for_cookies(
    page: &Page,
    capture: Arc<Mutex<CookieCapture>>,
) -> Result<Vec<JoinHandle<()>>, CookieError> {
    let mut requests = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(browser_error)?;
    let mut extra = page
        .event_listener::<EventRequestWillBeSentExtraInfo>()
        .await
        .map_err(browser_error)?;

    let on_request = capture.clone();
    let request_task = tokio::spawn(async move {
        while let Some(event) = requests.next().await {
            if let Ok(mut capture) = on_request.lock() {
                capture.on_request(
                    event.request_id.inner(),
                    &event.request.url,
                    event.request.headers.inner(),
                );
            }
        }
    });
    let extra_task = tokio::spawn(async move {
        while let Some(event) = extra.next().await {
            if let Ok(mut capture) = capture.lock() {
                capture.on_extra_info(event.request_id.inner(), event.headers.inner());
            }
        }
    });
    Ok(vec![request_task, extra_task])
}

/// Gives listeners `grace` to drain buffered events, then aborts them.
async fn stop_listeners(listeners: Vec<JoinHandle<()>>, grace: Duration) {
    tokio::time::sleep(grace).await;
    for listener in listeners {
        listener.abort();
    }
}

fn browser_error(err: chromiumoxide::error::CdpError) -> CookieError {
    CookieError::Browser(err.to_string())
}
