use reqwest::{Client, Proxy};
use std::time::Duration;

pub fn build_client() -> Client {
    builder().build().unwrap_or_else(|_| Client::new())
}

/// Client with its own total timeout, read from `env_var`.
///
/// Slow upstreams (the unblocker, vision models) use this instead of the
/// shared `HTTP_TIMEOUT_SECS`.
pub fn build_client_with_timeout(env_var: &str, default_secs: u64) -> Client {
    let secs = env_secs(std::env::var(env_var).ok().as_deref(), default_secs);
    builder()
        .timeout(Duration::from_secs(secs))
        .build()
        .unwrap_or_else(|_| build_client())
}

fn env_secs(raw: Option<&str>, default_secs: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(default_secs)
}

/// Client routed through the residential proxy when one is configured.
pub fn build_proxied_client(proxy: Option<&ProxyConfig>) -> Client {
    let Some(proxy) = proxy else {
        return build_client();
    };
    let routed = Proxy::all(proxy.url()).map(|p| match proxy.credentials() {
        Some((user, pass)) => p.basic_auth(user, pass),
        None => p,
    });
    match routed {
        Ok(p) => builder()
            .proxy(p)
            .build()
            .unwrap_or_else(|_| build_client()),
        Err(err) => {
            tracing::warn!(target = "scout.http", error = %err, "proxy_config_invalid");
            build_client()
        }
    }
}

fn builder() -> reqwest::ClientBuilder {
    let timeout = env_secs(std::env::var("HTTP_TIMEOUT_SECS").ok().as_deref(), 15);
    let connect = env_secs(std::env::var("HTTP_CONNECT_TIMEOUT_SECS").ok().as_deref(), 5);
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .gzip(true)
        .brotli(true)
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("PROXY_SERVER_ADDRESS")
            .ok()
            .filter(|v| !v.trim().is_empty())?;
        let port = std::env::var("PROXY_SERVER_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())?;
        Some(Self {
            scheme: std::env::var("PROXY_TYPE").unwrap_or_else(|_| "http".into()),
            host: host.trim().to_string(),
            port,
            username: std::env::var("PROXY_USERNAME").ok().filter(|v| !v.is_empty()),
            password: std::env::var("PROXY_PASSWORD").ok().filter(|v| !v.is_empty()),
        })
    }

    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_url_uses_scheme_host_and_port() {
        let proxy = ProxyConfig {
            scheme: "http".into(),
            host: "kr.proxy.example".into(),
            port: 10001,
            username: Some("user".into()),
            password: None,
        };
        assert_eq!(proxy.url(), "http://kr.proxy.example:10001");
        assert!(proxy.credentials().is_none());
    }

    #[test]
    fn timeout_falls_back_on_missing_or_bad_values() {
        assert_eq!(env_secs(Some("90"), 15), 90);
        assert_eq!(env_secs(Some(" 120 "), 15), 120);
        assert_eq!(env_secs(None, 90), 90);
        assert_eq!(env_secs(Some("soon"), 120), 120);
        assert_eq!(env_secs(Some("0"), 90), 90);
    }
}
