use super::NaverError;
use urlencoding::encode;

/// Options for routing a marketplace URL through the unblocking API.
#[derive(Debug, Clone, Copy, Default)]
pub struct WrapOptions {
    pub geocode: Option<&'static str>,
    pub custom_headers: bool,
}

impl WrapOptions {
    /// Korean exit node with our own headers forwarded.
    pub const KOREA_WITH_HEADERS: WrapOptions = WrapOptions {
        geocode: Some("KR"),
        custom_headers: true,
    };
}

#[derive(Debug, Clone)]
pub struct ScrapeDo {
    base: String,
    token: Option<String>,
}

impl ScrapeDo {
    pub fn new(base: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base: base.into(),
            token,
        }
    }

    pub fn wrap(&self, target: &str, opts: WrapOptions) -> Result<String, NaverError> {
        let token = self
            .token
            .as_deref()
            .ok_or(NaverError::MissingCredentials("SCRAPEDO_API_KEY"))?;
        let mut url = format!(
            "{base}?token={token}&url={target}&super=true",
            base = self.base,
            token = encode(token),
            target = encode(target),
        );
        if let Some(geo) = opts.geocode {
            url.push_str("&geocode=");
            url.push_str(geo);
        }
        if opts.custom_headers {
            url.push_str("&customHeaders=true");
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_target_with_encoding_and_flags() {
        let api = ScrapeDo::new("http://api.scrape.do/", Some("tok".into()));
        let wrapped = api
            .wrap(
                "https://search.shopping.naver.com/ns/v1/x?query=a b&cursor=1",
                WrapOptions::KOREA_WITH_HEADERS,
            )
            .unwrap();
        assert!(wrapped.starts_with("http://api.scrape.do/?token=tok&url=https%3A%2F%2F"));
        assert!(wrapped.contains("query%3Da%20b%26cursor%3D1"));
        assert!(wrapped.ends_with("&super=true&geocode=KR&customHeaders=true"));
    }

    #[test]
    fn plain_wrap_has_no_geocode() {
        let api = ScrapeDo::new("https://api.scrape.do", Some("tok".into()));
        let wrapped = api
            .wrap("https://smartstore.naver.com/i/v2", WrapOptions::default())
            .unwrap();
        assert!(wrapped.ends_with("&super=true"));
    }

    #[test]
    fn missing_token_is_rejected() {
        let api = ScrapeDo::new("http://api.scrape.do/", None);
        let err = api
            .wrap("https://example.com", WrapOptions::default())
            .unwrap_err();
        assert!(matches!(err, NaverError::MissingCredentials("SCRAPEDO_API_KEY")));
    }
}
