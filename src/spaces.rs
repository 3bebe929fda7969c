use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use thiserror::Error;
use tracing::debug;

pub const DETAIL_IMAGE_PREFIX: &str = "product_details";

#[derive(Debug, Error)]
pub enum SpacesError {
    #[error("invalid storage configuration: {0}")]
    Config(String),
    #[error("upload failed: {0}")]
    Request(String),
    #[error("upload of {key} returned HTTP {status}")]
    Status { key: String, status: u16 },
}

/// Public object storage for re-hosted detail images.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores the object world-readable and returns its public URL.
    async fn put_public(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, SpacesError>;
}

#[derive(Debug, Clone)]
pub struct SpacesConfig {
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub space_name: String,
    pub cdn_endpoint: String,
    pub endpoint: Option<String>,
}

impl SpacesConfig {
    pub fn from_env() -> Option<Self> {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Some(Self {
            region: var("SPACES_REGION_NAME")?,
            access_key: var("SPACES_ACCESS_KEY")?,
            secret_key: var("SPACES_SECRET_KEY")?,
            space_name: var("SPACES_SPACE_NAME")?,
            cdn_endpoint: var("SPACES_CDN_ENDPOINT")?,
            endpoint: var("SPACES_ENDPOINT"),
        })
    }

    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}.digitaloceanspaces.com", self.region))
    }

    pub fn public_url(&self, key: &str) -> String {
        let cdn = self
            .cdn_endpoint
            .trim_start_matches("https://")
            .trim_end_matches('/');
        fix_url(&format!("https://{cdn}/{key}"))
    }
}

#[derive(Clone)]
pub struct SpacesClient {
    config: SpacesConfig,
    bucket: Box<Bucket>,
}

impl SpacesClient {
    pub fn new(config: SpacesConfig) -> Result<Self, SpacesError> {
        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .map_err(|err| SpacesError::Config(err.to_string()))?;
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint(),
        };
        let mut bucket = Bucket::new(&config.space_name, region, credentials)
            .map_err(|err| SpacesError::Config(err.to_string()))?;
        bucket.add_header("x-amz-acl", "public-read");
        Ok(Self { config, bucket })
    }

    /// `None` when the storage credentials are not configured.
    pub fn from_env() -> Option<Self> {
        let config = SpacesConfig::from_env()?;
        match Self::new(config) {
            Ok(client) => Some(client),
            Err(err) => {
                tracing::warn!(target = "scout.spaces", error = %err, "spaces_client_unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl ObjectStore for SpacesClient {
    async fn put_public(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, SpacesError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, bytes, content_type)
            .await
            .map_err(|err| SpacesError::Request(err.to_string()))?;
        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(SpacesError::Status {
                key: key.to_string(),
                status,
            });
        }
        let url = self.config.public_url(key);
        debug!(target = "scout.spaces", key, url = %url, bytes = bytes.len(), "object_uploaded");
        Ok(url)
    }
}

pub fn detail_image_key(file_name: &str) -> String {
    format!("{DETAIL_IMAGE_PREFIX}/{file_name}")
}

/// Collapses a doubled scheme such as `https://https://cdn/...`.
pub fn fix_url(url: &str) -> String {
    let mut fixed = url.to_string();
    while fixed.starts_with("https://https://") {
        fixed = fixed.replacen("https://https://", "https://", 1);
    }
    fixed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SpacesConfig {
        SpacesConfig {
            region: "sgp1".into(),
            access_key: "ak".into(),
            secret_key: "sk".into(),
            space_name: "scout".into(),
            cdn_endpoint: "scout.sgp1.cdn.digitaloceanspaces.com".into(),
            endpoint: None,
        }
    }

    #[test]
    fn fix_url_collapses_doubled_scheme() {
        assert_eq!(fix_url("https://https://cdn/x.png"), "https://cdn/x.png");
        assert_eq!(fix_url("https://cdn/x.png"), "https://cdn/x.png");
        assert_eq!(fix_url("http://cdn/x.png"), "http://cdn/x.png");
    }

    #[test]
    fn public_url_uses_cdn_host() {
        let cfg = config();
        assert_eq!(
            cfg.public_url(&detail_image_key("555_1.png")),
            "https://scout.sgp1.cdn.digitaloceanspaces.com/product_details/555_1.png"
        );
        let prefixed = SpacesConfig {
            cdn_endpoint: "https://cdn.example.com/".into(),
            ..cfg
        };
        assert_eq!(prefixed.public_url("k"), "https://cdn.example.com/k");
    }

    #[test]
    fn endpoint_defaults_to_region_host() {
        assert_eq!(config().endpoint(), "https://sgp1.digitaloceanspaces.com");
    }

    #[test]
    fn client_builds_from_config() {
        assert!(SpacesClient::new(config()).is_ok());
    }
}
