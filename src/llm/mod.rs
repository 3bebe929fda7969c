mod openai;

pub use openai::{LlmConfig, LlmError, LlmResponse, LlmUsage, OpenAiClient};

use async_trait::async_trait;

/// A model that can describe a set of images given a text prompt.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn describe(
        &self,
        model: &str,
        prompt: &str,
        image_urls: &[String],
    ) -> Result<LlmResponse, LlmError>;

    /// Model used when an analysis row does not name one.
    fn default_model(&self) -> &str;
}
