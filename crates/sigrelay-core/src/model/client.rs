use async_trait::async_trait;

use crate::{catalog::TextProvider, messaging::types::GeneratedImage, Result};

use super::types::{CompletionRequest, ImageRequest};

/// Text-completion backend (Anthropic, Gemini, ...).
///
/// Implementations map transport failures to `Error::Provider` and policy
/// refusals to `Error::ContentPolicy`.
#[async_trait]
pub trait TextModel: Send + Sync {
    fn provider(&self) -> TextProvider;

    async fn complete(&self, req: CompletionRequest) -> Result<String>;
}

/// Image-generation backend.
#[async_trait]
pub trait ImageModel: Send + Sync {
    async fn generate(&self, req: ImageRequest) -> Result<GeneratedImage>;
}
